//! Message transport over the push channel with an HTTP fallback.
//!
//! [`Transport`] hides which physical channel carries a message. While the
//! push channel (WebSocket) is open, [`Transport::send`] queues the frame for
//! the background writer and returns at once. Otherwise it POSTs the same
//! payload to the fallback endpoint and waits for the response.
//!
//! Everything the transport learns is reported as a [`TransportEvent`] on a
//! single ordered channel: connection state changes, raw push frames, and
//! fallback responses. Failures never reach the caller of `send`; they become
//! synthetic replies on the same channel.

pub(crate) mod fallback;
pub(crate) mod push;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chatlink_protocol::{InboundFrame, OutboundMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::Result;
use fallback::FallbackChannel;
use push::PushContext;
pub use state::{ConnectionState, ReconnectPolicy};

/// Reply shown when a message could not be delivered at all.
pub const DELIVERY_FAILED_REPLY: &str =
    "Sorry, there was an error processing your request. Please try again.";

/// Which channel carried (or produced) a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Persistent WebSocket connection.
    Push,
    /// One-shot HTTP request/response.
    Fallback,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Payload of an inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBody {
    /// Text exactly as the backend sent it; still to be classified.
    Raw(String),
    /// A frame the transport produced itself, e.g. an error reply.
    Synthetic(InboundFrame),
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The push channel changed state.
    StateChanged(ConnectionState),
    /// A payload arrived (or a failure was converted into one).
    Inbound {
        /// Channel the payload belongs to.
        channel: Channel,
        /// The payload.
        body: InboundBody,
    },
}

/// Shared push-channel state: connection state plus the writer queue of the
/// current connection. Both change together under one lock so a sender
/// never sees `Open` without a live writer.
pub(crate) struct LinkCell {
    link: Mutex<Link>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

struct Link {
    state: ConnectionState,
    writer: Option<mpsc::UnboundedSender<String>>,
}

/// Result of trying to hand a frame to the push writer.
enum PushAttempt {
    Queued,
    WriterGone,
    NotOpen,
}

impl LinkCell {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            link: Mutex::new(Link {
                state: ConnectionState::Connecting,
                writer: None,
            }),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Link> {
        match self.link.lock() {
            Ok(l) => l,
            Err(p) => p.into_inner(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Move to `next`, installing `writer` (only meaningful for `Open`).
    /// Illegal or no-op transitions are ignored.
    pub(crate) fn transition(
        &self,
        next: ConnectionState,
        writer: Option<mpsc::UnboundedSender<String>>,
    ) {
        let mut link = self.lock();
        if !link.state.can_transition_to(next) {
            tracing::trace!(from = %link.state, to = %next, "ignoring connection transition");
            return;
        }
        link.state = next;
        link.writer = if next.is_open() { writer } else { None };
        drop(link);

        tracing::debug!(state = %next, "push channel state changed");
        self.emit(TransportEvent::StateChanged(next));
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // The receiver is gone only after the session shut down.
        let _ = self.events.send(event);
    }

    fn try_push(&self, frame: String) -> PushAttempt {
        let link = self.lock();
        match (&link.writer, link.state) {
            (Some(writer), ConnectionState::Open) => match writer.send(frame) {
                Ok(()) => PushAttempt::Queued,
                Err(_) => PushAttempt::WriterGone,
            },
            _ => PushAttempt::NotOpen,
        }
    }
}

/// Delivers outbound messages over the push channel or the fallback endpoint.
pub struct Transport {
    link: Arc<LinkCell>,
    fallback: FallbackChannel,
    push: PushContext,
    opened: AtomicBool,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Create a transport. Nothing connects until [`Transport::open`].
    ///
    /// Events are delivered on `events` in the order they happen. Background
    /// work stops when `cancel` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured endpoints are invalid.
    pub fn new(
        config: &SessionConfig,
        client: reqwest::Client,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let endpoints = config.endpoints()?;
        let link = Arc::new(LinkCell::new(events));
        Ok(Self {
            fallback: FallbackChannel::new(client, endpoints.chat),
            push: PushContext {
                url: endpoints.push,
                link: Arc::clone(&link),
                policy: config.reconnect_policy(),
                keepalive: config.keepalive_interval(),
                cancel,
            },
            link,
            opened: AtomicBool::new(false),
            push_task: Mutex::new(None),
        })
    }

    /// Start the push channel connection loop.
    ///
    /// Spawns a background task that connects, reconnects after every close
    /// according to the reconnect policy, and runs until cancelled. Calling
    /// `open` again has no effect. Must be called inside a tokio runtime.
    pub fn open(&self) {
        if self.opened.swap(true, Ordering::SeqCst) {
            tracing::debug!("push channel already opened");
            return;
        }
        let ctx = self.push.clone();
        let handle = tokio::spawn(async move {
            push::connection_loop(ctx).await;
        });
        *self.task_slot() = Some(handle);
    }

    /// Wait for the connection loop to exit after cancellation.
    ///
    /// Once this returns, the final `Closed` state has been queued on the
    /// event channel. Returns at once if the channel was never opened.
    pub(crate) async fn wait_stopped(&self) {
        let handle = self.task_slot().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("push connection task ended abnormally: {e}");
            }
        }
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.push_task.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    /// Current push channel state.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Deliver `msg` over exactly one channel and report which one.
    ///
    /// The channel is chosen from the connection state at call time. Push
    /// delivery is fire-and-forget. Fallback delivery waits for the HTTP
    /// response, which arrives as a [`TransportEvent::Inbound`]. Failures on
    /// either path are reported as synthetic replies, never returned.
    pub async fn send(&self, msg: &OutboundMessage) -> Channel {
        let frame = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to serialize outbound message: {e}");
                self.emit_failure(Channel::Push);
                return Channel::Push;
            }
        };

        match self.link.try_push(frame) {
            PushAttempt::Queued => {
                tracing::debug!(model = msg.model_name(), "message queued on push channel");
                Channel::Push
            }
            PushAttempt::WriterGone => {
                tracing::warn!("push channel writer closed before the message was queued");
                self.emit_failure(Channel::Push);
                Channel::Push
            }
            PushAttempt::NotOpen => {
                tracing::debug!(model = msg.model_name(), "push channel not open; using fallback");
                let body = self.fallback.post(msg).await;
                self.link.emit(TransportEvent::Inbound {
                    channel: Channel::Fallback,
                    body,
                });
                Channel::Fallback
            }
        }
    }

    fn emit_failure(&self, channel: Channel) {
        self.link.emit(TransportEvent::Inbound {
            channel,
            body: InboundBody::Synthetic(InboundFrame::reply(DELIVERY_FAILED_REPLY)),
        });
    }
}
