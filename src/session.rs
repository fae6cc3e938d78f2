//! Session orchestration.
//!
//! [`SessionCore`] owns the transport, the status poller and the model
//! lifecycle. It classifies every inbound payload, feeds lifecycle frames to
//! [`ModelLifecycle`], and publishes everything a front end needs as
//! [`SessionEvent`]s on a broadcast channel.
//!
//! Three background tasks run per session once [`SessionCore::start`] is
//! called: the push connection loop, the dispatcher that consumes transport
//! events in arrival order, and the status poll task. All three stop on
//! [`SessionCore::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chatlink_protocol::{ClassifyMode, InboundFrame, OutboundMessage, classify};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::lifecycle::{LifecycleEffect, Model, ModelLifecycle, PullState};
use crate::poller::StatusPoller;
use crate::transport::push::tick;
use crate::transport::{Channel, ConnectionState, InboundBody, Transport, TransportEvent};

/// Event broadcast capacity. Slow subscribers past this many events lag.
const EVENT_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A chat session against one backend.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionCore {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Transport,
    poller: StatusPoller,
    lifecycle: Mutex<ModelLifecycle>,
    active_model: Mutex<String>,
    event_tx: broadcast::Sender<SessionEvent>,
    transport_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    refresh_tx: mpsc::UnboundedSender<()>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    poll_interval: Option<Duration>,
    classify_mode: ClassifyMode,
    awaiting: AtomicBool,
    cancel: CancellationToken,
}

impl SessionCore {
    /// Build a session from `config`. Nothing connects until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if the configuration is invalid, or
    /// [`SessionError::Http`] if the HTTP client cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let client = config.http_client()?;
        let endpoints = config.endpoints()?;
        let cancel = CancellationToken::new();

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(&config, client.clone(), transport_tx, cancel.clone())?;
        let (event_tx, _event_rx) = broadcast::channel(EVENT_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                poller: StatusPoller::new(client, endpoints.status),
                lifecycle: Mutex::new(ModelLifecycle::new()),
                active_model: Mutex::new(config.default_model.trim().to_owned()),
                event_tx,
                transport_rx: Mutex::new(Some(transport_rx)),
                refresh_tx,
                refresh_rx: Mutex::new(Some(refresh_rx)),
                poll_interval: config.status_poll_interval(),
                classify_mode: config.classify_mode(),
                awaiting: AtomicBool::new(false),
                cancel,
            }),
        })
    }

    /// Open the push channel and spawn the dispatcher and status poll tasks.
    ///
    /// The model set is fetched once immediately. Must be called inside a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<()> {
        let transport_rx = lock(&self.inner.transport_rx)
            .take()
            .ok_or(SessionError::AlreadyStarted)?;
        let refresh_rx = lock(&self.inner.refresh_rx)
            .take()
            .ok_or(SessionError::AlreadyStarted)?;

        self.inner.transport.open();

        let core = self.clone();
        tokio::spawn(async move {
            core.dispatch_loop(transport_rx).await;
        });
        let core = self.clone();
        tokio::spawn(async move {
            core.poll_loop(refresh_rx).await;
        });

        tracing::info!(model = %self.active_model(), "chat session started");
        Ok(())
    }

    /// Subscribe to session events. Only events emitted after this call are
    /// received.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Send a user message to the active model.
    ///
    /// Emits [`SessionEvent::UserEcho`] and starts awaiting a reply before
    /// any network activity, then hands the message to the transport.
    /// Delivery failures arrive later as [`SessionEvent::BotMessage`]s.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyMessage`] for blank text and
    /// [`SessionError::PullInProgress`] while input is disabled.
    pub async fn send_user_message(&self, text: &str) -> Result<Channel> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if let PullState::Pulling { model, .. } = self.pull_state() {
            return Err(SessionError::PullInProgress(model));
        }

        let msg = OutboundMessage::new(text, self.active_model());
        self.emit(SessionEvent::UserEcho(text.to_owned()));
        self.set_awaiting(true);

        let channel = self.inner.transport.send(&msg).await;
        tracing::debug!(%channel, model = msg.model_name(), "user message sent");
        Ok(channel)
    }

    /// Make `name` the active model.
    ///
    /// No backend traffic happens here: the backend pulls a missing model
    /// when the first message for it arrives. Returns the model's installed
    /// flag if the model set mentions it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyModelName`] for a blank name and
    /// [`SessionError::PullInProgress`] while a pull is in flight.
    pub fn select_model(&self, name: &str) -> Result<Option<bool>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyModelName);
        }

        let installed = {
            let lifecycle = lock(&self.inner.lifecycle);
            if let Some(pulling) = lifecycle.pull_state().model() {
                return Err(SessionError::PullInProgress(pulling.to_owned()));
            }
            lifecycle.installed(name)
        };
        *lock(&self.inner.active_model) = name.to_owned();

        tracing::info!(model = name, ?installed, "model selected");
        self.emit(SessionEvent::ModelSelected {
            name: name.to_owned(),
            installed,
        });
        Ok(installed)
    }

    /// Fetch the model set now and publish it.
    ///
    /// Emits [`SessionEvent::ModelSetUpdated`], plus
    /// [`SessionEvent::ActiveModelLabel`] when the active model's installed
    /// flag changed. Pull state is never affected.
    ///
    /// # Errors
    ///
    /// Returns the poller's error if the fetch fails; the previous model set
    /// is kept.
    pub async fn refresh_status(&self) -> Result<()> {
        let status = self.inner.poller.fetch().await?;
        let models: Vec<Model> = status.models.into_iter().map(Model::from).collect();
        let active = self.active_model();

        let label = lock(&self.inner.lifecycle).replace_models(models.clone(), &active);
        self.emit(SessionEvent::ModelSetUpdated {
            models,
            backend_model: status.current_model,
        });
        if let Some(label) = label {
            self.emit(SessionEvent::ActiveModelLabel {
                name: active,
                label,
            });
        }
        Ok(())
    }

    /// Whether user input is accepted (no pull in flight).
    pub fn input_enabled(&self) -> bool {
        lock(&self.inner.lifecycle).input_enabled()
    }

    /// Current pull state.
    pub fn pull_state(&self) -> PullState {
        lock(&self.inner.lifecycle).pull_state().clone()
    }

    /// Current push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// The model outbound messages are addressed to.
    pub fn active_model(&self) -> String {
        lock(&self.inner.active_model).clone()
    }

    /// Last known model set.
    pub fn models(&self) -> Vec<Model> {
        lock(&self.inner.lifecycle).models().to_vec()
    }

    /// Stop every background task. The push channel ends up `Closed`.
    pub fn shutdown(&self) {
        tracing::info!("chat session shutting down");
        self.inner.cancel.cancel();
    }

    async fn dispatch_loop(self, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => break,
                },
            }
        }
        // The connection loop queues its final Closed state on exit.
        self.inner.transport.wait_stopped().await;
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::StateChanged(state) = event {
                self.emit(SessionEvent::TransportStateChanged(state));
            }
        }
        tracing::debug!("session dispatcher stopped");
    }

    async fn poll_loop(self, mut refresh_rx: mpsc::UnboundedReceiver<()>) {
        self.refresh_logged().await;

        let mut interval = self.inner.poll_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        if let Some(ref mut interval) = interval {
            // Skip the first immediate tick; the initial fetch already ran.
            interval.tick().await;
        }

        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                Some(()) = refresh_rx.recv() => self.refresh_logged().await,
                () = tick(&mut interval) => self.refresh_logged().await,
            }
        }
        tracing::debug!("status poll task stopped");
    }

    async fn refresh_logged(&self) {
        if let Err(e) = self.refresh_status().await {
            tracing::warn!(url = %self.inner.poller.url(), "model status refresh failed: {e}");
        }
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                self.emit(SessionEvent::TransportStateChanged(state));
            }
            TransportEvent::Inbound { channel, body } => {
                let frame = match body {
                    InboundBody::Raw(raw) => classify(&raw, self.inner.classify_mode),
                    InboundBody::Synthetic(frame) => frame,
                };
                tracing::debug!(%channel, lifecycle = frame.is_lifecycle(), "inbound frame");
                self.handle_frame(frame);
            }
        }
    }

    fn handle_frame(&self, frame: InboundFrame) {
        let frame = match frame {
            InboundFrame::Reply { text } => {
                self.set_awaiting(false);
                self.emit(SessionEvent::BotMessage(text));
                return;
            }
            lifecycle => lifecycle.with_default_model(&self.active_model()),
        };

        let effects = lock(&self.inner.lifecycle).apply(&frame);
        for effect in effects {
            self.apply_effect(effect);
        }
    }

    fn apply_effect(&self, effect: LifecycleEffect) {
        match effect {
            LifecycleEffect::PullStarted { model, text } => {
                self.emit(SessionEvent::PullStarted { model, text });
            }
            LifecycleEffect::PullResolved {
                model,
                success,
                text,
            } => {
                // A successful pull is followed by the actual reply; a failed
                // one is not.
                if !success {
                    self.set_awaiting(false);
                }
                self.emit(SessionEvent::PullResolved {
                    model,
                    success,
                    text,
                });
            }
            LifecycleEffect::InputEnabled(enabled) => {
                self.emit(SessionEvent::InputAvailability { enabled });
            }
            LifecycleEffect::Display(text) => self.emit(SessionEvent::BotMessage(text)),
            LifecycleEffect::RefreshStatus => {
                if self.inner.refresh_tx.send(()).is_err() {
                    tracing::debug!("status poll task gone; refresh dropped");
                }
            }
        }
    }

    fn set_awaiting(&self, active: bool) {
        if self.inner.awaiting.swap(active, Ordering::SeqCst) != active {
            self.emit(SessionEvent::AwaitingReply { active });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.inner.event_tx.send(event);
    }
}
