//! Push channel: WebSocket connection loop with automatic reconnection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::state::{ConnectionState, ReconnectPolicy};
use super::{Channel, InboundBody, LinkCell, TransportEvent};

/// Everything the background connection task needs.
#[derive(Clone)]
pub(crate) struct PushContext {
    pub(crate) url: Url,
    pub(crate) link: Arc<LinkCell>,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) keepalive: Option<Duration>,
    pub(crate) cancel: CancellationToken,
}

/// Why a connection ended.
#[derive(Debug)]
enum Disconnect {
    /// The connection never opened.
    ConnectFailed(String),
    /// The connection opened and later dropped.
    Lost(String),
}

/// Run the WebSocket connection loop until cancelled.
///
/// Every close schedules a reconnect after the policy's delay. There is no
/// retry limit.
pub(crate) async fn connection_loop(ctx: PushContext) {
    let mut failures: u32 = 0;

    loop {
        let outcome = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            outcome = run_connection(&ctx) => outcome,
        };

        failures = match outcome {
            Disconnect::Lost(reason) => {
                tracing::warn!(url = %ctx.url, "push channel closed: {reason}");
                1
            }
            Disconnect::ConnectFailed(reason) => {
                tracing::warn!(url = %ctx.url, attempt = failures.saturating_add(1), "push channel connect failed: {reason}");
                failures.saturating_add(1)
            }
        };
        ctx.link.transition(ConnectionState::Closed, None);

        let delay = ctx.policy.delay(failures);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling push channel reconnect");
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        ctx.link.transition(ConnectionState::Connecting, None);
    }

    ctx.link.transition(ConnectionState::Closed, None);
    tracing::info!("push channel loop stopped");
}

/// Connect once and pump frames until the connection drops.
async fn run_connection(ctx: &PushContext) -> Disconnect {
    let (ws_stream, _) = match connect_async(ctx.url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => return Disconnect::ConnectFailed(e.to_string()),
    };
    let (mut write, mut read) = ws_stream.split();

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
    ctx.link.transition(ConnectionState::Open, Some(writer_tx));
    tracing::info!(url = %ctx.url, "push channel open");

    let mut keepalive = ctx.keepalive.map(tokio::time::interval);
    if let Some(ref mut interval) = keepalive {
        // Skip the first immediate tick.
        interval.tick().await;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(len = text.len(), "push frame received");
                        ctx.link.emit(TransportEvent::Inbound {
                            channel: Channel::Push,
                            body: InboundBody::Raw(text),
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Disconnect::Lost("connection closed by server".into());
                    }
                    Some(Err(e)) => {
                        return Disconnect::Lost(format!("read error: {e}"));
                    }
                    // Binary frames are not part of the protocol; ping/pong
                    // is answered by tungstenite.
                    Some(Ok(_)) => {}
                }
            }
            Some(frame) = writer_rx.recv() => {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    return Disconnect::Lost(format!("send error: {e}"));
                }
            }
            () = tick(&mut keepalive) => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return Disconnect::Lost(format!("ping error: {e}"));
                }
            }
        }
    }
}

/// Wait for the next tick of `interval`, or forever when there is none.
pub(crate) async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
