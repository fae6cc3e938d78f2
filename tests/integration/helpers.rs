//! Shared helpers for integration tests.

use std::time::Duration;

use chatlink::config::ReconnectConfig;
use chatlink::{SessionConfig, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// How long any single wait in a test may take.
pub(crate) const WAIT: Duration = Duration::from_secs(5);

enum ServerCommand {
    Text(String),
    Close,
}

/// A local WebSocket server standing in for the backend's push endpoint.
///
/// Serves one connection at a time. Frames the client sends are queued for
/// [`PushServer::next_frame`].
pub(crate) struct PushServer {
    pub(crate) url: String,
    frames: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<ServerCommand>,
    connections: mpsc::UnboundedReceiver<()>,
    task: JoinHandle<()>,
}

impl PushServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind push server");
        let addr = listener.local_addr().expect("push server address");
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(listener, frame_tx, command_rx, conn_tx));
        Self {
            url: format!("ws://{addr}/api/chat/ws"),
            frames,
            commands,
            connections,
            task,
        }
    }

    /// Wait until a client completes the WebSocket handshake.
    pub(crate) async fn wait_connected(&mut self) {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a push connection")
            .expect("push server stopped");
    }

    /// Send a text frame to the connected client.
    pub(crate) fn push_text(&self, text: &str) {
        self.commands
            .send(ServerCommand::Text(text.to_owned()))
            .expect("push server stopped");
    }

    /// Close the current connection from the server side.
    pub(crate) fn close_connection(&self) {
        self.commands
            .send(ServerCommand::Close)
            .expect("push server stopped");
    }

    /// Next text frame the client sent.
    pub(crate) async fn next_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("push server stopped")
    }

    /// A frame the client already sent, if any.
    pub(crate) fn try_next_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }
}

impl Drop for PushServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    frame_tx: mpsc::UnboundedSender<String>,
    mut command_rx: mpsc::UnboundedReceiver<ServerCommand>,
    conn_tx: mpsc::UnboundedSender<()>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            continue;
        };
        let _ = conn_tx.send(());

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = frame_tx.send(text);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
                command = command_rx.recv() => match command {
                    Some(ServerCommand::Text(text)) => {
                        if ws.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(ServerCommand::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                },
            }
        }
    }
}

/// A `ws://` URL nothing listens on.
pub(crate) fn unreachable_push_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = listener.local_addr().expect("reserved address").port();
    format!("ws://127.0.0.1:{port}/api/chat/ws")
}

/// Config for a session against `server_url` (HTTP) and `push_url`, with
/// fast reconnects and no background timers.
pub(crate) fn test_config(server_url: &str, push_url: &str) -> SessionConfig {
    SessionConfig {
        server_url: server_url.to_owned(),
        push_url: Some(push_url.to_owned()),
        reconnect: ReconnectConfig {
            delay_ms: 50,
            backoff_max_ms: None,
        },
        keepalive_interval_secs: None,
        status_poll_interval_secs: None,
        ..Default::default()
    }
}

/// Receive events until one matches `pred`, returning every event seen
/// (the match last).
pub(crate) async fn collect_until<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    mut pred: F,
) -> Vec<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let collect = async {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = pred(&event);
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event channel closed; saw {seen:?}"),
            }
        }
    };
    tokio::time::timeout(WAIT, collect)
        .await
        .expect("timed out waiting for event")
}

/// Receive events until one matches `pred` and return it.
pub(crate) async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    collect_until(rx, pred)
        .await
        .pop()
        .expect("collect_until returns the matching event")
}

/// Drain all pending events from the broadcast receiver into a Vec.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        events.push(evt);
    }
    events
}
