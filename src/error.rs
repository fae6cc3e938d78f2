//! Error types for the chat session layer.

/// Top-level error type for chatlink.
///
/// Transport failures during `send` are never returned through this type;
/// they surface as session events. These variants cover configuration,
/// status polling, and commands the session refuses.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP client construction or request error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Model status endpoint returned an unusable response.
    #[error("status error: {0}")]
    Status(String),

    /// A user message was empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// A model selection named no model.
    #[error("model name is empty")]
    EmptyModelName,

    /// Input is disabled while a model download is in flight.
    #[error("model {0} is still downloading")]
    PullInProgress(String),

    /// `start` was called on a session that is already running.
    #[error("session already started")]
    AlreadyStarted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
