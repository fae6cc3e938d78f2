//! Events published by a chat session.

use crate::lifecycle::{Model, ModelLabel};
use crate::transport::ConnectionState;

/// Something a front end should render.
///
/// Events are broadcast in the order the session observed the underlying
/// frames, so a renderer can apply them one by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The user's own message, echoed once accepted for delivery.
    UserEcho(String),
    /// A reply or informational message from the backend.
    BotMessage(String),
    /// A reply is (or is no longer) awaited; drives a typing indicator.
    AwaitingReply {
        /// `true` while waiting.
        active: bool,
    },
    /// A model download started, or its status text changed.
    PullStarted {
        /// Model being downloaded.
        model: String,
        /// Status text to show.
        text: String,
    },
    /// The tracked model download finished.
    PullResolved {
        /// Model that was downloaded.
        model: String,
        /// Whether it succeeded.
        success: bool,
        /// Text that replaces the status message.
        text: String,
    },
    /// User input was enabled or disabled.
    InputAvailability {
        /// Whether input is accepted.
        enabled: bool,
    },
    /// A fresh model set arrived from the status endpoint.
    ModelSetUpdated {
        /// Every known model.
        models: Vec<Model>,
        /// Model the backend reports as current, if any.
        backend_model: Option<String>,
    },
    /// The active model's installed label changed.
    ActiveModelLabel {
        /// Active model name.
        name: String,
        /// New label.
        label: ModelLabel,
    },
    /// The user picked a different model.
    ModelSelected {
        /// Newly active model.
        name: String,
        /// Installed flag if the model set mentions it.
        installed: Option<bool>,
    },
    /// The push channel changed state.
    TransportStateChanged(ConnectionState),
}
