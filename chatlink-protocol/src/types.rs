//! Request and response bodies exchanged with the chat backend.

use serde::{Deserialize, Serialize};

/// A user message bound for the backend.
///
/// Serialized identically on the push channel and the fallback endpoint:
/// `{"message": "...", "model_name": "..."}`. Fields are private so a
/// constructed message cannot be altered before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    message: String,
    model_name: String,
}

impl OutboundMessage {
    /// Build a message for `model_name`.
    pub fn new(message: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model_name: model_name.into(),
        }
    }

    /// The message text.
    pub fn text(&self) -> &str {
        &self.message
    }

    /// The model the message is addressed to.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Success body of the fallback chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Reply text (or a backend status line, classified like a push frame).
    pub response: String,
}

/// Installation status of one model as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Model name, possibly carrying a tag (`llama3.1:8b`).
    pub name: String,
    /// Whether the backend has the model locally.
    pub installed: bool,
}

/// Body of the model status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Every model the backend knows about, in backend order.
    #[serde(default)]
    pub models: Vec<ModelStatus>,
    /// The model the backend last served, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
}
