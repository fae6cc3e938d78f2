//! Inbound frame types and classification.
//!
//! Backends that speak the structured protocol send tagged JSON:
//!
//! ```json
//! {"kind": "pull_started", "model_name": "mistral", "text": "Pulling mistral..."}
//! {"kind": "reply", "text": "Hello!"}
//! ```
//!
//! Older backends push plain text and signal model pulls through fixed
//! sentence fragments. [`classify`] handles both, preferring the tagged form.

use serde::{Deserialize, Serialize};

/// Fragment of a plain-text frame announcing that a pull has started.
pub const PULL_STARTED_SENTINEL: &str = "is not installed. Pulling it now";
/// Fragment of a plain-text frame announcing a completed pull.
pub const PULL_SUCCEEDED_SENTINEL: &str = "Successfully pulled model";
/// Fragment of a plain-text frame announcing a failed pull.
pub const PULL_FAILED_SENTINEL: &str = "Failed to pull model";

/// A classified payload received on either channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundFrame {
    /// The backend began downloading `model_name`.
    PullStarted {
        #[serde(default)]
        model_name: String,
        #[serde(default)]
        text: String,
    },
    /// The download of `model_name` finished.
    PullSucceeded {
        #[serde(default)]
        model_name: String,
        #[serde(default)]
        text: String,
    },
    /// The download of `model_name` failed; `text` describes why.
    PullFailed {
        #[serde(default)]
        model_name: String,
        #[serde(default)]
        text: String,
    },
    /// An ordinary chat reply.
    Reply { text: String },
}

impl InboundFrame {
    /// Shorthand for a [`InboundFrame::Reply`].
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply { text: text.into() }
    }

    /// The model a lifecycle frame refers to. `None` for replies.
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Self::PullStarted { model_name, .. }
            | Self::PullSucceeded { model_name, .. }
            | Self::PullFailed { model_name, .. } => Some(model_name),
            Self::Reply { .. } => None,
        }
    }

    /// Displayable text carried by the frame.
    pub fn text(&self) -> &str {
        match self {
            Self::PullStarted { text, .. }
            | Self::PullSucceeded { text, .. }
            | Self::PullFailed { text, .. }
            | Self::Reply { text } => text,
        }
    }

    /// Whether the frame describes model installation rather than a reply.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::Reply { .. })
    }

    /// Fill an empty model name with `model`. Replies are returned unchanged.
    pub fn with_default_model(mut self, model: &str) -> Self {
        match &mut self {
            Self::PullStarted { model_name, .. }
            | Self::PullSucceeded { model_name, .. }
            | Self::PullFailed { model_name, .. }
                if model_name.trim().is_empty() =>
            {
                *model_name = model.to_owned();
            }
            _ => {}
        }
        self
    }
}

/// How untagged (plain-text) payloads are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyMode {
    /// Look for the pull sentinels in plain text.
    #[default]
    Legacy,
    /// Plain text is always a reply; only tagged frames drive the lifecycle.
    TaggedOnly,
}

/// Classify a raw inbound payload.
///
/// Tagged JSON frames are decoded first. Anything else is classified by
/// sentinel substrings in [`ClassifyMode::Legacy`], or treated as a reply in
/// [`ClassifyMode::TaggedOnly`]. Never fails: unrecognised input is a reply.
pub fn classify(raw: &str, mode: ClassifyMode) -> InboundFrame {
    if let Some(frame) = decode_tagged(raw) {
        return frame;
    }
    match mode {
        ClassifyMode::Legacy => classify_plain_text(raw),
        ClassifyMode::TaggedOnly => InboundFrame::reply(raw),
    }
}

fn decode_tagged(raw: &str) -> Option<InboundFrame> {
    if !raw.trim_start().starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("kind")?;
    match serde_json::from_value(value) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!("untyped JSON payload with a kind field: {e}");
            None
        }
    }
}

fn classify_plain_text(raw: &str) -> InboundFrame {
    if let Some(idx) = raw.find(PULL_STARTED_SENTINEL) {
        return InboundFrame::PullStarted {
            model_name: started_model(&raw[..idx]),
            text: raw.to_owned(),
        };
    }
    if let Some(idx) = raw.find(PULL_SUCCEEDED_SENTINEL) {
        let rest = &raw[idx + PULL_SUCCEEDED_SENTINEL.len()..];
        return InboundFrame::PullSucceeded {
            model_name: first_token(rest, &['.', '!']),
            text: raw.to_owned(),
        };
    }
    if let Some(idx) = raw.find(PULL_FAILED_SENTINEL) {
        let rest = &raw[idx + PULL_FAILED_SENTINEL.len()..];
        return InboundFrame::PullFailed {
            model_name: first_token(rest, &[':', '.']),
            text: raw.to_owned(),
        };
    }
    InboundFrame::reply(raw)
}

/// `"Model mistral "` → `"mistral"`.
fn started_model(prefix: &str) -> String {
    let name = match prefix.rfind("Model ") {
        Some(at) => &prefix[at + "Model ".len()..],
        None => prefix.split_whitespace().last().unwrap_or_default(),
    };
    name.trim().to_owned()
}

/// First whitespace-delimited token of `rest`, minus trailing punctuation.
fn first_token(rest: &str, trailing: &[char]) -> String {
    rest.split_whitespace()
        .next()
        .map(|token| token.trim_end_matches(trailing))
        .unwrap_or_default()
        .to_owned()
}
