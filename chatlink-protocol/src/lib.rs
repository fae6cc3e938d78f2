//! # chatlink-protocol
//!
//! Wire types shared by the chatlink push channel (WebSocket) and the
//! request/response fallback (HTTP), plus the classifier that turns a raw
//! inbound payload into an [`InboundFrame`].
//!
//! ## Design
//!
//! - Client→server payloads are a single shape, [`OutboundMessage`], on both
//!   channels.
//! - Server→client payloads are either tagged JSON frames
//!   (`{"kind": "pull_started", ...}`) or, for older backends, plain text
//!   carrying sentinel substrings. [`classify`] accepts both; the sentinel
//!   path can be switched off with [`ClassifyMode::TaggedOnly`].
//! - Model names are compared with [`same_model`], which treats an untagged
//!   name and its explicitly tagged form as the same model.

pub mod frame;
pub mod model_name;
pub mod types;

pub use frame::{ClassifyMode, InboundFrame, classify};
pub use model_name::same_model;
pub use types::{ChatResponse, ModelStatus, OutboundMessage, StatusResponse};
