//! Chatlink: session transport and model-lifecycle layer for a chat client.
//!
//! This crate keeps a chat client in sync with a conversational backend that
//! serves local language models:
//! User → SessionCore → Transport (push or fallback) → Backend → SessionCore → Events
//!
//! # Architecture
//!
//! - **Transport**: a persistent WebSocket push channel with automatic
//!   reconnection, and a one-shot HTTP fallback used while it is down
//! - **StatusPoller**: fetches which models the backend has installed
//! - **ModelLifecycle**: tracks the model set and the in-flight model download
//! - **SessionCore**: classifies inbound frames, routes lifecycle frames, and
//!   publishes [`SessionEvent`]s for the presentation layer
//!
//! Wire types and frame classification live in the `chatlink-protocol` crate.

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod poller;
pub mod session;
pub mod transport;

pub use chatlink_protocol as protocol;
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use events::SessionEvent;
pub use lifecycle::{Model, ModelLabel, ModelLifecycle, PullState};
pub use poller::StatusPoller;
pub use session::SessionCore;
pub use transport::{Channel, ConnectionState, Transport, TransportEvent};
