//! Client-side reconciliation layer for the chat service.
//!
//! The server pushes events with at-most-once delivery and a REST API
//! serves paginated history; this crate merges the two into one
//! consistent in-memory view. Everything here is a pure state machine
//! with no I/O, so a UI layer on any framework can drive it and the
//! whole merge logic is testable without a transport.

pub mod connection;
pub mod state;
pub mod types;

pub use connection::{ChatConnection, ConnectionState};
pub use state::{ChatEvent, ChatState, ConversationView, LoadState};
pub use types::{ChatMessage, ConversationSummary};
