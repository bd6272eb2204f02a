//! Chatline - client-side session and message synchronization for live support chat
//!
//! This library keeps a live, bidirectional chat session with a remote
//! support-chat backend: it opens a session, receives streamed deltas
//! (new/changed/removed messages, typing indicators, operator and rating
//! state) and reconciles them into a locally consistent, causally ordered
//! message history. Consumers observe that history through change
//! listeners and drive it through mutation operations (send text, send
//! file, rate operator, close chat).
//!
//! The reconciliation core is designed to behave correctly under
//! unreliable delivery: out-of-order delta arrival, duplicate delivery,
//! partial history paging, and reconnection after transport drops.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod facade;
pub mod holder;
pub mod item;
pub mod mapper;
pub mod message;
pub mod session;
pub mod tracker;
pub mod transport;

/// Result type alias for Chatline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Chatline operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Session lifecycle error (e.g., operation on a session that never started)
    #[error("Session error: {0}")]
    Session(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Initialize the Chatline library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
