//! Transport boundary
//!
//! The session talks to the backend exclusively through the
//! [`SessionTransport`] trait: inbound full snapshots and typed delta
//! updates, outbound action requests. [`HttpTransport`] implements the
//! trait over HTTP long-polling; [`mock::MockTransport`] implements it
//! in-process for tests and demos.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::Result;

pub mod http;
pub mod mock;

pub use http::HttpTransport;

/// Result of opening (or resuming) a session
#[derive(Debug, Clone)]
pub struct SessionHandshake {
    /// Complete chat snapshot, absent when no chat exists yet
    pub chat: Option<Value>,
    /// Server clock at handshake time, microseconds; used for clock-skew
    /// correction of displayed timestamps
    pub server_time_micros: Option<i64>,
}

/// One page of older history
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Raw message payloads, oldest first
    pub messages: Vec<Value>,
    /// Whether even older history exists beyond this page
    pub has_more: bool,
}

/// A single incremental update from the backend
///
/// Any field of any payload may be absent; parsing into items happens on
/// the session side and is tolerant by construction.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Complete chat snapshot; reconciled via diff, not delta application
    FullChat(Value),
    /// A message was added, after the given predecessor id when declared
    MessageAdded {
        /// Raw message payload
        message: Value,
        /// Server-declared predecessor id
        after_id: Option<String>,
    },
    /// A message's content changed
    MessageChanged {
        /// Raw message payload
        message: Value,
    },
    /// A message was removed
    MessageRemoved {
        /// Id of the removed message
        id: String,
    },
    /// The whole chat history was cleared
    ChatCleared,
    /// The chat state changed
    ChatStateChanged {
        /// New state, wire string
        state: String,
    },
    /// The assigned operator changed
    OperatorChanged {
        /// Raw operator payload
        operator: Value,
    },
    /// The operator started or stopped typing
    OperatorTypingChanged {
        /// Whether the operator is typing
        typing: bool,
    },
    /// The backend recorded the visitor reading the chat
    ReadByVisitorChanged {
        /// Whether the chat is read by the visitor
        read: bool,
    },
    /// A rating for an operator was recorded
    OperatorRateChanged {
        /// Raw rating payload
        rating: Value,
    },
}

/// Why a file send was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFileError {
    /// Backend rejected the file as too large
    #[error("file size exceeded")]
    FileSizeExceeded,
    /// Backend rejected the file's type
    #[error("file type not allowed")]
    FileTypeNotAllowed,
    /// Transport-level failure
    #[error("transport failure")]
    Transport,
}

/// Why an operator rating was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateOperatorError {
    /// There is no chat to rate an operator in
    #[error("no chat")]
    NoChat,
    /// The operator is not a participant of this chat
    #[error("operator not in chat")]
    OperatorNotInChat,
    /// Transport-level failure
    #[error("transport failure")]
    Transport,
}

/// The session's view of the network
///
/// Implementations must be safe to share across tasks: the session calls
/// `next_update` from its ingestion loop while mutation calls run
/// concurrently from spawned tasks.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a new logical session
    async fn open_session(&self, config: &SessionConfig) -> Result<SessionHandshake>;

    /// Receive the next update, blocking until one arrives
    ///
    /// `Ok(None)` means the stream ended cleanly; an error means the
    /// transport dropped and the session should resume.
    async fn next_update(&self) -> Result<Option<SessionUpdate>>;

    /// Resume the same logical session after a drop
    ///
    /// On success the returned snapshot is replayed through the diff
    /// path, which reconciles anything missed while disconnected.
    async fn resume_session(&self) -> Result<SessionHandshake>;

    /// Send a text message previously appended as pending
    async fn send_message(&self, client_side_id: &str, text: &str) -> Result<()>;

    /// Upload a file and send it as a message
    async fn send_file(
        &self,
        client_side_id: &str,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> std::result::Result<(), SendFileError>;

    /// Rate an operator; last submission wins on the backend
    async fn rate_operator(
        &self,
        operator_id: &str,
        rating: i32,
    ) -> std::result::Result<(), RateOperatorError>;

    /// Report the visitor's typing draft; fire-and-forget
    async fn set_visitor_typing(&self, draft: Option<String>) -> Result<()>;

    /// Ask the backend to close the chat
    async fn close_chat(&self) -> Result<()>;

    /// Report that the visitor has read the chat
    async fn mark_chat_read(&self) -> Result<()>;

    /// Fetch up to `limit` messages older than `anchor_id`, oldest first
    async fn request_history_before(&self, anchor_id: &str, limit: usize) -> Result<HistoryPage>;
}
