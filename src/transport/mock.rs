//! In-process transport
//!
//! Drives a session without a network: tests and the demo binary script
//! the backend side by pushing updates and configuring outcomes for
//! mutation calls. Every outbound action is recorded for inspection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::config::SessionConfig;
use crate::{Error, Result};

use super::{
    HistoryPage, RateOperatorError, SendFileError, SessionHandshake, SessionTransport,
    SessionUpdate,
};

/// An outbound action recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum SentAction {
    /// Text message send
    Message {
        /// Client-side id of the pending entry
        client_side_id: String,
        /// Message text
        text: String,
    },
    /// File send
    File {
        /// Client-side id of the pending entry
        client_side_id: String,
        /// File name
        file_name: String,
    },
    /// Operator rating
    Rate {
        /// Rated operator
        operator_id: String,
        /// Submitted score
        rating: i32,
    },
    /// Typing draft notification
    Typing {
        /// Current draft, `None` when typing stopped
        draft: Option<String>,
    },
    /// Chat close request
    CloseChat,
    /// Chat read notification
    MarkRead,
}

/// Scriptable [`SessionTransport`] implementation
pub struct MockTransport {
    initial_chat: Mutex<Option<Value>>,
    resume_chat: Mutex<Option<Value>>,
    server_time_micros: Mutex<Option<i64>>,
    updates_tx: mpsc::UnboundedSender<Result<SessionUpdate>>,
    updates_rx: Mutex<mpsc::UnboundedReceiver<Result<SessionUpdate>>>,
    backlog: Mutex<Vec<Value>>,
    history_calls: AtomicUsize,
    history_delay: Mutex<Option<Duration>>,
    send_delay: Mutex<Option<Duration>>,
    fail_sends: AtomicBool,
    file_result: Mutex<std::result::Result<(), SendFileError>>,
    rate_result: Mutex<std::result::Result<(), RateOperatorError>>,
    rate_delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<SentAction>>,
}

impl MockTransport {
    /// Create a mock with no scripted chat and all mutations succeeding
    pub fn new() -> Arc<Self> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            initial_chat: Mutex::new(None),
            resume_chat: Mutex::new(None),
            server_time_micros: Mutex::new(None),
            updates_tx,
            updates_rx: Mutex::new(updates_rx),
            backlog: Mutex::new(Vec::new()),
            history_calls: AtomicUsize::new(0),
            history_delay: Mutex::new(None),
            send_delay: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
            file_result: Mutex::new(Ok(())),
            rate_result: Mutex::new(Ok(())),
            rate_delay: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Script the chat snapshot returned on `open_session`
    pub async fn set_initial_chat(&self, chat: Value) {
        *self.initial_chat.lock().await = Some(chat);
    }

    /// Script the chat snapshot returned on `resume_session`
    pub async fn set_resume_chat(&self, chat: Value) {
        *self.resume_chat.lock().await = Some(chat);
    }

    /// Script the server clock reported at handshake
    pub async fn set_server_time_micros(&self, micros: i64) {
        *self.server_time_micros.lock().await = Some(micros);
    }

    /// Deliver an update to the session
    pub fn push_update(&self, update: SessionUpdate) {
        let _ = self.updates_tx.send(Ok(update));
    }

    /// Simulate a transport drop; the session will resume
    pub fn push_disconnect(&self) {
        let _ = self
            .updates_tx
            .send(Err(Error::Transport("connection dropped".to_string())));
    }

    /// Script the full history backlog served by paging, oldest first
    pub async fn set_history_backlog(&self, messages: Vec<Value>) {
        *self.backlog.lock().await = messages;
    }

    /// How many paging calls reached the network
    pub fn history_call_count(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// Delay every paging response, to widen concurrency windows in tests
    pub async fn set_history_delay(&self, delay: Duration) {
        *self.history_delay.lock().await = Some(delay);
    }

    /// Delay every send response
    pub async fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().await = Some(delay);
    }

    /// Make text sends fail at the transport level
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Script the outcome of file sends
    pub async fn set_file_result(&self, result: std::result::Result<(), SendFileError>) {
        *self.file_result.lock().await = result;
    }

    /// Script the outcome of rate requests
    pub async fn set_rate_result(&self, result: std::result::Result<(), RateOperatorError>) {
        *self.rate_result.lock().await = result;
    }

    /// Delay every rate response
    pub async fn set_rate_delay(&self, delay: Duration) {
        *self.rate_delay.lock().await = Some(delay);
    }

    /// Snapshot of recorded outbound actions
    pub async fn sent_actions(&self) -> Vec<SentAction> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn open_session(&self, _config: &SessionConfig) -> Result<SessionHandshake> {
        Ok(SessionHandshake {
            chat: self.initial_chat.lock().await.clone(),
            server_time_micros: *self.server_time_micros.lock().await,
        })
    }

    async fn next_update(&self) -> Result<Option<SessionUpdate>> {
        let mut rx = self.updates_rx.lock().await;
        match rx.recv().await {
            Some(Ok(update)) => Ok(Some(update)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn resume_session(&self) -> Result<SessionHandshake> {
        let chat = self.resume_chat.lock().await.clone();
        Ok(SessionHandshake {
            chat,
            server_time_micros: *self.server_time_micros.lock().await,
        })
    }

    async fn send_message(&self, client_side_id: &str, text: &str) -> Result<()> {
        if let Some(delay) = *self.send_delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().await.push(SentAction::Message {
            client_side_id: client_side_id.to_string(),
            text: text.to_string(),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted send failure".to_string()));
        }
        Ok(())
    }

    async fn send_file(
        &self,
        client_side_id: &str,
        file_name: &str,
        _mime_type: &str,
        _data: Vec<u8>,
    ) -> std::result::Result<(), SendFileError> {
        if let Some(delay) = *self.send_delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().await.push(SentAction::File {
            client_side_id: client_side_id.to_string(),
            file_name: file_name.to_string(),
        });
        *self.file_result.lock().await
    }

    async fn rate_operator(
        &self,
        operator_id: &str,
        rating: i32,
    ) -> std::result::Result<(), RateOperatorError> {
        if let Some(delay) = *self.rate_delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().await.push(SentAction::Rate {
            operator_id: operator_id.to_string(),
            rating,
        });
        *self.rate_result.lock().await
    }

    async fn set_visitor_typing(&self, draft: Option<String>) -> Result<()> {
        self.sent.lock().await.push(SentAction::Typing { draft });
        Ok(())
    }

    async fn close_chat(&self) -> Result<()> {
        self.sent.lock().await.push(SentAction::CloseChat);
        Ok(())
    }

    async fn mark_chat_read(&self) -> Result<()> {
        self.sent.lock().await.push(SentAction::MarkRead);
        Ok(())
    }

    async fn request_history_before(&self, anchor_id: &str, limit: usize) -> Result<HistoryPage> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.history_delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        let backlog = self.backlog.lock().await;
        let end = backlog
            .iter()
            .position(|m| m.get("id").and_then(Value::as_str) == Some(anchor_id))
            .unwrap_or(0);
        let start = end.saturating_sub(limit);
        Ok(HistoryPage {
            messages: backlog[start..end].to_vec(),
            has_more: start > 0,
        })
    }
}
