//! High-level entry point
//!
//! [`ChatService`] bundles a session with a single tracker behind one
//! handle, for callers that do not need multiple independent history
//! views. Everything here delegates; the behavior lives in
//! [`crate::session`] and [`crate::tracker`].

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::item::{ChatState, OperatorItem};
use crate::message::Message;
use crate::session::{
    ChatObserver, ChatSession, RateOperatorCompletion, SendFileCompletion, SessionLifecycle,
};
use crate::tracker::{MessageListener, MessageTracker};
use crate::transport::{HttpTransport, SessionTransport};
use crate::Result;

/// A support chat client: one session, one history view
pub struct ChatService {
    session: ChatSession,
    tracker: Mutex<MessageTracker>,
}

impl ChatService {
    /// Create a service over HTTP long-polling
    pub fn new(config: SessionConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.base_url.clone()));
        Self::with_transport(config, transport)
    }

    /// Create a service over a custom transport
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn SessionTransport>) -> Self {
        let session = ChatSession::new(config, transport);
        let tracker = Mutex::new(session.new_message_tracker());
        Self { session, tracker }
    }

    /// Open the session and start receiving updates
    pub async fn start(&self) -> Result<()> {
        self.session.start().await
    }

    /// Current lifecycle state
    pub async fn lifecycle(&self) -> SessionLifecycle {
        self.session.lifecycle().await
    }

    /// Current chat state
    pub async fn chat_state(&self) -> ChatState {
        self.session.chat_state().await
    }

    /// Currently assigned operator
    pub async fn current_operator(&self) -> Option<OperatorItem> {
        self.session.current_operator().await
    }

    /// Observe chat-level state changes
    pub async fn set_chat_observer(&self, observer: Arc<dyn ChatObserver>) {
        self.session.set_chat_observer(observer).await;
    }

    /// Observe message history changes
    pub async fn set_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.tracker.lock().await.set_listener(listener).await;
    }

    /// The newest `count` messages, oldest first
    pub async fn get_last_messages(&self, count: usize) -> Vec<Message> {
        self.tracker.lock().await.get_last_messages(count).await
    }

    /// Page further into the past, oldest first
    pub async fn get_next_messages(&self, count: usize) -> Vec<Message> {
        self.tracker.lock().await.get_next_messages(count).await
    }

    /// Send a text message, optimistically appended as pending
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        self.session.send_message(text).await
    }

    /// Send a file, optimistically appended as pending
    pub async fn send_file(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        completion: Arc<dyn SendFileCompletion>,
    ) -> Result<Message> {
        self.session
            .send_file(data, file_name, mime_type, completion)
            .await
    }

    /// Rate an operator
    pub async fn rate_operator(
        &self,
        operator_id: &str,
        rating: i32,
        completion: Arc<dyn RateOperatorCompletion>,
    ) {
        self.session
            .rate_operator(operator_id, rating, completion)
            .await;
    }

    /// Report the visitor's typing draft
    pub async fn set_visitor_typing(&self, draft: Option<String>) {
        self.session.set_visitor_typing(draft).await;
    }

    /// Close the chat, optimistically flipping the local state
    pub async fn close_chat(&self) {
        self.session.close_chat().await;
    }

    /// Mark the chat read by the visitor
    pub async fn mark_chat_read(&self) {
        self.session.mark_chat_read().await;
    }

    /// A further independent history view over the same session
    pub fn new_message_tracker(&self) -> MessageTracker {
        self.session.new_message_tracker()
    }

    /// Terminate the session
    pub async fn destroy(&self) {
        self.session.destroy().await;
    }
}
