//! Session / chat controller
//!
//! Owns the backend session lifecycle, feeds incoming updates into the
//! reconciliation engine, and exposes the mutation operations. All
//! mutable per-session state lives behind one mutex, so deltas, send
//! completions, paging responses and rating completions are serialized
//! and listeners only ever observe fully-applied reconciliations.
//! Listener callbacks are dispatched after the lock is released, in the
//! exact order the reconciliation produced them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::holder::{HistoryEvent, MessageHolder};
use crate::item::{ChatItem, ChatState, MessageItem, OperatorItem, RatingItem};
use crate::mapper::MessageMapper;
use crate::message::{Message, SendError};
use crate::tracker::{MessageListener, MessageTracker};
use crate::transport::{
    RateOperatorError, SendFileError, SessionHandshake, SessionTransport, SessionUpdate,
};
use crate::{Error, Result};

/// Lifecycle of the logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    /// Not yet started
    NotStarted,
    /// Opening handshake in progress
    Starting,
    /// Live: receiving updates, accepting mutations
    Running,
    /// Shutting down
    Closing,
    /// Terminated
    Closed,
}

/// Single-shot completion of a file send
pub trait SendFileCompletion: Send + Sync {
    /// The file was accepted; `message_id` is the pending entry's id
    fn on_success(&self, message_id: &str);
    /// The send failed; the pending entry has been retracted
    fn on_failure(&self, message_id: &str, error: SendFileError);
}

/// Single-shot completion of an operator rating
pub trait RateOperatorCompletion: Send + Sync {
    /// The rating was recorded
    fn on_success(&self);
    /// The rating was rejected
    fn on_failure(&self, error: RateOperatorError);
}

/// Observer of chat-level state that is not part of the message history
pub trait ChatObserver: Send + Sync {
    /// The chat state changed (including the optimistic close)
    fn chat_state_changed(&self, _old: ChatState, _new: ChatState) {}
    /// The assigned operator changed
    fn operator_changed(&self, _operator: Option<&OperatorItem>) {}
    /// The operator started or stopped typing
    fn operator_typing_changed(&self, _typing: bool) {}
}

/// Deferred observer notification, invoked after the session lock is released
enum ObserverCall {
    State(ChatState, ChatState),
    Operator(Option<OperatorItem>),
    Typing(bool),
}

pub(crate) struct SessionCore {
    pub(crate) lifecycle: SessionLifecycle,
    pub(crate) chat: Option<ChatItem>,
    pub(crate) holder: MessageHolder,
    pub(crate) listeners: Vec<(u64, Arc<dyn MessageListener>)>,
    pub(crate) next_listener_id: u64,
    pub(crate) time_offset_micros: i64,
    observer: Option<Arc<dyn ChatObserver>>,
    rating_in_flight: HashSet<String>,
    rating_queued: HashMap<String, (i32, Vec<Arc<dyn RateOperatorCompletion>>)>,
    update_task: Option<JoinHandle<()>>,
}

impl SessionCore {
    pub(crate) fn listeners_snapshot(&self) -> Vec<Arc<dyn MessageListener>> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

pub(crate) struct SessionInner {
    pub(crate) config: SessionConfig,
    pub(crate) transport: Arc<dyn SessionTransport>,
    pub(crate) mapper: MessageMapper,
    pub(crate) core: Mutex<SessionCore>,
}

/// Deliver reconciliation events to listeners, preserving event order
pub(crate) fn dispatch_events(listeners: &[Arc<dyn MessageListener>], events: &[HistoryEvent]) {
    for event in events {
        for listener in listeners {
            match event {
                HistoryEvent::Added { message, after } => {
                    listener.added(message, after.as_ref());
                }
                HistoryEvent::Removed(message) => listener.removed(message),
                HistoryEvent::RemovedAll => listener.removed_all(),
                HistoryEvent::Changed { old, new } => listener.changed(old, new),
            }
        }
    }
}

fn run_observer_calls(observer: Option<Arc<dyn ChatObserver>>, calls: Vec<ObserverCall>) {
    if let Some(observer) = observer {
        for call in calls {
            match call {
                ObserverCall::State(old, new) => observer.chat_state_changed(old, new),
                ObserverCall::Operator(operator) => observer.operator_changed(operator.as_ref()),
                ObserverCall::Typing(typing) => observer.operator_typing_changed(typing),
            }
        }
    }
}

impl SessionInner {
    /// Map one backend message item into the public model using the
    /// current chat operator and clock-skew correction
    pub(crate) fn map_item(&self, core: &SessionCore, item: &MessageItem) -> Option<Message> {
        self.mapper.map(
            item,
            core.chat.as_ref().and_then(|c| c.operator.as_ref()),
            core.time_offset_micros,
        )
    }

    /// Map raw history page payloads, dropping hidden entries
    pub(crate) fn map_history_payloads(
        &self,
        core: &SessionCore,
        payloads: &[serde_json::Value],
    ) -> Vec<Message> {
        payloads
            .iter()
            .map(MessageItem::parse)
            .filter_map(|item| self.map_item(core, &item))
            .collect()
    }

    /// Reconcile a complete chat snapshot into the holder, recording
    /// chat-level observer notifications
    fn apply_full_chat(
        &self,
        core: &mut SessionCore,
        chat: ChatItem,
        calls: &mut Vec<ObserverCall>,
    ) -> Vec<HistoryEvent> {
        let old_state = core.chat.as_ref().map(|c| c.state);
        let old_operator_id = core
            .chat
            .as_ref()
            .and_then(|c| c.operator.as_ref())
            .map(|o| o.id.clone());
        let old_typing = core.chat.as_ref().map(|c| c.operator_typing);

        let mapped: Vec<Message> = chat
            .messages
            .iter()
            .filter_map(|item| {
                self.mapper
                    .map(item, chat.operator.as_ref(), core.time_offset_micros)
            })
            .collect();
        let events = core.holder.receive_full_update(mapped);

        if old_state != Some(chat.state) {
            calls.push(ObserverCall::State(
                old_state.unwrap_or(ChatState::Unknown),
                chat.state,
            ));
        }
        let new_operator_id = chat.operator.as_ref().map(|o| o.id.clone());
        if old_operator_id != new_operator_id {
            calls.push(ObserverCall::Operator(chat.operator.clone()));
        }
        if old_typing != Some(chat.operator_typing) {
            calls.push(ObserverCall::Typing(chat.operator_typing));
        }

        core.chat = Some(chat);
        events
    }

    /// Apply a handshake snapshot (initial open or resume)
    async fn apply_handshake(&self, handshake: SessionHandshake, set_running: bool) {
        let (events, listeners, observer, calls) = {
            let mut core = self.core.lock().await;
            if set_running {
                core.lifecycle = SessionLifecycle::Running;
            }
            if let Some(server_time) = handshake.server_time_micros {
                core.time_offset_micros = server_time - Utc::now().timestamp_micros();
            }
            let mut calls = Vec::new();
            let events = match handshake.chat {
                Some(value) => {
                    let chat = ChatItem::parse(&value);
                    self.apply_full_chat(&mut core, chat, &mut calls)
                }
                None => Vec::new(),
            };
            (
                events,
                core.listeners_snapshot(),
                core.observer.clone(),
                calls,
            )
        };
        dispatch_events(&listeners, &events);
        run_observer_calls(observer, calls);
    }

    /// Apply one incoming update
    ///
    /// Nothing here is fatal to the session: unknown ids and malformed
    /// payloads degrade to no-ops.
    async fn apply_update(&self, update: SessionUpdate) {
        let (events, listeners, observer, calls) = {
            let mut core = self.core.lock().await;
            let mut calls = Vec::new();
            let events = match update {
                SessionUpdate::FullChat(value) => {
                    let chat = ChatItem::parse(&value);
                    self.apply_full_chat(&mut core, chat, &mut calls)
                }
                SessionUpdate::MessageAdded { message, after_id } => {
                    let item = MessageItem::parse(&message);
                    match self.map_item(&core, &item) {
                        Some(mapped) => {
                            core.holder.receive_added(mapped, after_id.as_deref())
                        }
                        None => Vec::new(),
                    }
                }
                SessionUpdate::MessageChanged { message } => {
                    let item = MessageItem::parse(&message);
                    match self.map_item(&core, &item) {
                        Some(mapped) => core.holder.receive_changed(mapped),
                        // An edit that turned the message invisible (for
                        // instance a deletion flag) removes it.
                        None => match item.id {
                            Some(id) => core.holder.receive_removed(&id),
                            None => Vec::new(),
                        },
                    }
                }
                SessionUpdate::MessageRemoved { id } => core.holder.receive_removed(&id),
                SessionUpdate::ChatCleared => core.holder.receive_removed_all(),
                SessionUpdate::ChatStateChanged { state } => {
                    let new_state = ChatState::from_wire(&state);
                    if let Some(chat) = core.chat.as_mut() {
                        if chat.state != new_state {
                            calls.push(ObserverCall::State(chat.state, new_state));
                            chat.state = new_state;
                        }
                    }
                    Vec::new()
                }
                SessionUpdate::OperatorChanged { operator } => {
                    let parsed = if operator.is_null() {
                        None
                    } else {
                        Some(OperatorItem::parse(&operator))
                    };
                    if let Some(chat) = core.chat.as_mut() {
                        if chat.operator != parsed {
                            chat.operator = parsed.clone();
                            calls.push(ObserverCall::Operator(parsed));
                        }
                    }
                    Vec::new()
                }
                SessionUpdate::OperatorTypingChanged { typing } => {
                    if let Some(chat) = core.chat.as_mut() {
                        if chat.operator_typing != typing {
                            chat.operator_typing = typing;
                            calls.push(ObserverCall::Typing(typing));
                        }
                    }
                    Vec::new()
                }
                SessionUpdate::ReadByVisitorChanged { read } => {
                    if let Some(chat) = core.chat.as_mut() {
                        chat.read_by_visitor = Some(read);
                        if read {
                            chat.unread_by_visitor_ts = None;
                        }
                    }
                    Vec::new()
                }
                SessionUpdate::OperatorRateChanged { rating } => {
                    let rating = RatingItem::parse(&rating);
                    if let Some(chat) = core.chat.as_mut() {
                        if !rating.operator_id.is_empty() {
                            chat.operator_id_to_rate
                                .insert(rating.operator_id.clone(), rating);
                        }
                    }
                    Vec::new()
                }
            };
            (
                events,
                core.listeners_snapshot(),
                core.observer.clone(),
                calls,
            )
        };
        dispatch_events(&listeners, &events);
        run_observer_calls(observer, calls);
    }
}

/// The ingestion loop: receives updates until the stream ends or the
/// session is destroyed, resuming the same logical session after drops.
async fn run_update_loop(inner: Arc<SessionInner>) {
    loop {
        if inner.core.lock().await.lifecycle == SessionLifecycle::Closed {
            break;
        }
        match inner.transport.next_update().await {
            Ok(Some(update)) => inner.apply_update(update).await,
            Ok(None) => {
                info!("update stream ended");
                break;
            }
            Err(error) => {
                warn!("transport dropped: {}; resuming session", error);
                tokio::time::sleep(inner.config.reconnect_delay).await;
                match inner.transport.resume_session().await {
                    Ok(handshake) => {
                        info!("session resumed");
                        // Replaying the snapshot through the diff path
                        // reconciles anything missed while disconnected.
                        inner.apply_handshake(handshake, false).await;
                    }
                    Err(error) => warn!("resume failed: {}", error),
                }
            }
        }
    }
}

/// A live chat session
///
/// Cheap to clone; all clones share the same underlying session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    /// Create a session over the given transport; call [`ChatSession::start`] next
    pub fn new(config: SessionConfig, transport: Arc<dyn SessionTransport>) -> Self {
        let mapper = MessageMapper::new(config.base_url.clone());
        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                mapper,
                core: Mutex::new(SessionCore {
                    lifecycle: SessionLifecycle::NotStarted,
                    chat: None,
                    holder: MessageHolder::new(),
                    listeners: Vec::new(),
                    next_listener_id: 0,
                    time_offset_micros: 0,
                    observer: None,
                    rating_in_flight: HashSet::new(),
                    rating_queued: HashMap::new(),
                    update_task: None,
                }),
            }),
        }
    }

    /// Open the backend session and start the ingestion loop
    pub async fn start(&self) -> Result<()> {
        {
            let mut core = self.inner.core.lock().await;
            if core.lifecycle != SessionLifecycle::NotStarted {
                return Err(Error::Session("session already started".to_string()));
            }
            core.lifecycle = SessionLifecycle::Starting;
        }

        let handshake = match self.inner.transport.open_session(&self.inner.config).await {
            Ok(handshake) => handshake,
            Err(error) => {
                self.inner.core.lock().await.lifecycle = SessionLifecycle::NotStarted;
                return Err(error);
            }
        };
        self.inner.apply_handshake(handshake, true).await;

        let handle = tokio::spawn(run_update_loop(Arc::clone(&self.inner)));
        self.inner.core.lock().await.update_task = Some(handle);
        info!("session started");
        Ok(())
    }

    /// Current lifecycle state
    pub async fn lifecycle(&self) -> SessionLifecycle {
        self.inner.core.lock().await.lifecycle
    }

    /// Current chat state; [`ChatState::Unknown`] when no chat exists
    pub async fn chat_state(&self) -> ChatState {
        self.inner
            .core
            .lock()
            .await
            .chat
            .as_ref()
            .map(|c| c.state)
            .unwrap_or(ChatState::Unknown)
    }

    /// Currently assigned operator
    pub async fn current_operator(&self) -> Option<OperatorItem> {
        self.inner
            .core
            .lock()
            .await
            .chat
            .as_ref()
            .and_then(|c| c.operator.clone())
    }

    /// Register the observer for chat-level state, replacing any previous one
    pub async fn set_chat_observer(&self, observer: Arc<dyn ChatObserver>) {
        self.inner.core.lock().await.observer = Some(observer);
    }

    /// Create a tracker observing this session's reconciled history
    pub fn new_message_tracker(&self) -> MessageTracker {
        MessageTracker::new(Arc::clone(&self.inner))
    }

    /// Send a text message
    ///
    /// Appends a pending entry immediately and returns it; the network
    /// call runs in the background. On failure or timeout the pending
    /// entry is retracted and listeners see its removal, tagged with the
    /// failure reason.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let client_side_id = Uuid::new_v4().simple().to_string();
        let (message, listeners, events) = {
            let mut core = self.inner.core.lock().await;
            if core.lifecycle != SessionLifecycle::Running {
                return Err(Error::Session("session is not running".to_string()));
            }
            let ts = Utc::now().timestamp_micros() + core.time_offset_micros;
            let message = Message::pending_text(client_side_id.clone(), text, ts);
            let events = core.holder.append_pending(message.clone());
            (message, core.listeners_snapshot(), events)
        };
        dispatch_events(&listeners, &events);

        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        tokio::spawn(async move {
            let reason = match timeout(
                inner.config.send_timeout,
                inner.transport.send_message(&client_side_id, &text),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(error)) => {
                    warn!("send of {} failed: {}", client_side_id, error);
                    Some(SendError::Transport)
                }
                Err(_) => {
                    warn!("send of {} timed out", client_side_id);
                    Some(SendError::Timeout)
                }
            };
            if let Some(reason) = reason {
                let (events, listeners) = {
                    let mut core = inner.core.lock().await;
                    (
                        core.holder.retract_pending(&client_side_id, reason),
                        core.listeners_snapshot(),
                    )
                };
                dispatch_events(&listeners, &events);
            }
        });
        Ok(message)
    }

    /// Send a file
    ///
    /// Same optimistic contract as [`ChatSession::send_message`]; the
    /// completion fires exactly once with the outcome.
    pub async fn send_file(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        completion: Arc<dyn SendFileCompletion>,
    ) -> Result<Message> {
        let client_side_id = Uuid::new_v4().simple().to_string();
        let (message, listeners, events) = {
            let mut core = self.inner.core.lock().await;
            if core.lifecycle != SessionLifecycle::Running {
                return Err(Error::Session("session is not running".to_string()));
            }
            let ts = Utc::now().timestamp_micros() + core.time_offset_micros;
            let message = Message::pending_file(
                client_side_id.clone(),
                file_name,
                mime_type,
                data.len() as i64,
                ts,
            );
            let events = core.holder.append_pending(message.clone());
            (message, core.listeners_snapshot(), events)
        };
        dispatch_events(&listeners, &events);

        let inner = Arc::clone(&self.inner);
        let file_name = file_name.to_string();
        let mime_type = mime_type.to_string();
        tokio::spawn(async move {
            let outcome = match timeout(
                inner.config.send_timeout,
                inner
                    .transport
                    .send_file(&client_side_id, &file_name, &mime_type, data),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(error),
                Err(_) => {
                    warn!("file send of {} timed out", client_side_id);
                    Err(SendFileError::Transport)
                }
            };
            match outcome {
                Ok(()) => completion.on_success(&client_side_id),
                Err(error) => {
                    let reason = match error {
                        SendFileError::FileSizeExceeded => SendError::FileSizeExceeded,
                        SendFileError::FileTypeNotAllowed => SendError::FileTypeNotAllowed,
                        SendFileError::Transport => SendError::Transport,
                    };
                    let (events, listeners) = {
                        let mut core = inner.core.lock().await;
                        (
                            core.holder.retract_pending(&client_side_id, reason),
                            core.listeners_snapshot(),
                        )
                    };
                    dispatch_events(&listeners, &events);
                    completion.on_failure(&client_side_id, error);
                }
            }
        });
        Ok(message)
    }

    /// Report the visitor's typing draft; fire-and-forget, no local state
    pub async fn set_visitor_typing(&self, draft: Option<String>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(error) = inner.transport.set_visitor_typing(draft).await {
                warn!("typing notification failed: {}", error);
            }
        });
    }

    /// Rate an operator
    ///
    /// Idempotent per operator with last-write-wins: while one request is
    /// in flight, further submissions for the same operator coalesce into
    /// a single follow-up carrying the latest score. Every caller's
    /// completion fires exactly once.
    pub async fn rate_operator(
        &self,
        operator_id: &str,
        rating: i32,
        completion: Arc<dyn RateOperatorCompletion>,
    ) {
        {
            let mut core = self.inner.core.lock().await;
            let known = match &core.chat {
                None => {
                    drop(core);
                    completion.on_failure(RateOperatorError::NoChat);
                    return;
                }
                Some(chat) => {
                    chat.operator.as_ref().map(|o| o.id == operator_id).unwrap_or(false)
                        || chat.operator_id_to_rate.contains_key(operator_id)
                }
            };
            if !known {
                drop(core);
                completion.on_failure(RateOperatorError::OperatorNotInChat);
                return;
            }
            if core.rating_in_flight.contains(operator_id) {
                let entry = core
                    .rating_queued
                    .entry(operator_id.to_string())
                    .or_insert((rating, Vec::new()));
                entry.0 = rating;
                entry.1.push(completion);
                return;
            }
            core.rating_in_flight.insert(operator_id.to_string());
        }

        let inner = Arc::clone(&self.inner);
        let operator_id = operator_id.to_string();
        let mut score = rating.clamp(1, 5);
        let mut completions = vec![completion];
        tokio::spawn(async move {
            loop {
                let result = inner.transport.rate_operator(&operator_id, score).await;
                match result {
                    Ok(()) => {
                        let mut core = inner.core.lock().await;
                        if let Some(chat) = core.chat.as_mut() {
                            chat.operator_id_to_rate.insert(
                                operator_id.clone(),
                                RatingItem::new(operator_id.clone(), score),
                            );
                        }
                    }
                    Err(error) => warn!("rating {} failed: {}", operator_id, error),
                }
                for completion in completions.drain(..) {
                    match result {
                        Ok(()) => completion.on_success(),
                        Err(error) => completion.on_failure(error),
                    }
                }
                let next = {
                    let mut core = inner.core.lock().await;
                    match core.rating_queued.remove(&operator_id) {
                        Some(queued) => Some(queued),
                        None => {
                            core.rating_in_flight.remove(&operator_id);
                            None
                        }
                    }
                };
                match next {
                    Some((queued_score, queued_completions)) => {
                        score = queued_score.clamp(1, 5);
                        completions = queued_completions;
                    }
                    None => break,
                }
            }
        });
    }

    /// Close the chat
    ///
    /// The local state flips to [`ChatState::ClosedByVisitor`] immediately,
    /// before backend confirmation; a later state delta overrides it.
    pub async fn close_chat(&self) {
        let call = {
            let mut core = self.inner.core.lock().await;
            let observer = core.observer.clone();
            match core.chat.as_mut() {
                Some(chat) if !chat.state.is_closed() => {
                    let old = chat.state;
                    chat.state = ChatState::ClosedByVisitor;
                    Some((old, observer))
                }
                _ => None,
            }
        };
        if let Some((old, observer)) = call {
            run_observer_calls(observer, vec![ObserverCall::State(old, ChatState::ClosedByVisitor)]);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(error) = inner.transport.close_chat().await {
                warn!("close request failed: {}", error);
            }
        });
    }

    /// Mark the chat read by the visitor
    pub async fn mark_chat_read(&self) {
        {
            let mut core = self.inner.core.lock().await;
            if let Some(chat) = core.chat.as_mut() {
                chat.read_by_visitor = Some(true);
                chat.unread_by_visitor_ts = None;
            }
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(error) = inner.transport.mark_chat_read().await {
                warn!("read notification failed: {}", error);
            }
        });
    }

    /// Terminate the session and stop the ingestion loop
    pub async fn destroy(&self) {
        let task = {
            let mut core = self.inner.core.lock().await;
            core.lifecycle = SessionLifecycle::Closing;
            core.update_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.inner.core.lock().await.lifecycle = SessionLifecycle::Closed;
        info!("session destroyed");
    }
}
