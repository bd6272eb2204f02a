use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;

use crate::config::SessionConfig;
use crate::item::ChatState;
use crate::message::{Message, SendError, SendStatus};
use crate::session::{
    ChatObserver, ChatSession, RateOperatorCompletion, SendFileCompletion, SessionLifecycle,
};
use crate::tracker::MessageListener;
use crate::transport::mock::{MockTransport, SentAction};
use crate::transport::{RateOperatorError, SendFileError, SessionUpdate};

fn test_config() -> SessionConfig {
    SessionConfig::new("https://chat.example", "acct", "support")
        .with_send_timeout(Duration::from_millis(500))
        .with_reconnect_delay(Duration::from_millis(20))
}

fn wire_message(id: &str, kind: &str, text: &str, ts: f64) -> serde_json::Value {
    json!({ "id": id, "kind": kind, "text": text, "ts": ts })
}

fn chat_with_messages(messages: Vec<serde_json::Value>) -> serde_json::Value {
    json!({
        "id": "chat-1",
        "state": "chatting",
        "creationTs": 1_700_000_000.0,
        "operator": { "id": "op-1", "fullname": "Alex" },
        "messages": messages,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Added(String),
    Removed(String, SendStatus),
    RemovedAll,
    Changed(String, String),
}

struct Recorder(StdMutex<Vec<Seen>>);

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(StdMutex::new(Vec::new())))
    }

    fn seen(&self) -> Vec<Seen> {
        self.0.lock().expect("recorder lock").clone()
    }
}

impl MessageListener for Recorder {
    fn added(&self, message: &Message, _after: Option<&Message>) {
        self.0
            .lock()
            .expect("recorder lock")
            .push(Seen::Added(message.id.clone()));
    }

    fn removed(&self, message: &Message) {
        self.0
            .lock()
            .expect("recorder lock")
            .push(Seen::Removed(message.id.clone(), message.send_status));
    }

    fn removed_all(&self) {
        self.0.lock().expect("recorder lock").push(Seen::RemovedAll);
    }

    fn changed(&self, old: &Message, new: &Message) {
        self.0
            .lock()
            .expect("recorder lock")
            .push(Seen::Changed(old.id.clone(), new.id.clone()));
    }
}

struct StateRecorder(StdMutex<Vec<(ChatState, ChatState)>>);

impl StateRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(StdMutex::new(Vec::new())))
    }

    fn transitions(&self) -> Vec<(ChatState, ChatState)> {
        self.0.lock().expect("state lock").clone()
    }
}

impl ChatObserver for StateRecorder {
    fn chat_state_changed(&self, old: ChatState, new: ChatState) {
        self.0.lock().expect("state lock").push((old, new));
    }
}

struct RateRecorder {
    successes: AtomicUsize,
    failures: StdMutex<Vec<RateOperatorError>>,
}

impl RateRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            successes: AtomicUsize::new(0),
            failures: StdMutex::new(Vec::new()),
        })
    }
}

impl RateOperatorCompletion for RateRecorder {
    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, error: RateOperatorError) {
        self.failures.lock().expect("rate lock").push(error);
    }
}

struct FileRecorder(StdMutex<Option<std::result::Result<String, SendFileError>>>);

impl FileRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(StdMutex::new(None)))
    }

    fn outcome(&self) -> Option<std::result::Result<String, SendFileError>> {
        self.0.lock().expect("file lock").clone()
    }
}

impl SendFileCompletion for FileRecorder {
    fn on_success(&self, message_id: &str) {
        *self.0.lock().expect("file lock") = Some(Ok(message_id.to_string()));
    }

    fn on_failure(&self, _message_id: &str, error: SendFileError) {
        *self.0.lock().expect("file lock") = Some(Err(error));
    }
}

async fn started_session(
    transport: Arc<MockTransport>,
) -> (ChatSession, Arc<Recorder>, crate::tracker::MessageTracker) {
    let session = ChatSession::new(test_config(), transport);
    let mut tracker = session.new_message_tracker();
    let recorder = Recorder::new();
    tracker.set_listener(recorder.clone()).await;
    session.start().await.expect("session start");
    (session, recorder, tracker)
}

#[tokio::test]
async fn test_send_confirmed_by_delta_replaces_in_place() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(vec![wire_message(
            "m-1",
            "operator",
            "Hello",
            1_700_000_100.0,
        )]))
        .await;
    let (session, recorder, mut tracker) = started_session(transport.clone()).await;

    let pending = session.send_message("hi there").await.expect("send");
    assert_eq!(pending.send_status, SendStatus::Pending);
    tokio::time::sleep(Duration::from_millis(50)).await;

    transport.push_update(SessionUpdate::MessageAdded {
        message: json!({
            "id": "m-2",
            "clientSideId": pending.client_side_id,
            "kind": "visitor",
            "text": "hi there",
            "ts": 1_700_000_200.0,
        }),
        after_id: None,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let history = tracker.get_last_messages(10).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].id, "m-2");
    assert_eq!(history[1].send_status, SendStatus::Confirmed);

    // The confirmation must surface as an in-place change, never as a
    // removal plus a re-addition.
    let seen = recorder.seen();
    assert!(seen.contains(&Seen::Changed(pending.client_side_id.clone(), "m-2".to_string())));
    assert!(!seen
        .iter()
        .any(|s| matches!(s, Seen::Removed(id, _) if *id == pending.client_side_id)));

    session.destroy().await;
}

#[tokio::test]
async fn test_send_failure_retracts_pending_with_reason() {
    let transport = MockTransport::new();
    transport.set_fail_sends(true);
    let (session, recorder, mut tracker) = started_session(transport.clone()).await;

    let pending = session.send_message("will fail").await.expect("send");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(tracker.get_last_messages(10).await.is_empty());
    let seen = recorder.seen();
    assert!(seen.contains(&Seen::Added(pending.client_side_id.clone())));
    assert!(seen.contains(&Seen::Removed(
        pending.client_side_id.clone(),
        SendStatus::Failed(SendError::Transport),
    )));

    session.destroy().await;
}

#[tokio::test]
async fn test_send_timeout_retracts_pending_with_timeout_reason() {
    let transport = MockTransport::new();
    transport.set_send_delay(Duration::from_secs(5)).await;
    let config = test_config().with_send_timeout(Duration::from_millis(100));
    let session = ChatSession::new(config, transport.clone());
    let mut tracker = session.new_message_tracker();
    let recorder = Recorder::new();
    tracker.set_listener(recorder.clone()).await;
    session.start().await.expect("session start");

    let pending = session.send_message("stuck forever").await.expect("send");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(tracker.get_last_messages(10).await.is_empty());
    assert!(recorder.seen().contains(&Seen::Removed(
        pending.client_side_id.clone(),
        SendStatus::Failed(SendError::Timeout),
    )));

    session.destroy().await;
}

#[tokio::test]
async fn test_file_send_rejection_retracts_and_reports() {
    let transport = MockTransport::new();
    transport
        .set_file_result(Err(SendFileError::FileSizeExceeded))
        .await;
    let (session, recorder, mut tracker) = started_session(transport.clone()).await;

    let completion = FileRecorder::new();
    let pending = session
        .send_file(vec![0u8; 64], "photo.png", "image/png", completion.clone())
        .await
        .expect("send file");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        completion.outcome(),
        Some(Err(SendFileError::FileSizeExceeded))
    );
    assert!(tracker.get_last_messages(10).await.is_empty());
    assert!(recorder.seen().contains(&Seen::Removed(
        pending.client_side_id.clone(),
        SendStatus::Failed(SendError::FileSizeExceeded),
    )));

    session.destroy().await;
}

#[tokio::test]
async fn test_optimistic_close_overridden_by_backend() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(Vec::new()))
        .await;
    let session = ChatSession::new(test_config(), transport.clone());
    let states = StateRecorder::new();
    session.set_chat_observer(states.clone()).await;
    session.start().await.expect("session start");

    session.close_chat().await;
    assert_eq!(session.chat_state().await, ChatState::ClosedByVisitor);

    // The backend keeps the chat open; its delta wins over the
    // optimistic flip.
    transport.push_update(SessionUpdate::ChatStateChanged {
        state: "chatting".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.chat_state().await, ChatState::Chatting);

    let transitions = states.transitions();
    assert!(transitions.contains(&(ChatState::Chatting, ChatState::ClosedByVisitor)));
    assert!(transitions.contains(&(ChatState::ClosedByVisitor, ChatState::Chatting)));
    assert!(transport
        .sent_actions()
        .await
        .contains(&SentAction::CloseChat));

    session.destroy().await;
}

#[tokio::test]
async fn test_close_when_already_closed_is_noop() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(json!({
            "id": "chat-1",
            "state": "closed_by_operator",
            "creationTs": 1_700_000_000.0,
        }))
        .await;
    let session = ChatSession::new(test_config(), transport.clone());
    session.start().await.expect("session start");

    session.close_chat().await;
    assert_eq!(session.chat_state().await, ChatState::ClosedByOperator);

    session.destroy().await;
}

#[tokio::test]
async fn test_reconnect_reconciles_missed_changes_via_diff() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(vec![
            wire_message("m-1", "visitor", "first", 1_700_000_100.0),
            wire_message("m-2", "operator", "second", 1_700_000_200.0),
        ]))
        .await;
    // While disconnected the operator edits m-2 and a new message lands.
    transport
        .set_resume_chat(chat_with_messages(vec![
            wire_message("m-1", "visitor", "first", 1_700_000_100.0),
            wire_message("m-2", "operator", "second, edited", 1_700_000_200.0),
            wire_message("m-3", "operator", "third", 1_700_000_300.0),
        ]))
        .await;
    let (session, recorder, mut tracker) = started_session(transport.clone()).await;

    transport.push_disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let history = tracker.get_last_messages(10).await;
    let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second, edited", "third"]);

    let seen = recorder.seen();
    assert!(seen.contains(&Seen::Changed("m-2".to_string(), "m-2".to_string())));
    assert!(seen.contains(&Seen::Added("m-3".to_string())));
    // Survivors must not be churned through remove/re-add.
    assert!(!seen.iter().any(|s| matches!(s, Seen::Removed(..))));
    assert!(!seen.contains(&Seen::RemovedAll));

    session.destroy().await;
}

#[tokio::test]
async fn test_rate_operator_coalesces_while_in_flight() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(Vec::new()))
        .await;
    transport.set_rate_delay(Duration::from_millis(80)).await;
    let session = ChatSession::new(test_config(), transport.clone());
    session.start().await.expect("session start");

    let first = RateRecorder::new();
    let second = RateRecorder::new();
    let third = RateRecorder::new();
    session.rate_operator("op-1", 3, first.clone()).await;
    session.rate_operator("op-1", 4, second.clone()).await;
    session.rate_operator("op-1", 5, third.clone()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // One request in flight plus one follow-up carrying the latest score.
    let rates: Vec<SentAction> = transport
        .sent_actions()
        .await
        .into_iter()
        .filter(|a| matches!(a, SentAction::Rate { .. }))
        .collect();
    assert_eq!(
        rates,
        vec![
            SentAction::Rate {
                operator_id: "op-1".to_string(),
                rating: 3,
            },
            SentAction::Rate {
                operator_id: "op-1".to_string(),
                rating: 5,
            },
        ]
    );
    assert_eq!(first.successes.load(Ordering::SeqCst), 1);
    assert_eq!(second.successes.load(Ordering::SeqCst), 1);
    assert_eq!(third.successes.load(Ordering::SeqCst), 1);

    session.destroy().await;
}

#[tokio::test]
async fn test_rate_operator_rejects_unknown_operator() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(Vec::new()))
        .await;
    let session = ChatSession::new(test_config(), transport.clone());
    session.start().await.expect("session start");

    let completion = RateRecorder::new();
    session.rate_operator("op-999", 5, completion.clone()).await;
    assert_eq!(
        completion.failures.lock().expect("rate lock").as_slice(),
        &[RateOperatorError::OperatorNotInChat]
    );
    assert!(transport.sent_actions().await.is_empty());

    session.destroy().await;
}

#[tokio::test]
async fn test_rate_operator_without_chat_fails() {
    let transport = MockTransport::new();
    let session = ChatSession::new(test_config(), transport.clone());
    session.start().await.expect("session start");

    let completion = RateRecorder::new();
    session.rate_operator("op-1", 5, completion.clone()).await;
    assert_eq!(
        completion.failures.lock().expect("rate lock").as_slice(),
        &[RateOperatorError::NoChat]
    );

    session.destroy().await;
}

#[tokio::test]
async fn test_typing_and_read_notifications_reach_transport() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(Vec::new()))
        .await;
    let session = ChatSession::new(test_config(), transport.clone());
    session.start().await.expect("session start");

    session.set_visitor_typing(Some("typing a repl".to_string())).await;
    session.mark_chat_read().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = transport.sent_actions().await;
    assert!(sent.contains(&SentAction::Typing {
        draft: Some("typing a repl".to_string()),
    }));
    assert!(sent.contains(&SentAction::MarkRead));

    session.destroy().await;
}

#[tokio::test]
async fn test_start_twice_fails() {
    let transport = MockTransport::new();
    let session = ChatSession::new(test_config(), transport);
    session.start().await.expect("first start");
    assert!(session.start().await.is_err());
    session.destroy().await;
}

#[tokio::test]
async fn test_destroy_closes_lifecycle_and_rejects_sends() {
    let transport = MockTransport::new();
    let session = ChatSession::new(test_config(), transport);
    session.start().await.expect("session start");
    assert_eq!(session.lifecycle().await, SessionLifecycle::Running);

    session.destroy().await;
    assert_eq!(session.lifecycle().await, SessionLifecycle::Closed);
    assert!(session.send_message("too late").await.is_err());
}

#[tokio::test]
async fn test_hidden_delta_kinds_do_not_surface() {
    let transport = MockTransport::new();
    transport
        .set_initial_chat(chat_with_messages(Vec::new()))
        .await;
    let (session, recorder, mut tracker) = started_session(transport.clone()).await;

    transport.push_update(SessionUpdate::MessageAdded {
        message: wire_message("m-internal", "for_operator", "internal note", 1_700_000_100.0),
        after_id: None,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(tracker.get_last_messages(10).await.is_empty());
    assert!(recorder.seen().is_empty());

    session.destroy().await;
}
