//! Scripted walkthrough of a chat session against the in-process transport.
//!
//! Shows the optimistic send cycle, history paging and the close flow
//! without a backend. Run with `cargo run --bin chatline-demo`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chatline::config::SessionConfig;
use chatline::facade::ChatService;
use chatline::item::ChatState;
use chatline::message::Message;
use chatline::session::ChatObserver;
use chatline::tracker::MessageListener;
use chatline::transport::mock::MockTransport;
use chatline::transport::SessionUpdate;

struct EchoListener;

impl MessageListener for EchoListener {
    fn added(&self, message: &Message, _after: Option<&Message>) {
        println!("  + {:?}: {}", message.sender, message.text);
    }

    fn removed(&self, message: &Message) {
        println!("  - {}", message.text);
    }

    fn removed_all(&self) {
        println!("  history cleared");
    }

    fn changed(&self, old: &Message, new: &Message) {
        println!("  ~ {} (now {:?})", old.text, new.send_status);
    }
}

struct EchoObserver;

impl ChatObserver for EchoObserver {
    fn chat_state_changed(&self, old: ChatState, new: ChatState) {
        println!("  state: {:?} -> {:?}", old, new);
    }

    fn operator_typing_changed(&self, typing: bool) {
        println!("  operator typing: {}", typing);
    }
}

fn wire_message(id: &str, kind: &str, text: &str, ts: f64) -> serde_json::Value {
    json!({ "id": id, "kind": kind, "text": text, "ts": ts })
}

#[tokio::main]
async fn main() -> chatline::Result<()> {
    chatline::init();

    let transport = MockTransport::new();
    transport
        .set_initial_chat(json!({
            "id": "chat-1",
            "state": "chatting",
            "creationTs": 1_700_000_000.0,
            "operator": { "id": "op-7", "fullname": "Alex" },
            "operatorTyping": false,
            "messages": [
                wire_message("m-3", "visitor", "Hi, my order never arrived", 1_700_000_100.0),
                wire_message("m-4", "operator", "Let me check that for you", 1_700_000_160.0),
            ],
        }))
        .await;
    transport
        .set_history_backlog(vec![
            wire_message("m-1", "info", "Chat started", 1_700_000_000.0),
            wire_message("m-2", "operator", "Welcome! How can I help?", 1_700_000_050.0),
            wire_message("m-3", "visitor", "Hi, my order never arrived", 1_700_000_100.0),
        ])
        .await;

    let config = SessionConfig::new("https://demo.chat.example", "demo", "support");
    let service = ChatService::with_transport(config, transport.clone());
    service.set_message_listener(Arc::new(EchoListener)).await;
    service.set_chat_observer(Arc::new(EchoObserver)).await;

    println!("starting session");
    service.start().await?;

    let last = service.get_last_messages(10).await;
    println!("snapshot holds {} messages", last.len());

    println!("sending a message");
    let pending = service.send_message("It was order #4521").await?;

    // The backend confirms the send with the server-side copy.
    transport.push_update(SessionUpdate::MessageAdded {
        message: json!({
            "id": "m-5",
            "clientSideId": pending.client_side_id,
            "kind": "visitor",
            "text": "It was order #4521",
            "ts": 1_700_000_200.0,
        }),
        after_id: None,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("paging older history");
    let older = service.get_next_messages(5).await;
    println!(
        "paged in {} older messages ({} network calls)",
        older.len(),
        transport.history_call_count()
    );

    transport.push_update(SessionUpdate::OperatorTypingChanged { typing: true });
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("closing chat");
    service.close_chat().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("final state: {:?}", service.chat_state().await);

    service.destroy().await;
    Ok(())
}
