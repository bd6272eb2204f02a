//! Item to public message mapping
//!
//! A deterministic, pure translation from backend items to the public
//! [`Message`] representation. The mapper applies the visibility policy
//! (internal service messages, deleted messages and the visitor's own
//! typing echo are hidden), resolves the sender identity valid at the
//! message's time, classifies attachments, and normalizes timestamps
//! against the session's clock-skew correction.

use crate::item::{MessageItem, MessageKind, OperatorItem};
use crate::message::{Attachment, Message, MessageSender, MessageType, Quote, SendStatus};

/// Maps backend message items into the public message model
#[derive(Debug, Clone)]
pub struct MessageMapper {
    /// Backend base URL, used to resolve relative avatar paths
    base_url: String,
}

impl MessageMapper {
    /// Create a mapper resolving avatars against the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    /// Map one backend item into a public message
    ///
    /// Returns `None` for items that must not be shown: internal service
    /// kinds, unrecognized kinds, deleted messages, and the server's echo
    /// of the visitor's unsent draft (an entry with no id at all).
    ///
    /// `fallback_operator` is the chat's operator assigned at the time the
    /// snapshot was taken; it is only consulted when the item itself does
    /// not carry sender fields, so operator messages keep the identity
    /// valid at *their* time even after the operator changed mid-chat.
    pub fn map(
        &self,
        item: &MessageItem,
        fallback_operator: Option<&OperatorItem>,
        time_offset_micros: i64,
    ) -> Option<Message> {
        if item.deleted {
            return None;
        }
        // The typing echo the server reflects back has no identity yet.
        let id = item.id.clone().or_else(|| item.client_side_id.clone())?;

        let kind = MessageType::from_kind(item.kind)?;
        let sender = self.resolve_sender(item, fallback_operator);
        let attachment = item.file.as_ref().map(Attachment::from_file_item);
        let quote = item.quote.as_ref().map(|q| Quote {
            message_id: q.message_id.clone(),
            text: q.text.clone().unwrap_or_default(),
            sender_name: q.sender_name.clone(),
        });

        Some(Message {
            id,
            client_side_id: item.client_side_id.clone().unwrap_or_default(),
            kind,
            sender,
            text: item.text.clone().unwrap_or_default(),
            attachment,
            quote,
            ts_micros: item.ts_micros,
            display_ts_ms: (item.ts_micros + time_offset_micros) / 1000,
            send_status: SendStatus::Confirmed,
            read: item.read,
        })
    }

    fn resolve_sender(
        &self,
        item: &MessageItem,
        fallback_operator: Option<&OperatorItem>,
    ) -> MessageSender {
        match item.kind {
            MessageKind::VisitorMessage
            | MessageKind::FileFromVisitor
            | MessageKind::KeyboardResponse => MessageSender::Visitor,
            MessageKind::OperatorMessage
            | MessageKind::FileFromOperator
            | MessageKind::Keyboard
            | MessageKind::ActionRequest => {
                // Prefer the sender fields stamped on the message itself:
                // they hold the operator snapshot valid at send time.
                let name = item
                    .sender_name
                    .clone()
                    .or_else(|| fallback_operator.and_then(|o| o.full_name.clone()))
                    .unwrap_or_else(|| "Operator".to_string());
                let avatar_path = item
                    .avatar_path
                    .clone()
                    .or_else(|| fallback_operator.and_then(|o| o.avatar_path.clone()));
                MessageSender::Operator {
                    id: item
                        .operator_id
                        .clone()
                        .or_else(|| fallback_operator.map(|o| o.id.clone())),
                    name,
                    avatar_url: avatar_path.map(|p| self.resolve_url(&p)),
                }
            }
            _ => MessageSender::System,
        }
    }

    /// Resolve a possibly relative avatar path against the base URL
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> MessageMapper {
        MessageMapper::new("https://chat.example.com/")
    }

    fn item(payload: serde_json::Value) -> MessageItem {
        MessageItem::parse(&payload)
    }

    #[test]
    fn test_map_operator_message_uses_send_time_identity() {
        let current = OperatorItem::parse(&json!({
            "id": "op-new", "fullname": "Current Operator", "avatar": "/a/new.png"
        }));
        let message = mapper()
            .map(
                &item(json!({
                    "id": "m1", "kind": "operator", "ts": 10.0,
                    "operatorId": "op-old", "name": "Past Operator", "avatar": "/a/old.png"
                })),
                Some(&current),
                0,
            )
            .expect("operator message maps");
        match message.sender {
            MessageSender::Operator { id, name, avatar_url } => {
                assert_eq!(id.as_deref(), Some("op-old"));
                assert_eq!(name, "Past Operator");
                assert_eq!(
                    avatar_url.as_deref(),
                    Some("https://chat.example.com/a/old.png")
                );
            }
            other => panic!("unexpected sender: {:?}", other),
        }
    }

    #[test]
    fn test_map_falls_back_to_chat_operator() {
        let current = OperatorItem::parse(&json!({
            "id": "op-1", "fullname": "Eva", "avatar": "/a/eva.png"
        }));
        let message = mapper()
            .map(
                &item(json!({"id": "m1", "kind": "operator", "ts": 10.0})),
                Some(&current),
                0,
            )
            .expect("operator message maps");
        match message.sender {
            MessageSender::Operator { id, name, .. } => {
                assert_eq!(id.as_deref(), Some("op-1"));
                assert_eq!(name, "Eva");
            }
            other => panic!("unexpected sender: {:?}", other),
        }
    }

    #[test]
    fn test_typing_echo_is_hidden() {
        // A visitor entry with no id at all is the echo of the unsent draft.
        let hidden = mapper().map(
            &item(json!({"kind": "visitor", "text": "typing...", "ts": 1.0})),
            None,
            0,
        );
        assert!(hidden.is_none());
    }

    #[test]
    fn test_internal_and_deleted_messages_are_hidden() {
        assert!(mapper()
            .map(&item(json!({"id": "m1", "kind": "for_operator", "ts": 1.0})), None, 0)
            .is_none());
        assert!(mapper()
            .map(
                &item(json!({"id": "m2", "kind": "visitor", "ts": 1.0, "deleted": true})),
                None,
                0
            )
            .is_none());
    }

    #[test]
    fn test_clock_skew_normalization() {
        // Server is 5 seconds ahead of the local clock.
        let message = mapper()
            .map(
                &item(json!({"id": "m1", "kind": "visitor", "ts": 100.0})),
                None,
                -5_000_000,
            )
            .expect("visitor message maps");
        assert_eq!(message.ts_micros, 100_000_000);
        assert_eq!(message.display_ts_ms, 95_000);
    }

    #[test]
    fn test_map_is_deterministic() {
        let payload = json!({"id": "m1", "kind": "operator", "name": "Eva", "ts": 3.5});
        let a = mapper().map(&item(payload.clone()), None, 0);
        let b = mapper().map(&item(payload), None, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_absolute_avatar_url_kept() {
        assert_eq!(
            mapper().resolve_url("https://cdn.example/x.png"),
            "https://cdn.example/x.png"
        );
        assert_eq!(
            mapper().resolve_url("avatars/y.png"),
            "https://chat.example.com/avatars/y.png"
        );
    }
}
