//! Chat snapshot item

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

use super::{bool_field, f64_field, string_field, MessageItem, OperatorItem, RatingItem};

/// State of a chat as reported by the backend
///
/// Transitions are driven entirely by backend deltas; the client never
/// invents one except for optimistically marking a just-submitted close
/// request as [`ChatState::ClosedByVisitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    /// State missing or not recognized by this client version
    Unknown,
    /// Visitor is waiting for an operator
    Queue,
    /// Conversation in progress
    Chatting,
    /// Closed without a recorded initiator
    Closed,
    /// Closed by the visitor
    ClosedByVisitor,
    /// Closed by the operator
    ClosedByOperator,
    /// Operator invited the visitor to chat
    Invitation,
}

impl ChatState {
    /// Parse a wire string; unrecognized values read as [`ChatState::Unknown`]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "queue" => ChatState::Queue,
            "chatting" => ChatState::Chatting,
            "closed" => ChatState::Closed,
            "closed_by_visitor" => ChatState::ClosedByVisitor,
            "closed_by_operator" => ChatState::ClosedByOperator,
            "invitation" => ChatState::Invitation,
            _ => ChatState::Unknown,
        }
    }

    /// Wire representation of this state
    pub fn as_wire(&self) -> &'static str {
        match self {
            ChatState::Unknown => "unknown",
            ChatState::Queue => "queue",
            ChatState::Chatting => "chatting",
            ChatState::Closed => "closed",
            ChatState::ClosedByVisitor => "closed_by_visitor",
            ChatState::ClosedByOperator => "closed_by_operator",
            ChatState::Invitation => "invitation",
        }
    }

    /// Whether the chat is closed in any form
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ChatState::Closed
                | ChatState::ClosedByVisitor
                | ChatState::ClosedByOperator
                | ChatState::Unknown
        )
    }
}

/// One active conversation as delivered by the backend
///
/// Identity is the (id, client_side_id) pair: that pair is stable across
/// reconnections, while the content (messages, state, operator) is not.
#[derive(Debug, Clone)]
pub struct ChatItem {
    /// Server-assigned id, or one synthesized from the negated creation
    /// timestamp when the backend omits it
    pub id: String,
    /// Client-side id assigned before server acknowledgement
    pub client_side_id: Option<String>,
    /// Creation timestamp, milliseconds
    pub creation_ts: f64,
    /// Last modification timestamp, milliseconds
    pub modification_ts: Option<f64>,
    /// Current chat state
    pub state: ChatState,
    /// Assigned operator, once the queue resolves
    pub operator: Option<OperatorItem>,
    /// Whether the operator is typing
    pub operator_typing: bool,
    /// Whether the visitor is typing (echo of our own draft)
    pub visitor_typing: bool,
    /// Whether the visitor has read the chat
    pub read_by_visitor: Option<bool>,
    /// Since when the operator has unread messages, milliseconds
    pub unread_by_operator_ts: Option<f64>,
    /// Since when the visitor has unread messages, milliseconds
    pub unread_by_visitor_ts: Option<f64>,
    /// Ordered message snapshot
    pub messages: Vec<MessageItem>,
    /// Ratings already given, keyed by operator id
    pub operator_id_to_rate: HashMap<String, RatingItem>,
    /// Backend routing category
    pub category: Option<String>,
    /// Backend routing subcategory
    pub subcategory: Option<String>,
    /// Chat subject
    pub subject: Option<String>,
    /// Whether the chat was started while no operator was online
    pub offline: Option<bool>,
}

impl ChatItem {
    /// Parse a chat snapshot from a backend payload
    ///
    /// Never fails: a chat with no usable fields parses into an empty chat
    /// with a synthesized id.
    pub fn parse(payload: &Value) -> Self {
        let creation_ts =
            f64_field(payload, "creationTs").unwrap_or_else(Self::synthesized_creation_ts);
        let id = string_field(payload, "id")
            .unwrap_or_else(|| Self::synthesize_id(creation_ts));

        let messages = payload
            .get("messages")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(MessageItem::parse).collect())
            .unwrap_or_default();

        let operator = payload
            .get("operator")
            .filter(|v| v.is_object())
            .map(OperatorItem::parse);

        let mut operator_id_to_rate = HashMap::new();
        if let Some(ratings) = payload.get("operatorIdToRate").and_then(Value::as_object) {
            for (operator_id, rating_value) in ratings {
                if rating_value.is_object() {
                    operator_id_to_rate
                        .insert(operator_id.clone(), RatingItem::parse(rating_value));
                }
            }
        }

        Self {
            id,
            client_side_id: string_field(payload, "clientSideId"),
            creation_ts,
            modification_ts: f64_field(payload, "modificationTs"),
            state: string_field(payload, "state")
                .map(|s| ChatState::from_wire(&s))
                .unwrap_or(ChatState::Unknown),
            operator,
            operator_typing: bool_field(payload, "operatorTyping").unwrap_or(false),
            visitor_typing: bool_field(payload, "visitorTyping").unwrap_or(false),
            read_by_visitor: bool_field(payload, "readByVisitor"),
            unread_by_operator_ts: f64_field(payload, "unreadByOperatorSinceTs"),
            unread_by_visitor_ts: f64_field(payload, "unreadByVisitorSinceTs"),
            messages,
            operator_id_to_rate,
            category: string_field(payload, "category"),
            subcategory: string_field(payload, "subcategory"),
            subject: string_field(payload, "subject"),
            offline: bool_field(payload, "offline"),
        }
    }

    fn synthesized_creation_ts() -> f64 {
        Utc::now().timestamp_millis() as f64
    }

    /// Deterministic id fallback used when the backend omits `id`
    fn synthesize_id(creation_ts: f64) -> String {
        format!("{}", -(creation_ts as i64))
    }
}

// Equality is identity, not content: used by the reconciliation engine to
// decide whether a full update refers to the same logical chat.
impl PartialEq for ChatItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.client_side_id == other.client_side_id
    }
}

impl Eq for ChatItem {}
