//! Message item and its nested records (quote, file attachment)

use serde_json::Value;

use super::{bool_field, f64_field, i64_field, string_field};

/// Message kind as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Request for the visitor to pick an action
    ActionRequest,
    /// Request for the visitor's contact information
    ContactInformationRequest,
    /// File sent by an operator
    FileFromOperator,
    /// File sent by the visitor
    FileFromVisitor,
    /// Internal service message addressed to the operator, never shown
    ForOperator,
    /// System/informational message
    Info,
    /// Keyboard (button palette) sent by a bot
    Keyboard,
    /// Visitor's response to a keyboard
    KeyboardResponse,
    /// Text message from an operator
    OperatorMessage,
    /// "All operators are busy" notice
    OperatorBusy,
    /// Text message from the visitor
    VisitorMessage,
    /// Kind missing or not recognized by this client version
    Unknown,
}

impl MessageKind {
    /// Parse a wire string; unrecognized values read as [`MessageKind::Unknown`]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "action_request" => MessageKind::ActionRequest,
            "cont_req" => MessageKind::ContactInformationRequest,
            "file_operator" => MessageKind::FileFromOperator,
            "file_visitor" => MessageKind::FileFromVisitor,
            "for_operator" => MessageKind::ForOperator,
            "info" => MessageKind::Info,
            "keyboard" => MessageKind::Keyboard,
            "keyboard_response" => MessageKind::KeyboardResponse,
            "operator" => MessageKind::OperatorMessage,
            "operator_busy" => MessageKind::OperatorBusy,
            "visitor" => MessageKind::VisitorMessage,
            _ => MessageKind::Unknown,
        }
    }

    /// Whether this kind carries a file payload
    pub fn is_file(&self) -> bool {
        matches!(
            self,
            MessageKind::FileFromOperator | MessageKind::FileFromVisitor
        )
    }

    /// Whether the sender is an operator (as opposed to the visitor or the system)
    pub fn is_from_operator(&self) -> bool {
        matches!(
            self,
            MessageKind::OperatorMessage | MessageKind::FileFromOperator | MessageKind::Keyboard
        )
    }
}

/// Image metadata attached to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Width in pixels
    pub width: Option<i64>,
    /// Height in pixels
    pub height: Option<i64>,
}

/// File payload of a file message
#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    /// Original file name
    pub filename: Option<String>,
    /// Download URL
    pub url: Option<String>,
    /// MIME content type
    pub content_type: Option<String>,
    /// Size in bytes
    pub size: Option<i64>,
    /// Image metadata, present for image files
    pub image: Option<ImageInfo>,
}

impl FileItem {
    /// Parse a file payload from a backend value
    pub fn parse(payload: &Value) -> Self {
        let image = payload.get("image").and_then(Value::as_object).map(|img| {
            let size = img.get("size");
            ImageInfo {
                width: size.and_then(|s| s.get("width")).and_then(Value::as_i64),
                height: size.and_then(|s| s.get("height")).and_then(Value::as_i64),
            }
        });

        Self {
            filename: string_field(payload, "filename"),
            url: string_field(payload, "url"),
            content_type: string_field(payload, "contentType"),
            size: i64_field(payload, "size"),
            image,
        }
    }
}

/// Reference to an earlier message, shown as a quote
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteItem {
    /// Id of the quoted message
    pub message_id: Option<String>,
    /// Quoted text snippet
    pub text: Option<String>,
    /// Display name of the quoted message's sender
    pub sender_name: Option<String>,
    /// Timestamp of the quoted message, microseconds
    pub ts_micros: Option<i64>,
}

impl QuoteItem {
    /// Parse a quote from a backend value
    pub fn parse(payload: &Value) -> Self {
        // The backend nests the quoted message under "message".
        let inner = payload.get("message").unwrap_or(payload);
        Self {
            message_id: string_field(inner, "id"),
            text: string_field(inner, "text"),
            sender_name: string_field(inner, "authorName"),
            ts_micros: f64_field(inner, "ts").map(seconds_to_micros),
        }
    }
}

/// One message as delivered by the backend
///
/// `id` is stable across edits. `client_side_id` is assigned by the sender
/// before server acknowledgement and is what matches an optimistic local
/// entry to its authoritative server copy.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageItem {
    /// Server-assigned id; absent for unacknowledged echoes
    pub id: Option<String>,
    /// Sender-assigned id, stable from optimistic send to server copy
    pub client_side_id: Option<String>,
    /// Message kind
    pub kind: MessageKind,
    /// Message timestamp, microseconds
    pub ts_micros: i64,
    /// Id of the sending operator, absent for visitor/system messages
    pub operator_id: Option<String>,
    /// Sender display name at send time
    pub sender_name: Option<String>,
    /// Sender avatar path at send time, relative to the backend base URL
    pub avatar_path: Option<String>,
    /// Message text
    pub text: Option<String>,
    /// Structured payload (file descriptors, keyboard layouts)
    pub data: Option<Value>,
    /// File payload, for file kinds
    pub file: Option<FileItem>,
    /// Quoted earlier message
    pub quote: Option<QuoteItem>,
    /// Whether the counterpart has read this message
    pub read: bool,
    /// Whether the backend marked this message deleted
    pub deleted: bool,
}

impl MessageItem {
    /// Parse a message from a backend payload; never fails
    pub fn parse(payload: &Value) -> Self {
        let kind = string_field(payload, "kind")
            .map(|k| MessageKind::from_wire(&k))
            .unwrap_or(MessageKind::Unknown);

        let data = payload.get("data").filter(|v| v.is_object()).cloned();
        let file = data
            .as_ref()
            .and_then(|d| d.get("file"))
            .filter(|v| v.is_object())
            .map(FileItem::parse);

        let quote = payload
            .get("quote")
            .filter(|v| v.is_object())
            .map(QuoteItem::parse);

        Self {
            id: string_field(payload, "id"),
            client_side_id: string_field(payload, "clientSideId"),
            kind,
            ts_micros: f64_field(payload, "ts").map(seconds_to_micros).unwrap_or(0),
            operator_id: string_field(payload, "operatorId"),
            sender_name: string_field(payload, "name"),
            avatar_path: string_field(payload, "avatar"),
            text: string_field(payload, "text"),
            data,
            file,
            quote,
            read: bool_field(payload, "read").unwrap_or(false),
            deleted: bool_field(payload, "deleted").unwrap_or(false),
        }
    }
}

/// The wire carries fractional seconds; internally timestamps are microseconds.
fn seconds_to_micros(seconds: f64) -> i64 {
    (seconds * 1_000_000.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_wire() {
        assert_eq!(MessageKind::from_wire("visitor"), MessageKind::VisitorMessage);
        assert_eq!(
            MessageKind::from_wire("operator"),
            MessageKind::OperatorMessage
        );
        assert_eq!(
            MessageKind::from_wire("file_visitor"),
            MessageKind::FileFromVisitor
        );
        assert_eq!(MessageKind::from_wire("glitter"), MessageKind::Unknown);
    }

    #[test]
    fn test_parse_text_message() {
        let item = MessageItem::parse(&json!({
            "id": "m1",
            "clientSideId": "cs1",
            "kind": "operator",
            "operatorId": "op-3",
            "name": "Eva",
            "avatar": "/avatars/eva.png",
            "text": "How can I help?",
            "ts": 1700000000.25,
            "read": true
        }));
        assert_eq!(item.id.as_deref(), Some("m1"));
        assert_eq!(item.kind, MessageKind::OperatorMessage);
        assert_eq!(item.operator_id.as_deref(), Some("op-3"));
        assert_eq!(item.ts_micros, 1_700_000_000_250_000);
        assert!(item.read);
        assert!(!item.deleted);
        assert!(item.file.is_none());
    }

    #[test]
    fn test_parse_file_message() {
        let item = MessageItem::parse(&json!({
            "id": "m2",
            "kind": "file_operator",
            "ts": 5.0,
            "data": {
                "file": {
                    "filename": "invoice.png",
                    "url": "https://cdn.example/invoice.png",
                    "contentType": "image/png",
                    "size": 2048,
                    "image": {"size": {"width": 640, "height": 480}}
                }
            }
        }));
        let file = item.file.expect("file payload should parse");
        assert_eq!(file.filename.as_deref(), Some("invoice.png"));
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(file.size, Some(2048));
        let image = file.image.expect("image metadata should parse");
        assert_eq!(image.width, Some(640));
        assert_eq!(image.height, Some(480));
    }

    #[test]
    fn test_parse_quote() {
        let item = MessageItem::parse(&json!({
            "id": "m3",
            "kind": "visitor",
            "ts": 6.0,
            "quote": {
                "message": {"id": "m1", "text": "original", "authorName": "Eva", "ts": 1.5}
            }
        }));
        let quote = item.quote.expect("quote should parse");
        assert_eq!(quote.message_id.as_deref(), Some("m1"));
        assert_eq!(quote.text.as_deref(), Some("original"));
        assert_eq!(quote.sender_name.as_deref(), Some("Eva"));
        assert_eq!(quote.ts_micros, Some(1_500_000));
    }

    #[test]
    fn test_parse_degenerate_message() {
        // Nothing usable: still parses, with Unknown kind and no identity.
        let item = MessageItem::parse(&json!({"kind": [], "ts": "later"}));
        assert_eq!(item.kind, MessageKind::Unknown);
        assert!(item.id.is_none());
        assert_eq!(item.ts_micros, 0);
    }
}
