//! Public message model
//!
//! This is the representation handed to listeners and UI code. Instances
//! are built by the mapper from backend items, or optimistically at
//! send time; either way they are owned by the reconciliation engine and
//! consumers only ever hold read-only copies.

use crate::item::{FileItem, MessageKind};

/// Message type exposed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Request for the visitor to pick an action
    ActionRequest,
    /// Request for the visitor's contact information
    ContactInformationRequest,
    /// File sent by an operator
    FileFromOperator,
    /// File sent by the visitor
    FileFromVisitor,
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
}

impl MessageType {
    /// Map a backend message kind to a public type
    ///
    /// Returns `None` for kinds that are never shown (internal service
    /// messages, unrecognized kinds).
    pub fn from_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::ActionRequest => Some(MessageType::ActionRequest),
            MessageKind::ContactInformationRequest => {
                Some(MessageType::ContactInformationRequest)
            }
            MessageKind::FileFromOperator => Some(MessageType::FileFromOperator),
            MessageKind::FileFromVisitor => Some(MessageType::FileFromVisitor),
            MessageKind::Info => Some(MessageType::Info),
            MessageKind::Keyboard => Some(MessageType::Keyboard),
            MessageKind::KeyboardResponse => Some(MessageType::KeyboardResponse),
            MessageKind::OperatorMessage => Some(MessageType::OperatorMessage),
            MessageKind::OperatorBusy => Some(MessageType::OperatorBusy),
            MessageKind::VisitorMessage => Some(MessageType::VisitorMessage),
            MessageKind::ForOperator | MessageKind::Unknown => None,
        }
    }
}

/// Coarse attachment classification used for UI affordances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Renderable inline as an image
    Image,
    /// Generic downloadable file
    File,
}

impl AttachmentKind {
    /// Classify a MIME content type
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.starts_with("image/") => AttachmentKind::Image,
            _ => AttachmentKind::File,
        }
    }
}

/// File attached to a message
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Original file name
    pub file_name: String,
    /// Download URL
    pub url: Option<String>,
    /// MIME content type
    pub content_type: Option<String>,
    /// Size in bytes
    pub size: Option<i64>,
    /// Coarse classification derived from the content type
    pub kind: AttachmentKind,
    /// Image width in pixels, for image attachments
    pub image_width: Option<i64>,
    /// Image height in pixels, for image attachments
    pub image_height: Option<i64>,
}

impl Attachment {
    /// Build an attachment from a backend file payload
    pub fn from_file_item(file: &FileItem) -> Self {
        let kind = AttachmentKind::from_content_type(file.content_type.as_deref());
        Self {
            file_name: file.filename.clone().unwrap_or_default(),
            url: file.url.clone(),
            content_type: file.content_type.clone(),
            size: file.size,
            kind,
            image_width: file.image.as_ref().and_then(|i| i.width),
            image_height: file.image.as_ref().and_then(|i| i.height),
        }
    }
}

/// Reference to an earlier message, shown as a quote
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Id of the quoted message, when it is known
    pub message_id: Option<String>,
    /// Quoted text snippet
    pub text: String,
    /// Display name of the quoted message's sender
    pub sender_name: Option<String>,
}

/// Who sent a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSender {
    /// The visitor running this client
    Visitor,
    /// A support operator
    Operator {
        /// Operator id
        id: Option<String>,
        /// Display name valid at the message's time
        name: String,
        /// Resolved avatar URL
        avatar_url: Option<String>,
    },
    /// The backend itself (info messages, busy notices)
    System,
}

/// Delivery state of a message, from the visitor's point of view
///
/// Local optimistic entries start out `Pending` and are either replaced by
/// their authoritative server copy (`Confirmed`) or retracted with a
/// `Failed` reason when the transport gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Created locally, not yet acknowledged by the server
    Pending,
    /// Authoritative server copy
    Confirmed,
    /// Send failed; the entry is retracted with this reason attached
    Failed(SendError),
}

/// Why a send failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The network operation did not complete within the bounded interval
    Timeout,
    /// Transport-level failure
    Transport,
    /// Backend rejected the file as too large
    FileSizeExceeded,
    /// Backend rejected the file's type
    FileTypeNotAllowed,
}

/// One message in the reconciled history
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Stable id. For pending local entries this equals the client-side id
    /// until the server copy arrives.
    pub id: String,
    /// Sender-assigned id matching optimistic entries to server copies
    pub client_side_id: String,
    /// Message type
    pub kind: MessageType,
    /// Sender identity
    pub sender: MessageSender,
    /// Message text
    pub text: String,
    /// File attachment, for file messages
    pub attachment: Option<Attachment>,
    /// Quoted earlier message
    pub quote: Option<Quote>,
    /// Server timestamp, microseconds
    pub ts_micros: i64,
    /// Clock-skew corrected timestamp actually displayed, milliseconds
    pub display_ts_ms: i64,
    /// Delivery state
    pub send_status: SendStatus,
    /// Whether the operator side has read this message
    pub read: bool,
}

impl Message {
    /// Whether this is a local entry still awaiting server acknowledgement
    pub fn is_pending(&self) -> bool {
        self.send_status == SendStatus::Pending
    }

    /// Build an optimistic local text message
    pub fn pending_text(client_side_id: impl Into<String>, text: impl Into<String>, ts_micros: i64) -> Self {
        let client_side_id = client_side_id.into();
        Self {
            id: client_side_id.clone(),
            client_side_id,
            kind: MessageType::VisitorMessage,
            sender: MessageSender::Visitor,
            text: text.into(),
            attachment: None,
            quote: None,
            ts_micros,
            display_ts_ms: ts_micros / 1000,
            send_status: SendStatus::Pending,
            read: false,
        }
    }

    /// Build an optimistic local file message
    pub fn pending_file(
        client_side_id: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        size: i64,
        ts_micros: i64,
    ) -> Self {
        let client_side_id = client_side_id.into();
        let content_type = mime_type.into();
        let kind = AttachmentKind::from_content_type(Some(&content_type));
        Self {
            id: client_side_id.clone(),
            client_side_id,
            kind: MessageType::FileFromVisitor,
            sender: MessageSender::Visitor,
            text: String::new(),
            attachment: Some(Attachment {
                file_name: file_name.into(),
                url: None,
                content_type: Some(content_type),
                size: Some(size),
                kind,
                image_width: None,
                image_height: None,
            }),
            quote: None,
            ts_micros,
            display_ts_ms: ts_micros / 1000,
            send_status: SendStatus::Pending,
            read: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_classification() {
        assert_eq!(
            AttachmentKind::from_content_type(Some("image/png")),
            AttachmentKind::Image
        );
        assert_eq!(
            AttachmentKind::from_content_type(Some("image/jpeg")),
            AttachmentKind::Image
        );
        assert_eq!(
            AttachmentKind::from_content_type(Some("application/pdf")),
            AttachmentKind::File
        );
        assert_eq!(AttachmentKind::from_content_type(None), AttachmentKind::File);
    }

    #[test]
    fn test_hidden_kinds_map_to_none() {
        use crate::item::MessageKind;
        assert_eq!(MessageType::from_kind(MessageKind::ForOperator), None);
        assert_eq!(MessageType::from_kind(MessageKind::Unknown), None);
        assert_eq!(
            MessageType::from_kind(MessageKind::VisitorMessage),
            Some(MessageType::VisitorMessage)
        );
    }

    #[test]
    fn test_pending_text_message() {
        let message = Message::pending_text("cs-1", "hello", 2_000_000);
        assert!(message.is_pending());
        assert_eq!(message.id, "cs-1");
        assert_eq!(message.client_side_id, "cs-1");
        assert_eq!(message.sender, MessageSender::Visitor);
        assert_eq!(message.display_ts_ms, 2_000);
    }

    #[test]
    fn test_pending_file_message() {
        let message = Message::pending_file("cs-2", "cat.png", "image/png", 512, 0);
        let attachment = message.attachment.expect("pending file carries attachment");
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.file_name, "cat.png");
        assert_eq!(attachment.size, Some(512));
    }
}
