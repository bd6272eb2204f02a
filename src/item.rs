//! Backend item model
//!
//! Loosely-typed key/value payloads from the backend are parsed here into
//! strongly-typed records. The backend evolves its wire schema
//! independently of this client, so parsing is tolerant by construction:
//! every field is optional at the parse boundary, malformed values for
//! optional fields read as absent, and unknown fields are ignored. Only
//! identity fields are guaranteed present after a parse, synthesized
//! deterministically when the backend omits them.

use serde_json::Value;

pub mod chat;
pub mod message;
pub mod operator;
pub mod rating;

pub use chat::{ChatItem, ChatState};
pub use message::{FileItem, ImageInfo, MessageItem, MessageKind, QuoteItem};
pub use operator::OperatorItem;
pub use rating::RatingItem;

/// Read a string field, treating a missing or non-string value as absent
pub(crate) fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Read a floating-point field, treating a missing or non-numeric value as absent
pub(crate) fn f64_field(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

/// Read an integer field, treating a missing or non-numeric value as absent
pub(crate) fn i64_field(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key).and_then(Value::as_i64)
}

/// Read a boolean field, treating a missing or non-boolean value as absent
pub(crate) fn bool_field(payload: &Value, key: &str) -> Option<bool> {
    payload.get(key).and_then(Value::as_bool)
}
