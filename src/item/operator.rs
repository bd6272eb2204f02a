//! Operator item

use serde_json::Value;

use super::string_field;

/// A support operator as delivered by the backend
///
/// Immutable once received for a given id within a chat's lifetime, except
/// for a display-name refresh on localization change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorItem {
    /// Operator id
    pub id: String,
    /// Display name
    pub full_name: Option<String>,
    /// Avatar path, relative to the backend base URL
    pub avatar_path: Option<String>,
    /// Job title
    pub title: Option<String>,
    /// Department key
    pub department: Option<String>,
}

impl OperatorItem {
    /// Parse an operator from a backend payload
    ///
    /// An omitted id reads as empty; callers treat such a record as an
    /// unassigned operator slot.
    pub fn parse(payload: &Value) -> Self {
        Self {
            id: string_field(payload, "id").unwrap_or_default(),
            full_name: string_field(payload, "fullname"),
            avatar_path: string_field(payload, "avatar"),
            title: string_field(payload, "title"),
            department: string_field(payload, "departmentKey"),
        }
    }
}
