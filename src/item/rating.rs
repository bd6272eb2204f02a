//! Operator rating item

use serde_json::Value;

use super::{i64_field, string_field};

/// A rating the visitor gave an operator
///
/// One rating per operator per chat; the backend applies last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingItem {
    /// Rated operator id
    pub operator_id: String,
    /// Score, 1..=5
    pub rating: i32,
}

impl RatingItem {
    /// Parse a rating from a backend payload, clamping the score to 1..=5
    pub fn parse(payload: &Value) -> Self {
        let rating = i64_field(payload, "rating").unwrap_or(0).clamp(1, 5) as i32;
        Self {
            operator_id: string_field(payload, "operatorId").unwrap_or_default(),
            rating,
        }
    }

    /// Build a rating locally, clamping the score to 1..=5
    pub fn new(operator_id: impl Into<String>, rating: i32) -> Self {
        Self {
            operator_id: operator_id.into(),
            rating: rating.clamp(1, 5),
        }
    }
}
