//! Pure snapshot diff
//!
//! Compares two ordered message sequences by id and produces an edit
//! script. Kept separate from notification dispatch so the reconciliation
//! outcome can be computed and tested without any listeners attached.

use std::collections::HashMap;

use crate::message::Message;

/// One step of an edit script turning an old sequence into a new one
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Message present only in the old sequence
    Removed(Message),
    /// Message present only in the new sequence
    Added {
        /// The new message
        message: Message,
        /// Id of its predecessor in the new sequence, `None` when first
        after: Option<String>,
    },
    /// Message present in both sequences with different content
    Changed {
        /// Content in the old sequence
        old: Message,
        /// Content in the new sequence
        new: Message,
    },
}

/// Diff two ordered message sequences by id
///
/// Removals are emitted first in old-sequence order, then additions and
/// changes in new-sequence order. Identical sequences produce an empty
/// script, so replaying an unchanged snapshot notifies nobody.
pub fn diff_messages(old: &[Message], new: &[Message]) -> Vec<EditOp> {
    let old_by_id: HashMap<&str, &Message> =
        old.iter().map(|m| (m.id.as_str(), m)).collect();
    let new_ids: HashMap<&str, ()> = new.iter().map(|m| (m.id.as_str(), ())).collect();

    let mut ops = Vec::new();

    for message in old {
        if !new_ids.contains_key(message.id.as_str()) {
            ops.push(EditOp::Removed(message.clone()));
        }
    }

    for (index, message) in new.iter().enumerate() {
        match old_by_id.get(message.id.as_str()) {
            None => ops.push(EditOp::Added {
                message: message.clone(),
                after: index.checked_sub(1).map(|i| new[i].id.clone()),
            }),
            Some(previous) if *previous != message => ops.push(EditOp::Changed {
                old: (*previous).clone(),
                new: message.clone(),
            }),
            Some(_) => {}
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> Message {
        Message::pending_text(id, format!("text of {id}"), 0)
    }

    #[test]
    fn test_identical_sequences_produce_empty_script() {
        let seq = vec![msg("a"), msg("b"), msg("c")];
        assert!(diff_messages(&seq, &seq.clone()).is_empty());
    }

    #[test]
    fn test_removed_then_added_with_predecessor() {
        // previous = [A,B,C], new = [A,C,D]: removed(B), added(D after C).
        let old = vec![msg("a"), msg("b"), msg("c")];
        let new = vec![msg("a"), msg("c"), msg("d")];
        let ops = diff_messages(&old, &new);
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            EditOp::Removed(m) => assert_eq!(m.id, "b"),
            other => panic!("expected removal first, got {:?}", other),
        }
        match &ops[1] {
            EditOp::Added { message, after } => {
                assert_eq!(message.id, "d");
                assert_eq!(after.as_deref(), Some("c"));
            }
            other => panic!("expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_added_at_start_has_no_predecessor() {
        let old = vec![msg("b")];
        let new = vec![msg("a"), msg("b")];
        let ops = diff_messages(&old, &new);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            EditOp::Added { message, after } => {
                assert_eq!(message.id, "a");
                assert!(after.is_none());
            }
            other => panic!("expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_content_change_is_reported_once() {
        let old = vec![msg("a")];
        let mut edited = msg("a");
        edited.text = "edited".to_string();
        let ops = diff_messages(&old, &[edited.clone()]);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            EditOp::Changed { old, new } => {
                assert_eq!(old.text, "text of a");
                assert_eq!(new.text, "edited");
            }
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_old_reports_all_added_in_order() {
        let new = vec![msg("a"), msg("b")];
        let ops = diff_messages(&[], &new);
        assert_eq!(ops.len(), 2);
        match (&ops[0], &ops[1]) {
            (
                EditOp::Added { message: first, after: none },
                EditOp::Added { message: second, after: prev },
            ) => {
                assert_eq!(first.id, "a");
                assert!(none.is_none());
                assert_eq!(second.id, "b");
                assert_eq!(prev.as_deref(), Some("a"));
            }
            other => panic!("expected two additions, got {:?}", other),
        }
    }
}
