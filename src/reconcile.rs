//! Change events and consumer-side reconciliation of delta streams.
//!
//! A [`ChangesSubscription`](crate::subscription::ChangesSubscription)
//! delivers batches of [`ChangeEvent`]s. Consumers that maintain a local
//! ordered collection apply them with [`apply_changes`]:
//!
//! - `Added` appends the record,
//! - `Modified` replaces the entry with a matching identifier, else ignores,
//! - `Removed` removes the entry with a matching identifier, else ignores.
//!
//! Matching is identifier equality only, never structural equality. The
//! ignore cases are load-bearing: a document that failed to decode when it
//! was added never reached the local collection, so its later `Removed`
//! event must be a silent no-op.

use crate::codec::TypedRecord;
use serde::{Deserialize, Serialize};

/// Kind of an incremental mutation observed on a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The document entered the result set.
    Added,
    /// The document changed while staying in the result set.
    Modified,
    /// The document left the result set.
    Removed,
}

/// One incremental mutation: a decoded record tagged with its change kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    /// What happened to the document.
    pub kind: ChangeKind,
    /// The decoded document (current state for `Added`/`Modified`, last
    /// known state for `Removed`).
    pub record: TypedRecord<T>,
}

impl<T> ChangeEvent<T> {
    /// Tag a record with a change kind.
    pub fn new(kind: ChangeKind, record: TypedRecord<T>) -> Self {
        ChangeEvent { kind, record }
    }
}

/// Apply one change event to a local ordered collection.
pub fn apply_change<T>(collection: &mut Vec<TypedRecord<T>>, event: ChangeEvent<T>) {
    match event.kind {
        ChangeKind::Added => collection.push(event.record),
        ChangeKind::Modified => {
            if let Some(pos) = position_by_id(collection, event.record.id.as_deref()) {
                collection[pos] = event.record;
            }
        },
        ChangeKind::Removed => {
            if let Some(pos) = position_by_id(collection, event.record.id.as_deref()) {
                collection.remove(pos);
            }
        },
    }
}

/// Apply a batch of change events in order.
pub fn apply_changes<T>(
    collection: &mut Vec<TypedRecord<T>>,
    events: impl IntoIterator<Item = ChangeEvent<T>>,
) {
    for event in events {
        apply_change(collection, event);
    }
}

/// Index of the entry whose identifier matches. Records without an
/// identifier never match anything.
fn position_by_id<T>(collection: &[TypedRecord<T>], id: Option<&str>) -> Option<usize> {
    let id = id?;
    collection.iter().position(|record| record.id.as_deref() == Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> TypedRecord<String> {
        TypedRecord::new(id, name.to_string())
    }

    #[test]
    fn test_added_appends_in_order() {
        let mut local = Vec::new();
        apply_changes(
            &mut local,
            vec![
                ChangeEvent::new(ChangeKind::Added, record("a", "first")),
                ChangeEvent::new(ChangeKind::Added, record("b", "second")),
            ],
        );
        let names: Vec<&str> = local.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_add_modify_remove_sequence() {
        // [Added(A), Added(B), Modified(A'), Removed(B)] must leave {A'}.
        let mut local = Vec::new();
        apply_changes(
            &mut local,
            vec![
                ChangeEvent::new(ChangeKind::Added, record("a", "A")),
                ChangeEvent::new(ChangeKind::Added, record("b", "B")),
                ChangeEvent::new(ChangeKind::Modified, record("a", "A'")),
                ChangeEvent::new(ChangeKind::Removed, record("b", "B")),
            ],
        );
        assert_eq!(local, vec![record("a", "A'")]);
    }

    #[test]
    fn test_modified_without_match_is_ignored() {
        let mut local = vec![record("a", "A")];
        apply_change(&mut local, ChangeEvent::new(ChangeKind::Modified, record("ghost", "X")));
        assert_eq!(local, vec![record("a", "A")]);
    }

    #[test]
    fn test_removed_without_match_is_ignored() {
        // The removed-but-never-decoded case: removal of an id the consumer
        // never saw must not panic and must not touch the collection.
        let mut local = vec![record("a", "A")];
        apply_change(&mut local, ChangeEvent::new(ChangeKind::Removed, record("ghost", "X")));
        assert_eq!(local, vec![record("a", "A")]);
    }

    #[test]
    fn test_matching_is_by_id_not_structure() {
        // Same body, different id: no replacement happens.
        let mut local = vec![record("a", "same")];
        apply_change(&mut local, ChangeEvent::new(ChangeKind::Modified, record("b", "same")));
        assert_eq!(local, vec![record("a", "same")]);
    }

    #[test]
    fn test_events_without_id_only_append() {
        let mut local = Vec::new();
        apply_change(
            &mut local,
            ChangeEvent::new(ChangeKind::Added, TypedRecord::unidentified("draft".to_string())),
        );
        assert_eq!(local.len(), 1);

        // Modified/Removed with no id cannot match and are no-ops.
        apply_change(
            &mut local,
            ChangeEvent::new(ChangeKind::Removed, TypedRecord::unidentified("draft".to_string())),
        );
        assert_eq!(local.len(), 1);
    }
}
