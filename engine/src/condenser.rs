//! Operation condensing.
//!
//! Collapses a new local mutation with the operation already queued for the
//! same item so the queue holds the smallest set of operations that
//! reproduces the net effect.

use crate::{OperationRecord, OperationType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a new mutation cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// An insert is queued or the item otherwise already exists
    DuplicateInsert,
    /// The item has a queued delete
    ItemDeleted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DuplicateInsert => write!(f, "the item already exists"),
            RejectReason::ItemDeleted => write!(f, "the item has already been deleted"),
        }
    }
}

/// What to do with a new mutation given the operation queued for its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondenseAction {
    /// Queue the new mutation as its own operation
    AppendNew,
    /// Keep the queued operation; replace its item unless the new one is a delete
    Keep,
    /// Drop the queued operation and queue nothing; the two cancel out
    Remove,
    /// Turn the queued operation into a delete
    ConvertToDelete,
    /// The new mutation is impossible
    Reject(RejectReason),
}

/// Decide how `new` combines with `existing`, the latest queued operation for
/// the same item.
///
/// A locked `existing` is in flight and is never merged into: anything that
/// would have merged is appended behind it instead.
pub fn condense(new: OperationType, existing: Option<&OperationRecord>) -> CondenseAction {
    use CondenseAction::*;
    use OperationType::*;

    let Some(existing) = existing else {
        return AppendNew;
    };

    let action = match (existing.operation_type, new) {
        (Delete, Insert | Update) => Reject(RejectReason::ItemDeleted),
        (_, Insert) => Reject(RejectReason::DuplicateInsert),
        (Delete, Delete) => Keep,
        (Insert | Update, Update) => Keep,
        (Insert, Delete) => Remove,
        (Update, Delete) => ConvertToDelete,
    };

    // A queued delete absorbs further deletes even while in flight.
    if existing.is_locked()
        && existing.operation_type != Delete
        && matches!(action, Keep | Remove | ConvertToDelete)
    {
        return AppendNew;
    }
    action
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationState;
    use serde_json::json;

    fn queued(operation_type: OperationType, state: OperationState) -> OperationRecord {
        let mut op = OperationRecord::new(
            1,
            "todo",
            "1",
            operation_type,
            json!({"id": "1"}).as_object().cloned().unwrap(),
        );
        op.state = state;
        op
    }

    #[test]
    fn nothing_queued_appends() {
        for new in [OperationType::Insert, OperationType::Update, OperationType::Delete] {
            assert_eq!(condense(new, None), CondenseAction::AppendNew);
        }
    }

    #[test]
    fn decision_table() {
        use CondenseAction::*;
        use OperationType::*;

        let cases = [
            (Insert, Insert, Reject(RejectReason::DuplicateInsert)),
            (Insert, Update, Keep),
            (Insert, Delete, Remove),
            (Update, Insert, Reject(RejectReason::DuplicateInsert)),
            (Update, Update, Keep),
            (Update, Delete, ConvertToDelete),
            (Delete, Insert, Reject(RejectReason::ItemDeleted)),
            (Delete, Update, Reject(RejectReason::ItemDeleted)),
            (Delete, Delete, Keep),
        ];

        for (existing, new, expected) in cases {
            let op = queued(existing, OperationState::Pending);
            assert_eq!(
                condense(new, Some(&op)),
                expected,
                "existing {existing} + new {new}"
            );
        }
    }

    #[test]
    fn locked_operation_is_not_merged() {
        use CondenseAction::*;
        use OperationType::*;

        let cases = [
            (Insert, Insert, Reject(RejectReason::DuplicateInsert)),
            (Insert, Update, AppendNew),
            (Insert, Delete, AppendNew),
            (Update, Update, AppendNew),
            (Update, Delete, AppendNew),
            (Delete, Update, Reject(RejectReason::ItemDeleted)),
            (Delete, Delete, Keep),
        ];

        for (existing, new, expected) in cases {
            let op = queued(existing, OperationState::Locked);
            assert_eq!(
                condense(new, Some(&op)),
                expected,
                "locked {existing} + new {new}"
            );
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_type() -> impl Strategy<Value = OperationType> {
            prop_oneof![
                Just(OperationType::Insert),
                Just(OperationType::Update),
                Just(OperationType::Delete),
            ]
        }

        proptest! {
            #[test]
            fn prop_locked_never_merged(existing in arb_type(), new in arb_type()) {
                let op = queued(existing, OperationState::Locked);
                let action = condense(new, Some(&op));
                if existing != OperationType::Delete {
                    prop_assert!(!matches!(
                        action,
                        CondenseAction::Keep | CondenseAction::Remove | CondenseAction::ConvertToDelete
                    ));
                }
            }

            #[test]
            fn prop_insert_never_merges(existing in arb_type(), locked in any::<bool>()) {
                let state = if locked { OperationState::Locked } else { OperationState::Pending };
                let op = queued(existing, state);
                prop_assert!(matches!(
                    condense(OperationType::Insert, Some(&op)),
                    CondenseAction::Reject(_)
                ));
            }
        }
    }
}
