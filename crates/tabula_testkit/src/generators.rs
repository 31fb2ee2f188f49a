//! Property-based test generators using proptest.
//!
//! Provides strategies for generating fixture data and index operation
//! sequences that exercise the transactional invariants.

use crate::fixtures::{PersonData, TeamData};
use proptest::prelude::*;

/// Strategy for row ids drawn from a small range, so collisions and
/// duplicate-key rejections actually happen.
pub fn row_id_strategy() -> impl Strategy<Value = i64> {
    1..64i64
}

/// Strategy for valid team data.
pub fn team_data_strategy() -> impl Strategy<Value = TeamData> {
    (row_id_strategy(), "[a-z]{3,12}").prop_map(|(id, name)| TeamData { id, name })
}

/// Strategy for valid person data, unassigned roughly a third of the time.
pub fn person_data_strategy() -> impl Strategy<Value = PersonData> {
    (
        row_id_strategy(),
        "[a-z]{1,8}@[a-z]{3,8}\\.com",
        prop::option::weighted(0.66, row_id_strategy()),
    )
        .prop_map(|(id, email, team)| PersonData { id, email, team })
}

/// A single operation against a unique index, keyed by row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    /// Add a fresh row under this key.
    Add(i64),
    /// Remove the row currently under this key, if any.
    Remove(i64),
    /// Re-key the row under the first key to the second.
    Rekey(i64, i64),
}

/// Strategy over index operation sequences.
pub fn index_op_strategy() -> impl Strategy<Value = IndexOp> {
    prop_oneof![
        row_id_strategy().prop_map(IndexOp::Add),
        row_id_strategy().prop_map(IndexOp::Remove),
        (row_id_strategy(), row_id_strategy()).prop_map(|(from, to)| IndexOp::Rekey(from, to)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Person;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tabula_core::{IndexHandle, TransactionParticipant, UniqueIndex};

    proptest! {
        #[test]
        fn generated_person_data_is_well_formed(data in person_data_strategy()) {
            prop_assert!(data.id >= 1);
            prop_assert!(data.email.contains('@'));
        }

        /// Any operation sequence, including rejected operations, rolls back
        /// to the starting state.
        #[test]
        fn rollback_restores_an_empty_index(ops in prop::collection::vec(index_op_strategy(), 0..32)) {
            let index: Arc<UniqueIndex<i64, Person>> = UniqueIndex::new("pk")
                .has_index(|row: &Person| row.id())
                .build();
            let mut live: HashMap<i64, Arc<Person>> = HashMap::new();

            for op in ops {
                match op {
                    IndexOp::Add(id) => {
                        let row = Person::new(id, "p@example.com", None);
                        if index.add(&row).is_ok() {
                            live.insert(id, row);
                        }
                    }
                    IndexOp::Remove(id) => {
                        if let Some(row) = live.get(&id) {
                            index.remove(row).unwrap();
                        }
                        live.remove(&id);
                    }
                    IndexOp::Rekey(from, to) => {
                        if let Some(row) = live.remove(&from) {
                            row.stage(|data| data.id = to);
                            if index.update(&row).is_ok() {
                                live.insert(to, row);
                            } else {
                                row.rollback();
                                live.insert(from, row);
                            }
                        }
                    }
                }
            }

            index.rollback();
            prop_assert!(index.is_empty());
        }
    }
}
