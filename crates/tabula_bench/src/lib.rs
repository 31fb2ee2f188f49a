//! Benchmark support for Tabula.
//!
//! The benchmarks live in `benches/`; this crate only hosts shared setup
//! helpers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use tabula_core::UniqueIndex;
use tabula_testkit::fixtures::Person;

/// Builds a person primary-key index preloaded with `rows` committed rows.
pub fn preloaded_person_index(rows: usize) -> Arc<UniqueIndex<i64, Person>> {
    use tabula_core::TransactionParticipant;

    let index = UniqueIndex::new("person_pk")
        .has_index(|row: &Person| row.id())
        .build();
    for id in 0..rows {
        let person = Person::new(id as i64, "bench@example.com", None);
        index.add(&person).expect("preload add");
    }
    index.commit();
    index
}
