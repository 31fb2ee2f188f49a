//! Cross-component integration scenarios.
//!
//! Drives indexes, rows, and transaction scopes together the way generated
//! table code would: lock everything the transaction will touch, mutate
//! through the indexes, then complete or drop the scope.

use crate::fixtures::{Directory, Person, Team};
use std::sync::Arc;
use tabula_core::{CoreResult, TransactionScope};

/// A directory with one team and one member, the smallest setup that
/// exercises referential integrity.
pub struct SeededDirectory {
    /// The wired indexes.
    pub directory: Directory,
    /// The seeded team, id 7.
    pub team: Arc<Team>,
    /// The seeded member of team 7.
    pub person: Arc<Person>,
}

impl SeededDirectory {
    /// Builds and commits the seed data through a scope.
    pub async fn new() -> CoreResult<Self> {
        let directory = Directory::new();
        let team = Team::new(7, "core");
        let person = Person::new(100, "a@example.com", Some(7));

        let mut scope = TransactionScope::new();
        scope.wait_writer(&directory.teams).await?;
        scope.wait_writer(&directory.people).await?;
        scope.wait_writer(&directory.members).await?;

        directory.teams.add(&team)?;
        directory.people.add(&person)?;
        directory.members.add(&person)?;
        scope.complete();
        drop(scope);

        Ok(Self {
            directory,
            team,
            person,
        })
    }
}
