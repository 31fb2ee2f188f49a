//! Versioned row fixtures and pre-wired index setups.
//!
//! `Team` and `Person` stand in for generated row types: each carries its
//! own lock, keeps Original/Previous snapshots across staged mutations, and
//! rolls its fields back when the enclosing transaction does.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tabula_core::{
    ForeignIndex, Lockable, PrepareVote, ReaderWriterLock, Row, RowVersion,
    TransactionParticipant, UniqueIndex,
};

/// Snapshot pair maintained by the fixtures.
struct Snapshots<T> {
    original: Option<Arc<T>>,
    previous: Option<Arc<T>>,
}

/// Field state of a [`Team`] row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamData {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
}

/// Parent fixture row: a team keyed by id.
pub struct Team {
    lock: ReaderWriterLock,
    data: Mutex<TeamData>,
    snapshots: Mutex<Snapshots<Team>>,
    this: OnceLock<Weak<Team>>,
}

impl Team {
    /// Creates a live row with an Original snapshot.
    pub fn create(data: TeamData) -> Arc<Self> {
        let row = Arc::new(Self {
            lock: ReaderWriterLock::new(),
            data: Mutex::new(data.clone()),
            snapshots: Mutex::new(Snapshots {
                original: None,
                previous: None,
            }),
            this: OnceLock::new(),
        });
        row.snapshots.lock().original = Some(Self::frozen(data));
        let _ = row.this.set(Arc::downgrade(&row));
        row
    }

    /// Convenience constructor.
    pub fn new(id: i64, name: impl Into<String>) -> Arc<Self> {
        Self::create(TeamData {
            id,
            name: name.into(),
        })
    }

    fn frozen(data: TeamData) -> Arc<Self> {
        Arc::new(Self {
            lock: ReaderWriterLock::new(),
            data: Mutex::new(data),
            snapshots: Mutex::new(Snapshots {
                original: None,
                previous: None,
            }),
            this: OnceLock::new(),
        })
    }

    /// Returns the team id.
    pub fn id(&self) -> i64 {
        self.data.lock().id
    }

    /// Returns the team name.
    pub fn name(&self) -> String {
        self.data.lock().name.clone()
    }

    /// Snapshots the current state as Previous, then applies a tentative
    /// change. Index `update` calls read the snapshot.
    pub fn stage(&self, change: impl FnOnce(&mut TeamData)) {
        let snapshot = Self::frozen(self.data.lock().clone());
        self.snapshots.lock().previous = Some(snapshot);
        change(&mut self.data.lock());
    }
}

impl Row for Team {
    fn version(&self, version: RowVersion) -> Option<Arc<Self>> {
        match version {
            RowVersion::Original => self.snapshots.lock().original.clone(),
            RowVersion::Previous => self.snapshots.lock().previous.clone(),
            RowVersion::Current => self.this.get().and_then(Weak::upgrade),
        }
    }
}

impl Lockable for Team {
    fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    fn as_participant(self: Arc<Self>) -> Option<Arc<dyn TransactionParticipant>> {
        Some(self)
    }
}

impl TransactionParticipant for Team {
    fn prepare(&self) -> PrepareVote {
        if self.snapshots.lock().previous.is_some() {
            PrepareVote::Prepared
        } else {
            PrepareVote::Done
        }
    }

    fn commit(&self) {
        self.snapshots.lock().previous = None;
    }

    fn rollback(&self) {
        if let Some(snapshot) = self.snapshots.lock().previous.take() {
            *self.data.lock() = snapshot.data.lock().clone();
        }
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Team")
            .field("id", &data.id)
            .field("name", &data.name)
            .finish()
    }
}

/// Field state of a [`Person`] row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonData {
    /// Primary key.
    pub id: i64,
    /// Contact address.
    pub email: String,
    /// Foreign key into [`Team`]; `None` means unassigned and keeps the row
    /// out of the membership index.
    pub team: Option<i64>,
}

/// Child fixture row: a person optionally assigned to a team.
pub struct Person {
    lock: ReaderWriterLock,
    data: Mutex<PersonData>,
    snapshots: Mutex<Snapshots<Person>>,
    this: OnceLock<Weak<Person>>,
}

impl Person {
    /// Creates a live row with an Original snapshot.
    pub fn create(data: PersonData) -> Arc<Self> {
        let row = Arc::new(Self {
            lock: ReaderWriterLock::new(),
            data: Mutex::new(data.clone()),
            snapshots: Mutex::new(Snapshots {
                original: None,
                previous: None,
            }),
            this: OnceLock::new(),
        });
        row.snapshots.lock().original = Some(Self::frozen(data));
        let _ = row.this.set(Arc::downgrade(&row));
        row
    }

    /// Convenience constructor.
    pub fn new(id: i64, email: impl Into<String>, team: Option<i64>) -> Arc<Self> {
        Self::create(PersonData {
            id,
            email: email.into(),
            team,
        })
    }

    fn frozen(data: PersonData) -> Arc<Self> {
        Arc::new(Self {
            lock: ReaderWriterLock::new(),
            data: Mutex::new(data),
            snapshots: Mutex::new(Snapshots {
                original: None,
                previous: None,
            }),
            this: OnceLock::new(),
        })
    }

    /// Returns the person id.
    pub fn id(&self) -> i64 {
        self.data.lock().id
    }

    /// Returns the contact address.
    pub fn email(&self) -> String {
        self.data.lock().email.clone()
    }

    /// Returns the assigned team, if any.
    pub fn team(&self) -> Option<i64> {
        self.data.lock().team
    }

    /// Snapshots the current state as Previous, then applies a tentative
    /// change.
    pub fn stage(&self, change: impl FnOnce(&mut PersonData)) {
        let snapshot = Self::frozen(self.data.lock().clone());
        self.snapshots.lock().previous = Some(snapshot);
        change(&mut self.data.lock());
    }
}

impl Row for Person {
    fn version(&self, version: RowVersion) -> Option<Arc<Self>> {
        match version {
            RowVersion::Original => self.snapshots.lock().original.clone(),
            RowVersion::Previous => self.snapshots.lock().previous.clone(),
            RowVersion::Current => self.this.get().and_then(Weak::upgrade),
        }
    }
}

impl Lockable for Person {
    fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    fn as_participant(self: Arc<Self>) -> Option<Arc<dyn TransactionParticipant>> {
        Some(self)
    }
}

impl TransactionParticipant for Person {
    fn prepare(&self) -> PrepareVote {
        if self.snapshots.lock().previous.is_some() {
            PrepareVote::Prepared
        } else {
            PrepareVote::Done
        }
    }

    fn commit(&self) {
        self.snapshots.lock().previous = None;
    }

    fn rollback(&self) {
        if let Some(snapshot) = self.snapshots.lock().previous.take() {
            *self.data.lock() = snapshot.data.lock().clone();
        }
    }
}

impl std::fmt::Debug for Person {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Person")
            .field("id", &data.id)
            .field("email", &data.email)
            .field("team", &data.team)
            .finish()
    }
}

/// Pre-wired parent/child index setup over the fixtures.
pub struct Directory {
    /// Teams by id.
    pub teams: Arc<UniqueIndex<i64, Team>>,
    /// People by id.
    pub people: Arc<UniqueIndex<i64, Person>>,
    /// Team membership: people bucketed by their team id, keyed into
    /// `teams`. Unassigned people are filtered out.
    pub members: Arc<ForeignIndex<i64, Team, Person>>,
}

impl Directory {
    /// Builds the index trio.
    pub fn new() -> Self {
        let teams = UniqueIndex::new("team_pk")
            .has_index(|row: &Team| row.id())
            .build();
        let people = UniqueIndex::new("person_pk")
            .has_index(|row: &Person| row.id())
            .build();
        let members = ForeignIndex::new("team_members", Arc::clone(&teams))
            .has_index(|row: &Person| row.team().unwrap_or_default())
            .has_filter(|row: &Person| row.team().is_some())
            .build();
        Self {
            teams,
            people,
            members,
        }
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
