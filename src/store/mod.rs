//! Durable storage for the ledger.
//!
//! The ledger only talks to storage through [`LedgerStore`]. Implementations
//! must make each method atomic: in particular [`LedgerStore::insert_vote`]
//! checks uniqueness, inserts the record, increments the tally and appends the
//! audit entry as one unit, [`LedgerStore::recount_tally`] rebuilds the tally
//! without racing admissions, and [`LedgerStore::update_election`] is a
//! compare-and-swap on [`Election::revision`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    audit::{Actor, AuditEntry, NewAuditEntry},
    common::election::{ElectionId, ElectionStatus, ExternalRef, VoterId},
    election::Election,
    tally::{Recount, Tally},
    vote::{VoteInsert, VoteRecord},
    voter::VoterRegistration,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Allocate a fresh election ID.
    async fn next_election_id(&self) -> Result<ElectionId>;

    /// Insert a new election together with its first audit entry.
    ///
    /// Fails with `ExternalRefInUse` if the election carries an external
    /// reference that another election already owns.
    async fn insert_election(&self, election: &Election, audit: NewAuditEntry) -> Result<()>;

    async fn election(&self, id: ElectionId) -> Result<Option<Election>>;

    async fn election_by_external_ref(&self, external_ref: &ExternalRef)
        -> Result<Option<Election>>;

    async fn elections(&self) -> Result<Vec<Election>>;

    async fn elections_in(&self, statuses: &[ElectionStatus]) -> Result<Vec<Election>>;

    /// Conditionally replace an election.
    ///
    /// Succeeds only if the stored revision still equals `election.revision`;
    /// the stored copy gets the next revision and is returned. A stale
    /// revision fails with `StorageConflict`. The audit entries are appended
    /// in the same atomic unit.
    async fn update_election(
        &self,
        election: &Election,
        audit: Vec<NewAuditEntry>,
    ) -> Result<Election>;

    /// Atomically admit a vote: uniqueness check, insert, tally increment and
    /// audit append. An existing record with the same external reference is
    /// reported as a replay before the voter uniqueness check applies.
    async fn insert_vote(&self, vote: &VoteRecord, audit: NewAuditEntry) -> Result<VoteInsert>;

    async fn vote_by_voter(&self, election: ElectionId, voter: &VoterId)
        -> Result<Option<VoteRecord>>;

    async fn vote_by_external_ref(
        &self,
        election: ElectionId,
        external_ref: &ExternalRef,
    ) -> Result<Option<VoteRecord>>;

    /// All vote records of an election, in admission order.
    async fn votes(&self, election: ElectionId) -> Result<Vec<VoteRecord>>;

    /// The incrementally maintained tally.
    async fn tally(&self, election: ElectionId) -> Result<Tally>;

    /// Count the vote records and compare the count with the stored tally.
    ///
    /// If they differ, the stored tally is replaced by the count and the
    /// correction is audited as `actor` at `at`. Reading the records and
    /// replacing the tally form one atomic unit, so no admission can slip in
    /// between them.
    async fn recount_tally(
        &self,
        election: ElectionId,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Recount>;

    /// Add a voter to an election's electorate together with its audit entry.
    /// Returns `false`, appending nothing, if the voter is already registered.
    async fn insert_voter(
        &self,
        registration: &VoterRegistration,
        audit: NewAuditEntry,
    ) -> Result<bool>;

    async fn voter(&self, election: ElectionId, voter: &VoterId)
        -> Result<Option<VoterRegistration>>;

    /// Mark a registered voter as verified at `at`, appending the audit entry.
    /// Returns `false`, appending nothing, if the voter is unregistered or
    /// already verified.
    async fn mark_voter_verified(
        &self,
        election: ElectionId,
        voter: &VoterId,
        at: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool>;

    async fn append_audit(&self, election: ElectionId, audit: NewAuditEntry)
        -> Result<AuditEntry>;

    /// The audit chain of an election, in insertion order.
    async fn audit_log(&self, election: ElectionId) -> Result<Vec<AuditEntry>>;
}
