//! The election ledger.
//!
//! [`Ledger`] ties a [`LedgerStore`] to a [`Clock`] and implements every
//! operation on elections: lifecycle transitions, the candidate roster, the
//! electorate, vote admission, tallying and reconciliation with the external
//! ledger. It holds
//! no state of its own, so it can be shared freely behind an `Arc`.

use std::future::Future;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};
use crate::model::{audit::NewAuditEntry, common::election::ElectionId, election::Election};
use crate::store::LedgerStore;

mod admission;
mod clock;
mod electorate;
mod export;
mod lifecycle;
mod reconcile;
mod roster;
mod scheduler;
mod tally;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lifecycle::ElectionFilter;
pub use reconcile::{
    CandidateDivergence, LedgerBatch, LedgerFact, LedgerFeed, LedgerTotals, Reconciler,
    RejectedFact, StatisticsDivergence, SyncReport,
};
pub use scheduler::PhaseScheduler;

/// How many times a write that lost a race is retried by default.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Render a time for audit details.
pub(crate) fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct Ledger<S, C = SystemClock> {
    store: S,
    clock: C,
    conflict_retries: u32,
}

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Set how many times a write that hit a storage conflict is retried
    /// before the conflict is returned to the caller.
    pub fn with_conflict_retries(mut self, conflict_retries: u32) -> Self {
        self.conflict_retries = conflict_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load an election, failing if it does not exist.
    pub(crate) async fn load(&self, id: ElectionId) -> Result<Election> {
        self.store
            .election(id)
            .await?
            .ok_or_else(|| Error::election_not_found(id))
    }

    /// Run `op` until it succeeds, fails permanently, or has hit a storage
    /// conflict more than `conflict_retries` times.
    pub(crate) async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.conflict_retries => {
                    attempt += 1;
                    debug!("Retrying {what} after conflict (attempt {attempt}): {err}");
                }
                result => return result,
            }
        }
    }

    /// Apply a change to the latest stored copy of an election.
    ///
    /// `change` sees the election and the current time. It returns the audit
    /// entries describing what it did, or `None` (without touching the
    /// election) if there is nothing to do. The write is conditional on the
    /// revision that was read; on conflict the election is re-read and
    /// `change` runs again, so it may observe the other writer's result.
    pub(crate) async fn modify<F>(
        &self,
        id: ElectionId,
        what: &str,
        mut change: F,
    ) -> Result<Election>
    where
        F: FnMut(&mut Election, DateTime<Utc>) -> Result<Option<Vec<NewAuditEntry>>>,
    {
        let mut attempt = 0;
        loop {
            let mut election = self.load(id).await?;
            let now = self.now();
            let audit = match change(&mut election, now)? {
                Some(audit) => audit,
                None => return Ok(election),
            };
            election.updated_at = now;
            match self.store.update_election(&election, audit).await {
                Err(err) if err.is_transient() && attempt < self.conflict_retries => {
                    attempt += 1;
                    debug!("Retrying {what} of election {id} after conflict (attempt {attempt}): {err}");
                }
                result => return result,
            }
        }
    }
}
