use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use crate::model::{
    audit::{Actor, AuditAction, NewAuditEntry},
    candidate::Candidate,
    common::election::{CandidateId, ElectionId},
    vote::VoteRecord,
};

/// Per-candidate vote counters for one election.
///
/// Only candidates with at least one vote have an entry, so an incrementally
/// maintained tally and one rebuilt from the vote records compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub counts: BTreeMap<CandidateId, u64>,
    pub total: u64,
}

impl Tally {
    /// Rebuild a tally from scratch.
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a VoteRecord>) -> Self {
        let mut tally = Self::default();
        for vote in votes {
            tally.apply_vote(&vote.candidate_id);
        }
        tally
    }

    /// Count one admitted vote.
    pub fn apply_vote(&mut self, candidate: &CandidateId) {
        *self.counts.entry(candidate.clone()).or_default() += 1;
        self.total += 1;
    }

    pub fn count(&self, candidate: &CandidateId) -> u64 {
        self.counts.get(candidate).copied().unwrap_or_default()
    }

    /// Per-candidate results in roster order, including candidates without votes.
    pub fn results(&self, roster: &[Candidate]) -> Vec<CandidateResult> {
        roster
            .iter()
            .map(|candidate| {
                let vote_count = self.count(&candidate.id);
                CandidateResult {
                    candidate_id: candidate.id.clone(),
                    vote_count,
                    percentage: percentage(vote_count, self.total),
                }
            })
            .collect()
    }

    /// Rebuild a tally from stored per-candidate counters.
    pub fn from_totals(totals: impl IntoIterator<Item = CandidateTotal>) -> Self {
        let mut tally = Self::default();
        for total in totals.into_iter().filter(|t| t.count > 0) {
            tally.total += total.count;
            tally.counts.insert(total.candidate_id, total.count);
        }
        tally
    }

    /// One stored counter per candidate with votes.
    pub fn totals(&self, election_id: ElectionId) -> Vec<CandidateTotal> {
        self.counts
            .iter()
            .map(|(candidate_id, count)| CandidateTotal {
                election_id,
                candidate_id: candidate_id.clone(),
                count: *count,
            })
            .collect()
    }

    pub fn statistics(&self, eligible_voters: u64, now: DateTime<Utc>) -> Statistics {
        Statistics {
            total_votes: self.total,
            total_eligible_voters: eligible_voters,
            turnout_percentage: percentage(self.total, eligible_voters),
            last_updated: now,
        }
    }
}

/// `part` as a percentage of `whole`, or zero if `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// The stored tally of an election next to a fresh count of its vote records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recount {
    pub previous: Tally,
    pub tally: Tally,
}

impl Recount {
    pub fn drifted(&self) -> bool {
        self.previous != self.tally
    }

    /// The audit entry recording that the stored tally was corrected.
    pub fn audit_entry(&self, actor: Actor, at: DateTime<Utc>) -> NewAuditEntry {
        NewAuditEntry::new(
            AuditAction::TallyRecomputed,
            actor,
            at,
            doc! {
                "previous_total": self.previous.total as i64,
                "total": self.tally.total as i64,
            },
        )
    }
}

/// A single candidate's vote counter, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTotal {
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
    pub count: u64,
}

/// Aggregate statistics of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_votes: u64,
    pub total_eligible_voters: u64,
    pub turnout_percentage: f64,
    pub last_updated: DateTime<Utc>,
}

impl Statistics {
    pub fn empty(eligible_voters: u64, now: DateTime<Utc>) -> Self {
        Tally::default().statistics(eligible_voters, now)
    }
}

/// The result for a single candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub candidate_id: CandidateId,
    pub vote_count: u64,
    pub percentage: f64,
}

/// Statistics and per-candidate results, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub statistics: Statistics,
    pub results: Vec<CandidateResult>,
}
