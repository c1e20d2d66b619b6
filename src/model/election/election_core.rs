use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    candidate::Candidate,
    common::election::{
        phase_at, CandidateId, ElectionId, ElectionStatus, ExternalRef, Phase, UserId,
    },
    tally::{CandidateResult, Statistics, Tally},
};

use super::administrator::{AdminRole, Administrator};
use super::spec::{DeploymentTransaction, ElectionSpec, ElectionType, VotingConfig};

/// Core election data, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    /// Unique local ID.
    #[serde(rename = "_id")]
    pub id: ElectionId,
    /// The external ledger's identifier, once deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<ExternalRef>,
    /// The deploying transaction, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentTransaction>,
    pub title: String,
    pub description: String,
    pub election_type: ElectionType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Stored lifecycle status. Use [`Election::phase`] to decide what is legal.
    pub status: ElectionStatus,
    /// When voting actually closed, which may be inside the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub voting: VotingConfig,
    pub eligible_voters: u64,
    /// Candidate roster, in the order candidates were added.
    pub candidates: Vec<Candidate>,
    /// Cached statistics, refreshed on sync, recompute and when voting ends.
    pub statistics: Statistics,
    /// Cached results, refreshed together with `statistics`.
    pub results: Vec<CandidateResult>,
    pub created_by: UserId,
    pub administrators: Vec<Administrator>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every stored update; used for conditional writes.
    pub revision: u64,
}

impl Election {
    /// Create a new draft election. The creator becomes its first administrator.
    pub fn new(id: ElectionId, spec: ElectionSpec, created_by: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            external_ref: None,
            deployment: None,
            title: spec.title,
            description: spec.description,
            election_type: spec.election_type,
            start_time: spec.start_time,
            end_time: spec.end_time,
            status: ElectionStatus::Draft,
            ended_at: None,
            voting: spec.voting,
            eligible_voters: spec.eligible_voters,
            candidates: Vec::new(),
            statistics: Statistics::empty(spec.eligible_voters, now),
            results: Vec::new(),
            administrators: vec![Administrator {
                user: created_by.clone(),
                role: AdminRole::Admin,
                added_at: now,
            }],
            created_by,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// The phase of this election at the given time.
    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        phase_at(now, self.start_time, self.end_time, self.status)
    }

    /// The last instant at which a vote could have been cast: the end of the
    /// window, or the moment voting was closed if that came first.
    pub fn closes_at(&self) -> DateTime<Utc> {
        self.ended_at
            .map_or(self.end_time, |ended_at| ended_at.min(self.end_time))
    }

    /// Mark voting as closed at `now`, freezing the cache from `tally`.
    pub fn close(&mut self, tally: &Tally, now: DateTime<Utc>) {
        self.status = ElectionStatus::Ended;
        self.ended_at = Some(now);
        self.refresh_cache(tally, now);
    }

    pub fn candidate(&self, id: &CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| &c.id == id)
    }

    pub fn administrator(&self, user: &UserId) -> Option<&Administrator> {
        self.administrators.iter().find(|a| &a.user == user)
    }

    pub fn is_administrator(&self, user: &UserId) -> bool {
        self.administrator(user).is_some()
    }

    /// Refresh the cached statistics and results from a tally.
    pub fn refresh_cache(&mut self, tally: &Tally, now: DateTime<Utc>) {
        self.statistics = tally.statistics(self.eligible_voters, now);
        self.results = tally.results(&self.candidates);
    }
}
