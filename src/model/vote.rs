use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::common::election::{CandidateId, ElectionId, ExternalRef, VoterId};

/// An admitted vote. At most one exists per `(election_id, voter_id)`, and at
/// most one per `(election_id, external_ref)` when the reference is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub candidate_id: CandidateId,
    /// Confirmation reference from the external ledger, used to recognise replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<ExternalRef>,
    pub cast_at: DateTime<Utc>,
}

/// Outcome of an attempted vote insertion at the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteInsert {
    /// The record was stored, the tally incremented and the audit entry appended.
    Inserted(VoteRecord),
    /// A record with the same external reference already exists.
    Replay(VoteRecord),
    /// The voter already has a record with a different (or no) external reference.
    VoterTaken(VoteRecord),
}
