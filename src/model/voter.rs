use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::common::election::{ElectionId, VoterId};

/// A voter on an election's electorate.
///
/// Elections that require verification only admit direct votes from voters
/// who are registered here and have since been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRegistration {
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl VoterRegistration {
    pub fn new(election_id: ElectionId, voter_id: VoterId, now: DateTime<Utc>) -> Self {
        Self {
            election_id,
            voter_id,
            registered_at: now,
            verified_at: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }
}
