use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::common::election::CandidateId;

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_PARTY_LEN: usize = 100;
const MAX_MANIFESTO_LEN: usize = 5000;

/// A candidate as submitted for addition to a roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpec {
    /// Identifier, unique within the election. Must match the id the external
    /// ledger uses for this candidate.
    pub id: CandidateId,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifesto: Option<String>,
}

impl CandidateSpec {
    /// Check field lengths, trimming surrounding whitespace first.
    pub fn validate(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        self.description = self.description.trim().to_string();
        self.party = self.party.map(|p| p.trim().to_string());

        if self.id.is_empty() {
            return Err(Error::InvalidElection("candidate id is empty".to_string()));
        }
        if self.name.is_empty() || self.name.chars().count() > MAX_NAME_LEN {
            return Err(Error::InvalidElection(format!(
                "candidate name must be 1-{MAX_NAME_LEN} characters"
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::InvalidElection(format!(
                "candidate description cannot exceed {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if let Some(ref party) = self.party {
            if party.chars().count() > MAX_PARTY_LEN {
                return Err(Error::InvalidElection(format!(
                    "party name cannot exceed {MAX_PARTY_LEN} characters"
                )));
            }
        }
        if let Some(ref manifesto) = self.manifesto {
            if manifesto.chars().count() > MAX_MANIFESTO_LEN {
                return Err(Error::InvalidElection(format!(
                    "manifesto cannot exceed {MAX_MANIFESTO_LEN} characters"
                )));
            }
        }
        Ok(self)
    }
}

/// A candidate on an election roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifesto: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(spec: CandidateSpec, added_at: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            name: spec.name,
            description: spec.description,
            party: spec.party,
            manifesto: spec.manifesto,
            added_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_trims_and_bounds() {
        let mut spec = CandidateSpec::example("alice");
        spec.name = "  Alice  ".to_string();
        assert_eq!(spec.validate().unwrap().name, "Alice");

        let mut spec = CandidateSpec::example("bob");
        spec.name = "   ".to_string();
        assert!(matches!(spec.validate(), Err(Error::InvalidElection(_))));

        let mut spec = CandidateSpec::example("carol");
        spec.manifesto = Some("x".repeat(MAX_MANIFESTO_LEN + 1));
        assert!(matches!(spec.validate(), Err(Error::InvalidElection(_))));

        let mut spec = CandidateSpec::example("");
        spec.name = "Nobody".to_string();
        assert!(matches!(spec.validate(), Err(Error::InvalidElection(_))));
    }
}
