use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::common::election::ExternalRef;

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2000;

/// The kind of election being run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionType {
    Presidential,
    Parliamentary,
    Local,
    Referendum,
    #[default]
    Other,
}

/// Voting configuration of an election.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Each voter may cast exactly one vote. The ledger does not support
    /// anything else, so this must stay `true`.
    pub single_vote_only: bool,
    /// Only voters registered on the election's electorate and verified
    /// there may vote directly.
    pub verification_required: bool,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            single_vote_only: true,
            verification_required: true,
        }
    }
}

impl VotingConfig {
    /// Anyone may vote once, without registering first.
    pub fn open() -> Self {
        Self {
            verification_required: false,
            ..Self::default()
        }
    }
}

/// An election specification, as submitted for creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub election_type: ElectionType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub voting: VotingConfig,
    /// Size of the electorate, used for turnout statistics.
    #[serde(default)]
    pub eligible_voters: u64,
}

impl ElectionSpec {
    /// Validate the specification against the current time, trimming text fields.
    pub fn validate(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.title = validate_title(&self.title)?;
        self.description = validate_description(&self.description)?;
        validate_voting(&self.voting)?;
        validate_window(self.start_time, self.end_time)?;
        if self.start_time <= now {
            return Err(Error::InvalidElection(
                "start time must be in the future".to_string(),
            ));
        }
        Ok(self)
    }
}

/// A partial update to an election. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_type: Option<ElectionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<VotingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_voters: Option<u64>,
}

impl ElectionPatch {
    /// Names of the fields this patch sets, for the audit trail.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.election_type.is_some() {
            fields.push("election_type");
        }
        if self.start_time.is_some() {
            fields.push("start_time");
        }
        if self.end_time.is_some() {
            fields.push("end_time");
        }
        if self.voting.is_some() {
            fields.push("voting");
        }
        if self.eligible_voters.is_some() {
            fields.push("eligible_voters");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Does this patch touch the voting window?
    pub fn moves_schedule(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }
}

/// Details of the external ledger deployment of an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// The external ledger's identifier for this election.
    pub external_ref: ExternalRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<DeploymentTransaction>,
}

impl Deployment {
    pub fn new(external_ref: impl Into<ExternalRef>) -> Self {
        Self {
            external_ref: external_ref.into(),
            transaction: None,
        }
    }

    pub fn with_transaction(mut self, transaction: DeploymentTransaction) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

/// The transaction that deployed an election to the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTransaction {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

pub(crate) fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::InvalidElection(format!(
            "title must be 1-{MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

pub(crate) fn validate_description(description: &str) -> Result<String> {
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(Error::InvalidElection(format!(
            "description cannot exceed {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(description.to_string())
}

pub(crate) fn validate_voting(voting: &VotingConfig) -> Result<()> {
    if !voting.single_vote_only {
        return Err(Error::InvalidElection(
            "only single-vote elections are supported".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_window(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<()> {
    if end_time <= start_time {
        return Err(Error::InvalidElection(
            "end time must be after start time".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod examples {
    use super::*;

    use chrono::Duration;

    impl ElectionSpec {
        /// An election starting in an hour and lasting a day.
        pub fn example(now: DateTime<Utc>) -> Self {
            Self {
                title: "Board of Directors 2026".to_string(),
                description: "Annual board election".to_string(),
                election_type: ElectionType::Local,
                start_time: now + Duration::hours(1),
                end_time: now + Duration::hours(25),
                voting: VotingConfig::open(),
                eligible_voters: 10,
            }
        }
    }
}
