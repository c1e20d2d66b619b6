//! The audit trail.
//!
//! Every state-changing operation appends an [`AuditEntry`]. Entries are
//! numbered per election and chained together by SHA-256 hashes, so that a
//! removed, reordered or edited entry is detectable from an export alone.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, SecondsFormat, Utc};
use data_encoding::HEXLOWER;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::common::election::{ElectionId, UserId, VoterId};

/// `prev_hash` of the first entry of every election.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ElectionCreated,
    ElectionUpdated,
    CandidateAdded,
    AdministratorAdded,
    ElectionDeployed,
    ElectionActivated,
    ElectionEnded,
    ElectionCancelled,
    VoterRegistered,
    VoterVerified,
    VoteCast,
    LedgerSynced,
    StatisticsDivergence,
    TallyRecomputed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElectionCreated => "election_created",
            Self::ElectionUpdated => "election_updated",
            Self::CandidateAdded => "candidate_added",
            Self::AdministratorAdded => "administrator_added",
            Self::ElectionDeployed => "election_deployed",
            Self::ElectionActivated => "election_activated",
            Self::ElectionEnded => "election_ended",
            Self::ElectionCancelled => "election_cancelled",
            Self::VoterRegistered => "voter_registered",
            Self::VoterVerified => "voter_verified",
            Self::VoteCast => "vote_cast",
            Self::LedgerSynced => "ledger_synced",
            Self::StatisticsDivergence => "statistics_divergence",
            Self::TallyRecomputed => "tally_recomputed",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whoever performed an audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A user of the surrounding application, usually an administrator.
    User(UserId),
    /// A voter casting a vote directly.
    Voter(VoterId),
    /// A transition triggered by the phase clock.
    PhaseClock,
    /// A fact confirmed by the external ledger.
    ExternalLedger,
}

impl Display for Actor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user) => write!(f, "user:{user}"),
            Self::Voter(voter) => write!(f, "voter:{voter}"),
            Self::PhaseClock => f.write_str("phase_clock"),
            Self::ExternalLedger => f.write_str("external_ledger"),
        }
    }
}

impl From<UserId> for Actor {
    fn from(user: UserId) -> Self {
        Self::User(user)
    }
}

/// An audit entry before the store has placed it in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub performed_by: Actor,
    pub timestamp: DateTime<Utc>,
    pub details: Document,
}

impl NewAuditEntry {
    pub fn new(
        action: AuditAction,
        performed_by: Actor,
        timestamp: DateTime<Utc>,
        details: Document,
    ) -> Self {
        Self {
            action,
            performed_by,
            timestamp,
            details,
        }
    }

    /// Place this entry after `prev_hash` as number `seq` of the election's chain.
    pub fn seal(self, election_id: ElectionId, seq: u64, prev_hash: &str) -> AuditEntry {
        let hash = chain_hash(
            prev_hash,
            seq,
            election_id,
            self.action,
            &self.performed_by,
            self.timestamp,
            &self.details,
        );
        AuditEntry {
            election_id,
            seq,
            action: self.action,
            performed_by: self.performed_by,
            timestamp: self.timestamp,
            details: self.details,
            prev_hash: prev_hash.to_string(),
            hash,
        }
    }
}

/// A sealed, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub election_id: ElectionId,
    /// Position in the election's chain, starting at 1.
    pub seq: u64,
    pub action: AuditAction,
    pub performed_by: Actor,
    pub timestamp: DateTime<Utc>,
    pub details: Document,
    pub prev_hash: String,
    pub hash: String,
}

/// The latest entry of an election's chain, kept alongside the entries so
/// that appends can be made conditional on the chain not having moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditHead {
    #[serde(rename = "_id")]
    pub election_id: ElectionId,
    pub seq: u64,
    pub hash: String,
}

impl AuditEntry {
    /// Does the stored hash match the entry's contents?
    pub fn hash_is_valid(&self) -> bool {
        let expected = chain_hash(
            &self.prev_hash,
            self.seq,
            self.election_id,
            self.action,
            &self.performed_by,
            self.timestamp,
            &self.details,
        );
        expected == self.hash
    }
}

/// Order entries by timestamp, then insertion order.
pub fn sort_entries(entries: &mut [AuditEntry]) {
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));
}

/// Why an audit chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Sequence numbers are not contiguous from 1.
    Gap { expected: u64, found: u64 },
    /// An entry's `prev_hash` does not match its predecessor.
    Broken { seq: u64 },
    /// An entry's contents do not match its hash.
    Tampered { seq: u64 },
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gap { expected, found } => {
                write!(f, "expected audit entry {expected}, found {found}")
            }
            Self::Broken { seq } => write!(f, "audit entry {seq} does not follow its predecessor"),
            Self::Tampered { seq } => write!(f, "audit entry {seq} has been modified"),
        }
    }
}

/// Verify a whole chain, given in insertion order.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainError> {
    let mut prev_hash = GENESIS_HASH;
    for (index, entry) in entries.iter().enumerate() {
        let expected = index as u64 + 1;
        if entry.seq != expected {
            return Err(ChainError::Gap {
                expected,
                found: entry.seq,
            });
        }
        if entry.prev_hash != prev_hash {
            return Err(ChainError::Broken { seq: entry.seq });
        }
        if !entry.hash_is_valid() {
            return Err(ChainError::Tampered { seq: entry.seq });
        }
        prev_hash = &entry.hash;
    }
    Ok(())
}

fn chain_hash(
    prev_hash: &str,
    seq: u64,
    election_id: ElectionId,
    action: AuditAction,
    performed_by: &Actor,
    timestamp: DateTime<Utc>,
    details: &Document,
) -> String {
    // Relaxed extended JSON renders numbers the same regardless of their
    // BSON width, so the hash survives a trip through a JSON dump.
    let details = Bson::Document(details.clone()).into_relaxed_extjson();
    let preimage = format!(
        "{prev_hash}|{seq}|{election_id}|{action}|{performed_by}|{}|{details}",
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
    );
    HEXLOWER.encode(&Sha256::digest(preimage.as_bytes()))
}
