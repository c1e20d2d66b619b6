//! Offline verification of an exported election.
//!
//! An [`ElectionDump`] carries everything the ledger knows about one
//! election. [`verify_dump`] recomputes the ledger's invariants from it
//! without access to the database, and is what `verification-cli` runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    audit::{verify_chain, AuditAction, AuditEntry, ChainError},
    common::election::{CandidateId, ElectionId, ExternalRef, VoterId},
    election::Election,
    tally::{CandidateResult, Tally},
    vote::VoteRecord,
};

/// The full state of one election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionDump {
    pub election: Election,
    pub votes: Vec<VoteRecord>,
    pub tally: Tally,
    /// Audit entries in chain order.
    pub audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("A vote for election {election} is included in this dump")]
    ForeignVote { election: ElectionId },
    #[error("Voter {voter} has more than one vote")]
    DuplicateVoter { voter: VoterId },
    #[error("Confirmation {external_ref} is recorded more than once")]
    DuplicateExternalRef { external_ref: ExternalRef },
    #[error("Voter {voter} voted for {candidate}, who is not on the roster")]
    UnknownCandidate {
        voter: VoterId,
        candidate: CandidateId,
    },
    #[error("The tally for candidate {candidate} is incorrect")]
    Tally { candidate: CandidateId },
    #[error("The tally total is {stored}, but {recounted} votes were recorded")]
    TallyTotal { stored: u64, recounted: u64 },
    #[error("Audit entry {seq} belongs to election {election}")]
    ForeignEntry { seq: u64, election: ElectionId },
    #[error("Audit chain is invalid: {0}")]
    Chain(ChainError),
    #[error("{votes} votes recorded, but {entries} audited")]
    AuditMismatch { votes: usize, entries: usize },
}

/// Check a dump's internal consistency, returning the recounted results in
/// roster order.
pub fn verify_dump(dump: &ElectionDump) -> Result<Vec<CandidateResult>, VerificationError> {
    let election = &dump.election;

    let mut voters = HashSet::with_capacity(dump.votes.len());
    let mut refs = HashSet::new();
    for vote in &dump.votes {
        if vote.election_id != election.id {
            return Err(VerificationError::ForeignVote {
                election: vote.election_id,
            });
        }
        if !voters.insert(&vote.voter_id) {
            return Err(VerificationError::DuplicateVoter {
                voter: vote.voter_id.clone(),
            });
        }
        if let Some(external_ref) = &vote.external_ref {
            if !refs.insert(external_ref) {
                return Err(VerificationError::DuplicateExternalRef {
                    external_ref: external_ref.clone(),
                });
            }
        }
        if election.candidate(&vote.candidate_id).is_none() {
            return Err(VerificationError::UnknownCandidate {
                voter: vote.voter_id.clone(),
                candidate: vote.candidate_id.clone(),
            });
        }
    }

    let recount = Tally::from_votes(&dump.votes);
    let candidates = recount.counts.keys().chain(dump.tally.counts.keys());
    for candidate in candidates {
        if recount.count(candidate) != dump.tally.count(candidate) {
            return Err(VerificationError::Tally {
                candidate: candidate.clone(),
            });
        }
    }
    if recount.total != dump.tally.total {
        return Err(VerificationError::TallyTotal {
            stored: dump.tally.total,
            recounted: recount.total,
        });
    }

    if let Some(entry) = dump.audit.iter().find(|e| e.election_id != election.id) {
        return Err(VerificationError::ForeignEntry {
            seq: entry.seq,
            election: entry.election_id,
        });
    }
    verify_chain(&dump.audit).map_err(VerificationError::Chain)?;
    let entries = dump
        .audit
        .iter()
        .filter(|entry| entry.action == AuditAction::VoteCast)
        .count();
    if entries != dump.votes.len() {
        return Err(VerificationError::AuditMismatch {
            votes: dump.votes.len(),
            entries,
        });
    }

    Ok(recount.results(&election.candidates))
}
