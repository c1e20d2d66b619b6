use chrono::{DateTime, Utc};
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    audit::{Actor, AuditAction, NewAuditEntry},
    common::election::{CandidateId, ElectionId, ElectionStatus, ExternalRef, Phase, VoterId},
    election::Election,
    vote::{VoteInsert, VoteRecord},
};
use crate::store::LedgerStore;

use super::{Clock, Ledger};

/// A vote presented for admission, from either write path.
#[derive(Debug, Clone)]
pub(crate) struct Ballot {
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub candidate_id: CandidateId,
    pub external_ref: Option<ExternalRef>,
    /// When the vote was cast. Admission is judged against this time.
    pub cast_at: DateTime<Utc>,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Admitted {
    New(VoteRecord),
    /// The external reference was already recorded; nothing changed.
    Replayed(VoteRecord),
}

impl Admitted {
    pub fn into_record(self) -> VoteRecord {
        match self {
            Self::New(record) | Self::Replayed(record) => record,
        }
    }
}

/// Was the election open for this ballot?
///
/// A vote cast directly needs the election to be active when it is cast. A
/// confirmation from the external ledger only needs to fall inside the window
/// as it was when voting closed, so that confirmations arriving after the
/// close are not lost.
fn open_for(election: &Election, ballot: &Ballot) -> bool {
    match ballot.actor {
        Actor::ExternalLedger => match election.status {
            ElectionStatus::Scheduled | ElectionStatus::Active | ElectionStatus::Ended => {
                election.start_time <= ballot.cast_at && ballot.cast_at <= election.closes_at()
            }
            ElectionStatus::Draft | ElectionStatus::Cancelled => false,
        },
        _ => election.phase(ballot.cast_at) == Phase::Active,
    }
}

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Record `voter_id`'s vote for `candidate_id`.
    ///
    /// Supplying the external ledger's confirmation reference makes the call
    /// idempotent: if a vote with that reference is already recorded, it is
    /// returned unchanged.
    pub async fn admit_vote(
        &self,
        election_id: ElectionId,
        voter_id: VoterId,
        candidate_id: CandidateId,
        external_ref: Option<ExternalRef>,
    ) -> Result<VoteRecord> {
        let ballot = Ballot {
            election_id,
            actor: Actor::Voter(voter_id.clone()),
            voter_id,
            candidate_id,
            external_ref,
            cast_at: self.now(),
        };
        Ok(self.admit(&ballot).await?.into_record())
    }

    pub(crate) async fn admit(&self, ballot: &Ballot) -> Result<Admitted> {
        self.retrying("vote admission", || self.try_admit(ballot))
            .await
    }

    /// One admission attempt. The checks run in this order, and the first
    /// to fail decides the error:
    ///
    /// 1. a ballot whose external reference is already recorded is a replay
    ///    and returns the existing record, whatever the election's phase;
    /// 2. the election must be open for the ballot (`ElectionNotActive`);
    /// 3. the candidate must be on the roster (`UnknownCandidate`);
    /// 4. if the election requires verification, a direct voter must be
    ///    registered and verified (`VoterNotRegistered`, `VoterNotVerified`);
    /// 5. the voter must not have voted (`AlreadyVoted`).
    async fn try_admit(&self, ballot: &Ballot) -> Result<Admitted> {
        let id = ballot.election_id;
        let election = self.load(id).await?;

        if let Some(external_ref) = &ballot.external_ref {
            if let Some(existing) = self.store.vote_by_external_ref(id, external_ref).await? {
                trace!("Replayed confirmation {external_ref} in election {id}");
                return Ok(Admitted::Replayed(existing));
            }
        }
        if !open_for(&election, ballot) {
            return Err(Error::ElectionNotActive(id));
        }
        if election.candidate(&ballot.candidate_id).is_none() {
            return Err(Error::UnknownCandidate(ballot.candidate_id.clone()));
        }
        // The external ledger checks eligibility itself before confirming.
        if election.voting.verification_required && ballot.actor != Actor::ExternalLedger {
            self.check_eligible(id, &ballot.voter_id).await?;
        }
        let already_voted = || Error::AlreadyVoted {
            election: id,
            voter: ballot.voter_id.clone(),
        };
        if self
            .store
            .vote_by_voter(id, &ballot.voter_id)
            .await?
            .is_some()
        {
            return Err(already_voted());
        }

        let record = VoteRecord {
            election_id: id,
            voter_id: ballot.voter_id.clone(),
            candidate_id: ballot.candidate_id.clone(),
            external_ref: ballot.external_ref.clone(),
            cast_at: ballot.cast_at,
        };
        let mut details = doc! {
            "voter_id": record.voter_id.as_str(),
            "candidate_id": record.candidate_id.as_str(),
        };
        if let Some(external_ref) = &record.external_ref {
            details.insert("external_ref", external_ref.as_str());
        }
        let entry = NewAuditEntry::new(
            AuditAction::VoteCast,
            ballot.actor.clone(),
            self.now(),
            details,
        );

        // The store repeats the uniqueness checks atomically with the insert.
        match self.store.insert_vote(&record, entry).await? {
            VoteInsert::Inserted(record) => {
                debug!("Admitted vote of {} in election {id}", record.voter_id);
                Ok(Admitted::New(record))
            }
            VoteInsert::Replay(existing) => Ok(Admitted::Replayed(existing)),
            VoteInsert::VoterTaken(_) => Err(already_voted()),
        }
    }
}
