use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    audit::{Actor, AuditAction, NewAuditEntry},
    candidate::{Candidate, CandidateSpec},
    common::election::{ElectionId, Phase, UserId},
    election::Election,
};
use crate::store::LedgerStore;

use super::{Clock, Ledger};

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Add a candidate to the roster. The roster is frozen once voting starts.
    pub async fn add_candidate(
        &self,
        id: ElectionId,
        candidate: CandidateSpec,
        actor: UserId,
    ) -> Result<Election> {
        let candidate = candidate.validate()?;
        let election = self
            .modify(id, "add candidate", |election, now| {
                match election.phase(now) {
                    Phase::Draft | Phase::Upcoming => {}
                    Phase::Active | Phase::Ended => return Err(Error::ElectionLocked(id)),
                    phase => {
                        return Err(Error::InvalidPhase {
                            election: id,
                            phase,
                            operation: "add a candidate to",
                        })
                    }
                }
                if election.candidate(&candidate.id).is_some() {
                    return Err(Error::DuplicateCandidate(candidate.id.clone()));
                }
                election
                    .candidates
                    .push(Candidate::new(candidate.clone(), now));
                Ok(Some(vec![NewAuditEntry::new(
                    AuditAction::CandidateAdded,
                    Actor::User(actor.clone()),
                    now,
                    doc! {
                        "candidate_id": candidate.id.as_str(),
                        "name": candidate.name.as_str(),
                    },
                )]))
            })
            .await?;
        debug!(
            "Added candidate {} to election {id} ({} on roster)",
            candidate.id,
            election.candidates.len()
        );
        Ok(election)
    }

    /// The roster in the order candidates were added.
    pub async fn list_candidates(&self, id: ElectionId) -> Result<Vec<Candidate>> {
        Ok(self.load(id).await?.candidates)
    }
}
