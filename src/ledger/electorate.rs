use chrono::{DateTime, Utc};
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    audit::{Actor, AuditAction, NewAuditEntry},
    common::election::{ElectionId, Phase, UserId, VoterId},
    election::Election,
    voter::VoterRegistration,
};
use crate::store::LedgerStore;

use super::{Clock, Ledger};

/// The electorate can change until voting has closed.
fn check_open(election: &Election, now: DateTime<Utc>, operation: &'static str) -> Result<()> {
    match election.phase(now) {
        Phase::Draft | Phase::Upcoming | Phase::Active => Ok(()),
        phase => Err(Error::InvalidPhase {
            election: election.id,
            phase,
            operation,
        }),
    }
}

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Put a voter on an election's electorate. Registering again returns the
    /// existing registration.
    pub async fn register_voter(
        &self,
        id: ElectionId,
        voter: VoterId,
        actor: Actor,
    ) -> Result<VoterRegistration> {
        let election = self.load(id).await?;
        let now = self.now();
        check_open(&election, now, "register a voter for")?;

        let registration = VoterRegistration::new(id, voter.clone(), now);
        let entry = NewAuditEntry::new(
            AuditAction::VoterRegistered,
            actor,
            now,
            doc! { "voter_id": voter.as_str() },
        );
        if self.store.insert_voter(&registration, entry).await? {
            debug!("Registered voter {voter} for election {id}");
            Ok(registration)
        } else {
            self.voter_registration(id, &voter).await
        }
    }

    /// Mark a registered voter as verified, letting them vote in elections
    /// that require it. Verifying again returns the existing registration.
    pub async fn verify_voter(
        &self,
        id: ElectionId,
        voter: VoterId,
        actor: UserId,
    ) -> Result<VoterRegistration> {
        let election = self.load(id).await?;
        let now = self.now();
        check_open(&election, now, "verify a voter for")?;

        let registration = self.voter_registration(id, &voter).await?;
        if registration.is_verified() {
            return Ok(registration);
        }
        let entry = NewAuditEntry::new(
            AuditAction::VoterVerified,
            Actor::User(actor),
            now,
            doc! { "voter_id": voter.as_str() },
        );
        if self
            .store
            .mark_voter_verified(id, &voter, now, entry)
            .await?
        {
            debug!("Verified voter {voter} for election {id}");
            Ok(VoterRegistration {
                verified_at: Some(now),
                ..registration
            })
        } else {
            // Verified concurrently.
            self.voter_registration(id, &voter).await
        }
    }

    pub async fn voter_registration(
        &self,
        id: ElectionId,
        voter: &VoterId,
    ) -> Result<VoterRegistration> {
        self.load(id).await?;
        self.store
            .voter(id, voter)
            .await?
            .ok_or_else(|| Error::VoterNotRegistered {
                election: id,
                voter: voter.clone(),
            })
    }

    /// Fail unless `voter` is registered and verified.
    pub(crate) async fn check_eligible(&self, id: ElectionId, voter: &VoterId) -> Result<()> {
        match self.store.voter(id, voter).await? {
            Some(registration) if registration.is_verified() => Ok(()),
            Some(_) => Err(Error::VoterNotVerified {
                election: id,
                voter: voter.clone(),
            }),
            None => Err(Error::VoterNotRegistered {
                election: id,
                voter: voter.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn registration_is_audited_once() {
        let (ledger, clock) = ledger();
        let id = draft(&ledger, &["alice"]).await;

        let registered = ledger
            .register_voter(id, "v1".into(), Actor::Voter("v1".into()))
            .await
            .unwrap();
        assert!(!registered.is_verified());

        clock.advance(Duration::minutes(1));
        let again = ledger
            .register_voter(id, "v1".into(), Actor::Voter("v1".into()))
            .await
            .unwrap();
        assert_eq!(again, registered);

        let verified = ledger
            .verify_voter(id, "v1".into(), root())
            .await
            .unwrap();
        assert_eq!(verified.verified_at, Some(ledger.now()));
        assert_eq!(
            ledger.voter_registration(id, &"v1".into()).await.unwrap(),
            verified
        );

        clock.advance(Duration::minutes(1));
        let again = ledger
            .verify_voter(id, "v1".into(), root())
            .await
            .unwrap();
        assert_eq!(again, verified);

        let log = ledger.get_audit_log(id).await.unwrap();
        let actions: Vec<_> = log
            .iter()
            .filter(|entry| {
                matches!(
                    entry.action,
                    AuditAction::VoterRegistered | AuditAction::VoterVerified
                )
            })
            .map(|entry| (entry.action, entry.performed_by.clone()))
            .collect();
        assert_eq!(
            actions,
            vec![
                (AuditAction::VoterRegistered, Actor::Voter("v1".into())),
                (AuditAction::VoterVerified, Actor::User(root())),
            ]
        );
    }

    #[tokio::test]
    async fn only_registered_voters_can_be_verified() {
        let (ledger, _clock) = ledger();
        let id = draft(&ledger, &["alice"]).await;
        let result = ledger.verify_voter(id, "stranger".into(), root()).await;
        assert!(matches!(result, Err(Error::VoterNotRegistered { .. })));
        let result = ledger.voter_registration(id, &"stranger".into()).await;
        assert!(matches!(result, Err(Error::VoterNotRegistered { .. })));

        let result = ledger
            .register_voter(99, "v1".into(), Actor::Voter("v1".into()))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn electorate_closes_with_voting() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice"]).await;
        ledger
            .register_voter(id, "v1".into(), Actor::User(root()))
            .await
            .unwrap();

        clock.advance(Duration::days(2));
        let result = ledger
            .register_voter(id, "v2".into(), Actor::User(root()))
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidPhase {
                phase: Phase::Ended,
                ..
            })
        ));
        let result = ledger.verify_voter(id, "v1".into(), root()).await;
        assert!(matches!(result, Err(Error::InvalidPhase { .. })));
    }
}
