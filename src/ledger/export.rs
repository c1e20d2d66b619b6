use crate::error::Result;
use crate::model::common::election::ElectionId;
use crate::store::LedgerStore;
use crate::verify::ElectionDump;

use super::{Clock, Ledger};

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Everything recorded about an election, for offline verification.
    ///
    /// The parts are read one after another, so votes admitted during the
    /// export may make the dump inconsistent. Export once voting has ended.
    pub async fn export(&self, id: ElectionId) -> Result<ElectionDump> {
        let election = self.load(id).await?;
        let votes = self.store.votes(id).await?;
        let tally = self.store.tally(id).await?;
        let mut audit = self.store.audit_log(id).await?;
        audit.sort_by_key(|entry| entry.seq);
        debug!(
            "Exported election {id}: {} votes, {} audit entries",
            votes.len(),
            audit.len()
        );
        Ok(ElectionDump {
            election,
            votes,
            tally,
            audit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;

    use crate::error::Error;

    #[tokio::test]
    async fn exports_everything() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice"]).await;
        ledger
            .admit_vote(id, "v1".into(), "alice".into(), None)
            .await
            .unwrap();

        let dump = ledger.export(id).await.unwrap();
        assert_eq!(dump.election.id, id);
        assert_eq!(dump.votes.len(), 1);
        assert_eq!(dump.tally.total, 1);
        // Created, candidate added, deployed, vote cast.
        assert_eq!(dump.audit.len(), 4);
        assert!(dump.audit.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn missing_election() {
        let (ledger, _clock) = ledger();
        assert!(matches!(
            ledger.export(99).await,
            Err(Error::NotFound(_))
        ));
    }
}
