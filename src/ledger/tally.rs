use crate::error::Result;
use crate::model::{
    audit::Actor,
    common::election::ElectionId,
    election::Election,
    tally::Tally,
};
use crate::store::LedgerStore;

use super::{Clock, Ledger};

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Rebuild the tally of an election from its vote records.
    ///
    /// If the stored tally disagrees with the recount it is replaced, and the
    /// correction is audited. Returns the recounted tally.
    pub async fn recompute(&self, id: ElectionId, actor: Actor) -> Result<Tally> {
        self.load(id).await?;
        let recount = self
            .retrying("recount", || {
                self.store.recount_tally(id, actor.clone(), self.now())
            })
            .await?;
        if !recount.drifted() {
            debug!(
                "Tally of election {id} is consistent ({} votes)",
                recount.tally.total
            );
            return Ok(recount.tally);
        }

        warn!(
            "Tally of election {id} drifted: stored {} votes, recounted {}",
            recount.previous.total, recount.tally.total
        );
        self.refresh_cache(id).await?;
        Ok(recount.tally)
    }

    /// Rewrite the election's cached statistics and results from the stored tally.
    pub(crate) async fn refresh_cache(&self, id: ElectionId) -> Result<Election> {
        let tally = self.store.tally(id).await?;
        self.modify(id, "statistics refresh", |election, now| {
            election.refresh_cache(&tally, now);
            Ok(Some(Vec::new()))
        })
        .await
    }

    /// Refresh the cache if votes were admitted after `tally` was read.
    pub(crate) async fn refresh_if_stale(
        &self,
        election: Election,
        tally: &Tally,
    ) -> Result<Election> {
        if self.store.tally(election.id).await? == *tally {
            Ok(election)
        } else {
            self.refresh_cache(election.id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::super::test_support::*;
    use super::*;

    use crate::model::audit::AuditAction;

    #[tokio::test]
    async fn recount_matches_incremental_tally() {
        let (ledger, clock) = ledger();
        let candidates = ["alice", "bob", "carol", "dave"];
        let id = active(&ledger, &clock, &candidates).await;

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for voter in 0..200 {
            let candidate = candidates[rng.gen_range(0..candidates.len())];
            ledger
                .admit_vote(id, format!("v{voter}").into(), candidate.into(), None)
                .await
                .unwrap();
            clock.advance(Duration::seconds(rng.gen_range(0..30)));
        }

        let before = ledger.get_audit_log(id).await.unwrap().len();
        let recount = ledger.recompute(id, Actor::User(root())).await.unwrap();
        assert_eq!(recount, ledger.store().tally(id).await.unwrap());
        assert_eq!(recount.total, 200);
        let sum: u64 = recount.counts.values().sum();
        assert_eq!(sum, recount.total);
        // Nothing to correct, nothing audited.
        assert_eq!(ledger.get_audit_log(id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn drifted_tally_is_corrected() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice", "bob"]).await;
        for (voter, candidate) in [("v1", "alice"), ("v2", "alice"), ("v3", "bob")] {
            ledger
                .admit_vote(id, voter.into(), candidate.into(), None)
                .await
                .unwrap();
        }

        // Corrupt the stored counters behind the ledger's back.
        let mut corrupt = Tally::default();
        corrupt.apply_vote(&"bob".into());
        ledger.store().overwrite_tally(id, corrupt).await.unwrap();

        let recount = ledger.recompute(id, Actor::User(root())).await.unwrap();
        assert_eq!(recount.count(&"alice".into()), 2);
        assert_eq!(ledger.store().tally(id).await.unwrap(), recount);

        let election = ledger.get_election(id).await.unwrap();
        assert_eq!(election.statistics.total_votes, 3);
        assert_eq!(election.results[0].vote_count, 2);

        let log = ledger.get_audit_log(id).await.unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.action, AuditAction::TallyRecomputed);
        assert_eq!(last.performed_by, Actor::User(root()));
        assert_eq!(last.details.get_i64("total").unwrap(), 3);
        assert_eq!(last.details.get_i64("previous_total").unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recount_does_not_lose_concurrent_votes() {
        let (ledger, clock) = ledger();
        let ledger = Arc::new(ledger);
        let id = active(&ledger, &clock, &["alice", "bob"]).await;
        ledger
            .store()
            .overwrite_tally(id, Tally::default())
            .await
            .unwrap();

        let voters = (0..64).map(|voter| {
            let ledger = Arc::clone(&ledger);
            let candidate = if voter % 3 == 0 { "bob" } else { "alice" };
            tokio::spawn(async move {
                ledger
                    .admit_vote(id, format!("v{voter}").into(), candidate.into(), None)
                    .await
                    .map(|_| ())
            })
        });
        let recounts = (0..8).map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger
                    .recompute(id, Actor::User(root()))
                    .await
                    .map(|_| ())
            })
        });
        let tasks: Vec<_> = voters.chain(recounts).collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Without recounting again, the counters match the records.
        let votes = ledger.store().votes(id).await.unwrap();
        assert_eq!(votes.len(), 64);
        let stored = ledger.store().tally(id).await.unwrap();
        assert_eq!(stored, Tally::from_votes(&votes));
    }
}
