//! Reconciliation with the external ledger.
//!
//! The external ledger is the source of truth for which votes were cast. Its
//! confirmations are replayed through the same admission path as direct
//! votes, keyed by their confirmation reference, so a pass can be repeated or
//! interrupted at any point without double counting.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::OperationId;
use crate::model::{
    audit::{Actor, AuditAction, NewAuditEntry},
    common::election::{CandidateId, ElectionId, ExternalRef, VoterId},
    tally::Tally,
};
use crate::store::LedgerStore;

use super::admission::{Admitted, Ballot};
use super::{Clock, Ledger};

/// A vote confirmed by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFact {
    /// The external ledger's identifier of the election the vote belongs to.
    pub external_election_ref: ExternalRef,
    pub voter_ref: VoterId,
    pub candidate_id: CandidateId,
    /// Unique reference of the confirming transaction.
    pub confirmation_ref: ExternalRef,
    pub confirmed_at: DateTime<Utc>,
}

/// Totals as reported by the external ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub total_votes: u64,
    pub candidate_counts: BTreeMap<CandidateId, u64>,
}

/// One pull from the external ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBatch {
    pub facts: Vec<LedgerFact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<LedgerTotals>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedFact {
    pub confirmation_ref: ExternalRef,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDivergence {
    pub candidate_id: CandidateId,
    pub local: u64,
    pub reported: u64,
}

/// The external ledger's totals disagree with the local tally.
///
/// This is an observation, not an error: the local tally is never overwritten
/// with reported numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsDivergence {
    pub local_total: u64,
    pub reported_total: u64,
    /// Candidates whose counts differ.
    pub candidates: Vec<CandidateDivergence>,
}

impl StatisticsDivergence {
    /// Compare a local tally with reported totals, or `None` if they agree.
    pub fn between(local: &Tally, reported: &LedgerTotals) -> Option<Self> {
        let ids: BTreeSet<&CandidateId> = local
            .counts
            .keys()
            .chain(reported.candidate_counts.keys())
            .collect();
        let candidates: Vec<_> = ids
            .into_iter()
            .filter_map(|id| {
                let local = local.count(id);
                let reported = reported.candidate_counts.get(id).copied().unwrap_or(0);
                (local != reported).then(|| CandidateDivergence {
                    candidate_id: id.clone(),
                    local,
                    reported,
                })
            })
            .collect();
        if candidates.is_empty() && local.total == reported.total_votes {
            None
        } else {
            Some(Self {
                local_total: local.total,
                reported_total: reported.total_votes,
                candidates,
            })
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Facts that produced a new vote record.
    pub applied: u64,
    /// Facts that were already recorded.
    pub replayed: u64,
    pub rejected: Vec<RejectedFact>,
    pub divergence: Option<StatisticsDivergence>,
}

impl SyncReport {
    pub fn diverged(&self) -> bool {
        self.divergence.is_some()
    }
}

/// Where confirmed votes come from.
#[async_trait]
pub trait LedgerFeed: Send + Sync {
    /// Everything the external ledger currently holds for one election.
    async fn fetch(&self, external_ref: &ExternalRef) -> Result<LedgerBatch>;
}

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Apply a batch of confirmed votes to a deployed election.
    ///
    /// Facts that fail admission are reported rather than failing the whole
    /// pass; storage failures abort it. Already applied facts stay applied,
    /// so an aborted pass can simply be repeated.
    pub async fn sync_from_ledger(
        &self,
        id: ElectionId,
        batch: LedgerBatch,
    ) -> Result<SyncReport> {
        let op = OperationId::next();
        let election = self.load(id).await?;
        let external_ref = election.external_ref.clone().ok_or(Error::InvalidPhase {
            election: id,
            phase: election.phase(self.now()),
            operation: "sync",
        })?;
        let LedgerBatch { facts, reported } = batch;
        info!(
            "[{op}] Syncing election {id} from {external_ref}: {} facts",
            facts.len()
        );

        let mut report = SyncReport::default();
        for fact in facts {
            if fact.external_election_ref != external_ref {
                let err = Error::LedgerMismatch(format!(
                    "{} belongs to {}, not {external_ref}",
                    fact.confirmation_ref, fact.external_election_ref
                ));
                warn!("[{op}] Rejected fact: {err}");
                report.rejected.push(RejectedFact {
                    confirmation_ref: fact.confirmation_ref,
                    reason: err.to_string(),
                });
                continue;
            }

            let ballot = Ballot {
                election_id: id,
                voter_id: fact.voter_ref,
                candidate_id: fact.candidate_id,
                external_ref: Some(fact.confirmation_ref.clone()),
                cast_at: fact.confirmed_at.min(self.now()),
                actor: Actor::ExternalLedger,
            };
            match self.admit(&ballot).await {
                Ok(Admitted::New(_)) => report.applied += 1,
                Ok(Admitted::Replayed(_)) => report.replayed += 1,
                Err(
                    err @ (Error::Db(_)
                    | Error::Config(_)
                    | Error::StorageConflict(_)
                    | Error::NotFound(_)),
                ) => {
                    error!("[{op}] Sync of election {id} aborted: {err}");
                    return Err(err);
                }
                Err(err) => {
                    warn!("[{op}] Rejected fact {}: {err}", fact.confirmation_ref);
                    report.rejected.push(RejectedFact {
                        confirmation_ref: fact.confirmation_ref,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let tally = self.store.tally(id).await?;
        report.divergence = reported
            .as_ref()
            .and_then(|reported| StatisticsDivergence::between(&tally, reported));

        let now = self.now();
        let mut audit = vec![NewAuditEntry::new(
            AuditAction::LedgerSynced,
            Actor::ExternalLedger,
            now,
            doc! {
                "applied": report.applied as i64,
                "replayed": report.replayed as i64,
                "rejected": report.rejected.len() as i64,
            },
        )];
        if let Some(divergence) = &report.divergence {
            warn!(
                "[{op}] Election {id} diverges from the external ledger: {} local votes, {} reported",
                divergence.local_total, divergence.reported_total
            );
            let candidates: Vec<&str> = divergence
                .candidates
                .iter()
                .map(|c| c.candidate_id.as_str())
                .collect();
            audit.push(NewAuditEntry::new(
                AuditAction::StatisticsDivergence,
                Actor::ExternalLedger,
                now,
                doc! {
                    "local_total": divergence.local_total as i64,
                    "reported_total": divergence.reported_total as i64,
                    "candidates": candidates,
                },
            ));
        }
        self.modify(id, "sync", |election, now| {
            election.refresh_cache(&tally, now);
            Ok(Some(audit.clone()))
        })
        .await?;

        info!(
            "[{op}] Synced election {id}: {} applied, {} replayed, {} rejected",
            report.applied,
            report.replayed,
            report.rejected.len()
        );
        Ok(report)
    }
}

/// Pulls confirmed votes from a [`LedgerFeed`] into a ledger.
pub struct Reconciler<S, C, F> {
    ledger: Arc<Ledger<S, C>>,
    feed: F,
}

impl<S, C, F> Reconciler<S, C, F>
where
    S: LedgerStore,
    C: Clock,
    F: LedgerFeed,
{
    pub fn new(ledger: Arc<Ledger<S, C>>, feed: F) -> Self {
        Self { ledger, feed }
    }

    /// Fetch everything the feed holds for an election and apply it.
    ///
    /// Dropping the returned future cancels the pass; every fact is applied
    /// atomically, so a cancelled pass leaves no partial vote behind.
    pub async fn run(&self, id: ElectionId) -> Result<SyncReport> {
        let election = self.ledger.load(id).await?;
        let external_ref = election.external_ref.clone().ok_or_else(|| Error::InvalidPhase {
            election: id,
            phase: election.phase(self.ledger.now()),
            operation: "sync",
        })?;
        let batch = self.feed.fetch(&external_ref).await?;
        self.ledger.sync_from_ledger(id, batch).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Duration;

    use super::super::test_support::*;
    use super::*;

    use crate::model::{audit::verify_chain, common::election::Phase, election::Deployment};

    fn fact(election: &str, voter: &str, candidate: &str, confirmation: &str) -> LedgerFact {
        LedgerFact {
            external_election_ref: election.into(),
            voter_ref: voter.into(),
            candidate_id: candidate.into(),
            confirmation_ref: confirmation.into(),
            confirmed_at: Utc::now(),
        }
    }

    fn facts_at(mut facts: Vec<LedgerFact>, at: DateTime<Utc>) -> Vec<LedgerFact> {
        for fact in &mut facts {
            fact.confirmed_at = at;
        }
        facts
    }

    /// A feed backed by a map from election reference to batch.
    #[derive(Default)]
    struct StaticFeed(Mutex<HashMap<ExternalRef, LedgerBatch>>);

    #[async_trait]
    impl LedgerFeed for StaticFeed {
        async fn fetch(&self, external_ref: &ExternalRef) -> Result<LedgerBatch> {
            let batches = self.0.lock().unwrap();
            Ok(batches.get(external_ref).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn applies_facts_once() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice", "bob"]).await;
        let election_ref = format!("0xe{id}");
        let facts = facts_at(
            vec![
                fact(&election_ref, "v1", "alice", "tx1"),
                fact(&election_ref, "v2", "bob", "tx2"),
                fact(&election_ref, "v3", "alice", "tx3"),
            ],
            ledger.now(),
        );
        let batch = LedgerBatch {
            facts,
            reported: None,
        };

        let report = ledger.sync_from_ledger(id, batch.clone()).await.unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(report.replayed, 0);
        assert!(report.rejected.is_empty());

        let again = ledger.sync_from_ledger(id, batch).await.unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(again.replayed, 3);

        let tally = ledger.store().tally(id).await.unwrap();
        assert_eq!(tally.total, 3);
        assert_eq!(tally.count(&"alice".into()), 2);

        let election = ledger.get_election(id).await.unwrap();
        assert_eq!(election.statistics.total_votes, 3);

        let log = ledger.store().audit_log(id).await.unwrap();
        let synced = log
            .iter()
            .filter(|e| e.action == AuditAction::LedgerSynced)
            .count();
        assert_eq!(synced, 2);
        assert!(log
            .iter()
            .filter(|e| e.action == AuditAction::VoteCast)
            .all(|e| e.performed_by == Actor::ExternalLedger));
        assert_eq!(verify_chain(&log), Ok(()));
    }

    #[tokio::test]
    async fn rejects_bad_facts_without_aborting() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice"]).await;
        let election_ref = format!("0xe{id}");
        let facts = facts_at(
            vec![
                fact("0xelsewhere", "v1", "alice", "tx1"),
                fact(&election_ref, "v2", "mallory", "tx2"),
                fact(&election_ref, "v3", "alice", "tx3"),
                fact(&election_ref, "v3", "alice", "tx4"),
            ],
            ledger.now(),
        );
        let report = ledger
            .sync_from_ledger(
                id,
                LedgerBatch {
                    facts,
                    reported: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(report.applied, 1);
        let rejected: Vec<_> = report
            .rejected
            .iter()
            .map(|r| r.confirmation_ref.to_string())
            .collect();
        assert_eq!(rejected, vec!["tx1", "tx2", "tx4"]);
        assert!(report.rejected[0].reason.contains("does not belong"));
    }

    #[tokio::test]
    async fn late_confirmations_inside_the_window_count() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice"]).await;
        let election = ledger.get_election(id).await.unwrap();
        let election_ref = format!("0xe{id}");

        clock.advance(Duration::days(2));
        ledger.advance(id).await.unwrap();

        let facts = vec![
            LedgerFact {
                confirmed_at: election.end_time - Duration::minutes(1),
                ..fact(&election_ref, "v1", "alice", "tx1")
            },
            LedgerFact {
                confirmed_at: election.end_time + Duration::minutes(1),
                ..fact(&election_ref, "v2", "alice", "tx2")
            },
        ];
        let report = ledger
            .sync_from_ledger(
                id,
                LedgerBatch {
                    facts,
                    reported: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected.len(), 1);

        let results = ledger.get_results(id, None).await.unwrap();
        assert_eq!(results.statistics.total_votes, 1);
        let election = ledger.get_election(id).await.unwrap();
        assert_eq!(election.statistics.total_votes, 1);
    }

    #[tokio::test]
    async fn divergence_is_reported_not_applied() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice", "bob"]).await;
        let election_ref = format!("0xe{id}");
        let facts = facts_at(
            vec![
                fact(&election_ref, "v1", "alice", "tx1"),
                fact(&election_ref, "v2", "bob", "tx2"),
            ],
            ledger.now(),
        );
        let reported = LedgerTotals {
            total_votes: 3,
            candidate_counts: [("alice".into(), 2), ("bob".into(), 1)].into_iter().collect(),
        };
        let report = ledger
            .sync_from_ledger(
                id,
                LedgerBatch {
                    facts,
                    reported: Some(reported),
                },
            )
            .await
            .unwrap();

        assert!(report.diverged());
        let divergence = report.divergence.unwrap();
        assert_eq!(divergence.local_total, 2);
        assert_eq!(divergence.reported_total, 3);
        assert_eq!(
            divergence.candidates,
            vec![CandidateDivergence {
                candidate_id: "alice".into(),
                local: 1,
                reported: 2,
            }]
        );
        assert_eq!(ledger.store().tally(id).await.unwrap().total, 2);

        let log = ledger.get_audit_log(id).await.unwrap();
        assert_eq!(log.last().unwrap().action, AuditAction::StatisticsDivergence);
    }

    #[test]
    fn agreeing_totals() {
        let mut tally = Tally::default();
        tally.apply_vote(&"alice".into());
        let reported = LedgerTotals {
            total_votes: 1,
            candidate_counts: [("alice".into(), 1), ("bob".into(), 0)].into_iter().collect(),
        };
        assert_eq!(StatisticsDivergence::between(&tally, &reported), None);
    }

    #[tokio::test]
    async fn undeployed_elections_cannot_sync() {
        let (ledger, _clock) = ledger();
        let ledger = Arc::new(ledger);
        let id = draft(&ledger, &["alice"]).await;
        let result = ledger.sync_from_ledger(id, LedgerBatch::default()).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPhase {
                operation: "sync",
                ..
            })
        ));

        let reconciler = Reconciler::new(Arc::clone(&ledger), StaticFeed::default());
        let result = reconciler.run(id).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPhase {
                phase: Phase::Draft,
                operation: "sync",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn reconciler_pulls_from_feed() {
        let (ledger, clock) = ledger();
        let ledger = Arc::new(ledger);
        let id = draft(&ledger, &["alice", "bob"]).await;
        ledger
            .deploy(id, Deployment::new("0xfeed"), root())
            .await
            .unwrap();
        clock.advance(Duration::hours(2));

        let feed = StaticFeed::default();
        feed.0.lock().unwrap().insert(
            "0xfeed".into(),
            LedgerBatch {
                facts: facts_at(
                    vec![
                        fact("0xfeed", "v1", "bob", "tx1"),
                        fact("0xfeed", "v2", "bob", "tx2"),
                    ],
                    ledger.now(),
                ),
                reported: Some(LedgerTotals {
                    total_votes: 2,
                    candidate_counts: [("bob".into(), 2)].into_iter().collect(),
                }),
            },
        );

        let reconciler = Reconciler::new(Arc::clone(&ledger), feed);
        let report = reconciler.run(id).await.unwrap();
        assert_eq!(report.applied, 2);
        assert!(!report.diverged());
        let report = reconciler.run(id).await.unwrap();
        assert_eq!(report.replayed, 2);
    }
}
