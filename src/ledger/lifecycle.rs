use chrono::{DateTime, Utc};
use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    audit::{sort_entries, Actor, AuditAction, AuditEntry, NewAuditEntry},
    common::election::{phase_at, ElectionId, ElectionStatus, Phase, UserId},
    election::{
        validate_description, validate_title, validate_voting, validate_window, AdminRole,
        Administrator, Deployment, Election, ElectionPatch, ElectionSpec, ElectionType,
    },
    tally::{ElectionResults, Statistics},
};
use crate::store::LedgerStore;

use super::{rfc3339, Clock, Ledger};

/// Criteria for [`Ledger::list_elections`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionFilter {
    pub phase: Option<Phase>,
    pub election_type: Option<ElectionType>,
    /// Case-insensitive substring of the title or description.
    pub search: Option<String>,
    /// Only elections this user administers.
    pub administrator: Option<UserId>,
}

impl ElectionFilter {
    fn matches(&self, election: &Election, now: DateTime<Utc>) -> bool {
        if let Some(phase) = self.phase {
            if election.phase(now) != phase {
                return false;
            }
        }
        if let Some(election_type) = self.election_type {
            if election.election_type != election_type {
                return false;
            }
        }
        if let Some(user) = &self.administrator {
            if !election.is_administrator(user) {
                return false;
            }
        }
        match &self.search {
            Some(search) => {
                let search = search.to_lowercase();
                election.title.to_lowercase().contains(&search)
                    || election.description.to_lowercase().contains(&search)
            }
            None => true,
        }
    }
}

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Clock,
{
    /// Create a new draft election owned by `actor`.
    pub async fn create_election(&self, spec: ElectionSpec, actor: UserId) -> Result<Election> {
        let now = self.now();
        let spec = spec.validate(now)?;
        let id = self.store.next_election_id().await?;
        let election = Election::new(id, spec, actor.clone(), now);
        let entry = NewAuditEntry::new(
            AuditAction::ElectionCreated,
            Actor::User(actor),
            now,
            doc! {
                "title": election.title.as_str(),
                "start_time": rfc3339(election.start_time),
                "end_time": rfc3339(election.end_time),
            },
        );
        self.store.insert_election(&election, entry).await?;
        info!("Created election {id} '{}'", election.title);
        Ok(election)
    }

    /// Change the details or schedule of an election that has not started.
    pub async fn edit_election(
        &self,
        id: ElectionId,
        patch: ElectionPatch,
        actor: UserId,
    ) -> Result<Election> {
        if patch.is_empty() {
            return self.load(id).await;
        }
        let fields = patch.fields();
        self.modify(id, "edit", |election, now| {
            match election.phase(now) {
                Phase::Draft | Phase::Upcoming => {}
                Phase::Active => return Err(Error::ElectionLocked(id)),
                phase => {
                    return Err(Error::InvalidPhase {
                        election: id,
                        phase,
                        operation: "edit",
                    })
                }
            }

            let start_time = patch.start_time.unwrap_or(election.start_time);
            let end_time = patch.end_time.unwrap_or(election.end_time);
            if patch.start_time.is_some() && start_time <= now {
                return Err(Error::InvalidPhase {
                    election: id,
                    phase: phase_at(
                        now,
                        start_time,
                        end_time,
                        ElectionStatus::Scheduled,
                    ),
                    operation: "reschedule",
                });
            }
            validate_window(start_time, end_time)?;
            let title = patch.title.as_deref().map(validate_title).transpose()?;
            let description = patch
                .description
                .as_deref()
                .map(validate_description)
                .transpose()?;
            if let Some(voting) = &patch.voting {
                validate_voting(voting)?;
            }

            if let Some(title) = title {
                election.title = title;
            }
            if let Some(description) = description {
                election.description = description;
            }
            if let Some(election_type) = patch.election_type {
                election.election_type = election_type;
            }
            if let Some(voting) = patch.voting {
                election.voting = voting;
            }
            if let Some(eligible_voters) = patch.eligible_voters {
                election.eligible_voters = eligible_voters;
                election.statistics = Statistics::empty(eligible_voters, now);
            }
            election.start_time = start_time;
            election.end_time = end_time;

            Ok(Some(vec![NewAuditEntry::new(
                AuditAction::ElectionUpdated,
                Actor::User(actor.clone()),
                now,
                doc! { "fields": fields.clone() },
            )]))
        })
        .await
    }

    /// Grant `user` a role on an election, or change the role they hold.
    pub async fn add_administrator(
        &self,
        id: ElectionId,
        user: UserId,
        role: AdminRole,
        actor: UserId,
    ) -> Result<Election> {
        self.modify(id, "add administrator", |election, now| {
            if election.status == ElectionStatus::Cancelled {
                return Err(Error::InvalidPhase {
                    election: id,
                    phase: Phase::Cancelled,
                    operation: "add an administrator to",
                });
            }
            match election.administrators.iter_mut().find(|a| a.user == user) {
                Some(existing) if existing.role == role => return Ok(None),
                Some(existing) => existing.role = role,
                None => election.administrators.push(Administrator {
                    user: user.clone(),
                    role,
                    added_at: now,
                }),
            }
            Ok(Some(vec![NewAuditEntry::new(
                AuditAction::AdministratorAdded,
                Actor::User(actor.clone()),
                now,
                doc! { "user": user.as_str(), "role": role.as_str() },
            )]))
        })
        .await
    }

    /// Attach the external ledger deployment, scheduling the election.
    pub async fn deploy(
        &self,
        id: ElectionId,
        deployment: Deployment,
        actor: UserId,
    ) -> Result<Election> {
        let election = self
            .modify(id, "deploy", |election, now| {
                match election.status {
                    ElectionStatus::Draft => {}
                    ElectionStatus::Scheduled
                        if election.external_ref.as_ref() == Some(&deployment.external_ref) =>
                    {
                        return Ok(None)
                    }
                    _ => {
                        return Err(Error::InvalidPhase {
                            election: id,
                            phase: election.phase(now),
                            operation: "deploy",
                        })
                    }
                }
                if election.start_time <= now {
                    // Too late: the election would open the moment it is deployed.
                    return Err(Error::InvalidPhase {
                        election: id,
                        phase: phase_at(
                            now,
                            election.start_time,
                            election.end_time,
                            ElectionStatus::Scheduled,
                        ),
                        operation: "deploy",
                    });
                }

                election.status = ElectionStatus::Scheduled;
                election.external_ref = Some(deployment.external_ref.clone());
                election.deployment = deployment.transaction.clone();

                let mut details = doc! { "external_ref": deployment.external_ref.as_str() };
                if let Some(transaction) = &deployment.transaction {
                    details.insert("transaction_hash", transaction.hash.as_str());
                }
                Ok(Some(vec![NewAuditEntry::new(
                    AuditAction::ElectionDeployed,
                    Actor::User(actor.clone()),
                    now,
                    details,
                )]))
            })
            .await?;
        info!(
            "Election {id} deployed as {}",
            deployment.external_ref.as_str()
        );
        Ok(election)
    }

    /// Open voting now, ahead of the scheduled start if necessary.
    pub async fn activate(&self, id: ElectionId, actor: UserId) -> Result<Election> {
        let election = self
            .modify(id, "activate", |election, now| {
                match (election.status, election.phase(now)) {
                    (ElectionStatus::Active, Phase::Active) => return Ok(None),
                    (ElectionStatus::Scheduled, Phase::Upcoming | Phase::Active) => {}
                    (_, phase) => {
                        return Err(Error::InvalidPhase {
                            election: id,
                            phase,
                            operation: "activate",
                        })
                    }
                }
                if election.candidates.is_empty() {
                    return Err(Error::EmptyRoster(id));
                }
                if now < election.start_time {
                    election.start_time = now;
                }
                election.status = ElectionStatus::Active;
                Ok(Some(vec![NewAuditEntry::new(
                    AuditAction::ElectionActivated,
                    Actor::User(actor.clone()),
                    now,
                    doc! { "start_time": rfc3339(election.start_time) },
                )]))
            })
            .await?;
        info!("Election {id} activated");
        Ok(election)
    }

    /// Apply whatever transition the clock calls for.
    ///
    /// A scheduled election whose window has opened becomes active, and an
    /// election whose window has closed is ended with its statistics frozen.
    /// Calling this again once the transition has happened does nothing.
    pub async fn advance(&self, id: ElectionId) -> Result<Election> {
        let tally = self.store.tally(id).await?;
        let before = self.load(id).await?.status;
        let election = self
            .modify(id, "advance", |election, now| {
                let action = match (election.status, election.phase(now)) {
                    (ElectionStatus::Scheduled, Phase::Active) => {
                        if election.candidates.is_empty() {
                            return Err(Error::EmptyRoster(id));
                        }
                        election.status = ElectionStatus::Active;
                        AuditAction::ElectionActivated
                    }
                    (ElectionStatus::Scheduled | ElectionStatus::Active, Phase::Ended) => {
                        election.close(&tally, now);
                        AuditAction::ElectionEnded
                    }
                    _ => return Ok(None),
                };
                Ok(Some(vec![NewAuditEntry::new(
                    action,
                    Actor::PhaseClock,
                    now,
                    doc! { "total_votes": election.statistics.total_votes as i64 },
                )]))
            })
            .await?;
        if election.status != before {
            info!("Election {id} is now {}", election.status);
        }
        if election.status == ElectionStatus::Ended && before != ElectionStatus::Ended {
            return self.refresh_if_stale(election, &tally).await;
        }
        Ok(election)
    }

    /// Close voting now, ahead of the scheduled end.
    pub async fn end_election(&self, id: ElectionId, actor: UserId) -> Result<Election> {
        let tally = self.store.tally(id).await?;
        let election = self
            .modify(id, "end", |election, now| {
                match election.phase(now) {
                    Phase::Active => {}
                    phase => {
                        return Err(Error::InvalidPhase {
                            election: id,
                            phase,
                            operation: "end",
                        })
                    }
                }
                // The window must stay non-empty, so an election ended at the
                // instant it opened keeps its end time; `ended_at` still
                // closes it.
                if election.start_time < now && now < election.end_time {
                    election.end_time = now;
                }
                election.close(&tally, now);
                Ok(Some(vec![NewAuditEntry::new(
                    AuditAction::ElectionEnded,
                    Actor::User(actor.clone()),
                    now,
                    doc! {
                        "end_time": rfc3339(election.end_time),
                        "total_votes": tally.total as i64,
                    },
                )]))
            })
            .await?;
        info!("Election {id} ended early");
        self.refresh_if_stale(election, &tally).await
    }

    /// Withdraw an election that has not started.
    pub async fn cancel(&self, id: ElectionId, actor: UserId) -> Result<Election> {
        let election = self
            .modify(id, "cancel", |election, now| match election.phase(now) {
                Phase::Cancelled => Ok(None),
                Phase::Draft | Phase::Upcoming => {
                    election.status = ElectionStatus::Cancelled;
                    Ok(Some(vec![NewAuditEntry::new(
                        AuditAction::ElectionCancelled,
                        Actor::User(actor.clone()),
                        now,
                        doc! {},
                    )]))
                }
                Phase::Active => Err(Error::CannotCancelActiveElection(id)),
                phase => Err(Error::InvalidPhase {
                    election: id,
                    phase,
                    operation: "cancel",
                }),
            })
            .await?;
        info!("Election {id} cancelled");
        Ok(election)
    }

    pub async fn get_election(&self, id: ElectionId) -> Result<Election> {
        self.load(id).await
    }

    /// Elections matching `filter`, newest first.
    pub async fn list_elections(&self, filter: &ElectionFilter) -> Result<Vec<Election>> {
        let now = self.now();
        let mut elections = self.store.elections().await?;
        elections.retain(|election| filter.matches(election, now));
        elections.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(elections)
    }

    /// Results of an election. Anyone may see them once voting has ended;
    /// before that, only the election's administrators.
    pub async fn get_results(
        &self,
        id: ElectionId,
        viewer: Option<&UserId>,
    ) -> Result<ElectionResults> {
        let election = self.load(id).await?;
        let now = self.now();
        let visible = election.phase(now) == Phase::Ended
            || viewer.map_or(false, |user| election.is_administrator(user));
        if !visible {
            return Err(Error::ResultsNotAvailable(id));
        }
        let tally = self.store.tally(id).await?;
        Ok(ElectionResults {
            statistics: tally.statistics(election.eligible_voters, now),
            results: tally.results(&election.candidates),
        })
    }

    /// Turnout so far. Always available.
    pub async fn get_statistics(&self, id: ElectionId) -> Result<Statistics> {
        let election = self.load(id).await?;
        let tally = self.store.tally(id).await?;
        Ok(tally.statistics(election.eligible_voters, self.now()))
    }

    /// The election's audit trail, ordered by timestamp then sequence number.
    pub async fn get_audit_log(&self, id: ElectionId) -> Result<Vec<AuditEntry>> {
        self.load(id).await?;
        let mut entries = self.store.audit_log(id).await?;
        sort_entries(&mut entries);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::super::test_support::*;
    use super::*;

    use crate::model::{audit::verify_chain, candidate::CandidateSpec};

    #[tokio::test]
    async fn create_election() {
        let (ledger, _clock) = ledger();
        let spec = ElectionSpec::example(ledger.now());
        let election = ledger.create_election(spec, root()).await.unwrap();

        assert_eq!(election.status, ElectionStatus::Draft);
        assert_eq!(election.administrators[0].role, AdminRole::Admin);
        let log = ledger.get_audit_log(election.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::ElectionCreated);
        assert_eq!(log[0].performed_by, Actor::User(root()));

        let mut spec = ElectionSpec::example(ledger.now());
        spec.start_time = ledger.now();
        let result = ledger.create_election(spec, root()).await;
        assert!(matches!(result, Err(Error::InvalidElection(_))));
    }

    #[tokio::test]
    async fn edit_rules() {
        let (ledger, clock) = ledger();
        let id = draft(&ledger, &["alice"]).await;

        let patch = ElectionPatch {
            title: Some("  Renamed  ".to_string()),
            end_time: Some(ledger.now() + Duration::hours(48)),
            ..Default::default()
        };
        let edited = ledger.edit_election(id, patch, root()).await.unwrap();
        assert_eq!(edited.title, "Renamed");
        let log = ledger.get_audit_log(id).await.unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.action, AuditAction::ElectionUpdated);
        assert_eq!(
            last.details.get_array("fields").unwrap().len(),
            2,
            "audit entry names the updated fields"
        );

        let past = ElectionPatch {
            start_time: Some(ledger.now() - Duration::minutes(1)),
            ..Default::default()
        };
        let result = ledger.edit_election(id, past, root()).await;
        assert!(matches!(result, Err(Error::InvalidPhase { .. })));

        let inverted = ElectionPatch {
            end_time: Some(edited.start_time),
            ..Default::default()
        };
        let result = ledger.edit_election(id, inverted, root()).await;
        assert!(matches!(result, Err(Error::InvalidElection(_))));

        ledger
            .deploy(id, Deployment::new("0xedit"), root())
            .await
            .unwrap();
        clock.advance(Duration::hours(2));
        let late = ElectionPatch {
            description: Some("Too late".to_string()),
            ..Default::default()
        };
        let result = ledger.edit_election(id, late, root()).await;
        assert!(matches!(result, Err(Error::ElectionLocked(_))));
    }

    #[tokio::test]
    async fn deploy_rules() {
        let (ledger, _clock) = ledger();
        let id = draft(&ledger, &["alice"]).await;
        let other = draft(&ledger, &["alice"]).await;

        let deployed = ledger
            .deploy(id, Deployment::new("0xd1"), root())
            .await
            .unwrap();
        assert_eq!(deployed.status, ElectionStatus::Scheduled);
        assert_eq!(deployed.external_ref, Some("0xd1".into()));

        // Same reference again: nothing happens.
        let again = ledger
            .deploy(id, Deployment::new("0xd1"), root())
            .await
            .unwrap();
        assert_eq!(again.revision, deployed.revision);

        let result = ledger.deploy(id, Deployment::new("0xd2"), root()).await;
        assert!(matches!(result, Err(Error::InvalidPhase { .. })));

        let result = ledger.deploy(other, Deployment::new("0xd1"), root()).await;
        assert!(matches!(result, Err(Error::ExternalRefInUse(_))));
        let other = ledger.get_election(other).await.unwrap();
        assert_eq!(other.status, ElectionStatus::Draft);
    }

    #[tokio::test]
    async fn deploy_after_start_is_rejected() {
        let (ledger, clock) = ledger();
        let id = draft(&ledger, &["alice"]).await;
        clock.advance(Duration::hours(1));
        let result = ledger.deploy(id, Deployment::new("0xlate"), root()).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPhase {
                phase: Phase::Active,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn activate_pulls_start_forward() {
        let (ledger, _clock) = ledger();
        let empty = draft(&ledger, &[]).await;
        ledger
            .deploy(empty, Deployment::new("0xempty"), root())
            .await
            .unwrap();
        let result = ledger.activate(empty, root()).await;
        assert!(matches!(result, Err(Error::EmptyRoster(_))));

        let id = draft(&ledger, &["alice"]).await;
        let result = ledger.activate(id, root()).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPhase {
                phase: Phase::Draft,
                ..
            })
        ));
        ledger
            .deploy(id, Deployment::new("0xa"), root())
            .await
            .unwrap();
        let active = ledger.activate(id, root()).await.unwrap();
        assert_eq!(active.status, ElectionStatus::Active);
        assert_eq!(active.start_time, ledger.now());
        assert_eq!(active.phase(ledger.now()), Phase::Active);

        let again = ledger.activate(id, root()).await.unwrap();
        assert_eq!(again.revision, active.revision);
    }

    #[tokio::test]
    async fn advance_follows_the_clock() {
        let (ledger, clock) = ledger();
        let id = draft(&ledger, &["alice", "bob"]).await;
        ledger
            .deploy(id, Deployment::new("0xadv"), root())
            .await
            .unwrap();

        // Not yet.
        let election = ledger.advance(id).await.unwrap();
        assert_eq!(election.status, ElectionStatus::Scheduled);

        clock.advance(Duration::hours(1));
        let election = ledger.advance(id).await.unwrap();
        assert_eq!(election.status, ElectionStatus::Active);
        let repeat = ledger.advance(id).await.unwrap();
        assert_eq!(repeat.revision, election.revision);

        ledger
            .admit_vote(id, "v1".into(), "bob".into(), None)
            .await
            .unwrap();

        clock.advance(Duration::hours(25));
        let election = ledger.advance(id).await.unwrap();
        assert_eq!(election.status, ElectionStatus::Ended);
        assert_eq!(election.statistics.total_votes, 1);
        assert_eq!(election.results[1].vote_count, 1);

        let log = ledger.get_audit_log(id).await.unwrap();
        let by_clock: Vec<_> = log
            .iter()
            .filter(|e| e.performed_by == Actor::PhaseClock)
            .map(|e| e.action)
            .collect();
        assert_eq!(
            by_clock,
            vec![AuditAction::ElectionActivated, AuditAction::ElectionEnded]
        );
        assert_eq!(verify_chain(&ledger.store().audit_log(id).await.unwrap()), Ok(()));
    }

    #[tokio::test]
    async fn advance_with_empty_roster() {
        let (ledger, clock) = ledger();
        let id = draft(&ledger, &[]).await;
        ledger
            .deploy(id, Deployment::new("0xnone"), root())
            .await
            .unwrap();
        clock.advance(Duration::hours(2));
        let result = ledger.advance(id).await;
        assert!(matches!(result, Err(Error::EmptyRoster(_))));
    }

    #[tokio::test]
    async fn end_election_early() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice"]).await;
        ledger
            .admit_vote(id, "v1".into(), "alice".into(), None)
            .await
            .unwrap();

        let ended = ledger.end_election(id, root()).await.unwrap();
        assert_eq!(ended.status, ElectionStatus::Ended);
        assert_eq!(ended.end_time, ledger.now());
        assert_eq!(ended.ended_at, Some(ledger.now()));
        assert_eq!(ended.statistics.total_votes, 1);

        let result = ledger
            .admit_vote(id, "v2".into(), "alice".into(), None)
            .await;
        assert!(matches!(result, Err(Error::ElectionNotActive(_))));

        let result = ledger.end_election(id, root()).await;
        assert!(matches!(result, Err(Error::InvalidPhase { .. })));
    }

    #[tokio::test]
    async fn cancel_rules() {
        let (ledger, clock) = ledger();

        let id = draft(&ledger, &[]).await;
        let cancelled = ledger.cancel(id, root()).await.unwrap();
        assert_eq!(cancelled.status, ElectionStatus::Cancelled);
        let again = ledger.cancel(id, root()).await.unwrap();
        assert_eq!(again.revision, cancelled.revision);
        let result = ledger
            .add_candidate(id, CandidateSpec::example("late"), root())
            .await;
        assert!(matches!(result, Err(Error::InvalidPhase { .. })));

        let id = draft(&ledger, &["alice"]).await;
        ledger
            .deploy(id, Deployment::new("0xc"), root())
            .await
            .unwrap();
        assert!(ledger.cancel(id, root()).await.is_ok());

        let id = active(&ledger, &clock, &["alice"]).await;
        let result = ledger.cancel(id, root()).await;
        assert!(matches!(result, Err(Error::CannotCancelActiveElection(_))));

        clock.advance(Duration::days(2));
        let result = ledger.cancel(id, root()).await;
        assert!(matches!(
            result,
            Err(Error::InvalidPhase {
                phase: Phase::Ended,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn administrators() {
        let (ledger, _clock) = ledger();
        let id = draft(&ledger, &[]).await;
        let moderator: UserId = "mod".into();

        let election = ledger
            .add_administrator(id, moderator.clone(), AdminRole::Observer, root())
            .await
            .unwrap();
        assert_eq!(election.administrators.len(), 2);

        let election = ledger
            .add_administrator(id, moderator.clone(), AdminRole::Moderator, root())
            .await
            .unwrap();
        assert_eq!(election.administrators.len(), 2);
        assert_eq!(
            election.administrator(&moderator).unwrap().role,
            AdminRole::Moderator
        );

        // Unchanged role is not audited twice.
        let before = ledger.get_audit_log(id).await.unwrap().len();
        ledger
            .add_administrator(id, moderator, AdminRole::Moderator, root())
            .await
            .unwrap();
        assert_eq!(ledger.get_audit_log(id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn results_visibility() {
        let (ledger, clock) = ledger();
        let id = active(&ledger, &clock, &["alice", "bob"]).await;
        ledger
            .admit_vote(id, "v1".into(), "alice".into(), None)
            .await
            .unwrap();

        let result = ledger.get_results(id, None).await;
        assert!(matches!(result, Err(Error::ResultsNotAvailable(_))));
        let result = ledger.get_results(id, Some(&"stranger".into())).await;
        assert!(matches!(result, Err(Error::ResultsNotAvailable(_))));
        let early = ledger.get_results(id, Some(&root())).await.unwrap();
        assert_eq!(early.statistics.total_votes, 1);

        let stats = ledger.get_statistics(id).await.unwrap();
        assert_eq!(stats.turnout_percentage, 10.0);

        clock.advance(Duration::days(2));
        let results = ledger.get_results(id, None).await.unwrap();
        assert_eq!(results.results.len(), 2);
        assert_eq!(results.results[0].percentage, 100.0);
        assert_eq!(results.results[1].vote_count, 0);
    }

    #[tokio::test]
    async fn list_with_filters() {
        let (ledger, clock) = ledger();
        let first = draft(&ledger, &["alice"]).await;
        clock.advance(Duration::minutes(1));
        let second = active(&ledger, &clock, &["alice"]).await;

        let all = ledger
            .list_elections(&ElectionFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second, first]);

        let filter = ElectionFilter {
            phase: Some(Phase::Active),
            ..Default::default()
        };
        let active: Vec<_> = ledger
            .list_elections(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(active, vec![second]);

        let filter = ElectionFilter {
            search: Some("BOARD".to_string()),
            administrator: Some(root()),
            ..Default::default()
        };
        assert_eq!(ledger.list_elections(&filter).await.unwrap().len(), 2);

        let filter = ElectionFilter {
            election_type: Some(ElectionType::Presidential),
            ..Default::default()
        };
        assert!(ledger.list_elections(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_election() {
        let (ledger, _clock) = ledger();
        assert!(matches!(
            ledger.get_election(42).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.get_audit_log(42).await,
            Err(Error::NotFound(_))
        ));
    }
}
