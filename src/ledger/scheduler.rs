use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::{future::BoxFuture, FutureExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{
    common::election::{ElectionId, ElectionStatus, Phase},
    election::Election,
};
use crate::scheduled_task::ScheduledTask;
use crate::store::LedgerStore;

use super::{Clock, Ledger};

/// A pending transition, tagged with the generation that scheduled it.
struct Pending {
    generation: u64,
    task: ScheduledTask<()>,
}

type TaskMap = HashMap<ElectionId, Pending>;

/// Drives clock-triggered phase transitions.
///
/// Each open election has at most one pending task, due at its next
/// boundary: the start of voting, then just after the end. Once a task has
/// advanced its election it schedules the following boundary itself. A
/// failed transition is retried after `retry_interval`.
pub struct PhaseScheduler<S, C> {
    ledger: Arc<Ledger<S, C>>,
    tasks: Arc<Mutex<TaskMap>>,
    generation: Arc<AtomicU64>,
    retry_interval: Duration,
}

impl<S, C> Clone for PhaseScheduler<S, C> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            tasks: self.tasks.clone(),
            generation: self.generation.clone(),
            retry_interval: self.retry_interval,
        }
    }
}

/// When an election next needs [`Ledger::advance`], if ever.
fn next_boundary(election: &Election, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match (election.status, election.phase(now)) {
        (ElectionStatus::Scheduled, Phase::Upcoming) => Some(election.start_time),
        // Overdue: the window opened or closed while nobody was watching.
        (ElectionStatus::Scheduled, Phase::Active | Phase::Ended)
        | (ElectionStatus::Active, Phase::Ended) => Some(now),
        (ElectionStatus::Active, Phase::Active) => {
            Some(election.end_time + Duration::milliseconds(1))
        }
        _ => None,
    }
}

impl<S, C> PhaseScheduler<S, C>
where
    S: LedgerStore + 'static,
    C: Clock + 'static,
{
    pub fn new(ledger: Arc<Ledger<S, C>>, retry_interval: Duration) -> Self {
        Self {
            ledger,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            retry_interval,
        }
    }

    /// Does the election have a pending transition?
    pub async fn has_task(&self, id: ElectionId) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    /// When the election's pending transition is due.
    pub async fn due_at(&self, id: ElectionId) -> Option<DateTime<Utc>> {
        self.tasks
            .lock()
            .await
            .get(&id)
            .map(|pending| pending.task.run_at())
    }

    /// Schedule every scheduled or active election. Elections whose pending
    /// task is already due at the right time are left alone.
    pub async fn schedule_elections(&self) -> Result<usize> {
        let elections = self
            .ledger
            .store()
            .elections_in(&[ElectionStatus::Scheduled, ElectionStatus::Active])
            .await?;
        let mut scheduled = 0;
        for election in elections {
            if self.schedule(&election).await {
                scheduled += 1;
            }
        }
        debug!("{scheduled} phase transitions (re)scheduled");
        Ok(scheduled)
    }

    /// Schedule the next transition of an election, replacing any pending one.
    pub async fn schedule_election(&self, id: ElectionId) -> Result<bool> {
        let election = self.ledger.load(id).await?;
        Ok(self.schedule(&election).await)
    }

    async fn schedule(&self, election: &Election) -> bool {
        let now = self.ledger.now();
        let due = next_boundary(election, now);
        let mut tasks = self.tasks.lock().await;
        if let (Some(pending), Some(due)) = (tasks.get(&election.id), due) {
            if pending.task.run_at() == due && !pending.task.is_finished() {
                return false;
            }
        }
        if let Some(old) = tasks.remove(&election.id) {
            old.task.cancel().await;
        }
        match due {
            Some(due) => {
                trace!("Election {} will advance at {due}", election.id);
                let pending = self.pending(election.id, due, now);
                tasks.insert(election.id, pending);
                true
            }
            None => false,
        }
    }

    fn pending(&self, id: ElectionId, due: DateTime<Utc>, now: DateTime<Utc>) -> Pending {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = ScheduledTask::new(self.clone().transition(id, generation), due, now);
        Pending { generation, task }
    }

    /// Run the election's pending transition now and wait for it.
    /// Returns false if nothing was pending.
    pub async fn trigger_now(&self, id: ElectionId) -> bool {
        let pending = self.tasks.lock().await.remove(&id);
        match pending {
            Some(pending) => {
                pending.task.trigger_now();
                if let Err(err) = pending.task.await {
                    error!("Phase transition task for election {id} failed to run: {err}");
                }
                true
            }
            None => false,
        }
    }

    /// Cancel a pending transition.
    pub async fn cancel(&self, id: ElectionId) -> bool {
        let pending = self.tasks.lock().await.remove(&id);
        match pending {
            Some(pending) => {
                pending.task.cancel().await;
                true
            }
            None => false,
        }
    }

    /// Cancel every pending transition.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        info!("Cancelling {} pending phase transitions", tasks.len());
        for (_, pending) in tasks.drain() {
            pending.task.cancel().await;
        }
    }

    fn transition(self, id: ElectionId, generation: u64) -> BoxFuture<'static, ()> {
        async move {
            let next = match self.ledger.advance(id).await {
                Ok(election) => next_boundary(&election, self.ledger.now()),
                Err(Error::NotFound(what)) => {
                    warn!("Dropping phase transition: {what} not found");
                    None
                }
                Err(err) => {
                    error!(
                        "Failed to advance election {id}, retrying in {}s: {err}",
                        self.retry_interval.num_seconds()
                    );
                    Some(self.ledger.now() + self.retry_interval)
                }
            };

            let mut tasks = self.tasks.lock().await;
            if tasks.get(&id).map(|pending| pending.generation) == Some(generation) {
                tasks.remove(&id);
            }
            // Someone else may have scheduled the election in the meantime.
            if let (Some(due), false) = (next, tasks.contains_key(&id)) {
                let pending = self.pending(id, due, self.ledger.now());
                tasks.insert(id, pending);
            }
        }
        .boxed()
    }
}
