use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::model::{
    audit::{Actor, AuditEntry, NewAuditEntry, GENESIS_HASH},
    common::election::{ElectionId, ElectionStatus, ExternalRef, VoterId},
    election::Election,
    tally::{Recount, Tally},
    vote::{VoteInsert, VoteRecord},
    voter::VoterRegistration,
};

use super::LedgerStore;

/// Everything stored for one election, guarded by a single lock.
#[derive(Debug)]
struct Slot {
    election: Election,
    votes: Vec<VoteRecord>,
    by_voter: HashMap<VoterId, usize>,
    by_ref: HashMap<ExternalRef, usize>,
    tally: Tally,
    voters: HashMap<VoterId, VoterRegistration>,
    audit: Vec<AuditEntry>,
}

impl Slot {
    fn new(election: Election) -> Self {
        Self {
            election,
            votes: Vec::new(),
            by_voter: HashMap::new(),
            by_ref: HashMap::new(),
            tally: Tally::default(),
            voters: HashMap::new(),
            audit: Vec::new(),
        }
    }

    fn append(&mut self, entry: NewAuditEntry) -> AuditEntry {
        let prev_hash = self
            .audit
            .last()
            .map_or(GENESIS_HASH, |last| last.hash.as_str())
            .to_string();
        let seq = self.audit.len() as u64 + 1;
        let sealed = entry.seal(self.election.id, seq, &prev_hash);
        self.audit.push(sealed.clone());
        sealed
    }
}

/// An in-process store.
///
/// Each election lives behind its own mutex, so operations on one election
/// are serialised while different elections proceed in parallel. Lock order
/// is election map, then election slot, then the external reference index.
#[derive(Debug)]
pub struct MemoryStore {
    next_id: AtomicU32,
    elections: RwLock<BTreeMap<ElectionId, Arc<Mutex<Slot>>>>,
    external_refs: Mutex<HashMap<ExternalRef, ElectionId>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            elections: RwLock::default(),
            external_refs: Mutex::default(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: ElectionId) -> Result<Arc<Mutex<Slot>>> {
        self.elections
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::election_not_found(id))
    }

    async fn slots(&self) -> Vec<Arc<Mutex<Slot>>> {
        self.elections.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn next_election_id(&self) -> Result<ElectionId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn insert_election(&self, election: &Election, audit: NewAuditEntry) -> Result<()> {
        let mut elections = self.elections.write().await;
        if elections.contains_key(&election.id) {
            return Err(Error::StorageConflict(format!(
                "election {} already exists",
                election.id
            )));
        }
        if let Some(external_ref) = &election.external_ref {
            let mut index = self.external_refs.lock().await;
            if index.contains_key(external_ref) {
                return Err(Error::ExternalRefInUse(external_ref.clone()));
            }
            index.insert(external_ref.clone(), election.id);
        }
        let mut slot = Slot::new(election.clone());
        slot.append(audit);
        elections.insert(election.id, Arc::new(Mutex::new(slot)));
        Ok(())
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        match self.slot(id).await {
            Ok(slot) => Ok(Some(slot.lock().await.election.clone())),
            Err(Error::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn election_by_external_ref(
        &self,
        external_ref: &ExternalRef,
    ) -> Result<Option<Election>> {
        let id = self.external_refs.lock().await.get(external_ref).copied();
        match id {
            Some(id) => self.election(id).await,
            None => Ok(None),
        }
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        let mut elections = Vec::new();
        for slot in self.slots().await {
            elections.push(slot.lock().await.election.clone());
        }
        Ok(elections)
    }

    async fn elections_in(&self, statuses: &[ElectionStatus]) -> Result<Vec<Election>> {
        let mut elections = self.elections().await?;
        elections.retain(|election| statuses.contains(&election.status));
        Ok(elections)
    }

    async fn update_election(
        &self,
        election: &Election,
        audit: Vec<NewAuditEntry>,
    ) -> Result<Election> {
        let slot = self.slot(election.id).await?;
        let mut slot = slot.lock().await;
        if slot.election.revision != election.revision {
            return Err(Error::StorageConflict(format!(
                "election {} is at revision {}, not {}",
                election.id, slot.election.revision, election.revision
            )));
        }

        if election.external_ref != slot.election.external_ref {
            let mut index = self.external_refs.lock().await;
            if let Some(new_ref) = &election.external_ref {
                match index.get(new_ref) {
                    Some(owner) if *owner != election.id => {
                        return Err(Error::ExternalRefInUse(new_ref.clone()));
                    }
                    _ => {
                        index.insert(new_ref.clone(), election.id);
                    }
                }
            }
            if let Some(old_ref) = &slot.election.external_ref {
                index.remove(old_ref);
            }
        }

        let mut stored = election.clone();
        stored.revision += 1;
        slot.election = stored.clone();
        for entry in audit {
            slot.append(entry);
        }
        Ok(stored)
    }

    async fn insert_vote(&self, vote: &VoteRecord, audit: NewAuditEntry) -> Result<VoteInsert> {
        let slot = self.slot(vote.election_id).await?;
        let mut slot = slot.lock().await;

        if let Some(index) = vote
            .external_ref
            .as_ref()
            .and_then(|external_ref| slot.by_ref.get(external_ref))
        {
            return Ok(VoteInsert::Replay(slot.votes[*index].clone()));
        }
        if let Some(index) = slot.by_voter.get(&vote.voter_id) {
            return Ok(VoteInsert::VoterTaken(slot.votes[*index].clone()));
        }

        let index = slot.votes.len();
        slot.votes.push(vote.clone());
        slot.by_voter.insert(vote.voter_id.clone(), index);
        if let Some(external_ref) = &vote.external_ref {
            slot.by_ref.insert(external_ref.clone(), index);
        }
        slot.tally.apply_vote(&vote.candidate_id);
        slot.append(audit);
        Ok(VoteInsert::Inserted(vote.clone()))
    }

    async fn vote_by_voter(
        &self,
        election: ElectionId,
        voter: &VoterId,
    ) -> Result<Option<VoteRecord>> {
        let slot = self.slot(election).await?;
        let slot = slot.lock().await;
        Ok(slot
            .by_voter
            .get(voter)
            .map(|index| slot.votes[*index].clone()))
    }

    async fn vote_by_external_ref(
        &self,
        election: ElectionId,
        external_ref: &ExternalRef,
    ) -> Result<Option<VoteRecord>> {
        let slot = self.slot(election).await?;
        let slot = slot.lock().await;
        Ok(slot
            .by_ref
            .get(external_ref)
            .map(|index| slot.votes[*index].clone()))
    }

    async fn votes(&self, election: ElectionId) -> Result<Vec<VoteRecord>> {
        let slot = self.slot(election).await?;
        let votes = slot.lock().await.votes.clone();
        Ok(votes)
    }

    async fn tally(&self, election: ElectionId) -> Result<Tally> {
        let slot = self.slot(election).await?;
        let tally = slot.lock().await.tally.clone();
        Ok(tally)
    }

    async fn recount_tally(
        &self,
        election: ElectionId,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Recount> {
        let slot = self.slot(election).await?;
        let mut slot = slot.lock().await;
        let recount = Recount {
            previous: slot.tally.clone(),
            tally: Tally::from_votes(&slot.votes),
        };
        if recount.drifted() {
            slot.tally = recount.tally.clone();
            slot.append(recount.audit_entry(actor, at));
        }
        Ok(recount)
    }

    async fn insert_voter(
        &self,
        registration: &VoterRegistration,
        audit: NewAuditEntry,
    ) -> Result<bool> {
        let slot = self.slot(registration.election_id).await?;
        let mut slot = slot.lock().await;
        if slot.voters.contains_key(&registration.voter_id) {
            return Ok(false);
        }
        slot.voters
            .insert(registration.voter_id.clone(), registration.clone());
        slot.append(audit);
        Ok(true)
    }

    async fn voter(
        &self,
        election: ElectionId,
        voter: &VoterId,
    ) -> Result<Option<VoterRegistration>> {
        let slot = self.slot(election).await?;
        let registration = slot.lock().await.voters.get(voter).cloned();
        Ok(registration)
    }

    async fn mark_voter_verified(
        &self,
        election: ElectionId,
        voter: &VoterId,
        at: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool> {
        let slot = self.slot(election).await?;
        let mut slot = slot.lock().await;
        match slot.voters.get_mut(voter) {
            Some(registration) if !registration.is_verified() => {
                registration.verified_at = Some(at);
            }
            _ => return Ok(false),
        }
        slot.append(audit);
        Ok(true)
    }

    async fn append_audit(
        &self,
        election: ElectionId,
        audit: NewAuditEntry,
    ) -> Result<AuditEntry> {
        let slot = self.slot(election).await?;
        let mut slot = slot.lock().await;
        Ok(slot.append(audit))
    }

    async fn audit_log(&self, election: ElectionId) -> Result<Vec<AuditEntry>> {
        let slot = self.slot(election).await?;
        let audit = slot.lock().await.audit.clone();
        Ok(audit)
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Overwrite the stored counters without touching the vote records.
    pub(crate) async fn overwrite_tally(&self, election: ElectionId, tally: Tally) -> Result<()> {
        let slot = self.slot(election).await?;
        slot.lock().await.tally = tally;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use mongodb::bson::doc;

    use crate::model::{
        audit::{verify_chain, Actor, AuditAction},
        election::ElectionSpec,
    };

    fn entry(action: AuditAction) -> NewAuditEntry {
        NewAuditEntry::new(action, Actor::PhaseClock, Utc::now(), doc! {})
    }

    async fn store_with_election() -> (MemoryStore, Election) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let id = store.next_election_id().await.unwrap();
        let election = Election::new(id, ElectionSpec::example(now), "root".into(), now);
        store
            .insert_election(&election, entry(AuditAction::ElectionCreated))
            .await
            .unwrap();
        (store, election)
    }

    fn vote(voter: &str, candidate: &str, external_ref: Option<&str>) -> VoteRecord {
        VoteRecord {
            election_id: 1,
            voter_id: voter.into(),
            candidate_id: candidate.into(),
            external_ref: external_ref.map(ExternalRef::from),
            cast_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let store = MemoryStore::new();
        assert_eq!(store.next_election_id().await.unwrap(), 1);
        assert_eq!(store.next_election_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let (store, election) = store_with_election().await;

        let mut edited = election.clone();
        edited.title = "Renamed".to_string();
        let stored = store.update_election(&edited, vec![]).await.unwrap();
        assert_eq!(stored.revision, 1);

        // Still at revision 0.
        let result = store.update_election(&edited, vec![]).await;
        assert!(matches!(result, Err(Error::StorageConflict(_))));

        let current = store.election(election.id).await.unwrap().unwrap();
        assert_eq!(current.title, "Renamed");
        assert_eq!(current.revision, 1);
    }

    #[tokio::test]
    async fn external_refs_are_unique() {
        let (store, election) = store_with_election().await;
        let now = Utc::now();
        let other_id = store.next_election_id().await.unwrap();
        let other = Election::new(other_id, ElectionSpec::example(now), "root".into(), now);
        store
            .insert_election(&other, entry(AuditAction::ElectionCreated))
            .await
            .unwrap();

        let mut deployed = election.clone();
        deployed.external_ref = Some("0xabc".into());
        store.update_election(&deployed, vec![]).await.unwrap();

        let mut clash = other.clone();
        clash.external_ref = Some("0xabc".into());
        let result = store.update_election(&clash, vec![]).await;
        assert!(matches!(result, Err(Error::ExternalRefInUse(_))));

        let found = store
            .election_by_external_ref(&"0xabc".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, election.id);
    }

    #[tokio::test]
    async fn replay_is_checked_before_voter() {
        let (store, _) = store_with_election().await;

        let first = vote("v1", "alice", Some("tx1"));
        let inserted = store
            .insert_vote(&first, entry(AuditAction::VoteCast))
            .await
            .unwrap();
        assert_eq!(inserted, VoteInsert::Inserted(first.clone()));

        let replay = vote("v1", "alice", Some("tx1"));
        let result = store
            .insert_vote(&replay, entry(AuditAction::VoteCast))
            .await
            .unwrap();
        assert_eq!(result, VoteInsert::Replay(first.clone()));

        let second = vote("v1", "bob", Some("tx2"));
        let result = store
            .insert_vote(&second, entry(AuditAction::VoteCast))
            .await
            .unwrap();
        assert_eq!(result, VoteInsert::VoterTaken(first));

        let tally = store.tally(1).await.unwrap();
        assert_eq!(tally.total, 1);
        assert_eq!(tally.count(&"alice".into()), 1);

        // Creation plus one vote.
        let audit = store.audit_log(1).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(verify_chain(&audit), Ok(()));
    }

    #[tokio::test]
    async fn recount_repairs_drift() {
        let (store, _) = store_with_election().await;
        for (voter, candidate) in [("v1", "alice"), ("v2", "bob")] {
            store
                .insert_vote(&vote(voter, candidate, None), entry(AuditAction::VoteCast))
                .await
                .unwrap();
        }

        let recount = store
            .recount_tally(1, Actor::PhaseClock, Utc::now())
            .await
            .unwrap();
        assert!(!recount.drifted());
        assert_eq!(store.audit_log(1).await.unwrap().len(), 3);

        store.overwrite_tally(1, Tally::default()).await.unwrap();
        let recount = store
            .recount_tally(1, Actor::PhaseClock, Utc::now())
            .await
            .unwrap();
        assert!(recount.drifted());
        assert_eq!(recount.previous.total, 0);
        assert_eq!(store.tally(1).await.unwrap(), recount.tally);
        let audit = store.audit_log(1).await.unwrap();
        assert_eq!(audit.last().unwrap().action, AuditAction::TallyRecomputed);
        assert_eq!(verify_chain(&audit), Ok(()));
    }

    #[tokio::test]
    async fn voters_register_and_verify_once() {
        let (store, _) = store_with_election().await;
        let registration = VoterRegistration::new(1, "v1".into(), Utc::now());
        assert!(store
            .insert_voter(&registration, entry(AuditAction::VoterRegistered))
            .await
            .unwrap());
        assert!(!store
            .insert_voter(&registration, entry(AuditAction::VoterRegistered))
            .await
            .unwrap());

        let at = Utc::now();
        assert!(store
            .mark_voter_verified(1, &"v1".into(), at, entry(AuditAction::VoterVerified))
            .await
            .unwrap());
        assert!(!store
            .mark_voter_verified(1, &"v1".into(), at, entry(AuditAction::VoterVerified))
            .await
            .unwrap());
        assert!(!store
            .mark_voter_verified(1, &"v2".into(), at, entry(AuditAction::VoterVerified))
            .await
            .unwrap());

        let stored = store.voter(1, &"v1".into()).await.unwrap().unwrap();
        assert_eq!(stored.verified_at, Some(at));
        assert_eq!(store.voter(1, &"v2".into()).await.unwrap(), None);
        // Creation, registration and verification.
        assert_eq!(store.audit_log(1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_election() {
        let store = MemoryStore::new();
        assert_eq!(store.election(9).await.unwrap(), None);
        let result = store.tally(9).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
