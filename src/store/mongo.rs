use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson, Document},
    error::{Error as DbError, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOptions, ReadConcern, TransactionOptions, UpdateOptions},
    Client, ClientSession, Database,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    audit::{Actor, AuditEntry, AuditHead, NewAuditEntry, GENESIS_HASH},
    common::election::{ElectionId, ElectionStatus, ExternalRef, VoterId},
    election::Election,
    mongodb::{
        ensure_indexes_exist, is_duplicate_key_error, is_transient_transaction_error, Coll,
        Counter, ELECTION_ID_COUNTER_ID,
    },
    tally::{CandidateTotal, Recount, Tally},
    vote::{VoteInsert, VoteRecord},
    voter::VoterRegistration,
};

use super::LedgerStore;

/// A store backed by MongoDB.
///
/// Multi-document writes run in transactions, so the server must be a replica
/// set or sharded cluster. Uniqueness is enforced by the indexes created in
/// [`ensure_indexes_exist`].
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
    elections: Coll<Election>,
    votes: Coll<VoteRecord>,
    totals: Coll<CandidateTotal>,
    voters: Coll<VoterRegistration>,
    audit: Coll<AuditEntry>,
    audit_heads: Coll<AuditHead>,
    counters: Coll<Counter>,
}

fn id_filter(id: ElectionId) -> Document {
    doc! { "_id": i64::from(id) }
}

fn election_filter(id: ElectionId) -> Document {
    doc! { "election_id": i64::from(id) }
}

/// Map errors the server marks as retryable onto [`Error::StorageConflict`].
fn conflict_aware(err: Error) -> Error {
    match err {
        Error::Db(err) if is_transient_transaction_error(&err) => {
            Error::StorageConflict(err.to_string())
        }
        err => err,
    }
}

impl MongoStore {
    /// Connect to the configured database and make sure its indexes exist.
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = Client::with_uri_str(config.db_uri()).await?;
        let db = client.database(config.db_name());
        let store = Self::from_client(client, db);
        ensure_indexes_exist(&store.db).await?;
        info!("Connected to database '{}'", config.db_name());
        Ok(store)
    }

    pub fn from_client(client: Client, db: Database) -> Self {
        Self {
            elections: Coll::from_db(&db),
            votes: Coll::from_db(&db),
            totals: Coll::from_db(&db),
            voters: Coll::from_db(&db),
            audit: Coll::from_db(&db),
            audit_heads: Coll::from_db(&db),
            counters: Coll::from_db(&db),
            client,
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn begin(&self) -> Result<ClientSession> {
        self.begin_with(None).await
    }

    async fn begin_with(
        &self,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<ClientSession> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(options).await?;
        Ok(session)
    }

    /// Commit the transaction if `result` is a success, otherwise abort it.
    async fn finish<T>(&self, mut session: ClientSession, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => loop {
                match session.commit_transaction().await {
                    Ok(()) => return Ok(value),
                    Err(err) if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => {
                        debug!("Retrying commit with unknown result: {err}");
                    }
                    Err(err) => return Err(conflict_aware(err.into())),
                }
            },
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    debug!("Failed to abort transaction: {abort_err}");
                }
                Err(conflict_aware(err))
            }
        }
    }

    /// Append an audit entry inside the session's transaction.
    async fn append_in(
        &self,
        session: &mut ClientSession,
        election: ElectionId,
        entry: NewAuditEntry,
    ) -> Result<AuditEntry> {
        let head = self
            .audit_heads
            .find_one_with_session(id_filter(election), None, session)
            .await?;
        let sealed = match head {
            Some(head) => {
                let sealed = entry.seal(election, head.seq + 1, &head.hash);
                let filter = doc! { "_id": i64::from(election), "seq": head.seq as i64 };
                let update = doc! {
                    "$set": { "seq": sealed.seq as i64, "hash": sealed.hash.as_str() }
                };
                let moved = self
                    .audit_heads
                    .update_one_with_session(filter, update, None, session)
                    .await?;
                if moved.matched_count != 1 {
                    return Err(Error::StorageConflict(format!(
                        "audit chain of election {election} moved"
                    )));
                }
                sealed
            }
            None => {
                let sealed = entry.seal(election, 1, GENESIS_HASH);
                let head = AuditHead {
                    election_id: election,
                    seq: sealed.seq,
                    hash: sealed.hash.clone(),
                };
                match self
                    .audit_heads
                    .insert_one_with_session(&head, None, session)
                    .await
                {
                    Ok(_) => {}
                    Err(err) if is_duplicate_key_error(&err) => {
                        return Err(Error::StorageConflict(format!(
                            "audit chain of election {election} moved"
                        )));
                    }
                    Err(err) => return Err(err.into()),
                }
                sealed
            }
        };
        self.audit
            .insert_one_with_session(&sealed, None, session)
            .await?;
        Ok(sealed)
    }

    async fn insert_election_in(
        &self,
        session: &mut ClientSession,
        election: &Election,
        audit: NewAuditEntry,
    ) -> Result<()> {
        if let Err(err) = self
            .elections
            .insert_one_with_session(election, None, session)
            .await
        {
            return Err(election_write_error(election, err));
        }
        self.append_in(session, election.id, audit).await?;
        Ok(())
    }

    async fn update_election_in(
        &self,
        session: &mut ClientSession,
        election: &Election,
        audit: Vec<NewAuditEntry>,
    ) -> Result<Election> {
        let mut stored = election.clone();
        stored.revision += 1;
        let filter = doc! {
            "_id": i64::from(election.id),
            "revision": election.revision as i64,
        };
        let replaced = match self
            .elections
            .replace_one_with_session(filter, &stored, None, session)
            .await
        {
            Ok(replaced) => replaced,
            Err(err) => return Err(election_write_error(election, err)),
        };
        if replaced.matched_count != 1 {
            return Err(Error::StorageConflict(format!(
                "election {} is no longer at revision {}",
                election.id, election.revision
            )));
        }
        for entry in audit {
            self.append_in(session, election.id, entry).await?;
        }
        Ok(stored)
    }

    async fn insert_vote_in(
        &self,
        session: &mut ClientSession,
        vote: &VoteRecord,
        audit: NewAuditEntry,
    ) -> Result<()> {
        self.votes
            .insert_one_with_session(vote, None, session)
            .await?;
        let filter = doc! {
            "election_id": i64::from(vote.election_id),
            "candidate_id": vote.candidate_id.as_str(),
        };
        let update = doc! { "$inc": { "count": 1_i64 } };
        let upsert = UpdateOptions::builder().upsert(true).build();
        self.totals
            .update_one_with_session(filter, update, upsert, session)
            .await?;
        self.append_in(session, vote.election_id, audit).await?;
        Ok(())
    }

    /// Recount inside a snapshot transaction.
    ///
    /// A correction appends to the audit chain, whose head every admission
    /// also writes, so a vote committed after the snapshot was taken makes
    /// the commit fail with a write conflict instead of being lost.
    async fn recount_tally_in(
        &self,
        session: &mut ClientSession,
        election: ElectionId,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Recount> {
        let mut tally = Tally::default();
        let mut votes = self
            .votes
            .find_with_session(election_filter(election), None, session)
            .await?;
        while let Some(vote) = votes.next(session).await {
            tally.apply_vote(&vote?.candidate_id);
        }
        let mut stored = Vec::new();
        let mut totals = self
            .totals
            .find_with_session(election_filter(election), None, session)
            .await?;
        while let Some(total) = totals.next(session).await {
            stored.push(total?);
        }
        let recount = Recount {
            previous: Tally::from_totals(stored),
            tally,
        };
        if !recount.drifted() {
            return Ok(recount);
        }

        self.totals
            .delete_many_with_session(election_filter(election), None, session)
            .await?;
        let totals = recount.tally.totals(election);
        if !totals.is_empty() {
            self.totals
                .insert_many_with_session(totals, None, session)
                .await?;
        }
        self.append_in(session, election, recount.audit_entry(actor, at))
            .await?;
        Ok(recount)
    }

    async fn insert_voter_in(
        &self,
        session: &mut ClientSession,
        registration: &VoterRegistration,
        audit: NewAuditEntry,
    ) -> Result<()> {
        self.voters
            .insert_one_with_session(registration, None, session)
            .await?;
        self.append_in(session, registration.election_id, audit)
            .await?;
        Ok(())
    }

    async fn mark_voter_verified_in(
        &self,
        session: &mut ClientSession,
        election: ElectionId,
        voter: &VoterId,
        at: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool> {
        let filter = doc! {
            "election_id": i64::from(election),
            "voter_id": voter.as_str(),
            "verified_at": { "$exists": false },
        };
        let at = to_bson(&at).expect("Serialisation is infallible");
        let update = doc! { "$set": { "verified_at": at } };
        let marked = self
            .voters
            .update_one_with_session(filter, update, None, session)
            .await?;
        if marked.modified_count != 1 {
            return Ok(false);
        }
        self.append_in(session, election, audit).await?;
        Ok(true)
    }

    /// Find the record that made a vote insertion fail with a duplicate key.
    async fn existing_vote(&self, vote: &VoteRecord) -> Result<VoteInsert> {
        if let Some(external_ref) = &vote.external_ref {
            if let Some(existing) = self
                .vote_by_external_ref(vote.election_id, external_ref)
                .await?
            {
                return Ok(VoteInsert::Replay(existing));
            }
        }
        match self.vote_by_voter(vote.election_id, &vote.voter_id).await? {
            Some(existing) => Ok(VoteInsert::VoterTaken(existing)),
            // The conflicting record must have been inside a transaction that
            // has since aborted.
            None => Err(Error::StorageConflict(format!(
                "vote of {} in election {} raced another write",
                vote.voter_id, vote.election_id
            ))),
        }
    }
}

fn election_write_error(election: &Election, err: DbError) -> Error {
    match &election.external_ref {
        Some(external_ref) if is_duplicate_key_error(&err) => {
            Error::ExternalRefInUse(external_ref.clone())
        }
        _ => err.into(),
    }
}

#[async_trait]
impl LedgerStore for MongoStore {
    async fn next_election_id(&self) -> Result<ElectionId> {
        let next = Counter::next(&self.counters, ELECTION_ID_COUNTER_ID).await?;
        ElectionId::try_from(next)
            .map_err(|_| Error::InvalidElection(format!("election ID {next} is out of range")))
    }

    async fn insert_election(&self, election: &Election, audit: NewAuditEntry) -> Result<()> {
        let mut session = self.begin().await?;
        let result = self.insert_election_in(&mut session, election, audit).await;
        self.finish(session, result).await
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.elections.find_one(id_filter(id), None).await?)
    }

    async fn election_by_external_ref(
        &self,
        external_ref: &ExternalRef,
    ) -> Result<Option<Election>> {
        let filter = doc! { "external_ref": external_ref.as_str() };
        Ok(self.elections.find_one(filter, None).await?)
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        let sort = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self.elections.find(None, sort).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn elections_in(&self, statuses: &[ElectionStatus]) -> Result<Vec<Election>> {
        let statuses: Vec<Bson> = statuses.iter().copied().map(Bson::from).collect();
        let filter = doc! { "status": { "$in": statuses } };
        let sort = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self.elections.find(filter, sort).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_election(
        &self,
        election: &Election,
        audit: Vec<NewAuditEntry>,
    ) -> Result<Election> {
        let mut session = self.begin().await?;
        let result = self.update_election_in(&mut session, election, audit).await;
        self.finish(session, result).await
    }

    async fn insert_vote(&self, vote: &VoteRecord, audit: NewAuditEntry) -> Result<VoteInsert> {
        let mut session = self.begin().await?;
        let result = self.insert_vote_in(&mut session, vote, audit).await;
        match result {
            Err(Error::Db(err)) if is_duplicate_key_error(&err) => {
                // Either the voter or the confirmation is already recorded.
                self.finish::<()>(session, Err(Error::Db(err))).await.ok();
                self.existing_vote(vote).await
            }
            result => {
                self.finish(session, result).await?;
                Ok(VoteInsert::Inserted(vote.clone()))
            }
        }
    }

    async fn vote_by_voter(
        &self,
        election: ElectionId,
        voter: &VoterId,
    ) -> Result<Option<VoteRecord>> {
        let filter = doc! { "election_id": i64::from(election), "voter_id": voter.as_str() };
        Ok(self.votes.find_one(filter, None).await?)
    }

    async fn vote_by_external_ref(
        &self,
        election: ElectionId,
        external_ref: &ExternalRef,
    ) -> Result<Option<VoteRecord>> {
        let filter = doc! {
            "election_id": i64::from(election),
            "external_ref": external_ref.as_str(),
        };
        Ok(self.votes.find_one(filter, None).await?)
    }

    async fn votes(&self, election: ElectionId) -> Result<Vec<VoteRecord>> {
        // Object IDs grow with insertion time.
        let sort = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self.votes.find(election_filter(election), sort).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn tally(&self, election: ElectionId) -> Result<Tally> {
        let cursor = self.totals.find(election_filter(election), None).await?;
        let totals: Vec<CandidateTotal> = cursor.try_collect().await?;
        Ok(Tally::from_totals(totals))
    }

    async fn recount_tally(
        &self,
        election: ElectionId,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Recount> {
        let snapshot = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .build();
        let mut session = self.begin_with(snapshot).await?;
        let result = self
            .recount_tally_in(&mut session, election, actor, at)
            .await;
        self.finish(session, result).await
    }

    async fn insert_voter(
        &self,
        registration: &VoterRegistration,
        audit: NewAuditEntry,
    ) -> Result<bool> {
        let mut session = self.begin().await?;
        let result = self
            .insert_voter_in(&mut session, registration, audit)
            .await;
        match result {
            Err(Error::Db(err)) if is_duplicate_key_error(&err) => {
                self.finish::<()>(session, Err(Error::Db(err))).await.ok();
                Ok(false)
            }
            result => {
                self.finish(session, result).await?;
                Ok(true)
            }
        }
    }

    async fn voter(
        &self,
        election: ElectionId,
        voter: &VoterId,
    ) -> Result<Option<VoterRegistration>> {
        let filter = doc! { "election_id": i64::from(election), "voter_id": voter.as_str() };
        Ok(self.voters.find_one(filter, None).await?)
    }

    async fn mark_voter_verified(
        &self,
        election: ElectionId,
        voter: &VoterId,
        at: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool> {
        let mut session = self.begin().await?;
        let result = self
            .mark_voter_verified_in(&mut session, election, voter, at, audit)
            .await;
        self.finish(session, result).await
    }

    async fn append_audit(
        &self,
        election: ElectionId,
        audit: NewAuditEntry,
    ) -> Result<AuditEntry> {
        let mut session = self.begin().await?;
        let result = self.append_in(&mut session, election, audit).await;
        self.finish(session, result).await
    }

    async fn audit_log(&self, election: ElectionId) -> Result<Vec<AuditEntry>> {
        let sort = FindOptions::builder().sort(doc! { "seq": 1 }).build();
        let cursor = self.audit.find(election_filter(election), sort).await?;
        Ok(cursor.try_collect().await?)
    }
}
