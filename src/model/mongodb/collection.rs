use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    audit::{AuditEntry, AuditHead},
    election::Election,
    tally::CandidateTotal,
    vote::VoteRecord,
    voter::VoterRegistration,
};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for VoteRecord {
    const NAME: &'static str = "votes";
}

impl MongoCollection for CandidateTotal {
    const NAME: &'static str = "candidate_totals";
}

impl MongoCollection for VoterRegistration {
    const NAME: &'static str = "voters";
}

impl MongoCollection for AuditEntry {
    const NAME: &'static str = "audit_log";
}

impl MongoCollection for AuditHead {
    const NAME: &'static str = "audit_heads";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Election collection: an external reference belongs to one election.
    let external_ref_index = IndexModel::builder()
        .keys(doc! {"external_ref": 1})
        .options(IndexOptions::builder().unique(true).sparse(true).build())
        .build();
    Coll::<Election>::from_db(db)
        .create_index(external_ref_index, None)
        .await?;

    // Vote collection: one vote per voter, one vote per ledger confirmation.
    let votes = Coll::<VoteRecord>::from_db(db);
    let voter_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique.clone())
        .build();
    votes.create_index(voter_index, None).await?;
    let confirmation_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "external_ref": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"external_ref": {"$exists": true}})
                .build(),
        )
        .build();
    votes.create_index(confirmation_index, None).await?;

    // Candidate totals collection.
    let totals_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .options(unique.clone())
        .build();
    Coll::<CandidateTotal>::from_db(db)
        .create_index(totals_index, None)
        .await?;

    // Voter collection: one registration per voter.
    let registration_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<VoterRegistration>::from_db(db)
        .create_index(registration_index, None)
        .await?;

    // Audit collection.
    let audit_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "seq": 1})
        .options(unique)
        .build();
    Coll::<AuditEntry>::from_db(db)
        .create_index(audit_index, None)
        .await?;

    Ok(())
}
