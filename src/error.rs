use figment::Error as ConfigError;
use mongodb::error::Error as DbError;
use thiserror::Error;

use crate::model::common::election::{CandidateId, ElectionId, ExternalRef, Phase, VoterId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cannot {operation} election {election} in phase {phase}")]
    InvalidPhase {
        election: ElectionId,
        phase: Phase,
        operation: &'static str,
    },
    #[error("Election {0} is locked: voting has started")]
    ElectionLocked(ElectionId),
    #[error("Election {0} is not accepting votes")]
    ElectionNotActive(ElectionId),
    #[error("Candidate {0} is already on the roster")]
    DuplicateCandidate(CandidateId),
    #[error("Candidate {0} is not on the roster")]
    UnknownCandidate(CandidateId),
    #[error("Voter {voter} has already voted in election {election}")]
    AlreadyVoted {
        election: ElectionId,
        voter: VoterId,
    },
    #[error("Voter {voter} is not registered for election {election}")]
    VoterNotRegistered {
        election: ElectionId,
        voter: VoterId,
    },
    #[error("Voter {voter} has not been verified for election {election}")]
    VoterNotVerified {
        election: ElectionId,
        voter: VoterId,
    },
    #[error("Election {0} has no candidates")]
    EmptyRoster(ElectionId),
    #[error("Election {0} is active and cannot be cancelled")]
    CannotCancelActiveElection(ElectionId),
    #[error("Invalid election: {0}")]
    InvalidElection(String),
    #[error("External reference {0} is already attached to another election")]
    ExternalRefInUse(ExternalRef),
    #[error("Results of election {0} are not available yet")]
    ResultsNotAvailable(ElectionId),
    #[error("Ledger fact does not belong to this election: {0}")]
    LedgerMismatch(String),
    #[error("Storage conflict: {0}")]
    StorageConflict(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Config(#[from] Box<ConfigError>),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn election_not_found(id: ElectionId) -> Self {
        Self::NotFound(format!("election {id}"))
    }

    /// Transient failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageConflict(_))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(Box::new(err))
    }
}
