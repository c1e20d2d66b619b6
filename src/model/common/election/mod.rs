mod ids;
mod state;

pub use ids::{CandidateId, ExternalRef, UserId, VoterId};
pub use state::{phase_at, ElectionStatus, Phase};

/// Our election IDs are integers, allocated from a store counter.
pub type ElectionId = u32;
