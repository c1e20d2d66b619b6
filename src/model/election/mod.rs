mod administrator;
mod election_core;
mod spec;

pub use administrator::{AdminRole, Administrator};
pub use election_core::Election;
pub use spec::{
    Deployment, DeploymentTransaction, ElectionPatch, ElectionSpec, ElectionType, VotingConfig,
};
pub(crate) use spec::{validate_description, validate_title, validate_voting, validate_window};
