pub mod audit;
pub mod candidate;
pub mod common;
pub mod election;
pub mod mongodb;
pub mod tally;
pub mod vote;
pub mod voter;
