//! An election vote ledger.
//!
//! Elections move through a clock-driven lifecycle, accept at most one vote
//! per voter, keep live tallies and an append-only, hash-chained audit trail,
//! and reconcile with an external ledger (a blockchain) that is the ultimate
//! source of truth. See [`ledger::Ledger`] for the operations.

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod store;
pub mod verify;

pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
