use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Stored states in the election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionStatus {
    /// Under construction, roster and schedule freely editable.
    Draft,
    /// Deployed to the external ledger, waiting for the start time.
    Scheduled,
    /// Accepting votes.
    Active,
    /// Voting closed, results frozen.
    Ended,
    /// Withdrawn before voting started.
    Cancelled,
}

impl From<ElectionStatus> for Bson {
    fn from(status: ElectionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What operations are currently legal on an election.
///
/// Unlike [`ElectionStatus`], the phase is never stored: it is recomputed from
/// the clock every time it is needed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Draft,
    Upcoming,
    Active,
    Ended,
    Cancelled,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The phase clock.
///
/// `draft`, `cancelled` and `ended` are explicit overrides; for `scheduled` and
/// `active` elections the phase is derived purely from the time window, which
/// is inclusive at both ends.
pub fn phase_at(
    now: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: ElectionStatus,
) -> Phase {
    match status {
        ElectionStatus::Draft => Phase::Draft,
        ElectionStatus::Cancelled => Phase::Cancelled,
        ElectionStatus::Ended => Phase::Ended,
        ElectionStatus::Scheduled | ElectionStatus::Active => {
            if now < start_time {
                Phase::Upcoming
            } else if now <= end_time {
                Phase::Active
            } else {
                Phase::Ended
            }
        }
    }
}
