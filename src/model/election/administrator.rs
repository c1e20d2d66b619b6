use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::common::election::UserId;

/// The role an administrator holds on one election.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    #[default]
    Admin,
    Moderator,
    Observer,
}

impl AdminRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::Observer => "observer",
        }
    }
}

/// A user entitled to administer (or observe) an election.
/// The user itself lives in the surrounding application; only its id is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Administrator {
    pub user: UserId,
    pub role: AdminRole,
    pub added_at: DateTime<Utc>,
}
