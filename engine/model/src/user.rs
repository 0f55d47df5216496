use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounts {
    pub bets_made: u32,
    pub bets_successful: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub points: u64,
    pub stats: StatCounts,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: UserId, display_name: String, points: u64, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            display_name,
            points,
            stats: StatCounts::default(),
            active: true,
            joined_at,
        }
    }
}
