//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content catalog entry, shared by every queue entry with the same URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Song {
    /// Canonical URL (catalog key)
    pub url: String,
    pub title: String,
    /// Seconds
    pub duration: i64,
    pub thumbnail: String,
}

/// Queue row joined with its catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub user_id: String,
    /// 0-based among active entries; `-id` once dequeued
    pub position: i64,
    pub slug: String,
    pub queued_at: DateTime<Utc>,
    pub dequeued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub url: String,
    pub title: String,
    pub duration: i64,
    pub thumbnail: String,
}

impl QueueEntry {
    /// Active entries take part in position bookkeeping
    pub fn is_active(&self) -> bool {
        self.dequeued_at.is_none()
    }
}

/// Sentinel position for a dequeued entry; unique because ids are
pub fn dequeued_position(id: i64) -> i64 {
    -id
}
