// Task entity

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// A single to-do entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable handle used for deletion
    pub id: Uuid,
    /// Free-form label
    pub task: String,
    /// Creation instant (milliseconds since epoch)
    pub timestamp: i64,
    /// Reserved; nothing in this crate toggles it
    pub completed: bool,
}

impl Task {
    /// Build a new task stamped with the current time
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_timestamp(text, now_ms())
    }

    /// Build a new task with an explicit creation time
    pub fn with_timestamp(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            task: text.into(),
            timestamp,
            completed: false,
        }
    }

    /// Creation time as a UTC datetime
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Creation time in local time, short date and medium time
    pub fn display_timestamp(&self) -> String {
        match self.created_at() {
            Some(dt) => dt.with_timezone(&Local).format("%Y/%m/%d %H:%M:%S").to_string(),
            None => format!("{}ms", self.timestamp),
        }
    }

    /// Observed-list ordering: timestamp ascending, then id
    pub fn display_order(a: &Task, b: &Task) -> Ordering {
        a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
    }
}

// Helper function for timestamps
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
