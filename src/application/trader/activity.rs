use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// One line of the bot's activity feed, serialized as
/// `{ts, level, message, data}` with an RFC3339 UTC timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
    pub data: serde_json::Value,
}

/// Bounded ring of recent activity. Single writer (the owning scheduler
/// task), snapshot readers. Oldest entries are evicted past capacity; order
/// is always insertion order.
#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 100;

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: ActivityLevel, message: impl Into<String>, data: serde_json::Value) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ActivityEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        });
    }

    /// Last `limit` entries, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<ActivityEntry> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ring_evicts_oldest() {
        let mut log = ActivityLog::new(3);
        for i in 0..5 {
            log.push(ActivityLevel::Info, format!("entry {}", i), json!({}));
        }
        assert_eq!(log.len(), 3);
        let snapshot = log.snapshot(10);
        assert_eq!(snapshot[0].message, "entry 2");
        assert_eq!(snapshot[2].message, "entry 4");
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let mut log = ActivityLog::default();
        log.push(ActivityLevel::Info, "first", json!({}));
        log.push(ActivityLevel::Warning, "second", json!({"pnl": 1.5}));

        let snapshot = log.snapshot(2);
        assert_eq!(snapshot[0].message, "first");
        assert_eq!(snapshot[1].message, "second");
        assert!(snapshot[0].timestamp <= snapshot[1].timestamp);
    }

    #[test]
    fn test_snapshot_limit() {
        let mut log = ActivityLog::default();
        for i in 0..10 {
            log.push(ActivityLevel::Info, format!("entry {}", i), json!({}));
        }
        let snapshot = log.snapshot(4);
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[0].message, "entry 6");
    }

    #[test]
    fn test_entry_serialization_shape() {
        let mut log = ActivityLog::default();
        log.push(ActivityLevel::Success, "Position opened", json!({"price": 50000.0}));
        let entry = &log.snapshot(1)[0];
        let value = serde_json::to_value(entry).unwrap();
        assert!(value.get("ts").is_some());
        assert_eq!(value["level"], "success");
        assert_eq!(value["message"], "Position opened");
        assert_eq!(value["data"]["price"], 50000.0);
    }
}
