use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::CallRecord;

/// One entry of the live call feed.
#[derive(Debug, Clone, Serialize)]
pub struct RecentCall {
    pub sequence_id: u64,
    pub endpoint_key: String,
    pub backend: Option<String>,
    pub context_tag: String,
    pub user: String,
    pub success: bool,
    pub status: Option<u16>,
    pub duration_nanos: u64,
    pub at: DateTime<Utc>,
    #[serde(skip)]
    seen: Instant,
}

/// Rolling window of the last few settled calls, newest first.
///
/// Entries fall out when the window is full or when they are older
/// than `max_age`, whichever comes first.
#[derive(Debug)]
pub struct RecentCalls {
    capacity: usize,
    max_age: Duration,
    entries: VecDeque<RecentCall>,
}

impl RecentCalls {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            capacity,
            max_age,
            entries: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn push(&mut self, record: &CallRecord) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(RecentCall {
            sequence_id: record.sequence_id,
            endpoint_key: record.endpoint_key.clone(),
            backend: record.backend.clone(),
            context_tag: record.context_tag.clone(),
            user: record.user.clone(),
            success: !record.outcome.is_error(),
            status: record.outcome.status(),
            duration_nanos: record.duration_nanos,
            at: Utc::now(),
            seen: Instant::now(),
        });
        self.entries.truncate(self.capacity);
    }

    /// Live entries, newest first. Expired ones are dropped on the way.
    pub fn snapshot(&mut self) -> Vec<RecentCall> {
        let now = Instant::now();
        // newest first, so everything past the first stale entry is stale too
        let live = self
            .entries
            .iter()
            .take_while(|e| now.saturating_duration_since(e.seen) <= self.max_age)
            .count();
        self.entries.truncate(live);
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{FailureKind, Outcome};

    fn rec(id: u64, outcome: Outcome) -> CallRecord {
        CallRecord {
            endpoint_key: "GET /api/positions".into(),
            backend: Some("SQLSERVER".into()),
            method: "GET".into(),
            start_time: Instant::now(),
            duration_nanos: 1_000_000,
            outcome,
            context_tag: "Dashboard".into(),
            user: "ana@desk".into(),
            sequence_id: id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_the_newest_ten() {
        let mut recent = RecentCalls::new(10, Duration::from_secs(5));
        for id in 1..=15 {
            recent.push(&rec(id, Outcome::Success(200)));
        }
        let ids: Vec<u64> = recent.snapshot().iter().map(|c| c.sequence_id).collect();
        assert_eq!(ids, (6..=15).rev().collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_max_age() {
        let mut recent = RecentCalls::new(10, Duration::from_secs(5));
        recent.push(&rec(1, Outcome::Failure(FailureKind::Status(502))));
        tokio::time::sleep(Duration::from_secs(3)).await;
        recent.push(&rec(2, Outcome::Success(200)));

        let feed = recent.snapshot();
        assert_eq!(feed.len(), 2);
        assert!(!feed[1].success);
        assert_eq!(feed[1].status, Some(502));
        assert_eq!(feed[0].backend.as_deref(), Some("SQLSERVER"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let feed = recent.snapshot();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].sequence_id, 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(recent.snapshot().is_empty());
    }
}
