use chrono::{DateTime, Duration, Utc};

/// Time window in which new crawls may be started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionWindow {
    start: DateTime<Utc>,
    limit: Duration,
    deadline: DateTime<Utc>,
}

impl AdmissionWindow {
    /// Returns `None` unless `limit` is positive and `start + limit` is representable
    pub fn new(start: DateTime<Utc>, limit: Duration) -> Option<Self> {
        if limit <= Duration::zero() {
            return None;
        }

        let deadline = start.checked_add_signed(limit)?;
        Some(Self { start, limit, deadline })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Last instant at which a crawl is still admitted
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Time left before the window closes, or `None` once it has
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        admit(now, self).then(|| self.deadline() - now)
    }
}

/// Decide whether a crawl may begin at `now`. The deadline instant itself is admitted.
pub fn admit(now: DateTime<Utc>, window: &AdmissionWindow) -> bool {
    now - window.start <= window.limit
}
