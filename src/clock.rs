#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Origin for uptime and deadline calculations, fixed at construction.
#[derive(Clone, Copy, Debug)]
pub struct StartupClock {
    started: Instant,
    started_at: DateTime<Utc>,
}

impl StartupClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// A clock that started `ago` in the past. Falls back to now if that predates the monotonic origin.
    pub fn started_ago(ago: Duration) -> Self {
        let started = Instant::now().checked_sub(ago).unwrap_or_else(Instant::now);
        let started_at = chrono::Duration::from_std(ago)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or_else(Utc::now);
        Self {
            started,
            started_at,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn uptime_millis(&self) -> u64 {
        u64::try_from(self.uptime().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl Default for StartupClock {
    fn default() -> Self {
        Self::start()
    }
}
