#![allow(dead_code)]

use chimp_oom_agent::{MemorySnapshot, MemoryTelemetry, OomError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Telemetry whose usage only moves when the test says so.
#[derive(Default)]
pub struct FakeTelemetry {
    used: AtomicU64,
    limit: AtomicU64,
    failing: AtomicBool,
}

impl FakeTelemetry {
    pub fn new(used: u64, limit: u64) -> Arc<Self> {
        Arc::new(Self {
            used: AtomicU64::new(used),
            limit: AtomicU64::new(limit),
            failing: AtomicBool::new(false),
        })
    }

    pub fn grow(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn shrink(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MemoryTelemetry for FakeTelemetry {
    fn snapshot(&self) -> Result<MemorySnapshot> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OomError::TelemetryUnavailable("fake outage".into()));
        }
        let limit = self.limit.load(Ordering::SeqCst);
        Ok(MemorySnapshot {
            used_bytes: self.used(),
            total_bytes: limit,
            limit_bytes: limit,
        })
    }

    fn backend_label(&self) -> &'static str {
        "fake"
    }
}
