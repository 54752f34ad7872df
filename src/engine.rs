#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Allocation policy engine.
//!
//! All mutation and every status read go through one mutex. The telemetry
//! read that feeds a plan is taken inside the lock, so two callers can never
//! plan against the same headroom.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::StartupClock;
use crate::config::{AllocationPolicy, Config, TelemetryBackend};
use crate::error::{OomError, Result};
use crate::plan::{plan_overshoot, plan_request_bound, plan_time_bound};
use crate::retention::{Evicted, Realized, RetentionStore};
use crate::telemetry::{MemorySnapshot, MemoryTelemetry};
use crate::watchdog::{watchdog_enabled, WatchdogState};

#[derive(Clone, Debug, Serialize)]
pub struct InvokeResult {
    pub policy: AllocationPolicy,
    pub request_count: u64,
    pub bytes_planned: u64,
    pub bytes_allocated: u64,
    pub bytes_released: u64,
    pub capped: bool,
    pub retained_chunks: usize,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
    pub bytes_remaining_to_target: u64,
    /// Requests left, remaining virtual units, or -1 for the realistic policy.
    pub units_left: i64,
    pub uptime_millis: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Status {
    pub policy: AllocationPolicy,
    pub backend: &'static str,
    pub request_count: u64,
    pub retained_chunks: usize,
    pub retained_bytes: u64,
    pub recent_window: usize,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
    pub baseline_usage_bytes: Option<u64>,
    pub uptime_millis: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub request_total: u64,
    pub time_duration_seconds: u64,
    pub time_target_rate: u64,
    pub time_virtual_applied: u64,
    pub time_deadline_triggered: bool,
    pub watchdog: WatchdogState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeadlineOutcome {
    /// Policy is not time-bound or auto-allocation is disabled.
    NotApplicable,
    NotDue,
    AlreadyFired,
    Fired { bytes_allocated: u64, capped: bool },
}

struct EngineState {
    request_count: u64,
    virtual_applied: u64,
    deadline_triggered: bool,
    store: RetentionStore,
    rng: StdRng,
}

pub struct PolicyEngine {
    config: Config,
    telemetry: Arc<dyn MemoryTelemetry>,
    clock: StartupClock,
    state: Mutex<EngineState>,
}

impl PolicyEngine {
    pub fn new(config: Config, telemetry: Arc<dyn MemoryTelemetry>) -> Result<Self> {
        Self::with_clock(config, telemetry, StartupClock::start())
    }

    pub fn with_clock(
        config: Config,
        telemetry: Arc<dyn MemoryTelemetry>,
        clock: StartupClock,
    ) -> Result<Self> {
        if config.backend == TelemetryBackend::Container
            && config.policy != AllocationPolicy::RequestBound
        {
            return Err(OomError::UnsupportedPolicy {
                policy: config.policy,
                backend: "container",
            });
        }
        let rng = match config.realistic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let store = RetentionStore::new(
            config.allocation_chunk_bytes,
            config.max_retained_chunks,
            config.recent_window,
            config.touch_pages,
        );
        Ok(Self {
            state: Mutex::new(EngineState {
                request_count: 0,
                virtual_applied: 0,
                deadline_triggered: false,
                store,
                rng,
            }),
            config,
            telemetry,
            clock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.config.policy
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.time_duration_seconds)
    }

    /// Headroom left before the target, read fresh from telemetry.
    pub fn remaining_headroom(&self) -> Result<u64> {
        Ok(self.headroom_of(&self.telemetry.snapshot()?))
    }

    fn headroom_of(&self, snapshot: &MemorySnapshot) -> u64 {
        snapshot.headroom(self.margin())
    }

    fn margin(&self) -> u64 {
        match self.config.backend {
            TelemetryBackend::Process => 0,
            TelemetryBackend::Container => self.config.safety_margin_bytes,
        }
    }

    /// Handle one unit of inbound load.
    ///
    /// Planning failures leave every counter untouched; the failed call is not counted.
    pub fn on_invoke(&self) -> Result<InvokeResult> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let n = st.request_count + 1;
        let headroom = self.headroom_of(&self.telemetry.snapshot()?);

        let (planned, realized, evicted, units_left) = match self.config.policy {
            AllocationPolicy::RequestBound => {
                let plan = plan_request_bound(n, self.config.request_total, headroom);
                let mut bytes = plan.bytes;
                if self.config.backend == TelemetryBackend::Container
                    && n >= self.config.request_total
                {
                    bytes = plan_overshoot(
                        self.config.overshoot_multiplier,
                        self.config.safety_margin_bytes,
                        headroom,
                    )?;
                    info!(request = n, bytes, "final request: forcing overshoot past the limit");
                }
                st.request_count = n;
                let realized = st.store.realize(bytes);
                (bytes, realized, Evicted::default(), saturating_i64(plan.requests_left))
            }
            AllocationPolicy::TimeBound => {
                let plan = plan_time_bound(
                    self.clock.uptime().as_secs(),
                    self.config.time_duration_seconds,
                    self.config.time_target_rate,
                    st.virtual_applied,
                    headroom,
                )?;
                st.request_count = n;
                st.virtual_applied = plan.virtual_applied;
                let realized = st.store.realize(plan.bytes);
                debug!(
                    units = plan.units,
                    remaining_units = plan.remaining_units,
                    bytes_per_unit = plan.bytes_per_unit,
                    "time-bound step"
                );
                (plan.bytes, realized, Evicted::default(), saturating_i64(plan.remaining_units))
            }
            AllocationPolicy::Realistic => {
                st.request_count = n;
                let mut planned = 0;
                let mut realized = Realized::default();
                if st.rng.random::<f64>() < self.config.realistic_alloc_probability {
                    planned = self.config.realistic_alloc_bytes;
                    realized = st.store.realize(planned);
                }
                let mut evicted = Evicted::default();
                if st.rng.random::<f64>() < self.config.realistic_dealloc_probability
                    && !st.store.is_empty()
                {
                    evicted = st
                        .store
                        .evict_random(self.config.realistic_dealloc_bytes, &mut st.rng);
                }
                (planned, realized, evicted, -1)
            }
        };

        let live = self.telemetry.snapshot()?;
        Ok(InvokeResult {
            policy: self.config.policy,
            request_count: st.request_count,
            bytes_planned: planned,
            bytes_allocated: realized.bytes,
            bytes_released: evicted.bytes,
            capped: realized.capped,
            retained_chunks: st.store.len(),
            used_bytes: live.used_bytes,
            total_bytes: live.total_bytes,
            limit_bytes: live.limit_bytes,
            bytes_remaining_to_target: headroom,
            units_left,
            uptime_millis: self.clock.uptime_millis(),
        })
    }

    /// Force the whole remaining headroom once the time-bound deadline has passed.
    ///
    /// A telemetry failure leaves the deadline armed so a later tick can retry.
    pub fn on_deadline(&self) -> Result<DeadlineOutcome> {
        if self.config.policy != AllocationPolicy::TimeBound || !self.config.time_auto_allocate {
            return Ok(DeadlineOutcome::NotApplicable);
        }
        if self.clock.uptime() < self.deadline() {
            return Ok(DeadlineOutcome::NotDue);
        }
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.deadline_triggered {
            return Ok(DeadlineOutcome::AlreadyFired);
        }
        let headroom = self.headroom_of(&self.telemetry.snapshot()?);
        st.deadline_triggered = true;
        let realized = if headroom > 0 {
            st.store.realize(headroom)
        } else {
            Realized::default()
        };
        info!(
            headroom,
            allocated = realized.bytes,
            retained_chunks = st.store.len(),
            "deadline passed: allocated remaining headroom"
        );
        Ok(DeadlineOutcome::Fired {
            bytes_allocated: realized.bytes,
            capped: realized.capped,
        })
    }

    /// Consistent read of every counter plus live telemetry. Never mutates.
    pub fn status(&self) -> Result<Status> {
        let st = self.state.lock();
        let snapshot = self.telemetry.snapshot()?;
        Ok(Status {
            policy: self.config.policy,
            backend: self.telemetry.backend_label(),
            request_count: st.request_count,
            retained_chunks: st.store.len(),
            retained_bytes: st.store.retained_bytes(),
            recent_window: st.store.recent_len(),
            used_bytes: snapshot.used_bytes,
            total_bytes: snapshot.total_bytes,
            limit_bytes: snapshot.limit_bytes,
            baseline_usage_bytes: self.telemetry.baseline_usage_bytes(),
            uptime_millis: self.clock.uptime_millis(),
            started_at: self.clock.started_at(),
            request_total: self.config.request_total,
            time_duration_seconds: self.config.time_duration_seconds,
            time_target_rate: self.config.time_target_rate,
            time_virtual_applied: st.virtual_applied,
            time_deadline_triggered: st.deadline_triggered,
            watchdog: WatchdogState::from_triggered(watchdog_enabled(self), st.deadline_triggered),
        })
    }
}

fn saturating_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
