#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::config::AllocationPolicy;
use crate::engine::{DeadlineOutcome, PolicyEngine};
use crate::metrics::Metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogState {
    /// No ticker runs for this policy.
    Disabled,
    Armed,
    /// Terminal for the lifetime of the process.
    Fired,
}

impl WatchdogState {
    pub fn from_triggered(enabled: bool, triggered: bool) -> Self {
        if !enabled {
            Self::Disabled
        } else if triggered {
            Self::Fired
        } else {
            Self::Armed
        }
    }
}

/// Whether `engine` needs a deadline ticker at all.
pub fn watchdog_enabled(engine: &PolicyEngine) -> bool {
    engine.policy() == AllocationPolicy::TimeBound && engine.config().time_auto_allocate
}

/// Spawn the deadline ticker. Returns `None` when the engine's policy never fires.
///
/// The task ends after the deadline has fired.
pub fn spawn_watchdog(engine: Arc<PolicyEngine>, metrics: Metrics) -> Option<JoinHandle<()>> {
    if !watchdog_enabled(&engine) {
        return None;
    }
    let tick_millis = engine.config().time_tick_millis.max(1);
    let period = Duration::from_millis(tick_millis);
    info!(
        tick_millis,
        deadline_seconds = engine.deadline().as_secs(),
        "deadline watchdog armed"
    );
    Some(tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match engine.on_deadline() {
                Ok(outcome @ DeadlineOutcome::Fired { .. }) => {
                    metrics.record_deadline(&outcome);
                    break;
                }
                Ok(DeadlineOutcome::AlreadyFired) => break,
                Ok(DeadlineOutcome::NotDue | DeadlineOutcome::NotApplicable) => {}
                Err(e) => error!(error = %e, "deadline check failed; will retry"),
            }
        }
    }))
}
