#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::Result as AnyResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::engine::{InvokeResult, PolicyEngine, Status};
use crate::error::Result;
use crate::metrics::Metrics;

/// Engine plus the metrics it feeds; what the HTTP handlers talk to.
#[derive(Clone)]
pub struct AllocatorService {
    engine: Arc<PolicyEngine>,
    metrics: Metrics,
}

impl AllocatorService {
    pub fn new(engine: Arc<PolicyEngine>, metrics: Metrics) -> Self {
        Self { engine, metrics }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn hit(&self) -> Result<InvokeResult> {
        match self.engine.on_invoke() {
            Ok(r) => {
                self.metrics.record_invoke(&r);
                Ok(r)
            }
            Err(e) => {
                self.metrics.record_failure();
                error!(error = %e, policy = %self.engine.policy(), "invocation failed");
                Err(e)
            }
        }
    }

    pub fn status(&self) -> Result<Status> {
        let st = self.engine.status()?;
        self.metrics.record_status(&st);
        Ok(st)
    }

    pub fn encode_metrics(&self) -> AnyResult<Vec<u8>> {
        self.metrics.encode_text()
    }

    pub fn health(&self) -> HealthReport {
        let status = self.engine.status();
        let telemetry_ok = status.is_ok();
        let invariants_ok = status.as_ref().map_or(true, |st| {
            st.retained_chunks <= self.engine.config().max_retained_chunks
                && st.retained_bytes >= st.retained_chunks as u64
        });
        let metrics_ok = self.metrics.encode_text().is_ok();
        let registry_metrics = self.metrics.registry.gather().len();
        let overall = if metrics_ok && telemetry_ok && invariants_ok {
            "ok"
        } else {
            "degraded"
        };
        HealthReport {
            status: overall.to_string(),
            policy: self.engine.policy().to_string(),
            telemetry_ok,
            metrics_ok,
            registry_metrics,
            invariants_ok,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub policy: String,
    pub telemetry_ok: bool,
    pub metrics_ok: bool,
    pub registry_metrics: usize,
    pub invariants_ok: bool,
}
