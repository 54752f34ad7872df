#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{Context, Result as AnyResult};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::engine::{DeadlineOutcome, InvokeResult, Status};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub invoke_failures_total: IntCounter,
    pub bytes_allocated_total: IntCounter,
    pub bytes_released_total: IntCounter,
    pub retained_chunks: IntGauge,
    pub headroom_bytes: IntGauge,
    pub used_bytes: IntGauge,
    pub limit_bytes: IntGauge,
    pub deadline_fired: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> AnyResult<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(c.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> AnyResult<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help)).with_context(|| format!("create {name}"))?;
    registry
        .register(Box::new(g.clone()))
        .with_context(|| format!("register {name}"))?;
    Ok(g)
}

fn as_gauge(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

impl Metrics {
    pub fn new() -> AnyResult<Self> {
        let registry = Registry::new();
        Ok(Self {
            requests_total: counter(&registry, "oom_requests_total", "successful invocations")?,
            invoke_failures_total: counter(
                &registry,
                "oom_invoke_failures_total",
                "failed invocations",
            )?,
            bytes_allocated_total: counter(
                &registry,
                "oom_bytes_allocated_total",
                "bytes retained by invocations and the deadline",
            )?,
            bytes_released_total: counter(
                &registry,
                "oom_bytes_released_total",
                "bytes evicted by the realistic policy",
            )?,
            retained_chunks: gauge(&registry, "oom_retained_chunks", "chunks currently retained")?,
            headroom_bytes: gauge(
                &registry,
                "oom_headroom_bytes",
                "headroom the last plan was computed against",
            )?,
            used_bytes: gauge(&registry, "oom_used_bytes", "live used bytes")?,
            limit_bytes: gauge(&registry, "oom_limit_bytes", "memory ceiling in bytes")?,
            deadline_fired: gauge(&registry, "oom_deadline_fired", "1 once the deadline allocation ran")?,
            registry,
        })
    }

    pub fn record_invoke(&self, r: &InvokeResult) {
        self.requests_total.inc();
        self.bytes_allocated_total.inc_by(r.bytes_allocated);
        self.bytes_released_total.inc_by(r.bytes_released);
        self.retained_chunks.set(as_gauge(r.retained_chunks as u64));
        self.headroom_bytes.set(as_gauge(r.bytes_remaining_to_target));
        self.used_bytes.set(as_gauge(r.used_bytes));
        self.limit_bytes.set(as_gauge(r.limit_bytes));
    }

    pub fn record_failure(&self) {
        self.invoke_failures_total.inc();
    }

    pub fn record_deadline(&self, outcome: &DeadlineOutcome) {
        if let DeadlineOutcome::Fired { bytes_allocated, .. } = outcome {
            self.bytes_allocated_total.inc_by(*bytes_allocated);
            self.deadline_fired.set(1);
        }
    }

    pub fn record_status(&self, s: &Status) {
        self.retained_chunks.set(as_gauge(s.retained_chunks as u64));
        self.used_bytes.set(as_gauge(s.used_bytes));
        self.limit_bytes.set(as_gauge(s.limit_bytes));
        self.deadline_fired.set(i64::from(s.time_deadline_triggered));
    }

    pub fn encode_text(&self) -> AnyResult<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf).context("encode metrics")?;
        Ok(buf)
    }
}
