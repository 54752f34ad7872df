#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Tunables for the allocation engine, read once at startup.
//!
//! Every field maps to an `OOM_*` environment variable; see [`Config::from_env`].

use anyhow::{anyhow, bail, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const MIB: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Linear depletion of headroom across a fixed number of calls.
    #[serde(rename = "request")]
    RequestBound,
    /// Depletion over a wall-clock duration at a virtual request rate.
    #[serde(rename = "time")]
    TimeBound,
    /// Probabilistic allocate/free churn with no fixed exhaustion point.
    Realistic,
}

impl AllocationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationPolicy::RequestBound => "request",
            AllocationPolicy::TimeBound => "time",
            AllocationPolicy::Realistic => "realistic",
        }
    }
}

impl std::fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationPolicy {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> AnyResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(Self::RequestBound),
            "time" => Ok(Self::TimeBound),
            "realistic" => Ok(Self::Realistic),
            other => bail!("unsupported policy: {other}"),
        }
    }
}

/// Where the used/limit figures come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryBackend {
    Process,
    Container,
}

impl std::fmt::Display for TelemetryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryBackend::Process => f.write_str("process"),
            TelemetryBackend::Container => f.write_str("container"),
        }
    }
}

impl FromStr for TelemetryBackend {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> AnyResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "container" => Ok(Self::Container),
            other => bail!("unsupported telemetry backend: {other}"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Config {
    pub policy: AllocationPolicy,
    pub backend: TelemetryBackend,
    pub cgroup_root: PathBuf,
    pub heap_limit_bytes: Option<u64>,

    pub request_total: u64,

    pub time_duration_seconds: u64,
    pub time_target_rate: u64,
    pub time_auto_allocate: bool,
    pub time_tick_millis: u64,

    pub realistic_alloc_probability: f64,
    pub realistic_alloc_bytes: u64,
    pub realistic_dealloc_probability: f64,
    pub realistic_dealloc_bytes: u64,
    pub realistic_seed: Option<u64>,

    pub touch_pages: bool,
    pub max_retained_chunks: usize,
    pub safety_margin_bytes: u64,
    pub allocation_chunk_bytes: usize,
    pub overshoot_multiplier: u64,
    pub recent_window: usize,

    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: AllocationPolicy::RequestBound,
            backend: TelemetryBackend::Process,
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            heap_limit_bytes: None,
            request_total: 100,
            time_duration_seconds: 30,
            time_target_rate: 10_000,
            time_auto_allocate: true,
            time_tick_millis: 500,
            realistic_alloc_probability: 0.7,
            realistic_alloc_bytes: MIB,
            realistic_dealloc_probability: 0.3,
            realistic_dealloc_bytes: 256 * 1024,
            realistic_seed: None,
            touch_pages: true,
            max_retained_chunks: usize::MAX,
            safety_margin_bytes: 20 * MIB,
            allocation_chunk_bytes: 1 << 20,
            overshoot_multiplier: 10,
            recent_window: 64,
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Read configuration from `OOM_*` environment variables, falling back to defaults.
    pub fn from_env() -> AnyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AnyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Ok(Self {
            policy: parsed(&lookup, "OOM_POLICY", d.policy)?,
            backend: parsed(&lookup, "OOM_TELEMETRY", d.backend)?,
            cgroup_root: lookup("OOM_CGROUP_ROOT").map_or(d.cgroup_root, PathBuf::from),
            heap_limit_bytes: optional(&lookup, "OOM_HEAP_LIMIT_BYTES")?,
            request_total: parsed(&lookup, "OOM_REQUEST_TOTAL", d.request_total)?,
            time_duration_seconds: parsed(
                &lookup,
                "OOM_TIME_DURATION_SECONDS",
                d.time_duration_seconds,
            )?,
            time_target_rate: parsed(&lookup, "OOM_TIME_TARGET_RATE", d.time_target_rate)?,
            time_auto_allocate: flag(&lookup, "OOM_TIME_AUTO_ALLOCATE", d.time_auto_allocate)?,
            time_tick_millis: parsed(&lookup, "OOM_TIME_TICK_MILLIS", d.time_tick_millis)?,
            realistic_alloc_probability: parsed(
                &lookup,
                "OOM_REALISTIC_ALLOC_PROB",
                d.realistic_alloc_probability,
            )?,
            realistic_alloc_bytes: parsed(
                &lookup,
                "OOM_REALISTIC_ALLOC_BYTES",
                d.realistic_alloc_bytes,
            )?,
            realistic_dealloc_probability: parsed(
                &lookup,
                "OOM_REALISTIC_DEALLOC_PROB",
                d.realistic_dealloc_probability,
            )?,
            realistic_dealloc_bytes: parsed(
                &lookup,
                "OOM_REALISTIC_DEALLOC_BYTES",
                d.realistic_dealloc_bytes,
            )?,
            realistic_seed: optional(&lookup, "OOM_REALISTIC_SEED")?,
            touch_pages: flag(&lookup, "OOM_TOUCH_PAGES", d.touch_pages)?,
            max_retained_chunks: parsed(
                &lookup,
                "OOM_MAX_RETAINED_CHUNKS",
                d.max_retained_chunks,
            )?,
            safety_margin_bytes: parsed(&lookup, "OOM_SAFETY_MARGIN_BYTES", d.safety_margin_bytes)?,
            allocation_chunk_bytes: parsed(&lookup, "OOM_CHUNK_BYTES", d.allocation_chunk_bytes)?,
            overshoot_multiplier: parsed(
                &lookup,
                "OOM_OVERSHOOT_MULTIPLIER",
                d.overshoot_multiplier,
            )?,
            recent_window: parsed(&lookup, "OOM_RECENT_WINDOW", d.recent_window)?,
            bind: lookup("OOM_BIND").unwrap_or(d.bind),
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> AnyResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

fn optional<F, T>(lookup: &F, key: &str) -> AnyResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{key}={raw:?}: {e}")),
        _ => Ok(None),
    }
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> AnyResult<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => bail!("{key}={raw:?}: expected a boolean"),
        },
        None => Ok(default),
    }
}
