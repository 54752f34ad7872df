#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Memory figures the engine plans against.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use sysinfo::{Pid, System};
use tracing::info;

use crate::cgroup::{detect_reader, CgroupReader};
use crate::config::{Config, TelemetryBackend};
use crate::error::{OomError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

impl MemorySnapshot {
    /// Bytes left before `limit - margin`, clamped at zero.
    pub fn headroom(&self, margin: u64) -> u64 {
        self.limit_bytes
            .saturating_sub(self.used_bytes)
            .saturating_sub(margin)
    }
}

pub trait MemoryTelemetry: Send + Sync {
    fn snapshot(&self) -> Result<MemorySnapshot>;
    fn backend_label(&self) -> &'static str;
    /// Usage captured before any load was accepted, when the backend records one.
    fn baseline_usage_bytes(&self) -> Option<u64> {
        None
    }
}

/// Reads this process's own footprint through `sysinfo`.
pub struct ProcessTelemetry {
    pid: Pid,
    system: Mutex<System>,
    limit_bytes: u64,
}

impl ProcessTelemetry {
    /// `heap_limit_bytes` caps planning; without it the host's physical memory is the ceiling.
    pub fn new(heap_limit_bytes: Option<u64>) -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| OomError::TelemetryUnavailable(format!("current pid: {e}")))?;
        let mut system = System::new();
        let limit_bytes = match heap_limit_bytes {
            Some(limit) => limit,
            None => {
                system.refresh_memory();
                system.total_memory()
            }
        };
        if limit_bytes == 0 {
            return Err(OomError::TelemetryUnavailable(
                "process memory ceiling reported as zero".to_string(),
            ));
        }
        let telemetry = Self {
            pid,
            system: Mutex::new(system),
            limit_bytes,
        };
        telemetry.snapshot()?;
        info!(pid = %pid, limit_mb = limit_bytes / 1024 / 1024, "process telemetry ready");
        Ok(telemetry)
    }
}

impl MemoryTelemetry for ProcessTelemetry {
    fn snapshot(&self) -> Result<MemorySnapshot> {
        let mut system = self.system.lock();
        if !system.refresh_process(self.pid) {
            return Err(OomError::TelemetryUnavailable(format!(
                "process {} not visible",
                self.pid
            )));
        }
        let process = system.process(self.pid).ok_or_else(|| {
            OomError::TelemetryUnavailable(format!("process {} not visible", self.pid))
        })?;
        Ok(MemorySnapshot {
            used_bytes: process.memory(),
            total_bytes: process.virtual_memory(),
            limit_bytes: self.limit_bytes,
        })
    }

    fn backend_label(&self) -> &'static str {
        "process"
    }
}

/// Reads the enclosing cgroup's limit and usage.
pub struct ContainerTelemetry {
    reader: Box<dyn CgroupReader>,
    baseline_usage: u64,
}

impl std::fmt::Debug for ContainerTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerTelemetry")
            .field("baseline_usage", &self.baseline_usage)
            .finish_non_exhaustive()
    }
}

impl ContainerTelemetry {
    /// Detect the cgroup layout once, validate the limit and capture baseline usage.
    pub fn detect(root: &std::path::Path) -> Result<Self> {
        Self::from_reader(detect_reader(root)?)
    }

    pub fn from_reader(reader: Box<dyn CgroupReader>) -> Result<Self> {
        let limit = reader.limit_bytes()?;
        let baseline_usage = reader.usage_bytes()?;
        info!(
            version = reader.version_label(),
            limit_mb = limit / 1024 / 1024,
            baseline_mb = baseline_usage / 1024 / 1024,
            "detected cgroup memory controller"
        );
        Ok(Self {
            reader,
            baseline_usage,
        })
    }

    pub fn version_label(&self) -> &'static str {
        self.reader.version_label()
    }
}

impl MemoryTelemetry for ContainerTelemetry {
    fn snapshot(&self) -> Result<MemorySnapshot> {
        let limit_bytes = self.reader.limit_bytes()?;
        let used_bytes = self.reader.usage_bytes()?;
        Ok(MemorySnapshot {
            used_bytes,
            total_bytes: limit_bytes,
            limit_bytes,
        })
    }

    fn backend_label(&self) -> &'static str {
        "container"
    }

    fn baseline_usage_bytes(&self) -> Option<u64> {
        Some(self.baseline_usage)
    }
}

/// Build the backend selected in `cfg`.
pub fn build_telemetry(cfg: &Config) -> Result<Arc<dyn MemoryTelemetry>> {
    Ok(match cfg.backend {
        TelemetryBackend::Process => Arc::new(ProcessTelemetry::new(cfg.heap_limit_bytes)?),
        TelemetryBackend::Container => Arc::new(ContainerTelemetry::detect(&cfg.cgroup_root)?),
    })
}
