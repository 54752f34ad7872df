#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! cgroup memory controller readers.
//!
//! Two layouts are supported, probed once under a cgroup mount root
//! (normally `/sys/fs/cgroup`):
//! - v2 (unified): `memory.max` and `memory.current`
//! - v1: `memory/memory.limit_in_bytes` and `memory/memory.usage_in_bytes`

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{OomError, Result};

/// Token cgroup v2 writes to `memory.max` when no ceiling is enforced.
pub const UNBOUNDED_TOKEN: &str = "max";

/// cgroup v1 has no token for "no limit"; it reports a page-rounded
/// `i64::MAX` instead. Anything at or above this is treated as unbounded.
pub const V1_UNBOUNDED_THRESHOLD: u64 = 1 << 60;

pub trait CgroupReader: Send + Sync {
    fn limit_bytes(&self) -> Result<u64>;
    fn usage_bytes(&self) -> Result<u64>;
    fn version_label(&self) -> &'static str;
}

/// Parse a decimal byte count, rejecting anything else.
pub fn parse_decimal(path: &Path, raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    trimmed.parse::<u64>().map_err(|source| OomError::TelemetryParse {
        path: path.to_path_buf(),
        raw: trimmed.to_string(),
        source,
    })
}

/// Parse a v2 `memory.max` value; the unbounded token is an error, not a number.
pub fn parse_v2_limit(path: &Path, raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed == UNBOUNDED_TOKEN {
        return Err(OomError::UnboundedLimit {
            path: path.to_path_buf(),
            raw: trimmed.to_string(),
        });
    }
    parse_decimal(path, trimmed)
}

/// Parse a v1 `memory.limit_in_bytes` value; the huge "unlimited" sentinel is an error.
pub fn parse_v1_limit(path: &Path, raw: &str) -> Result<u64> {
    let value = parse_decimal(path, raw)?;
    if value >= V1_UNBOUNDED_THRESHOLD {
        warn!(path = %path.display(), value, "cgroup v1 memory limit is the unlimited sentinel");
        return Err(OomError::UnboundedLimit {
            path: path.to_path_buf(),
            raw: raw.trim().to_string(),
        });
    }
    Ok(value)
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| OomError::TelemetryRead {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Debug)]
pub struct CgroupV2Reader {
    limit: PathBuf,
    usage: PathBuf,
}

impl CgroupV2Reader {
    pub fn new(root: &Path) -> Self {
        Self {
            limit: root.join("memory.max"),
            usage: root.join("memory.current"),
        }
    }
}

impl CgroupReader for CgroupV2Reader {
    fn limit_bytes(&self) -> Result<u64> {
        parse_v2_limit(&self.limit, &read_file(&self.limit)?)
    }

    fn usage_bytes(&self) -> Result<u64> {
        parse_decimal(&self.usage, &read_file(&self.usage)?)
    }

    fn version_label(&self) -> &'static str {
        "v2"
    }
}

#[derive(Clone, Debug)]
pub struct CgroupV1Reader {
    limit: PathBuf,
    usage: PathBuf,
}

impl CgroupV1Reader {
    pub fn new(root: &Path) -> Self {
        let memory = root.join("memory");
        Self {
            limit: memory.join("memory.limit_in_bytes"),
            usage: memory.join("memory.usage_in_bytes"),
        }
    }
}

impl CgroupReader for CgroupV1Reader {
    fn limit_bytes(&self) -> Result<u64> {
        parse_v1_limit(&self.limit, &read_file(&self.limit)?)
    }

    fn usage_bytes(&self) -> Result<u64> {
        parse_decimal(&self.usage, &read_file(&self.usage)?)
    }

    fn version_label(&self) -> &'static str {
        "v1"
    }
}

/// Probe `root` for a v2 layout, then a v1 layout.
pub fn detect_reader(root: &Path) -> Result<Box<dyn CgroupReader>> {
    if root.join("memory.max").exists() {
        return Ok(Box::new(CgroupV2Reader::new(root)));
    }
    if root.join("memory").join("memory.limit_in_bytes").exists() {
        return Ok(Box::new(CgroupV1Reader::new(root)));
    }
    Err(OomError::TelemetryUnavailable(format!(
        "no cgroup memory controller under {}",
        root.display()
    )))
}
