#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::path::PathBuf;
use thiserror::Error;

use crate::config::AllocationPolicy;

/// Result type for telemetry and engine operations.
pub type Result<T> = std::result::Result<T, OomError>;

#[derive(Debug, Error)]
pub enum OomError {
    #[error("no supported memory bound detected: {0}")]
    TelemetryUnavailable(String),

    #[error("memory limit at {path} is unbounded ({raw}); cannot plan allocation")]
    UnboundedLimit { path: PathBuf, raw: String },

    #[error("failed to parse {path} as a byte count: {raw:?}")]
    TelemetryParse {
        path: PathBuf,
        raw: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("failed to read {path}")]
    TelemetryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("arithmetic overflow while planning: {0}")]
    ArithmeticOverflow(&'static str),

    #[error("policy {policy} is not supported by the {backend} backend")]
    UnsupportedPolicy {
        policy: AllocationPolicy,
        backend: &'static str,
    },
}

impl OomError {
    /// Telemetry failures mean the bound could not be observed; the rest are planning faults.
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            Self::TelemetryUnavailable(_)
                | Self::UnboundedLimit { .. }
                | Self::TelemetryParse { .. }
                | Self::TelemetryRead { .. }
        )
    }
}
