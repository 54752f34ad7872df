#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

pub mod cgroup;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod metrics;
pub mod plan;
pub mod retention;
pub mod service;
pub mod telemetry;
pub mod validation;
pub mod watchdog;

pub use config::{AllocationPolicy, Config, TelemetryBackend};
pub use engine::{DeadlineOutcome, InvokeResult, PolicyEngine, Status};
pub use error::{OomError, Result};
pub use http::{healthz, hit, routes, scrape_metrics, serve, status, AppState};
pub use metrics::Metrics;
pub use service::AllocatorService;
pub use telemetry::{build_telemetry, MemorySnapshot, MemoryTelemetry};
pub use validation::validate_config;
pub use watchdog::{spawn_watchdog, WatchdogState};
