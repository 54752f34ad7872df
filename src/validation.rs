#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use crate::config::{AllocationPolicy, Config, TelemetryBackend};

pub fn validate_config(cfg: &Config) -> AnyResult<()> {
    if cfg.allocation_chunk_bytes == 0 { bail!("allocation_chunk_bytes must be > 0"); }
    if cfg.max_retained_chunks == 0 { bail!("max_retained_chunks must be > 0"); }
    if cfg.heap_limit_bytes == Some(0) { bail!("heap_limit_bytes must be > 0 when set"); }
    match cfg.policy {
        AllocationPolicy::RequestBound => {
            if cfg.request_total == 0 { bail!("request_total must be > 0"); }
        }
        AllocationPolicy::TimeBound => {
            if cfg.time_duration_seconds == 0 { bail!("time_duration_seconds must be > 0"); }
            if cfg.time_target_rate == 0 { bail!("time_target_rate must be > 0"); }
            if cfg.time_tick_millis == 0 { bail!("time_tick_millis must be > 0"); }
            if cfg.time_duration_seconds.checked_mul(cfg.time_target_rate).is_none() {
                bail!("time_duration_seconds * time_target_rate overflows");
            }
        }
        AllocationPolicy::Realistic => {
            for (name, p) in [
                ("realistic_alloc_probability", cfg.realistic_alloc_probability),
                ("realistic_dealloc_probability", cfg.realistic_dealloc_probability),
            ] {
                if !(0.0..=1.0).contains(&p) { bail!("{name} must be within 0..=1"); }
            }
        }
    }
    if cfg.backend == TelemetryBackend::Container {
        if cfg.policy != AllocationPolicy::RequestBound {
            bail!("container backend only supports the request policy");
        }
        if cfg.overshoot_multiplier == 0 { bail!("overshoot_multiplier must be > 0"); }
    }
    Ok(())
}
