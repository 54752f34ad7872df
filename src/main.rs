#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::Context;
use chimp_oom_agent::{
    build_telemetry, serve, spawn_watchdog, validate_config, AllocatorService, AppState, Config,
    Metrics, PolicyEngine,
};
use std::sync::Arc;
use tracing::info;

fn init_tracing() {
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env());
    fmt.json().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cfg = Config::from_env().context("load configuration")?;
    validate_config(&cfg).context("validate configuration")?;
    info!(policy = %cfg.policy, backend = %cfg.backend, "starting oom agent");

    // Telemetry detection captures the baseline before any load is accepted.
    let telemetry = build_telemetry(&cfg).context("detect memory telemetry")?;
    let bind = cfg.bind.clone();
    let engine = Arc::new(PolicyEngine::new(cfg, telemetry).context("build policy engine")?);
    let metrics = Metrics::new().context("metrics init")?;

    let _watchdog = spawn_watchdog(Arc::clone(&engine), metrics.clone());
    let state = AppState {
        service: AllocatorService::new(engine, metrics),
    };
    serve(&bind, state).await?;
    Ok(())
}
