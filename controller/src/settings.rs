use std::{io::ErrorKind, path::PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use solar_common::RuntimeConfig;

const DEFAULT_CONFIG_PATH: &str = "/etc/solar-boiler/runtime.json";

pub fn config_path() -> PathBuf {
    std::env::var("SOLAR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Loads, overrides, sanitizes and validates the runtime configuration.
pub async fn load() -> anyhow::Result<RuntimeConfig> {
    let path = config_path();
    let mut runtime = match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("no runtime config at {}, using defaults", path.display());
            RuntimeConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    apply_env_overrides(&mut runtime, |name| std::env::var(name).ok());
    runtime.sanitize();
    runtime
        .validate()
        .with_context(|| format!("unusable runtime config {}", path.display()))?;

    info!(
        device = %runtime.telemetry.device,
        store = %runtime.store.url,
        timezone = %runtime.site.timezone,
        "runtime config loaded"
    );
    Ok(runtime)
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("REDIS_URL") {
        runtime.store.url = url;
    }
    if let Some(device) = var("SOLAR_SERIAL_DEVICE") {
        runtime.telemetry.device = device;
    }
    if let Some(addr) = var("SOLAR_METRICS_ADDR") {
        runtime.remote.metrics_addr = Some(addr);
    }
    if let Some(addr) = var("SOLAR_LOG_ADDR") {
        runtime.remote.log_addr = Some(addr);
    }
    if let Some(addr) = var("SOLAR_ALERT_ADDR") {
        runtime.remote.alert_addr = Some(addr);
    }
}
