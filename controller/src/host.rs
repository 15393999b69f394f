use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use solar_common::{config::TelemetryConfig, FailureKind, RuntimeConfig, SunGate};

use crate::{
    alert::FailureStreaks,
    lease::{LeaseError, ResourceLease},
    link::{LinkError, TelemetryLink},
    metrics,
    remote::{MetricsSink, Notifier, UdpNotifier},
    serial::{FrameTransport, SerialTransport},
    settings,
    store::{StateStore, ValkeyStore},
    tick::ControlTick,
    Mode,
};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

struct Services {
    runtime: RuntimeConfig,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    streaks: FailureStreaks,
}

impl Services {
    async fn connect() -> anyhow::Result<Self> {
        let runtime = settings::load().await?;
        let store: Arc<dyn StateStore> = Arc::new(
            ValkeyStore::connect(&runtime.store)
                .await
                .with_context(|| format!("failed to connect to store at {}", runtime.store.url))?,
        );
        let notifier: Arc<dyn Notifier> = Arc::new(UdpNotifier::new(&runtime.remote).await);
        let streaks = FailureStreaks::new(store.clone(), notifier.clone(), &runtime.alert);
        Ok(Self {
            runtime,
            store,
            notifier,
            streaks,
        })
    }
}

pub async fn run(mode: Mode) -> anyhow::Result<()> {
    let services = Services::connect().await?;
    match mode {
        Mode::TelemetryLink => {
            telemetry_link(
                services,
                |telemetry| SerialTransport::open(&telemetry.device, telemetry.baud_rate),
                shutdown_signal(),
            )
            .await
        }
        Mode::ControlEngineTick => control_engine_tick(services).await,
        Mode::MetricsFlush => metrics_flush(services).await,
    }
}

/// Takes the lease before touching the device, so a redundant start never reaches it.
async fn telemetry_link<T, O, S>(services: Services, open: O, shutdown: S) -> anyhow::Result<()>
where
    T: FrameTransport,
    O: FnOnce(&TelemetryConfig) -> io::Result<T>,
    S: Future<Output = ()>,
{
    let Services {
        runtime,
        store,
        notifier,
        streaks,
    } = services;
    let telemetry = &runtime.telemetry;

    let lease = match ResourceLease::acquire(
        store.clone(),
        Duration::from_secs(telemetry.lease_ttl_secs),
    )
    .await
    {
        Ok(lease) => lease,
        Err(LeaseError::Held { holder }) => {
            info!(%holder, "serial device is owned by a live instance, exiting");
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to acquire the serial device lease"),
    };

    let transport = match open(telemetry) {
        Ok(transport) => transport,
        Err(err) => {
            if let Err(release) = lease.release().await {
                warn!("failed to release lease: {release}");
            }
            streaks
                .record(FailureKind::HardwareFault, &format!("cannot open {}: {err}", telemetry.device))
                .await;
            return Err(err).with_context(|| format!("failed to open {}", telemetry.device));
        }
    };

    let link = TelemetryLink::new(&runtime, lease, transport, store, notifier);
    match link.run(shutdown).await {
        Ok(()) => {
            for kind in [FailureKind::HardwareFault, FailureKind::LeaseConflict] {
                if let Err(err) = streaks.clear(kind).await {
                    warn!(%kind, "failed to clear failure streak: {err}");
                }
            }
            Ok(())
        }
        Err(err) => {
            let kind = match &err {
                LinkError::Lease(LeaseError::Store(_)) | LinkError::Store(_) => None,
                LinkError::Lease(_) => Some(FailureKind::LeaseConflict),
                LinkError::Hardware(_) | LinkError::Closed => Some(FailureKind::HardwareFault),
            };
            if let Some(kind) = kind {
                streaks.record(kind, &err.to_string()).await;
            }
            Err(err.into())
        }
    }
}

async fn control_engine_tick(services: Services) -> anyhow::Result<()> {
    let sun = SunGate::new(services.runtime.site.clone())?;
    let tick = ControlTick::new(&services.runtime, sun, services.store, services.streaks);
    let decision = tick.run_once(Utc::now()).await?;
    info!(state = %decision.state(), reason = ?decision.reason, "control tick complete");
    Ok(())
}

async fn metrics_flush(services: Services) -> anyhow::Result<()> {
    let sun = SunGate::new(services.runtime.site.clone())?;
    let sink = MetricsSink::new(&services.runtime.remote).await;
    metrics::flush(
        &services.runtime,
        services.store.as_ref(),
        &sun,
        &sink,
        Utc::now(),
    )
    .await?;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
