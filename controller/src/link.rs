//! Serial telemetry loop: validates inbound frames, persists readings and answers every
//! frame with the actuator command for the currently persisted control state.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use solar_common::{
    config::RuntimeConfig, Actuators, ControlRecord, FailureKind, FieldReading, FlowSample,
    FrameDecoder, InboundFrame, RecordedState, KEY_CONTROL_STATE, KEY_HISTORY_FLOW_OUT,
};

use crate::{
    lease::{LeaseError, ResourceLease},
    remote::Notifier,
    serial::FrameTransport,
    store::{StateStore, StoreError},
};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("serial device failed: {0}")]
    Hardware(#[from] io::Error),

    #[error("serial device closed")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Log,
    Readings { accepted: usize, rejected: usize },
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub kind: FrameKind,
    pub command: Actuators,
}

pub struct TelemetryLink<T> {
    transport: T,
    lease: ResourceLease,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    decoder: FrameDecoder,
    reading_ttl: Duration,
    history_cap: usize,
}

impl<T: FrameTransport> TelemetryLink<T> {
    pub fn new(
        config: &RuntimeConfig,
        lease: ResourceLease,
        transport: T,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            transport,
            lease,
            store,
            notifier,
            decoder: FrameDecoder::new(config.sensors.clone(), config.telemetry.clone()),
            reading_ttl: Duration::from_secs(config.telemetry.reading_ttl_secs),
            history_cap: config.telemetry.history_cap,
        }
    }

    /// Handles frames one at a time until shutdown or a fatal error, then releases the lease.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), LinkError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                line = self.transport.next_line() => Some(line),
            };

            let line = match next {
                None => {
                    info!("shutdown requested, stopping telemetry link");
                    break Ok(());
                }
                Some(Ok(Some(line))) => line,
                Some(Ok(None)) => break Err(LinkError::Closed),
                Some(Err(err)) => break Err(LinkError::Hardware(err)),
            };

            match self.handle_line(&line, Utc::now()).await {
                Ok(outcome) => debug!(
                    kind = ?outcome.kind,
                    command = %outcome.command.frame(),
                    "frame handled"
                ),
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = &result {
            error!("telemetry link stopping: {err}");
        }
        if let Err(err) = self.lease.release().await {
            warn!("failed to release lease: {err}");
        }
        result
    }

    pub async fn handle_line(
        &mut self,
        line: &str,
        now: DateTime<Utc>,
    ) -> Result<FrameOutcome, LinkError> {
        // Ownership first: a lost lease means this frame is not ours to answer.
        self.lease.heartbeat().await?;

        let kind = match self.decoder.decode(line) {
            InboundFrame::Log(message) => {
                debug!(message, "device log");
                self.notifier.diagnostic(&message).await;
                FrameKind::Log
            }
            InboundFrame::Readings(readings) => {
                let mut accepted = 0;
                let mut rejected = 0;
                for reading in &readings {
                    match &reading.reading {
                        FieldReading::Accepted(value) => {
                            accepted += 1;
                            let is_flow_out = self.decoder.layout().is_flow_out(&reading.sensor);
                            self.persist(&reading.sensor.key(), *value, now, is_flow_out)
                                .await?;
                        }
                        FieldReading::Rejected { raw, reason } => {
                            rejected += 1;
                            warn!(
                                kind = %FailureKind::SensorFault,
                                sensor = %reading.sensor.key(),
                                raw = %raw,
                                ?reason,
                                "sensor fault, reading dropped"
                            );
                        }
                    }
                }
                FrameKind::Readings { accepted, rejected }
            }
            InboundFrame::Malformed(raw) => {
                warn!(raw = %raw, "malformed frame");
                self.notifier
                    .diagnostic(&format!("malformed frame: {raw}"))
                    .await;
                FrameKind::Malformed
            }
        };

        let command = self.current_command().await?;
        self.transport.send_command(command).await?;

        Ok(FrameOutcome { kind, command })
    }

    async fn persist(
        &self,
        key: &str,
        value: f64,
        now: DateTime<Utc>,
        is_flow_out: bool,
    ) -> Result<(), StoreError> {
        self.store
            .set(key, &value.to_string(), Some(self.reading_ttl))
            .await?;
        if is_flow_out {
            self.store
                .push_capped(
                    KEY_HISTORY_FLOW_OUT,
                    &FlowSample::new(now, value).encode(),
                    self.history_cap,
                )
                .await?;
        }
        Ok(())
    }

    async fn current_command(&self) -> Result<Actuators, StoreError> {
        let record = ControlRecord {
            state: self
                .store
                .get(KEY_CONTROL_STATE)
                .await?
                .map(|raw| RecordedState::parse(&raw)),
            ..ControlRecord::default()
        };
        Ok(record.effective_state().actuators())
    }
}
