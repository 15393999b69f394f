//! Influx line-protocol snapshot of readings, sun, control state and trend.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use solar_common::{
    config::{RuntimeConfig, SensorId},
    ControlRecord, SolarEphemeris, SunGate, SunPosition, KEY_TREND_SLOPE, KEY_TREND_STD_ERROR,
};

use crate::{
    remote::MetricsSink,
    store::{get_f64, StateStore, StoreError},
    tick::load_record,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub at: DateTime<Utc>,
    pub readings: Vec<(SensorId, Option<f64>)>,
    pub sun: Option<SunPosition>,
    pub shining: bool,
    pub record: ControlRecord,
    pub trend: Option<(f64, f64)>,
}

fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

pub fn render_lines(snapshot: &Snapshot) -> Vec<String> {
    let ns = snapshot
        .at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| snapshot.at.timestamp_millis().saturating_mul(1_000_000));
    let mut lines = Vec::new();

    for (sensor, value) in &snapshot.readings {
        if let Some(value) = value {
            lines.push(format!(
                "temperature,location={},position={} value={value} {ns}",
                escape_tag(&sensor.location),
                escape_tag(&sensor.position)
            ));
        }
    }

    if let Some(sun) = snapshot.sun {
        lines.push(format!(
            "sun azimuth={},zenith={},shining={} {ns}",
            sun.azimuth, sun.zenith, snapshot.shining
        ));
    }

    let state = snapshot.record.effective_state();
    let actuators = state.actuators();
    let recorded = snapshot
        .record
        .state
        .as_ref()
        .map_or("unavailable", |state| state.as_str());
    let mut fields = format!(
        "valveOne={},valveTwo={},pump={}",
        actuators.valve_one, actuators.valve_two, actuators.pump
    );
    if let Some(start) = snapshot.record.state_start_flow_out {
        fields.push_str(&format!(",startFlowOut={start}"));
    }
    lines.push(format!(
        "solarstate,state={},recorded={} {fields} {ns}",
        state,
        escape_tag(recorded)
    ));

    if let Some((slope, std_error)) = snapshot.trend {
        lines.push(format!(
            "trend slopePerHour={slope},stdError={std_error} {ns}"
        ));
    }

    lines
}

pub async fn collect<E: SolarEphemeris>(
    config: &RuntimeConfig,
    store: &dyn StateStore,
    sun: &SunGate<E>,
    now: DateTime<Utc>,
) -> Result<Snapshot, StoreError> {
    let mut readings = Vec::with_capacity(config.sensors.fields.len());
    for sensor in &config.sensors.fields {
        let value = get_f64(store, &sensor.key()).await?;
        if value.is_none() {
            warn!(sensor = %sensor.key(), "no fresh reading");
        }
        readings.push((sensor.clone(), value));
    }

    let position = match sun.position(now) {
        Ok(position) => Some(position),
        Err(err) => {
            warn!("{err}, sun line skipped");
            None
        }
    };
    let trend = match (
        get_f64(store, KEY_TREND_SLOPE).await?,
        get_f64(store, KEY_TREND_STD_ERROR).await?,
    ) {
        (Some(slope), Some(std_error)) => Some((slope, std_error)),
        _ => None,
    };

    Ok(Snapshot {
        at: now,
        readings,
        sun: position,
        shining: position.is_some_and(|position| sun.shining_at(position, now)),
        record: load_record(store).await?,
        trend,
    })
}

pub async fn flush<E: SolarEphemeris>(
    config: &RuntimeConfig,
    store: &dyn StateStore,
    sun: &SunGate<E>,
    sink: &MetricsSink,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    if !sink.is_configured() {
        warn!("no metrics address configured; lines are only logged at debug level");
    }

    let snapshot = collect(config, store, sun, now).await?;
    let lines = render_lines(&snapshot);
    for line in &lines {
        sink.send(line).await;
    }

    info!(lines = lines.len(), "metrics flushed");
    Ok(lines.len())
}
