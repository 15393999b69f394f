//! One read-decide-write pass of the control engine against the shared store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use solar_common::{
    config::{RuntimeConfig, SensorLayout},
    ControlEngine, ControlRecord, Decision, EngineInput, FailureKind, FlowSample, Reason,
    RecordedState, SolarEphemeris, SpaEphemeris, SunGate, TrendError, TrendEstimator,
    KEY_CONTROL_LAST_CHANGE, KEY_CONTROL_START_FLOW_OUT, KEY_CONTROL_STATE, KEY_HISTORY_FLOW_OUT,
    KEY_TREND_SLOPE, KEY_TREND_STD_ERROR,
};

use crate::{
    alert::FailureStreaks,
    store::{get_f64, StateStore, StoreError},
};

/// Failure kinds whose streak a tick both feeds and clears.
const TICK_FAILURES: [FailureKind; 3] = [
    FailureKind::ReadingUnavailable,
    FailureKind::OverTemperature,
    FailureKind::UnknownState,
];

#[derive(Debug, Error)]
pub enum TickError {
    #[error("control readings unavailable ({0}), forced error state")]
    ReadingUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ControlTick<E = SpaEphemeris> {
    store: Arc<dyn StateStore>,
    streaks: FailureStreaks,
    engine: ControlEngine,
    sun: SunGate<E>,
    trend: TrendEstimator,
    sensors: SensorLayout,
    trend_ttl: Duration,
}

impl<E: SolarEphemeris> ControlTick<E> {
    pub fn new(
        config: &RuntimeConfig,
        sun: SunGate<E>,
        store: Arc<dyn StateStore>,
        streaks: FailureStreaks,
    ) -> Self {
        Self {
            store,
            streaks,
            engine: ControlEngine::new(config.control.clone()),
            sun,
            trend: TrendEstimator::new(config.trend.clone()),
            sensors: config.sensors.clone(),
            trend_ttl: Duration::from_secs(config.telemetry.reading_ttl_secs),
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Decision, TickError> {
        let record = load_record(self.store.as_ref()).await?;
        let flow_in_key = self.sensors.flow_in.key();
        let flow_out_key = self.sensors.flow_out.key();
        let flow_in = get_f64(self.store.as_ref(), &flow_in_key).await?;
        let flow_out = get_f64(self.store.as_ref(), &flow_out_key).await?;

        if flow_in.is_some() && flow_out.is_some() {
            self.publish_trend(now).await;
        }

        let shining = match self.sun.position(now) {
            Ok(position) => {
                let shining = self.sun.shining_at(position, now);
                debug!(
                    azimuth = position.azimuth,
                    zenith = position.zenith,
                    shining,
                    "sun position"
                );
                shining
            }
            Err(err) => {
                warn!("{err}, treating the sun as down");
                false
            }
        };

        let decision = self.engine.decide(&EngineInput {
            record: record.clone(),
            flow_in,
            flow_out,
            shining,
            now,
        });

        if decision.changed(&record) {
            save_record(self.store.as_ref(), &decision.record).await?;
        }

        let from = record.state.as_ref().map_or("none", RecordedState::as_str);
        if decision.transitioned() {
            info!(from, to = %decision.state(), reason = ?decision.reason, "control state changed");
        } else {
            debug!(state = from, reason = ?decision.reason, "control state unchanged");
        }

        self.track_failures(&decision, from).await;

        if decision.reason == Reason::ReadingUnavailable {
            let missing: Vec<&str> = [(&flow_in_key, flow_in), (&flow_out_key, flow_out)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(key, _)| key.as_str())
                .collect();
            return Err(TickError::ReadingUnavailable(missing.join(", ")));
        }

        Ok(decision)
    }

    async fn track_failures(&self, decision: &Decision, from: &str) {
        let failure = decision.reason.failure();
        for kind in TICK_FAILURES {
            if failure == Some(kind) {
                let message = match kind {
                    FailureKind::UnknownState => {
                        format!("unexpected control state {from}, forced recycle")
                    }
                    FailureKind::OverTemperature => "outflow over temperature, forced overheat".to_string(),
                    _ => "control readings unavailable, forced error".to_string(),
                };
                warn!(%kind, "{message}");
                self.streaks.record(kind, &message).await;
            } else if let Err(err) = self.streaks.clear(kind).await {
                warn!(%kind, "failed to clear failure streak: {err}");
            }
        }
    }

    /// Trend is informational: every failure here is logged and swallowed.
    async fn publish_trend(&self, now: DateTime<Utc>) {
        let entries = match self.store.list(KEY_HISTORY_FLOW_OUT).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot read flow history: {err}");
                return;
            }
        };

        let samples: Vec<FlowSample> = entries
            .iter()
            .filter_map(|entry| match FlowSample::decode(entry) {
                Ok(sample) => Some(sample),
                Err(err) => {
                    debug!("skipping history entry: {err}");
                    None
                }
            })
            .collect();

        match self.trend.estimate(&samples, now) {
            Ok(estimate) => {
                debug!(
                    slope_per_hour = estimate.slope_per_hour,
                    std_error = estimate.std_error,
                    samples = estimate.samples,
                    "outflow trend"
                );
                for (key, value) in [
                    (KEY_TREND_SLOPE, estimate.slope_per_hour),
                    (KEY_TREND_STD_ERROR, estimate.std_error),
                ] {
                    if let Err(err) = self
                        .store
                        .set(key, &value.to_string(), Some(self.trend_ttl))
                        .await
                    {
                        warn!("cannot publish {key}: {err}");
                    }
                }
            }
            Err(err @ TrendError::InsufficientSamples { .. }) => info!("no trend estimate: {err}"),
            Err(err) => debug!("no trend estimate: {err}"),
        }
    }
}

pub async fn load_record(store: &dyn StateStore) -> Result<ControlRecord, StoreError> {
    let state = store
        .get(KEY_CONTROL_STATE)
        .await?
        .map(|raw| RecordedState::parse(&raw));
    let last_change_at = store
        .get(KEY_CONTROL_LAST_CHANGE)
        .await?
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);
    let state_start_flow_out = get_f64(store, KEY_CONTROL_START_FLOW_OUT).await?;

    Ok(ControlRecord {
        state,
        last_change_at,
        state_start_flow_out,
    })
}

async fn save_record(store: &dyn StateStore, record: &ControlRecord) -> Result<(), StoreError> {
    match &record.state {
        Some(state) => store.set(KEY_CONTROL_STATE, state.as_str(), None).await?,
        None => {
            store.delete(KEY_CONTROL_STATE).await?;
        }
    }
    match record.last_change_at {
        Some(at) => {
            store
                .set(KEY_CONTROL_LAST_CHANGE, &at.timestamp_millis().to_string(), None)
                .await?
        }
        None => {
            store.delete(KEY_CONTROL_LAST_CHANGE).await?;
        }
    }
    match record.state_start_flow_out {
        Some(value) => {
            store
                .set(KEY_CONTROL_START_FLOW_OUT, &value.to_string(), None)
                .await?
        }
        None => {
            store.delete(KEY_CONTROL_START_FLOW_OUT).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;
    use solar_common::{
        alert_streak_key, config::SiteConfig, ControlState, EphemerisError, SunPosition,
    };

    use super::*;
    use crate::{remote::testing::RecordingNotifier, store::MemoryStore};

    struct FixedSun(SunPosition);

    impl SolarEphemeris for FixedSun {
        fn position(
            &self,
            _: DateTime<Utc>,
            _: f64,
            _: f64,
            _: f64,
        ) -> Result<SunPosition, EphemerisError> {
            Ok(self.0)
        }
    }

    const HIGH_SUN: SunPosition = SunPosition {
        azimuth: 180.0,
        zenith: 30.0,
    };
    const NO_SUN: SunPosition = SunPosition {
        azimuth: 10.0,
        zenith: 120.0,
    };

    struct Harness {
        store: Arc<dyn StateStore>,
        notifier: Arc<RecordingNotifier>,
        tick: ControlTick<FixedSun>,
    }

    fn harness(sun: SunPosition) -> Harness {
        let config = RuntimeConfig::default();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let streaks = FailureStreaks::new(store.clone(), notifier.clone(), &config.alert);
        let site = SiteConfig {
            timezone: "UTC".to_string(),
            ..SiteConfig::default()
        };
        let gate = SunGate::with_ephemeris(site, FixedSun(sun)).unwrap();
        Harness {
            tick: ControlTick::new(&config, gate, store.clone(), streaks),
            store,
            notifier,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 21, 11, 0, 0).unwrap()
    }

    async fn readings(store: &dyn StateStore, flow_in: f64, flow_out: f64) {
        let ttl = Some(Duration::from_secs(300));
        store
            .set("reading.pipe.TflowIn", &flow_in.to_string(), ttl)
            .await
            .unwrap();
        store
            .set("reading.pipe.TflowOut", &flow_out.to_string(), ttl)
            .await
            .unwrap();
    }

    async fn seed(store: &dyn StateStore, state: ControlState, ago: TimeDelta, start: Option<f64>) {
        save_record(
            store,
            &ControlRecord {
                state: Some(RecordedState::Known(state)),
                last_change_at: Some(now() - ago),
                state_start_flow_out: start,
            },
        )
        .await
        .unwrap();
    }

    struct NoEphemeris;

    impl SolarEphemeris for NoEphemeris {
        fn position(
            &self,
            _: DateTime<Utc>,
            _: f64,
            _: f64,
            _: f64,
        ) -> Result<SunPosition, EphemerisError> {
            Err(EphemerisError("year out of range".to_string()))
        }
    }

    #[tokio::test]
    async fn unknown_sun_position_counts_as_sunset() {
        let config = RuntimeConfig::default();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let streaks = FailureStreaks::new(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            &config.alert,
        );
        let gate = SunGate::with_ephemeris(config.site.clone(), NoEphemeris).unwrap();
        let tick = ControlTick::new(&config, gate, store.clone(), streaks);
        seed(store.as_ref(), ControlState::Boiler500, TimeDelta::minutes(30), Some(50.0)).await;
        readings(store.as_ref(), 40.0, 60.0).await;

        let decision = tick.run_once(now()).await.unwrap();
        assert_eq!(decision.state(), ControlState::Sunset);
        assert_eq!(decision.reason, Reason::NotShining);
    }

    #[tokio::test]
    async fn first_tick_starts_up_and_persists() {
        let h = harness(HIGH_SUN);
        readings(h.store.as_ref(), 30.0, 28.0).await;

        let decision = h.tick.run_once(now()).await.unwrap();
        assert_eq!(decision.state(), ControlState::Startup);

        let stored = load_record(h.store.as_ref()).await.unwrap();
        assert_eq!(stored.current(), Some(ControlState::Startup));
        assert_eq!(stored.last_change_at, Some(now()));
        assert_eq!(stored.state_start_flow_out, None);
    }

    #[tokio::test]
    async fn startup_then_large_boiler() {
        let h = harness(HIGH_SUN);
        readings(h.store.as_ref(), 30.0, 28.0).await;

        h.tick.run_once(now()).await.unwrap();
        let later = now() + TimeDelta::seconds(61);
        let decision = h.tick.run_once(later).await.unwrap();

        assert_eq!(decision.state(), ControlState::Boiler500);
        let stored = load_record(h.store.as_ref()).await.unwrap();
        assert_eq!(stored.last_change_at, Some(later));
        assert_eq!(stored.state_start_flow_out, Some(28.0));
    }

    #[tokio::test]
    async fn missing_reading_forces_error_and_fails() {
        let h = harness(HIGH_SUN);
        seed(h.store.as_ref(), ControlState::Boiler500, TimeDelta::minutes(5), Some(50.0)).await;
        h.store
            .set("reading.pipe.TflowIn", "60.0", None)
            .await
            .unwrap();

        let err = h.tick.run_once(now()).await.unwrap_err();
        assert!(
            matches!(&err, TickError::ReadingUnavailable(keys) if keys == "reading.pipe.TflowOut"),
            "{err}"
        );

        let stored = load_record(h.store.as_ref()).await.unwrap();
        assert_eq!(stored.current(), Some(ControlState::Error));
        assert_eq!(stored.last_change_at, None);
        assert_eq!(stored.state_start_flow_out, None);
    }

    #[tokio::test]
    async fn repeated_missing_readings_raise_one_alert() {
        let h = harness(HIGH_SUN);
        for _ in 0..4 {
            assert!(h.tick.run_once(now()).await.is_err());
        }

        let alerts = h.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, FailureKind::ReadingUnavailable);
    }

    #[tokio::test]
    async fn recovery_clears_the_streak() {
        let h = harness(HIGH_SUN);
        assert!(h.tick.run_once(now()).await.is_err());
        readings(h.store.as_ref(), 30.0, 28.0).await;
        h.tick.run_once(now()).await.unwrap();

        assert_eq!(
            h.store
                .get(&alert_streak_key(FailureKind::ReadingUnavailable.as_str()))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn no_sun_means_sunset() {
        let h = harness(NO_SUN);
        seed(h.store.as_ref(), ControlState::Boiler200, TimeDelta::minutes(5), Some(50.0)).await;
        readings(h.store.as_ref(), 60.0, 99.0).await;

        let decision = h.tick.run_once(now()).await.unwrap();
        assert_eq!(decision.state(), ControlState::Sunset);

        let stored = load_record(h.store.as_ref()).await.unwrap();
        assert_eq!(stored.last_change_at, None);
        assert_eq!(stored.state_start_flow_out, None);
    }

    #[tokio::test]
    async fn overtemperature_forces_overheat() {
        let h = harness(HIGH_SUN);
        seed(h.store.as_ref(), ControlState::Boiler500, TimeDelta::minutes(5), Some(80.0)).await;
        readings(h.store.as_ref(), 96.0, 95.1).await;

        let decision = h.tick.run_once(now()).await.unwrap();
        assert_eq!(decision.state(), ControlState::Overheat);
        assert_eq!(
            h.store.get(KEY_CONTROL_STATE).await.unwrap().as_deref(),
            Some("overheat")
        );
    }

    #[tokio::test]
    async fn settling_state_is_not_rewritten() {
        let h = harness(HIGH_SUN);
        seed(h.store.as_ref(), ControlState::Recycle, TimeDelta::minutes(5), Some(30.0)).await;
        readings(h.store.as_ref(), 35.0, 34.0).await;

        let decision = h.tick.run_once(now()).await.unwrap();
        assert_eq!(decision.state(), ControlState::Recycle);
        assert!(!decision.transitioned());

        let stored = load_record(h.store.as_ref()).await.unwrap();
        assert_eq!(stored.last_change_at, Some(now() - TimeDelta::minutes(5)));
    }

    #[tokio::test]
    async fn trend_is_published_from_history() {
        let h = harness(HIGH_SUN);
        readings(h.store.as_ref(), 30.0, 24.0).await;
        for i in 0..5 {
            let sample = FlowSample::new(
                now() - TimeDelta::seconds(480 - i * 120),
                20.0 + i as f64 * 0.2,
            );
            h.store
                .push_capped(KEY_HISTORY_FLOW_OUT, &sample.encode(), 50)
                .await
                .unwrap();
        }
        h.store
            .push_capped(KEY_HISTORY_FLOW_OUT, "garbage", 50)
            .await
            .unwrap();

        h.tick.run_once(now()).await.unwrap();

        let slope = get_f64(h.store.as_ref(), KEY_TREND_SLOPE).await.unwrap().unwrap();
        assert!((slope - 6.0).abs() < 1e-6, "{slope}");
        assert!(h.store.get(KEY_TREND_STD_ERROR).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sparse_history_publishes_nothing() {
        let h = harness(HIGH_SUN);
        readings(h.store.as_ref(), 30.0, 24.0).await;
        h.store
            .push_capped(KEY_HISTORY_FLOW_OUT, &FlowSample::new(now(), 24.0).encode(), 50)
            .await
            .unwrap();

        h.tick.run_once(now()).await.unwrap();
        assert_eq!(h.store.get(KEY_TREND_SLOPE).await.unwrap(), None);
    }
}
