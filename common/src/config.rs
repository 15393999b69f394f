use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, keys};

const MAX_PERIOD_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    pub timezone: String,
    pub min_azimuth: f64,
    pub max_azimuth: f64,
    pub max_zenith: f64,
    /// Zenith limit after local noon; the collectors see a lower evening sun.
    pub afternoon_max_zenith: Option<f64>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            latitude: 50.87,
            longitude: 5.98,
            elevation_m: 110.0,
            timezone: "Europe/Amsterdam".to_string(),
            min_azimuth: 95.0,
            max_azimuth: 300.0,
            max_zenith: 79.0,
            afternoon_max_zenith: Some(83.0),
        }
    }
}

impl SiteConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub grace_period_secs: u64,
    pub overheat_temp: f64,
    pub overheat_hold_secs: u64,
    pub recycle_rise: f64,
    pub recycle_timeout_secs: u64,
    pub recycle_min_flow_out: f64,
    pub recycle_pause_secs: u64,
    pub boiler_swap_rise: f64,
    pub extraction_margin: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 60,
            overheat_temp: 95.0,
            overheat_hold_secs: 30 * 60,
            recycle_rise: 5.0,
            recycle_timeout_secs: 10 * 60,
            recycle_min_flow_out: 40.0,
            recycle_pause_secs: 20 * 60,
            boiler_swap_rise: 10.0,
            extraction_margin: 0.5,
        }
    }
}

impl ControlConfig {
    pub fn sanitize(&mut self) {
        for period in [
            &mut self.grace_period_secs,
            &mut self.overheat_hold_secs,
            &mut self.recycle_timeout_secs,
            &mut self.recycle_pause_secs,
        ] {
            *period = (*period).min(MAX_PERIOD_SECS);
        }
        self.recycle_rise = self.recycle_rise.max(0.0);
        self.boiler_swap_rise = self.boiler_swap_rise.max(0.0);
        self.extraction_margin = self.extraction_margin.max(0.0);
    }

    pub fn grace_period(&self) -> TimeDelta {
        seconds(self.grace_period_secs)
    }

    pub fn overheat_hold(&self) -> TimeDelta {
        seconds(self.overheat_hold_secs)
    }

    pub fn recycle_timeout(&self) -> TimeDelta {
        seconds(self.recycle_timeout_secs)
    }

    pub fn recycle_pause(&self) -> TimeDelta {
        seconds(self.recycle_pause_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub device: String,
    pub baud_rate: u32,
    pub log_marker: String,
    pub reading_ttl_secs: u64,
    pub history_cap: usize,
    pub min_valid_temp: f64,
    pub max_valid_temp: f64,
    pub lease_ttl_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            log_marker: "log:".to_string(),
            reading_ttl_secs: 5 * 60,
            history_cap: 50,
            min_valid_temp: -5.0,
            max_valid_temp: 120.0,
            lease_ttl_secs: 60,
        }
    }
}

impl TelemetryConfig {
    pub fn sanitize(&mut self) {
        self.reading_ttl_secs = self.reading_ttl_secs.clamp(1, MAX_PERIOD_SECS);
        self.lease_ttl_secs = self.lease_ttl_secs.clamp(1, MAX_PERIOD_SECS);
        self.history_cap = self.history_cap.clamp(1, 10_000);
        if self.baud_rate == 0 {
            self.baud_rate = 9600;
        }
    }

    /// Inclusive bounds: both limits are plausible readings.
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min_valid_temp && value <= self.max_valid_temp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendConfig {
    pub window_secs: u64,
    pub min_samples: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_secs: 10 * 60,
            min_samples: 5,
        }
    }
}

impl TrendConfig {
    pub fn sanitize(&mut self) {
        self.window_secs = self.window_secs.clamp(1, MAX_PERIOD_SECS);
        // A slope error needs at least three points.
        self.min_samples = self.min_samples.max(3);
    }

    pub fn window(&self) -> TimeDelta {
        seconds(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SensorId {
    pub location: String,
    pub position: String,
}

impl SensorId {
    pub fn new(location: &str, position: &str) -> Self {
        Self {
            location: location.to_string(),
            position: position.to_string(),
        }
    }

    pub fn key(&self) -> String {
        keys::reading_key(&self.location, &self.position)
    }
}

/// Field order of the inbound telemetry frame plus the two control sensors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorLayout {
    pub fields: Vec<SensorId>,
    pub flow_in: SensorId,
    pub flow_out: SensorId,
}

impl Default for SensorLayout {
    fn default() -> Self {
        let flow_in = SensorId::new("pipe", "TflowIn");
        let flow_out = SensorId::new("pipe", "TflowOut");
        Self {
            fields: vec![
                SensorId::new("boiler500", "Ttop"),
                SensorId::new("boiler500", "Tmiddle"),
                SensorId::new("boiler500", "Tbottom"),
                flow_in.clone(),
                flow_out.clone(),
            ],
            flow_in,
            flow_out,
        }
    }
}

impl SensorLayout {
    pub const FRAME_FIELDS: usize = 5;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fields.len() != Self::FRAME_FIELDS {
            return Err(ConfigError::SensorLayout(self.fields.len()));
        }
        for sensor in [&self.flow_in, &self.flow_out] {
            if !self.fields.contains(sensor) {
                return Err(ConfigError::FlowSensor(sensor.key()));
            }
        }
        Ok(())
    }

    pub fn is_flow_out(&self, sensor: &SensorId) -> bool {
        sensor == &self.flow_out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub namespace: Option<String>,
    pub pool_size: usize,
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: None,
            pool_size: 2,
            command_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub app_name: String,
    pub metrics_addr: Option<String>,
    pub log_addr: Option<String>,
    pub alert_addr: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            app_name: "iot-solar-boiler".to_string(),
            metrics_addr: None,
            log_addr: None,
            alert_addr: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub threshold: u32,
    pub streak_ttl_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            streak_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub site: SiteConfig,
    pub control: ControlConfig,
    pub telemetry: TelemetryConfig,
    pub trend: TrendConfig,
    pub sensors: SensorLayout,
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub alert: AlertConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.control.sanitize();
        self.telemetry.sanitize();
        self.trend.sanitize();
        self.store.pool_size = self.store.pool_size.clamp(1, 16);
        self.store.command_timeout_ms = self.store.command_timeout_ms.clamp(100, 60_000);
        self.alert.threshold = self.alert.threshold.max(1);
        self.alert.streak_ttl_secs = self.alert.streak_ttl_secs.clamp(1, MAX_PERIOD_SECS);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.site.tz()?;
        if !(self.site.min_azimuth < self.site.max_azimuth) {
            return Err(ConfigError::AzimuthWindow {
                min: self.site.min_azimuth,
                max: self.site.max_azimuth,
            });
        }
        if !(-90.0..=90.0).contains(&self.site.latitude) {
            return Err(ConfigError::Invalid {
                field: "site.latitude",
                reason: format!("{} is outside -90..=90", self.site.latitude),
            });
        }
        if !(self.telemetry.min_valid_temp < self.telemetry.max_valid_temp) {
            return Err(ConfigError::Invalid {
                field: "telemetry.min_valid_temp",
                reason: "must be below max_valid_temp".to_string(),
            });
        }
        if self.telemetry.log_marker.is_empty() {
            return Err(ConfigError::Invalid {
                field: "telemetry.log_marker",
                reason: "must not be empty".to_string(),
            });
        }
        self.sensors.validate()
    }
}

fn seconds(secs: u64) -> TimeDelta {
    TimeDelta::seconds(secs.min(MAX_PERIOD_SECS) as i64)
}
