use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    config::TrendConfig,
    error::{FrameError, TrendError},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

impl FlowSample {
    pub fn new(at: DateTime<Utc>, value: f64) -> Self {
        Self { at, value }
    }

    /// History entry form: `<unix millis>:<value>`.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.at.timestamp_millis(), self.value)
    }

    pub fn decode(entry: &str) -> Result<Self, FrameError> {
        let invalid = || FrameError::Sample(entry.to_string());
        let (millis, value) = entry.split_once(':').ok_or_else(invalid)?;
        let millis: i64 = millis.trim().parse().map_err(|_| invalid())?;
        let value: f64 = value.trim().parse().map_err(|_| invalid())?;
        let at = DateTime::from_timestamp_millis(millis).ok_or_else(invalid)?;
        if !value.is_finite() {
            return Err(invalid());
        }
        Ok(Self { at, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendEstimate {
    pub slope_per_hour: f64,
    pub std_error: f64,
    pub samples: usize,
}

/// Least-squares slope of outflow temperature over a trailing window.
#[derive(Debug, Clone)]
pub struct TrendEstimator {
    window: TimeDelta,
    min_samples: usize,
}

impl TrendEstimator {
    pub fn new(mut config: TrendConfig) -> Self {
        config.sanitize();
        Self {
            window: config.window(),
            min_samples: config.min_samples,
        }
    }

    pub fn estimate(
        &self,
        samples: &[FlowSample],
        now: DateTime<Utc>,
    ) -> Result<TrendEstimate, TrendError> {
        let oldest = now - self.window;
        let points: Vec<(f64, f64)> = samples
            .iter()
            .filter(|sample| sample.at >= oldest && sample.at <= now)
            .map(|sample| {
                let hours = (sample.at - oldest).num_milliseconds() as f64 / 3_600_000.0;
                (hours, sample.value)
            })
            .collect();

        if points.len() < self.min_samples {
            return Err(TrendError::InsufficientSamples {
                found: points.len(),
                required: self.min_samples,
            });
        }

        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        if sxx <= f64::EPSILON {
            return Err(TrendError::Degenerate);
        }
        let sxy: f64 = points
            .iter()
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let sse: f64 = points
            .iter()
            .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
            .sum();
        let std_error = (sse / (n - 2.0) / sxx).sqrt();

        Ok(TrendEstimate {
            slope_per_hour: slope,
            std_error,
            samples: points.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 21, 10, 0, 0).unwrap()
    }

    fn hourly_window() -> TrendEstimator {
        TrendEstimator::new(TrendConfig {
            window_secs: 3600,
            min_samples: 5,
        })
    }

    #[test]
    fn steady_rise_is_six_degrees_per_hour() {
        let samples: Vec<FlowSample> = [(0, 20.0), (600, 21.0), (1200, 22.0), (1800, 23.0), (2400, 24.0)]
            .into_iter()
            .map(|(secs, value)| FlowSample::new(start() + TimeDelta::seconds(secs), value))
            .collect();

        let estimate = hourly_window()
            .estimate(&samples, start() + TimeDelta::seconds(2400))
            .unwrap();
        assert!((estimate.slope_per_hour - 6.0).abs() < 1e-9, "{estimate:?}");
        assert!(estimate.std_error.abs() < 1e-9);
        assert_eq!(estimate.samples, 5);
    }

    #[test]
    fn too_few_samples_in_window() {
        let now = start() + TimeDelta::seconds(7200);
        let samples: Vec<FlowSample> = (0..10)
            .map(|i| FlowSample::new(start() + TimeDelta::seconds(i * 60), 20.0 + i as f64))
            .chain([
                FlowSample::new(now - TimeDelta::seconds(60), 30.0),
                FlowSample::new(now, 31.0),
            ])
            .collect();

        assert_eq!(
            hourly_window().estimate(&samples, now),
            Err(TrendError::InsufficientSamples {
                found: 2,
                required: 5
            })
        );
    }

    #[test]
    fn noisy_samples_carry_an_error() {
        let values = [20.0, 21.5, 21.0, 23.5, 23.0, 25.0];
        let samples: Vec<FlowSample> = values
            .iter()
            .enumerate()
            .map(|(i, value)| FlowSample::new(start() + TimeDelta::seconds(i as i64 * 300), *value))
            .collect();

        let estimate = hourly_window()
            .estimate(&samples, start() + TimeDelta::seconds(1500))
            .unwrap();
        assert!(estimate.slope_per_hour > 0.0);
        assert!(estimate.std_error > 0.0);
    }

    #[test]
    fn single_instant_is_degenerate() {
        let samples = vec![FlowSample::new(start(), 20.0); 5];
        assert_eq!(
            hourly_window().estimate(&samples, start()),
            Err(TrendError::Degenerate)
        );
    }

    #[test]
    fn history_entries_decode() {
        let sample = FlowSample::new(start(), 42.5);
        assert_eq!(FlowSample::decode(&sample.encode()), Ok(sample));
        assert!(FlowSample::decode("yesterday:42").is_err());
        assert!(FlowSample::decode("1750500000000").is_err());
        assert!(FlowSample::decode("1750500000000:NaN").is_err());
    }
}
