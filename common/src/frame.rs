use crate::config::{SensorId, SensorLayout, TelemetryConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldReading {
    Accepted(f64),
    Rejected { raw: String, reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotNumeric,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor: SensorId,
    pub reading: FieldReading,
}

impl SensorReading {
    pub fn accepted(&self) -> Option<f64> {
        match self.reading {
            FieldReading::Accepted(value) => Some(value),
            FieldReading::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Log(String),
    Readings(Vec<SensorReading>),
    Malformed(String),
}

/// Classifies raw device lines and applies the outlier filter to readings.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    layout: SensorLayout,
    telemetry: TelemetryConfig,
}

impl FrameDecoder {
    pub fn new(layout: SensorLayout, telemetry: TelemetryConfig) -> Self {
        Self { layout, telemetry }
    }

    pub fn layout(&self) -> &SensorLayout {
        &self.layout
    }

    pub fn decode(&self, line: &str) -> InboundFrame {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(message) = line.strip_prefix(self.telemetry.log_marker.as_str()) {
            return InboundFrame::Log(message.trim().to_string());
        }

        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != self.layout.fields.len() {
            return InboundFrame::Malformed(line.to_string());
        }

        let readings = self
            .layout
            .fields
            .iter()
            .zip(fields)
            .map(|(sensor, raw)| SensorReading {
                sensor: sensor.clone(),
                reading: self.filter(raw),
            })
            .collect();

        InboundFrame::Readings(readings)
    }

    fn filter(&self, raw: &str) -> FieldReading {
        let rejected = |reason| FieldReading::Rejected {
            raw: raw.to_string(),
            reason,
        };

        match raw.trim().parse::<f64>() {
            Ok(value) if !value.is_finite() => rejected(RejectReason::NotNumeric),
            Ok(value) if self.telemetry.accepts(value) => FieldReading::Accepted(value),
            Ok(_) => rejected(RejectReason::OutOfRange),
            Err(_) => rejected(RejectReason::NotNumeric),
        }
    }
}
