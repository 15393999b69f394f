use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown timezone: {0}")]
    Timezone(String),
    #[error("azimuth window is empty: ({min}, {max})")]
    AzimuthWindow { min: f64, max: f64 },
    #[error("sensor layout has {0} fields, frames carry 5")]
    SensorLayout(usize),
    #[error("flow sensor {0} is not part of the sensor layout")]
    FlowSensor(String),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("command frame must be 3 characters, got {0}")]
    CommandLength(usize),
    #[error("command frame symbol {0:?} is neither T nor F")]
    CommandSymbol(char),
    #[error("history sample {0:?} is not timestamp:value")]
    Sample(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrendError {
    #[error("only {found} samples in window, need {required}")]
    InsufficientSamples { found: usize, required: usize },
    #[error("samples share a single timestamp")]
    Degenerate,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("solar position unavailable: {0}")]
pub struct EphemerisError(pub String);
