pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod keys;
pub mod sun;
pub mod trend;
pub mod types;

pub use config::{RuntimeConfig, SensorId, SensorLayout};
pub use engine::{ControlEngine, Decision, EngineInput, Reason};
pub use error::{ConfigError, EphemerisError, FrameError, TrendError};
pub use frame::{FieldReading, FrameDecoder, InboundFrame, RejectReason, SensorReading};
pub use keys::*;
pub use sun::{SolarEphemeris, SpaEphemeris, SunGate, SunPosition};
pub use trend::{FlowSample, TrendEstimate, TrendEstimator};
pub use types::{Actuators, ControlRecord, ControlState, FailureKind, RecordedState};
