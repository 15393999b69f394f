use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    Sunset,
    Startup,
    Recycle,
    RecycleTimeout,
    Boiler500,
    Boiler200,
    Overheat,
    Error,
}

impl ControlState {
    pub const ALL: [ControlState; 8] = [
        Self::Sunset,
        Self::Startup,
        Self::Recycle,
        Self::RecycleTimeout,
        Self::Boiler500,
        Self::Boiler200,
        Self::Overheat,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunset => "sunset",
            Self::Startup => "startup",
            Self::Recycle => "recycle",
            Self::RecycleTimeout => "recycleTimeout",
            Self::Boiler500 => "boiler500",
            Self::Boiler200 => "boiler200",
            Self::Overheat => "overheat",
            Self::Error => "error",
        }
    }

    /// Valve and pump positions commanded while in this state.
    pub fn actuators(self) -> Actuators {
        match self {
            Self::Sunset => Actuators::new(false, false, false),
            Self::Startup => Actuators::new(true, true, true),
            Self::Recycle => Actuators::new(true, true, true),
            Self::RecycleTimeout => Actuators::new(true, true, false),
            Self::Boiler500 => Actuators::new(false, false, true),
            Self::Boiler200 => Actuators::new(true, false, true),
            Self::Overheat => Actuators::new(false, false, false),
            Self::Error => Actuators::new(false, false, false),
        }
    }

    /// Whether entering this state records the outflow temperature as reference.
    pub fn tracks_flow_reference(self) -> bool {
        !matches!(self, Self::Startup | Self::Error | Self::Sunset)
    }

    /// `error` and `sunset` forget the last change so the next cycle starts fresh.
    pub fn clears_history(self) -> bool {
        matches!(self, Self::Error | Self::Sunset)
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| value.to_string())
    }
}

/// Commanded positions of valve I, valve II and the solar pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Actuators {
    pub valve_one: bool,
    pub valve_two: bool,
    pub pump: bool,
}

impl Actuators {
    pub const FRAME_LEN: usize = 3;

    pub const fn new(valve_one: bool, valve_two: bool, pump: bool) -> Self {
        Self {
            valve_one,
            valve_two,
            pump,
        }
    }

    /// Wire form `[valveI][valveII][pump]`, one `T`/`F` per actuator.
    pub fn frame(self) -> String {
        [self.valve_one, self.valve_two, self.pump]
            .into_iter()
            .map(|on| if on { 'T' } else { 'F' })
            .collect()
    }

    pub fn parse_frame(frame: &str) -> Result<Self, FrameError> {
        let bytes = frame.trim_end_matches(['\r', '\n']).as_bytes();
        if bytes.len() != Self::FRAME_LEN {
            return Err(FrameError::CommandLength(bytes.len()));
        }

        let mut flags = [false; Self::FRAME_LEN];
        for (flag, byte) in flags.iter_mut().zip(bytes) {
            *flag = match byte {
                b'T' => true,
                b'F' => false,
                other => return Err(FrameError::CommandSymbol(*other as char)),
            };
        }

        Ok(Self::new(flags[0], flags[1], flags[2]))
    }
}

/// Persisted state tag. Anything the store holds that is not a known state is kept
/// verbatim so the engine can treat it as unknown instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedState {
    Known(ControlState),
    Unrecognized(String),
}

impl RecordedState {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<ControlState>() {
            Ok(state) => Self::Known(state),
            Err(raw) => Self::Unrecognized(raw),
        }
    }

    pub fn known(&self) -> Option<ControlState> {
        match self {
            Self::Known(state) => Some(*state),
            Self::Unrecognized(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(state) => state.as_str(),
            Self::Unrecognized(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlRecord {
    pub state: Option<RecordedState>,
    pub last_change_at: Option<DateTime<Utc>>,
    pub state_start_flow_out: Option<f64>,
}

impl ControlRecord {
    pub fn entered(state: ControlState, now: DateTime<Utc>, flow_out: f64) -> Self {
        if state.clears_history() {
            return Self {
                state: Some(RecordedState::Known(state)),
                last_change_at: None,
                state_start_flow_out: None,
            };
        }

        Self {
            state: Some(RecordedState::Known(state)),
            last_change_at: Some(now),
            state_start_flow_out: state.tracks_flow_reference().then_some(flow_out),
        }
    }

    pub fn current(&self) -> Option<ControlState> {
        self.state.as_ref().and_then(RecordedState::known)
    }

    /// State the hardware should follow; absent or unreadable records fail safe.
    pub fn effective_state(&self) -> ControlState {
        self.current().unwrap_or(ControlState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    SensorFault,
    ReadingUnavailable,
    HardwareFault,
    LeaseConflict,
    UnknownState,
    OverTemperature,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorFault => "sensorFault",
            Self::ReadingUnavailable => "readingUnavailable",
            Self::HardwareFault => "hardwareFault",
            Self::LeaseConflict => "leaseConflict",
            Self::UnknownState => "unknownState",
            Self::OverTemperature => "overTemperature",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
