use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    config::ControlConfig,
    types::{ControlRecord, ControlState, FailureKind, RecordedState},
};

/// Everything a single control pass looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInput {
    pub record: ControlRecord,
    pub flow_in: Option<f64>,
    pub flow_out: Option<f64>,
    pub shining: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    ReadingUnavailable,
    OverTemperature,
    NotShining,
    OverheatHolding,
    OverheatCleared,
    FirstStart,
    Settling,
    StartupComplete,
    RecycleRise,
    RecycleWaiting,
    RecycleTimedOut,
    RecyclePaused,
    RecycleResumed,
    BoilerSwap,
    Extracting,
    Cooling,
    UnknownState,
}

impl Reason {
    /// Failure class worth surfacing beyond the debug log.
    pub fn failure(self) -> Option<FailureKind> {
        match self {
            Self::ReadingUnavailable => Some(FailureKind::ReadingUnavailable),
            Self::OverTemperature => Some(FailureKind::OverTemperature),
            Self::UnknownState => Some(FailureKind::UnknownState),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub record: ControlRecord,
    pub reason: Reason,
    pub previous: Option<RecordedState>,
}

impl Decision {
    pub fn state(&self) -> ControlState {
        self.record.effective_state()
    }

    /// True when the record differs from what was read and must be written back.
    pub fn changed(&self, before: &ControlRecord) -> bool {
        &self.record != before
    }

    /// True when the state tag itself moved, not only its timestamps.
    pub fn transitioned(&self) -> bool {
        self.previous.as_ref() != self.record.state.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct ControlEngine {
    config: ControlConfig,
}

impl ControlEngine {
    pub fn new(mut config: ControlConfig) -> Self {
        config.sanitize();
        Self { config }
    }

    pub fn decide(&self, input: &EngineInput) -> Decision {
        let previous = input.record.state.clone();
        let (record, reason) = self.next(input);
        Decision {
            record,
            reason,
            previous,
        }
    }

    fn next(&self, input: &EngineInput) -> (ControlRecord, Reason) {
        let now = input.now;
        let record = &input.record;

        let (Some(flow_in), Some(flow_out)) = (input.flow_in, input.flow_out) else {
            return (
                ControlRecord::entered(ControlState::Error, now, f64::NAN),
                Reason::ReadingUnavailable,
            );
        };
        let enter = |state: ControlState| ControlRecord::entered(state, now, flow_out);
        let stay = || record.clone();

        if !input.shining {
            return (enter(ControlState::Sunset), Reason::NotShining);
        }

        if flow_out > self.config.overheat_temp {
            return (enter(ControlState::Overheat), Reason::OverTemperature);
        }

        let Some(last_change_at) = record.last_change_at else {
            return (enter(ControlState::Startup), Reason::FirstStart);
        };
        let elapsed = elapsed_since(last_change_at, now);

        if record.current() == Some(ControlState::Overheat) {
            return if elapsed > self.config.overheat_hold() {
                (enter(ControlState::Boiler500), Reason::OverheatCleared)
            } else {
                (stay(), Reason::OverheatHolding)
            };
        }

        if elapsed < self.config.grace_period() {
            return (stay(), Reason::Settling);
        }

        let start_flow_out = record.state_start_flow_out;
        let rose_by = |delta: f64| start_flow_out.is_some_and(|start| flow_out > start + delta);

        match record.state.as_ref().map(|state| state.known()) {
            None | Some(Some(ControlState::Startup)) => {
                (enter(ControlState::Boiler500), Reason::StartupComplete)
            }
            Some(Some(ControlState::Recycle)) => {
                if rose_by(self.config.recycle_rise) {
                    (enter(ControlState::Boiler500), Reason::RecycleRise)
                } else if elapsed > self.config.recycle_timeout()
                    && flow_out < self.config.recycle_min_flow_out
                {
                    (enter(ControlState::RecycleTimeout), Reason::RecycleTimedOut)
                } else {
                    (stay(), Reason::RecycleWaiting)
                }
            }
            Some(Some(ControlState::RecycleTimeout)) => {
                if elapsed > self.config.recycle_pause() {
                    (enter(ControlState::Recycle), Reason::RecycleResumed)
                } else {
                    (stay(), Reason::RecyclePaused)
                }
            }
            Some(Some(boiler @ (ControlState::Boiler500 | ControlState::Boiler200))) => {
                let other = if boiler == ControlState::Boiler500 {
                    ControlState::Boiler200
                } else {
                    ControlState::Boiler500
                };

                if flow_in > flow_out + self.config.extraction_margin {
                    if rose_by(self.config.boiler_swap_rise) {
                        (enter(other), Reason::BoilerSwap)
                    } else {
                        (stay(), Reason::Extracting)
                    }
                } else if boiler == ControlState::Boiler500 {
                    (enter(ControlState::Boiler200), Reason::Cooling)
                } else {
                    (enter(ControlState::Recycle), Reason::Cooling)
                }
            }
            Some(_) => (enter(ControlState::Recycle), Reason::UnknownState),
        }
    }
}

/// A clock that stepped backwards counts as an expired timer.
fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    let elapsed = now.signed_duration_since(since);
    if elapsed < TimeDelta::zero() {
        TimeDelta::MAX
    } else {
        elapsed
    }
}
