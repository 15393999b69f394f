pub const KEY_CONTROL_STATE: &str = "control.state";
pub const KEY_CONTROL_LAST_CHANGE: &str = "control.lastChangeAt";
pub const KEY_CONTROL_START_FLOW_OUT: &str = "control.stateStartFlowOut";

pub const KEY_LEASE_TOKEN: &str = "lease.token";

pub const KEY_HISTORY_FLOW_OUT: &str = "history.flowOut";

pub const KEY_TREND_SLOPE: &str = "trend.slopePerHour";
pub const KEY_TREND_STD_ERROR: &str = "trend.stdError";

pub fn reading_key(location: &str, position: &str) -> String {
    format!("reading.{location}.{position}")
}

pub fn alert_streak_key(kind: &str) -> String {
    format!("alert.streak.{kind}")
}
