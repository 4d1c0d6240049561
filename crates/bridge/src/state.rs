//! Last-known alert state. Owned by the alert loop alone and reset on every
//! start, so a condition already active at startup is reported as new.

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Proximity zone of the nearest detected person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    #[default]
    None,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertState {
    /// Zone from the last proximity notification.
    pub human_zone: Zone,
    /// Distance reported with that notification, informational only.
    pub distance_m: Option<f64>,
    /// Overcurrent alert sent and not yet cleared.
    pub fault: bool,
    /// High-temperature alert sent and not yet cleared.
    pub temp_high: bool,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Zone {
    pub fn as_str(self) -> &'static str {
        match self {
            Zone::None => "none",
            Zone::Warning => "warning",
            Zone::Danger => "danger",
        }
    }
}
