//! Alert loop: polls the device document and notifies every authorized chat
//! when a watched condition changes.
//!
//! Each condition is edge-triggered against [`AlertState`]:
//!
//! ```text
//! zone:        none ──▶ warning ──▶ danger        (any change into warning
//!                ▲         │          │            or danger notifies; a
//!                └─────────┴──────────┘ clear      return to none notifies)
//! current:     normal ──[> limit]──▶ fault ──[<= limit]──▶ normal
//! temperature: normal ──[>= limit]─▶ high  ──[<  limit]──▶ normal
//! ```
//!
//! A missing or non-numeric reading neither sets nor clears a latch.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Thresholds;
use crate::state::{AlertState, Zone};
use crate::store::{DeviceReading, StateStore};
use crate::telegram::{broadcast, Delivery, Messenger};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Zone for a distance reading. Danger is checked first; missing or
/// non-positive readings mean nobody is near.
pub fn classify(distance_cm: Option<f64>, t: &Thresholds) -> Zone {
    match distance_cm {
        Some(d) if d > 0.0 && d <= t.danger_zone_cm => Zone::Danger,
        Some(d) if d > 0.0 && d <= t.warning_zone_cm => Zone::Warning,
        _ => Zone::None,
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    Warning { distance_m: f64 },
    Danger { distance_m: f64 },
    AreaClear,
    Overcurrent { current_a: f64 },
    CurrentNormal,
    HighTemp { temperature_c: f64 },
    TempNormal,
}

impl Alert {
    pub fn message(&self) -> String {
        match self {
            Alert::Warning { distance_m } => {
                format!("⚠ Warning: human at {distance_m:.2} m — Buzzer ON")
            }
            Alert::Danger { distance_m } => format!(
                "🚨 DANGER: human at {distance_m:.2} m — Relay OPEN & Earth rod ENGAGED"
            ),
            Alert::AreaClear => {
                "✅ Area clear: no human detected in warning/danger zone.".to_string()
            }
            Alert::Overcurrent { current_a } => {
                format!("⚡ Fault: Overcurrent {current_a:.2} A — Relay opened")
            }
            Alert::CurrentNormal => "✅ Current back to normal.".to_string(),
            Alert::HighTemp { temperature_c } => format!("🔥 HIGH TEMP: {temperature_c:.1} °C"),
            Alert::TempNormal => "✅ Temperature back to normal.".to_string(),
        }
    }
}

impl AlertState {
    /// Compare a fresh reading with the last notified state, record any
    /// transitions, and return the alerts to send (zone, current, then
    /// temperature).
    pub fn evaluate(&mut self, reading: &DeviceReading, t: &Thresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        match (classify(reading.distance_cm, t), reading.distance_m()) {
            (Zone::Warning, Some(m)) if self.human_zone != Zone::Warning => {
                alerts.push(Alert::Warning { distance_m: m });
                self.human_zone = Zone::Warning;
                self.distance_m = Some(m);
            }
            (Zone::Danger, Some(m)) if self.human_zone != Zone::Danger => {
                alerts.push(Alert::Danger { distance_m: m });
                self.human_zone = Zone::Danger;
                self.distance_m = Some(m);
            }
            (Zone::None, _) if self.human_zone != Zone::None => {
                alerts.push(Alert::AreaClear);
                self.human_zone = Zone::None;
                self.distance_m = None;
            }
            _ => {}
        }

        if let Some(current_a) = reading.current_a {
            if current_a > t.current_a && !self.fault {
                alerts.push(Alert::Overcurrent { current_a });
                self.fault = true;
            } else if current_a <= t.current_a && self.fault {
                alerts.push(Alert::CurrentNormal);
                self.fault = false;
            }
        }

        if let Some(temperature_c) = reading.temperature_c {
            if temperature_c >= t.temperature_c && !self.temp_high {
                alerts.push(Alert::HighTemp { temperature_c });
                self.temp_high = true;
            } else if temperature_c < t.temperature_c && self.temp_high {
                alerts.push(Alert::TempNormal);
                self.temp_high = false;
            }
        }

        alerts
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the alert loop. Intended to be `tokio::spawn`-ed from main; returns
/// only when a store read fails, which ends alerting for this process.
pub async fn run<S: StateStore, M: Messenger>(
    store: &S,
    messenger: &M,
    recipients: &[i64],
    thresholds: Thresholds,
    interval: Duration,
    state: &mut AlertState,
) -> Result<()> {
    info!(
        recipients = recipients.len(),
        interval_ms = interval.as_millis() as u64,
        "alert loop started"
    );

    loop {
        let doc = store.read().await.context("alert loop: store read failed")?;
        let reading = DeviceReading::from_document(&doc);

        for alert in state.evaluate(&reading, &thresholds) {
            info!(
                ?alert,
                zone = state.human_zone.as_str(),
                fault = state.fault,
                temp_high = state.temp_high,
                "condition changed"
            );
            for (chat_id, outcome) in broadcast(messenger, recipients, &alert.message()).await {
                if let Delivery::Failed(reason) = outcome {
                    warn!(chat_id, %reason, "alert delivery failed");
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
