//! TOML settings file loading and validation. Every key has a default, so a
//! missing file yields the stock configuration; secrets come from the
//! environment and never live in this file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub firebase: FirebaseConfig,
    pub thresholds: Thresholds,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_url: String,
    pub authorized_chat_ids: Vec<i64>,
    pub long_poll_timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    pub database_url: String,
    /// Path of the device document inside the database.
    pub root: String,
}

/// Alert limits. These must match the values flashed into the device.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub current_a: f64,
    pub temperature_c: f64,
    pub warning_zone_cm: f64,
    pub danger_zone_cm: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_sec: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            authorized_chat_ids: Vec::new(),
            long_poll_timeout_sec: 30,
        }
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            database_url: "https://transformer-accidents-default-rtdb.firebaseio.com".to_string(),
            root: "transformer_safety".to_string(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            current_a: 2.0,
            temperature_c: 50.0,
            warning_zone_cm: 1000.0,
            danger_zone_cm: 500.0,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_sec: 2 }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }
}

/// Telegram rejects long-poll timeouts above this many seconds.
const MAX_LONG_POLL_SEC: u64 = 50;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all settings. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_endpoints(&mut errors);
        self.validate_thresholds(&mut errors);
        self.validate_chats(&mut errors);

        if self.poll.interval_sec == 0 {
            errors.push("poll.interval_sec must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_endpoints(&self, errors: &mut Vec<String>) {
        for (key, url) in [
            ("telegram.api_url", &self.telegram.api_url),
            ("firebase.database_url", &self.firebase.database_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("{key} '{url}' must start with http:// or https://"));
            }
        }

        if self.firebase.root.trim().trim_matches('/').is_empty() {
            errors.push("firebase.root is empty".to_string());
        }

        if self.telegram.long_poll_timeout_sec > MAX_LONG_POLL_SEC {
            errors.push(format!(
                "telegram.long_poll_timeout_sec {} exceeds {MAX_LONG_POLL_SEC}",
                self.telegram.long_poll_timeout_sec
            ));
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let t = &self.thresholds;
        for (key, value) in [
            ("current_a", t.current_a),
            ("temperature_c", t.temperature_c),
            ("warning_zone_cm", t.warning_zone_cm),
            ("danger_zone_cm", t.danger_zone_cm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("thresholds.{key} must be positive, got {value}"));
            }
        }

        if t.danger_zone_cm >= t.warning_zone_cm {
            errors.push(format!(
                "thresholds.danger_zone_cm ({}) must be less than warning_zone_cm ({})",
                t.danger_zone_cm, t.warning_zone_cm
            ));
        }
    }

    fn validate_chats(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<i64> = HashSet::new();
        for id in &self.telegram.authorized_chat_ids {
            if *id == 0 {
                errors.push("telegram.authorized_chat_ids contains 0".to_string());
            } else if !seen.insert(*id) {
                errors.push(format!("telegram.authorized_chat_ids: duplicate chat id {id}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML settings file. A file that does not
/// exist yields the defaults.
pub fn load(path: &str) -> Result<Config> {
    let config: Config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Config::default()
    };
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

pub struct Secrets {
    pub telegram_token: String,
    /// Sent as the REST `auth` parameter when present.
    pub firebase_auth: Option<String>,
}

/// Resolve secrets through `lookup` (the process environment in `main`).
/// Blank values count as unset.
pub fn secrets(lookup: impl Fn(&str) -> Option<String>) -> Result<Secrets> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    Ok(Secrets {
        telegram_token: get("TELEGRAM_TOKEN").context("TELEGRAM_TOKEN must be set")?,
        firebase_auth: get("FIREBASE_AUTH"),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
