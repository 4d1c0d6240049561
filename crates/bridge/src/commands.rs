//! Chat commands. Read-only reports are open to anyone; control commands
//! require an authorized chat, and relay/earth-rod changes additionally
//! require maintenance mode to be on in the device document.

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{Config, Thresholds};
use crate::store::{Document, DeviceReading, StateStore};
use crate::telegram::{parse_command, BotApi, Messenger, Update};

const HELP: &str = "Transformer Safety Bot ready.\n\
/status\n\
/maintenance_on /maintenance_off\n\
/relay_open /relay_close\n\
/earthrod_on /earthrod_off\n\
/temp";

const UNAUTHORIZED: &str = "Unauthorized";
const NEED_MAINTENANCE: &str = "Enable maintenance mode first.";

// ---------------------------------------------------------------------------
// Command catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    Temp,
    MaintenanceOn,
    MaintenanceOff,
    RelayOpen,
    RelayClose,
    EarthRodOn,
    EarthRodOff,
}

impl Command {
    /// Case-insensitive, like Telegram's own command matching.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "status" => Self::Status,
            "temp" => Self::Temp,
            "maintenance_on" => Self::MaintenanceOn,
            "maintenance_off" => Self::MaintenanceOff,
            "relay_open" => Self::RelayOpen,
            "relay_close" => Self::RelayClose,
            "earthrod_on" => Self::EarthRodOn,
            "earthrod_off" => Self::EarthRodOff,
            _ => return None,
        })
    }

    fn needs_auth(self) -> bool {
        !matches!(self, Self::Start | Self::Status | Self::Temp)
    }

    fn needs_maintenance(self) -> bool {
        matches!(
            self,
            Self::RelayOpen | Self::RelayClose | Self::EarthRodOn | Self::EarthRodOff
        )
    }
}

// ---------------------------------------------------------------------------
// Handling
// ---------------------------------------------------------------------------

/// Execute one command for `chat_id` and return the reply text.
pub async fn handle<S: StateStore>(
    cmd: Command,
    chat_id: i64,
    store: &S,
    authorized: &[i64],
    t: &Thresholds,
) -> Result<String> {
    if cmd.needs_auth() && !authorized.contains(&chat_id) {
        info!(chat_id, ?cmd, "rejected unauthorized command");
        return Ok(UNAUTHORIZED.to_string());
    }

    let (partial, reply) = match cmd {
        Command::Start => return Ok(HELP.to_string()),
        Command::Status => {
            let doc = store.read().await?;
            return Ok(status_report(&DeviceReading::from_document(&doc), t));
        }
        Command::Temp => {
            let doc = store.read().await?;
            return Ok(temp_report(&DeviceReading::from_document(&doc), t));
        }
        Command::MaintenanceOn => (fields(&[("maintenance_mode", 1)]), "Maintenance mode ENABLED"),
        Command::MaintenanceOff => (
            fields(&[("maintenance_mode", 0)]),
            "Maintenance mode DISABLED",
        ),
        Command::RelayOpen => (
            fields(&[("relay_on", 0), ("relay_status", 0)]),
            "Relay opened (circuit open).",
        ),
        Command::RelayClose => (
            fields(&[("relay_on", 1), ("relay_status", 1)]),
            "Relay closed (circuit closed).",
        ),
        Command::EarthRodOn => (fields(&[("earth_rod_status", 1)]), "Earth rod ENGAGED (manual)."),
        Command::EarthRodOff => (
            fields(&[("earth_rod_status", 0)]),
            "Earth rod RETRACTED (manual).",
        ),
    };

    if cmd.needs_maintenance() {
        let doc = store.read().await?;
        if !DeviceReading::from_document(&doc).maintenance_mode {
            return Ok(NEED_MAINTENANCE.to_string());
        }
    }

    store.write(partial).await?;
    info!(chat_id, ?cmd, "control command applied");
    Ok(reply.to_string())
}

/// The device firmware expects 0/1 integers, not JSON booleans.
fn fields(pairs: &[(&str, i64)]) -> Document {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), Value::from(*value)))
        .collect()
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

fn yes_no(b: bool) -> &'static str {
    if b {
        "YES"
    } else {
        "NO"
    }
}

fn temperature_text(temperature_c: f64, t: &Thresholds) -> String {
    let mut s = format!("{temperature_c:.1} °C");
    if temperature_c >= t.temperature_c {
        s.push_str(" (HIGH!)");
    }
    s
}

pub fn status_report(r: &DeviceReading, t: &Thresholds) -> String {
    let distance = match r.distance_m() {
        Some(m) => format!("{m:.2} m"),
        None => "N/A".to_string(),
    };
    let current = match r.current_a {
        Some(a) => format!("{a:.2} A"),
        None => "N/A".to_string(),
    };
    let temperature = match r.temperature_c {
        Some(c) => temperature_text(c, t),
        None => "N/A".to_string(),
    };

    [
        "📡 Transformer Status".to_string(),
        format!("Distance: {distance}"),
        format!("Human detected: {}", yes_no(r.human_detected)),
        format!("Current: {current}"),
        format!("Temperature: {temperature}"),
        format!("Overcurrent: {}", yes_no(r.current_fault)),
        format!("Relay (closed): {}", yes_no(r.relay_closed)),
        format!("Earth rod engaged: {}", yes_no(r.earth_rod_engaged)),
        format!(
            "Maintenance mode: {}",
            if r.maintenance_mode { "ON" } else { "OFF" }
        ),
    ]
    .join("\n")
}

pub fn temp_report(r: &DeviceReading, t: &Thresholds) -> String {
    match r.temperature_c {
        Some(c) => format!("🌡 Temperature: {}", temperature_text(c, t)),
        None => "No temperature data.".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

/// Handle the commands in one batch of updates, replying to each. Returns
/// the offset to request next. Commands addressed to a bot other than
/// `bot_username` are skipped.
pub async fn process_updates<S: StateStore, M: Messenger>(
    updates: Vec<Update>,
    offset: i64,
    messenger: &M,
    store: &S,
    config: &Config,
    bot_username: &str,
) -> i64 {
    let mut next = offset;
    for update in updates {
        next = next.max(update.update_id + 1);

        let Some(message) = update.message else {
            continue;
        };
        let Some(cmd) = message
            .text
            .as_deref()
            .and_then(|text| parse_command(text, bot_username))
            .and_then(Command::parse)
        else {
            continue;
        };
        let chat_id = message.chat.id;

        let reply = match handle(
            cmd,
            chat_id,
            store,
            &config.telegram.authorized_chat_ids,
            &config.thresholds,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(chat_id, ?cmd, "command failed: {e:#}");
                continue;
            }
        };

        if let Err(e) = messenger.send_message(chat_id, &reply).await {
            warn!(chat_id, ?cmd, "reply failed: {e}");
        }
    }
    next
}

/// Long-poll Telegram forever, dispatching commands as they arrive.
pub async fn dispatch<S: StateStore>(
    api: &BotApi,
    store: &S,
    config: &Config,
    bot_username: &str,
) {
    let mut offset: i64 = 0;
    let retry = config.poll.interval();

    info!(bot = bot_username, "command dispatcher started");

    loop {
        match api
            .get_updates(offset, config.telegram.long_poll_timeout_sec)
            .await
        {
            Ok(updates) => {
                offset =
                    process_updates(updates, offset, api, store, config, bot_username).await;
            }
            Err(e) => {
                warn!("getUpdates failed: {e}. retrying...");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
