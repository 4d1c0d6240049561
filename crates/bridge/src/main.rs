mod alerts;
mod commands;
mod config;
mod state;
mod store;
mod telegram;

use anyhow::{Context, Result};
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use state::AlertState;
use store::FirebaseStore;
use telegram::BotApi;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file + secrets ───────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    let secrets = config::secrets(|key| env::var(key).ok())?;
    let firebase_auth = secrets.firebase_auth;

    if cfg.telegram.authorized_chat_ids.is_empty() {
        warn!("no authorized chat ids configured: alerts go nowhere and controls are locked");
    }

    info!(
        database = %cfg.firebase.database_url,
        root = %cfg.firebase.root,
        authorized = cfg.telegram.authorized_chat_ids.len(),
        firebase_auth = firebase_auth.is_some(),
        "bridge starting"
    );

    // ── Clients ─────────────────────────────────────────────────────
    let http = reqwest::Client::new();
    let store = FirebaseStore::new(http.clone(), &cfg.firebase, firebase_auth);
    let api = BotApi::new(http, &cfg.telegram.api_url, &secrets.telegram_token);
    let me = api.get_me().await.context("getMe failed, check TELEGRAM_TOKEN")?;
    let bot_username = me.username.unwrap_or_default();
    info!(bot = %bot_username, "bot identified");

    // ── Alert loop ──────────────────────────────────────────────────
    let alert_store = store.clone();
    let alert_api = api.clone();
    let recipients = cfg.telegram.authorized_chat_ids.clone();
    let thresholds = cfg.thresholds;
    let interval = cfg.poll.interval();
    tokio::spawn(async move {
        let mut state = AlertState::new();
        if let Err(e) = alerts::run(
            &alert_store,
            &alert_api,
            &recipients,
            thresholds,
            interval,
            &mut state,
        )
        .await
        {
            error!("alert loop stopped: {e:#}");
        }
    });

    // ── Commands ────────────────────────────────────────────────────
    commands::dispatch(&api, &store, &cfg, &bot_username).await;
    Ok(())
}
