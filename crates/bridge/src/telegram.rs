use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Bot API message types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) ok: bool,
    pub(crate) result: Option<T>,
    pub(crate) description: Option<String>,
    pub(crate) error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// The bot's own account, from `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub username: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bot api error {code}: {description}")]
    Api { code: i64, description: String },
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Outbound side of the bot, split out so alerting and replies can be
/// exercised without the network.
pub trait Messenger {
    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<(), TelegramError>> + Send;
}

#[derive(Clone)]
pub struct BotApi {
    http: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(http: reqwest::Client, api_url: &str, token: &str) -> Self {
        Self {
            http,
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        }
    }

    async fn call<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, TelegramError> {
        let mut request = self.http.post(format!("{}/{method}", self.base)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let envelope: Envelope<T> = request.send().await?.json().await?;

        match envelope {
            Envelope {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(TelegramError::Api {
                code: other.error_code.unwrap_or_default(),
                description: other
                    .description
                    .unwrap_or_else(|| format!("{method} returned no result")),
            }),
        }
    }

    /// Identify the bot, so commands addressed to other bots can be told apart.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({}), None).await
    }

    /// Long-poll for updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_sec: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let body = GetUpdates {
            offset,
            timeout: timeout_sec,
            allowed_updates: &["message"],
        };
        // Leave headroom over the server-side wait.
        let timeout = Duration::from_secs(timeout_sec + 10);
        self.call("getUpdates", &body, Some(timeout)).await
    }
}

impl Messenger for BotApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let body = SendMessage { chat_id, text };
        let _sent: serde_json::Value = self.call("sendMessage", &body, None).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Delivered,
    Failed(String),
}

/// Send `text` to every recipient in turn. A failure for one chat never
/// stops delivery to the rest; the caller decides how to report it.
pub async fn broadcast<M: Messenger>(
    messenger: &M,
    recipients: &[i64],
    text: &str,
) -> Vec<(i64, Delivery)> {
    let mut results = Vec::with_capacity(recipients.len());
    for &chat_id in recipients {
        let outcome = match messenger.send_message(chat_id, text).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => Delivery::Failed(e.to_string()),
        };
        results.push((chat_id, outcome));
    }
    results
}

// ---------------------------------------------------------------------------
// Command text helpers
// ---------------------------------------------------------------------------

/// Extract the command name from "/status" or "/status@SomeBot args".
/// A command addressed to a different bot yields `None`; bot usernames
/// compare case-insensitively.
pub(crate) fn parse_command<'a>(text: &'a str, bot_username: &str) -> Option<&'a str> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = match name.split_once('@') {
        Some((n, bot)) if bot.eq_ignore_ascii_case(bot_username) => n,
        Some(_) => return None,
        None => name,
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

// ---------------------------------------------------------------------------
// Recording messenger for tests
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::recording::RecordingMessenger;
    use super::*;

    // -- parse_command ------------------------------------------------------

    const BOT: &str = "SafetyBot";

    #[test]
    fn parse_command_plain() {
        assert_eq!(parse_command("/status", BOT), Some("status"));
    }

    #[test]
    fn parse_command_with_own_suffix() {
        assert_eq!(parse_command("/relay_open@SafetyBot", BOT), Some("relay_open"));
        assert_eq!(parse_command("/relay_open@safetybot", BOT), Some("relay_open"));
    }

    #[test]
    fn parse_command_for_other_bot_is_ignored() {
        assert_eq!(parse_command("/relay_open@SomeOtherBot", BOT), None);
        assert_eq!(parse_command("/status@", BOT), None);
    }

    #[test]
    fn parse_command_ignores_arguments_and_whitespace() {
        assert_eq!(parse_command("  /temp now please", BOT), Some("temp"));
    }

    #[test]
    fn parse_command_not_a_command() {
        assert_eq!(parse_command("status", BOT), None);
        assert_eq!(parse_command("hello /status", BOT), None);
    }

    #[test]
    fn parse_command_empty() {
        assert_eq!(parse_command("", BOT), None);
        assert_eq!(parse_command("/", BOT), None);
        assert_eq!(parse_command("/@SafetyBot", BOT), None);
    }

    #[test]
    fn parse_command_keeps_case_of_name() {
        assert_eq!(parse_command("/STATUS@SAFETYBOT", BOT), Some("STATUS"));
    }

    // -- Update deserialization ---------------------------------------------

    #[test]
    fn envelope_with_updates_deserializes() {
        let json = r#"{"ok":true,"result":[
            {"update_id":7,"message":{"message_id":1,"date":0,"chat":{"id":5232865054,"type":"private"},"text":"/status"}},
            {"update_id":8,"edited_message":{"message_id":1,"date":0,"chat":{"id":1,"type":"private"}}}
        ]}"#;
        let env: Envelope<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(env.ok);
        let updates = env.result.unwrap();
        assert_eq!(updates.len(), 2);
        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.chat.id, 5232865054);
        assert_eq!(msg.text.as_deref(), Some("/status"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn error_envelope_deserializes() {
        let json = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let env: Envelope<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(!env.ok);
        assert_eq!(env.error_code, Some(401));
        assert!(env.result.is_none());
    }

    // -- broadcast ----------------------------------------------------------

    #[tokio::test]
    async fn broadcast_reaches_every_recipient() {
        let messenger = RecordingMessenger::default();
        let results = broadcast(&messenger, &[1, 2, 3], "hello").await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, d)| *d == Delivery::Delivered));
        assert_eq!(messenger.sent().len(), 3);
    }

    #[tokio::test]
    async fn broadcast_failure_does_not_stop_others() {
        let messenger = RecordingMessenger {
            failing: [2].into_iter().collect(),
            ..Default::default()
        };
        let results = broadcast(&messenger, &[1, 2, 3], "hello").await;

        assert_eq!(results[0], (1, Delivery::Delivered));
        assert!(matches!(results[1], (2, Delivery::Failed(ref why)) if why.contains("blocked")));
        assert_eq!(results[2], (3, Delivery::Delivered));
        let chats: Vec<i64> = messenger.sent().iter().map(|(c, _)| *c).collect();
        assert_eq!(chats, vec![1, 3]);
    }

    #[tokio::test]
    async fn broadcast_no_recipients_sends_nothing() {
        let messenger = RecordingMessenger::default();
        assert!(broadcast(&messenger, &[], "hello").await.is_empty());
        assert!(messenger.sent().is_empty());
    }

    // -- BotApi against a local mock ----------------------------------------

    mod bot_api {
        use super::*;
        use axum::extract::State;
        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::{json, Value};
        use std::sync::{Arc, Mutex};

        type Seen = Arc<Mutex<Vec<Value>>>;

        async fn spawn(seen: Seen) -> String {
            let app = Router::new()
                .route(
                    "/botTOKEN/sendMessage",
                    post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                        let blocked = body["chat_id"] == json!(99);
                        seen.lock().unwrap().push(body);
                        if blocked {
                            Json(json!({
                                "ok": false,
                                "error_code": 403,
                                "description": "Forbidden"
                            }))
                        } else {
                            Json(json!({"ok": true, "result": {"message_id": 1}}))
                        }
                    }),
                )
                .route(
                    "/botTOKEN/getUpdates",
                    post(|Json(body): Json<Value>| async move {
                        let offset = body["offset"].as_i64().unwrap_or(0);
                        Json(json!({"ok": true, "result": [
                            {"update_id": offset, "message": {"chat": {"id": 42}, "text": "/temp"}}
                        ]}))
                    }),
                )
                .route(
                    "/botTOKEN/getMe",
                    post(|| async {
                        Json(json!({"ok": true, "result": {
                            "id": 1, "is_bot": true, "username": "SafetyBot"
                        }}))
                    }),
                )
                .with_state(seen);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{addr}/")
        }

        #[tokio::test]
        async fn send_message_posts_chat_and_text() {
            let seen = Seen::default();
            let api = BotApi::new(reqwest::Client::new(), &spawn(seen.clone()).await, "TOKEN");

            api.send_message(42, "hi").await.unwrap();

            let bodies = seen.lock().unwrap().clone();
            assert_eq!(bodies, vec![json!({"chat_id": 42, "text": "hi"})]);
        }

        #[tokio::test]
        async fn send_message_api_error_is_typed() {
            let seen = Seen::default();
            let api = BotApi::new(reqwest::Client::new(), &spawn(seen).await, "TOKEN");

            let err = api.send_message(99, "hi").await.unwrap_err();
            assert!(matches!(err, TelegramError::Api { code: 403, .. }), "got {err}");
        }

        #[tokio::test]
        async fn get_updates_passes_offset() {
            let api = BotApi::new(reqwest::Client::new(), &spawn(Seen::default()).await, "TOKEN");

            let updates = api.get_updates(17, 0).await.unwrap();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].update_id, 17);
            assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 42);
        }

        #[tokio::test]
        async fn get_me_returns_username() {
            let api = BotApi::new(reqwest::Client::new(), &spawn(Seen::default()).await, "TOKEN");

            let me = api.get_me().await.unwrap();
            assert_eq!(me.username.as_deref(), Some("SafetyBot"));
        }
    }
}
