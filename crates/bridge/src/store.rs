//! Access to the device document in the Firebase Realtime Database, plus the
//! decoding rules that turn its loosely-typed fields into a [`DeviceReading`].

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::future::Future;

use crate::config::FirebaseConfig;

/// Flat key/value document as stored remotely.
pub type Document = Map<String, Value>;

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

pub trait StateStore {
    /// Fetch the whole document; an absent document reads as empty.
    fn read(&self) -> impl Future<Output = Result<Document>> + Send;

    /// Merge `partial` into the document, leaving unspecified keys alone.
    fn write(&self, partial: Document) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// Firebase REST implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FirebaseStore {
    http: reqwest::Client,
    url: String,
    auth: Option<String>,
}

impl FirebaseStore {
    pub fn new(http: reqwest::Client, cfg: &FirebaseConfig, auth: Option<String>) -> Self {
        let url = format!(
            "{}/{}.json",
            cfg.database_url.trim_end_matches('/'),
            cfg.root.trim().trim_matches('/')
        );
        Self { http, url, auth }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let req = self.http.request(method, &self.url);
        match &self.auth {
            Some(token) => req.query(&[("auth", token)]),
            None => req,
        }
    }
}

impl StateStore for FirebaseStore {
    async fn read(&self) -> Result<Document> {
        let response = self
            .request(reqwest::Method::GET)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("GET {} returned {status}: {body}", self.url);
        }

        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("Unable to deserialize document. Body was: \"{body}\""))?;
        Ok(match value {
            Value::Object(map) => map,
            _ => Document::new(),
        })
    }

    async fn write(&self, partial: Document) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH)
            .json(&partial)
            .send()
            .await
            .with_context(|| format!("PATCH {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("PATCH {} returned {status}: {body}", self.url);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Field decoding
// ---------------------------------------------------------------------------

/// Interpret a loosely-typed flag: booleans pass through, any number is
/// true when nonzero, everything else (including absence) is `default`.
pub fn coerce_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => default,
    }
}

/// Numeric reading, or `None` when the field is absent or not a number.
/// Booleans are flags, never readings: `true` is not 1 here.
pub fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

/// One decoded snapshot of the device document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceReading {
    pub distance_cm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub current_a: Option<f64>,
    pub human_detected: bool,
    pub current_fault: bool,
    pub relay_closed: bool,
    pub earth_rod_engaged: bool,
    pub maintenance_mode: bool,
}

impl DeviceReading {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            distance_cm: number(doc.get("distance_cm")),
            temperature_c: number(doc.get("temperature_c")),
            current_a: number(doc.get("current_a")),
            human_detected: coerce_bool(doc.get("human_detected"), false),
            current_fault: coerce_bool(doc.get("current_fault"), false),
            relay_closed: coerce_bool(doc.get("relay_status"), false),
            earth_rod_engaged: coerce_bool(doc.get("earth_rod_status"), false),
            maintenance_mode: coerce_bool(doc.get("maintenance_mode"), false),
        }
    }

    /// Distance in meters, only for a positive reading.
    pub fn distance_m(&self) -> Option<f64> {
        self.distance_cm.filter(|d| *d > 0.0).map(|d| d / 100.0)
    }
}

// ---------------------------------------------------------------------------
// In-memory store for tests
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
