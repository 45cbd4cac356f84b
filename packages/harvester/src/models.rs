use crate::payload::SessionIdsInput;
use crate::scraper::ScrapeTokens;
use crate::search::SearchInput;
use crate::signing::TokenSet;
use crate::sse::{DecodedBody, SseEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /sign`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub search_request: SearchInput,
    #[serde(default)]
    pub session_ids: Option<SessionIdsInput>,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub tokens: TokenSet,
}

/// Body of `POST /scrape`
#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub status: &'static str,
    pub data: BodyReport,
    pub tokens: ScrapeTokens,
}

/// Body of `POST /scrape-browser`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeBrowserRequest {
    #[serde(default)]
    pub url: String,
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeBrowserResponse {
    pub status: &'static str,
    pub url: String,
    pub status_code: u16,
    #[serde(flatten)]
    pub report: BodyReport,
    /// Epoch milliseconds of the last captured chunk
    pub timestamp: i64,
}

/// A decoded body shaped for clients: events, a JSON document, or raw text
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<SseEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_body_length: Option<usize>,
}

impl BodyReport {
    pub fn new(decoded: DecodedBody, body: &str, preview_chars: usize) -> Self {
        let full_body_length = Some(body.chars().count());
        match decoded {
            DecodedBody::Events(events) => BodyReport {
                event_count: Some(events.len()),
                events: Some(events),
                raw: Some(preview(body, preview_chars)),
                full_body_length,
                ..Default::default()
            },
            DecodedBody::Json(value) => BodyReport {
                data: Some(value),
                ..Default::default()
            },
            DecodedBody::Raw(_) => BodyReport {
                raw: Some(preview(body, preview_chars)),
                full_body_length,
                ..Default::default()
            },
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

/// First `max_chars` characters, with `...` when something was cut
pub fn preview(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}
