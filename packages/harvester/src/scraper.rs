//! Direct search: sign a request in a live page and call the streaming
//! search API from inside that page.

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::identity::{self, SiteIdentity};
use crate::payload::{build, CanonicalPayload};
use crate::search_url::SearchUrl;
use crate::session::{close_session, ExecutionSession, SessionFactory};
use crate::signing::{TokenPipeline, TokenSet};
use crate::sse::{decode_body, DecodedBody};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const PAGE_TOKEN_SCRIPT: &str = r#"(() => {
  try {
    const token = window.__token || window.token || window._token
      || localStorage.getItem('token') || localStorage.getItem('__token');
    return typeof token === 'string' ? token : '';
  } catch (err) {
    return '';
  }
})()"#;

/// Tokens as reported back to the caller of a direct search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeTokens {
    #[serde(flatten)]
    pub signed: TokenSet,
    /// Page-held session token, empty when the page has none
    pub token: String,
    pub batch_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutcome {
    pub status_code: u16,
    pub body: String,
    pub decoded: DecodedBody,
    pub tokens: ScrapeTokens,
}

/// What the in-page fetch reports
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: Option<u16>,
    body: Option<String>,
    error: Option<String>,
}

pub struct Scraper {
    factory: Arc<dyn SessionFactory>,
    settings: Arc<Settings>,
    pipeline: TokenPipeline,
}

impl Scraper {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: Arc<Settings>) -> Self {
        let pipeline = TokenPipeline::new(Arc::clone(&factory), Arc::clone(&settings));
        Self {
            factory,
            settings,
            pipeline,
        }
    }

    #[instrument(skip(self))]
    pub async fn scrape(&self, url: &str) -> AppResult<ScrapeOutcome> {
        let target = SearchUrl::parse(url)?;

        let mut session = self
            .factory
            .create_session()
            .await
            .context("failed to start execution session")?;

        let result = self.scrape_on(session.as_mut(), &target).await;
        close_session(session, "scrape").await;
        result
    }

    async fn scrape_on(
        &self,
        session: &mut dyn ExecutionSession,
        target: &SearchUrl,
    ) -> AppResult<ScrapeOutcome> {
        let wait = self.settings.signing.bootstrap_wait();
        let identity = identity::bootstrap(session, &target.origin(), wait).await?;

        session.navigate(&target.url).await?;
        tokio::time::sleep(wait).await;

        let ids = identity.session_ids();
        let payload = build(&target.request, &ids);
        let signed = self.pipeline.derive_with_session(&*session, &payload).await?;

        let token = match session.evaluate(PAGE_TOKEN_SCRIPT).await? {
            Value::String(s) => s,
            _ => String::new(),
        };
        if token.is_empty() {
            warn!("Page exposes no session token");
        }

        let tokens = ScrapeTokens {
            signed,
            token,
            batch_id: ids.batch_id.clone(),
        };
        let headers = request_headers(target, &identity, &tokens);
        let api_url = format!("{}{}", target.origin(), self.settings.signing.search_api_path);

        let script = fetch_script(&api_url, &headers, &payload)?;
        let response: ApiResponse = serde_json::from_value(session.evaluate(&script).await?)?;

        let body = match (response.body, response.error) {
            (Some(body), _) => body,
            (None, Some(error)) => return Err(AppError::UpstreamRequest(error)),
            (None, None) => {
                return Err(AppError::UpstreamRequest(
                    "search API returned no body".to_string(),
                ))
            }
        };
        let status_code = response.status.unwrap_or(0);
        info!(
            api_url = %api_url,
            status_code,
            body_chars = body.chars().count(),
            "Search API responded"
        );

        Ok(ScrapeOutcome {
            status_code,
            decoded: decode_body(&body),
            body,
            tokens,
        })
    }
}

/// Headers for the streaming search call
fn request_headers(
    target: &SearchUrl,
    identity: &SiteIdentity,
    tokens: &ScrapeTokens,
) -> BTreeMap<&'static str, String> {
    let req = &target.request;
    let origin = target.origin();

    let mut headers = BTreeMap::from([
        ("accept", "text/event-stream".to_string()),
        ("accept-language", "en-US,en;q=0.9".to_string()),
        ("content-type", "application/json; charset=utf-8".to_string()),
        ("cookie", identity.cookie_header()),
        ("cookieorigin", origin.clone()),
        ("currency", req.currency.clone()),
        ("locale", req.locale.clone()),
        ("origin", origin),
        ("referer", target.url.clone()),
        ("token", tokens.token.clone()),
        ("w-payload-source", tokens.signed.w_payload_source.clone()),
        ("x-ctx-wclient-req", tokens.signed.x_ctx_header.clone()),
    ]);
    headers.extend(identity.context_headers(&target.region, &req.locale, &req.currency));
    headers
}

fn fetch_script(
    api_url: &str,
    headers: &BTreeMap<&'static str, String>,
    payload: &CanonicalPayload,
) -> AppResult<String> {
    let api_url = Value::from(api_url).to_string();
    let headers = serde_json::to_string(headers)?;
    let body = serde_json::to_string(&serde_json::to_string(payload)?)?;

    Ok(format!(
        r#"(async () => {{
  try {{
    const response = await fetch({api_url}, {{
      method: 'POST',
      credentials: 'include',
      headers: {headers},
      body: {body},
    }});
    return {{ status: response.status, body: await response.text() }};
  }} catch (err) {{
    return {{ error: String(err) }};
  }}
}})()"#
    ))
}
