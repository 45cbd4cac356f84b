//! Site identity read from (or minted for) a fresh browser session.

use crate::error::AppResult;
use crate::payload::{SessionIds, DEFAULT_PAGE_ID};
use crate::session::ExecutionSession;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use url::form_urlencoded;
use uuid::Uuid;

/// Cookies carried over verbatim when the site set them
const PASSTHROUGH_COOKIES: [&str; 12] = [
    "ibusite",
    "ibugroup",
    "ibu_country",
    "ibu_cookie_strict",
    "ibulanguage",
    "ibulocale",
    "cookiePricesDisplayed",
    "_RGUID",
    "_RSG",
    "_RDG",
    "_RF1",
    "ibu_flt_pref_cfg",
];

const COOKIE_SCRIPT: &str = r#"(() => {
  const cookies = {};
  document.cookie.split(';').forEach((pair) => {
    const index = pair.indexOf('=');
    if (index < 0) return;
    const name = pair.slice(0, index).trim();
    const value = pair.slice(index + 1).trim();
    if (!name || !value) return;
    try {
      cookies[name] = decodeURIComponent(value);
    } catch (err) {
      cookies[name] = value;
    }
  });
  return cookies;
})()"#;

#[derive(Debug, Clone, PartialEq)]
pub struct SiteIdentity {
    /// `GUID` cookie, the client id
    pub guid: String,
    /// `UBT_VID` cookie, the visitor id
    pub ubt_vid: String,
    /// Decoded `_combined` cookie, in cookie order
    pub combined: Vec<(String, String)>,
    pub abtest_user_id: String,
    pub passthrough: Vec<(String, String)>,
}

impl SiteIdentity {
    /// Build from the page's cookies, minting whatever is missing
    pub fn from_cookies(cookies: &HashMap<String, String>) -> Self {
        let get = |name: &str| cookies.get(name).filter(|v| !v.is_empty()).cloned();

        let combined = match get("_combined") {
            Some(raw) => parse_combined(&raw),
            None => generated_combined(),
        };

        SiteIdentity {
            guid: get("GUID").unwrap_or_else(SessionIds::generate_client_id),
            ubt_vid: get("UBT_VID").unwrap_or_else(SessionIds::generate_visitor_id),
            combined,
            abtest_user_id: get("_abtest_userid").unwrap_or_else(|| Uuid::new_v4().to_string()),
            passthrough: PASSTHROUGH_COOKIES
                .iter()
                .filter_map(|name| get(name).map(|v| (name.to_string(), v)))
                .collect(),
        }
    }

    fn combined_value(&self, key: &str) -> Option<&str> {
        self.combined
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn page_id(&self) -> &str {
        self.combined_value("pageId").unwrap_or(DEFAULT_PAGE_ID)
    }

    pub fn transaction_id(&self) -> String {
        self.combined_value("transactionId")
            .map(str::to_string)
            .unwrap_or_else(SessionIds::generate_transaction_id)
    }

    /// Session ids for one search; the batch id is always new
    pub fn session_ids(&self) -> SessionIds {
        SessionIds {
            batch_id: Uuid::new_v4().to_string(),
            transaction_id: self.transaction_id(),
            client_id: self.guid.clone(),
            visitor_id: self.ubt_vid.clone(),
            page_id: self.page_id().to_string(),
            client_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn cookie_header(&self) -> String {
        let mut parts = vec![
            format!("GUID={}", self.guid),
            format!("UBT_VID={}", self.ubt_vid),
            format!("_abtest_userid={}", self.abtest_user_id),
        ];
        parts.extend(self.passthrough.iter().map(|(k, v)| format!("{}={}", k, v)));

        let combined: String = self
            .combined
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        parts.push(format!(
            "_combined={}",
            form_urlencoded::byte_serialize(combined.as_bytes()).collect::<String>()
        ));

        parts.join("; ")
    }

    /// `x-ctx-*` context and tracking headers
    pub fn context_headers(&self, region: &str, locale: &str, currency: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-ctx-country", region.to_ascii_uppercase()),
            ("x-ctx-currency", currency.to_ascii_uppercase()),
            ("x-ctx-locale", locale.to_string()),
            ("x-ctx-ubt-pageid", self.page_id().to_string()),
            ("x-ctx-ubt-pvid", "1".to_string()),
            ("x-ctx-ubt-sid", "1".to_string()),
            ("x-ctx-ubt-vid", self.ubt_vid.clone()),
            ("x-ctx-user-recognize", "NON_EU".to_string()),
        ]
    }
}

/// `transactionId=...&pageId=...`, possibly still percent-encoded
fn parse_combined(raw: &str) -> Vec<(String, String)> {
    let decoded = if raw.contains('=') {
        raw.to_string()
    } else {
        form_urlencoded::parse(format!("v={}", raw).as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };
    form_urlencoded::parse(decoded.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn generated_combined() -> Vec<(String, String)> {
    vec![
        ("transactionId".to_string(), SessionIds::generate_transaction_id()),
        ("pageId".to_string(), DEFAULT_PAGE_ID.to_string()),
        ("initPageId".to_string(), DEFAULT_PAGE_ID.to_string()),
        ("usedistributionchannels".to_string(), "False".to_string()),
    ]
}

/// Visit the site root so it sets its cookies, then read them back
pub async fn bootstrap(
    session: &mut dyn ExecutionSession,
    origin: &str,
    wait: Duration,
) -> AppResult<SiteIdentity> {
    session.navigate(origin).await?;
    tokio::time::sleep(wait).await;

    let value = session.evaluate(COOKIE_SCRIPT).await?;
    let cookies: HashMap<String, String> = serde_json::from_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable cookie jar; minting a fresh identity");
        HashMap::new()
    });

    let identity = SiteIdentity::from_cookies(&cookies);
    info!(
        origin = %origin,
        cookies = cookies.len(),
        guid = %identity.guid,
        ubt_vid = %identity.ubt_vid,
        "Site identity ready"
    );
    Ok(identity)
}
