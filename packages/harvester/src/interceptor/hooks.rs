//! In-page capture hooks.
//!
//! The install script wraps `window.fetch` and `XMLHttpRequest` so that every
//! request to a URL containing the target substring is mirrored into
//! `window.__harvesterStreams`, keyed by URL. Streamed fetch bodies are read
//! from a clone, chunk by chunk, and the entry is replaced after each chunk;
//! `isComplete` flips only at end of stream. The page's own consumption of
//! the response is untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const INSTALL_TEMPLATE: &str = r#"(() => {
  const target = __TARGET__;
  window.__harvesterStreams = {};
  window.__harvesterRequests = [];
  window.__harvesterOriginalFetch = window.__harvesterOriginalFetch || window.fetch;
  const originalFetch = window.__harvesterOriginalFetch;

  const record = (url, transport) => {
    window.__harvesterRequests.push({ url: String(url), transport, at: Date.now() });
  };
  const store = (entry) => {
    entry.updatedAt = Date.now();
    window.__harvesterStreams[entry.url] = entry;
  };

  window.fetch = async function (...args) {
    const input = args[0];
    const url = typeof input === 'string' ? input : (input && input.url) || String(input);
    record(url, 'fetch');
    const response = await originalFetch.apply(this, args);
    if (url.includes(target) && response.body) {
      const copy = response.clone();
      (async () => {
        const reader = copy.body.getReader();
        const decoder = new TextDecoder('utf-8');
        let body = '';
        try {
          while (true) {
            const { done, value } = await reader.read();
            if (done) break;
            body += decoder.decode(value, { stream: true });
            store({ url, status: response.status, body, isComplete: false, transport: 'fetch' });
          }
          body += decoder.decode();
          store({ url, status: response.status, body, isComplete: true, transport: 'fetch' });
        } catch (err) {
          console.error('[harvester] stream read failed', err);
        }
      })();
    }
    return response;
  };

  const xhr = XMLHttpRequest.prototype;
  window.__harvesterOriginalOpen = window.__harvesterOriginalOpen || xhr.open;
  window.__harvesterOriginalSend = window.__harvesterOriginalSend || xhr.send;
  const originalOpen = window.__harvesterOriginalOpen;
  const originalSend = window.__harvesterOriginalSend;

  xhr.open = function (method, url, ...rest) {
    this.__harvesterUrl = String(url);
    record(url, 'xhr');
    return originalOpen.call(this, method, url, ...rest);
  };
  xhr.send = function (...args) {
    const url = this.__harvesterUrl;
    if (url && url.includes(target)) {
      const capture = (isComplete) => () => {
        store({ url, status: this.status, body: this.responseText || '', isComplete, transport: 'xhr' });
      };
      this.addEventListener('progress', capture(false));
      this.addEventListener('load', capture(true));
    }
    return originalSend.apply(this, args);
  };

  return 'installed';
})()"#;

/// Most recently updated captured stream, or null
pub const SNAPSHOT_SCRIPT: &str = r#"(() => {
  const streams = Object.values(window.__harvesterStreams || {});
  if (streams.length === 0) return null;
  return streams.reduce((a, b) => (b.updatedAt >= a.updatedAt ? b : a));
})()"#;

/// Counts and sizes of everything captured so far
pub const DIAGNOSTIC_SCRIPT: &str = r#"(() => {
  const installed = typeof window.__harvesterStreams === 'object';
  const streams = Object.values(window.__harvesterStreams || {}).map((s) => ({
    url: s.url,
    bodyChars: (s.body || '').length,
    isComplete: !!s.isComplete,
    transport: s.transport,
  }));
  return { installed, requestCount: (window.__harvesterRequests || []).length, streams };
})()"#;

/// Hook installation script capturing URLs that contain `target`
pub fn install_script(target: &str) -> String {
    INSTALL_TEMPLATE.replace("__TARGET__", &Value::from(target).to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Fetch,
    Xhr,
}

/// A response body as mirrored by the hooks
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedStream {
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_complete: bool,
    /// Epoch milliseconds of the last update
    #[serde(default)]
    pub updated_at: f64,
    pub transport: Transport,
}

impl CapturedStream {
    pub fn body_chars(&self) -> usize {
        self.body.chars().count()
    }

    /// Parse the snapshot script's result
    pub fn from_snapshot(value: Value) -> serde_json::Result<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub request_count: usize,
    #[serde(default)]
    pub streams: Vec<StreamSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub url: String,
    pub body_chars: usize,
    pub is_complete: bool,
    pub transport: Option<Transport>,
}
