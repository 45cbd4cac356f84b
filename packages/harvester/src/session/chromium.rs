//! Chromium-backed sessions using chromiumoxide.
//!
//! Each session is its own browser process with a throwaway profile
//! directory, so concurrent requests never share cookies or page state.

use super::{ExecError, ExecutionSession, SessionFactory};
use crate::config::BrowserSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error text fragments that mean the CDP connection or target is gone
const LOST_MARKERS: [&str; 6] = [
    "closed",
    "connection",
    "websocket",
    "channel",
    "target",
    "no response",
];

pub struct ChromiumFactory {
    settings: BrowserSettings,
}

impl ChromiumFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self, user_agent: Option<&str>, profile_dir: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile_dir)
            .launch_timeout(self.settings.launch_timeout())
            .request_timeout(self.settings.navigation_timeout())
            .args(self.settings.args.iter().cloned());

        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(ua) = user_agent {
            builder = builder.arg(format!("--user-agent={}", ua));
        }

        builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))
    }
}

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn create_session(&self) -> Result<Box<dyn ExecutionSession>> {
        let user_agent = self.settings.user_agents.choose(&mut rand::thread_rng()).cloned();
        let profile_dir = std::env::temp_dir().join(format!("harvester-{}", Uuid::new_v4()));
        let config = self.browser_config(user_agent.as_deref(), &profile_dir)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
        });

        let page = match browser.new_page(self.settings.home_url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                // Half-open session: reap the process before reporting
                if let Err(close_err) = browser.close().await {
                    warn!(error = %close_err, "Failed to close browser after tab error");
                }
                if let Err(wait_err) = browser.wait().await {
                    warn!(error = %wait_err, "Failed to reap browser after tab error");
                }
                handler_task.abort();
                if let Err(rm_err) = tokio::fs::remove_dir_all(&profile_dir).await {
                    warn!(dir = %profile_dir.display(), error = %rm_err, "Failed to remove browser profile");
                }
                return Err(anyhow::Error::new(e).context("failed to open browser tab"));
            }
        };

        info!(
            home_url = %self.settings.home_url,
            user_agent = user_agent.as_deref().unwrap_or("default"),
            "Browser session started"
        );
        tokio::time::sleep(self.settings.session_warmup()).await;

        Ok(Box::new(ChromiumSession {
            page,
            browser,
            handler_task,
            profile_dir,
            settings: self.settings.clone(),
        }))
    }
}

pub struct ChromiumSession {
    page: Page,
    browser: Browser,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
    settings: BrowserSettings,
}

#[async_trait]
impl ExecutionSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ExecError> {
        match tokio::time::timeout(self.settings.navigation_timeout(), self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(classify(e)),
            Err(_) => {
                return Err(ExecError::Script(format!(
                    "navigation to {} timed out after {}ms",
                    url, self.settings.navigation_timeout_ms
                )))
            }
        }
        tokio::time::sleep(self.settings.navigation_settle()).await;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ExecError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ExecError::Script)?;

        let result = self.page.evaluate_expression(params).await.map_err(classify)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumSession {
            page,
            mut browser,
            handler_task,
            profile_dir,
            settings,
        } = *self;
        let mut failures = Vec::new();

        if let Err(e) = page.close().await {
            failures.push(format!("tab close: {e}"));
        }
        tokio::time::sleep(settings.close_delay()).await;

        if let Err(e) = browser.close().await {
            failures.push(format!("browser close: {e}"));
        }
        if let Err(e) = browser.wait().await {
            failures.push(format!("process wait: {e}"));
        }
        handler_task.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&profile_dir).await {
            warn!(dir = %profile_dir.display(), error = %e, "Failed to remove browser profile");
        }
        tokio::time::sleep(settings.drain_delay()).await;

        if failures.is_empty() {
            debug!("Browser session closed");
            Ok(())
        } else {
            Err(anyhow::anyhow!(failures.join("; ")))
        }
    }
}

/// Split CDP failures into a thrown script and a dead environment
fn classify(err: CdpError) -> ExecError {
    if let CdpError::JavascriptException(details) = &err {
        let message = details
            .exception
            .as_ref()
            .and_then(|ex| ex.description.clone())
            .unwrap_or_else(|| details.text.clone());
        return ExecError::Script(message);
    }

    if matches!(
        err,
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
    ) {
        return ExecError::EnvironmentLost(err.to_string());
    }

    let message = err.to_string();
    if is_lost(&message) {
        ExecError::EnvironmentLost(message)
    } else {
        ExecError::Script(message)
    }
}

fn is_lost(message: &str) -> bool {
    // Chrome network errors describe the site, not the session
    if message.contains("net::ERR_") {
        return false;
    }
    let lower = message.to_ascii_lowercase();
    LOST_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_class_messages_mean_environment_lost() {
        assert!(is_lost("WebSocket protocol error: Connection reset without closing handshake"));
        assert!(is_lost("Target closed"));
        assert!(is_lost("channel send error"));
        assert!(!is_lost("Uncaught ReferenceError: signature is not defined"));
    }

    #[test]
    fn unreachable_site_is_not_a_lost_session() {
        for message in [
            "net::ERR_CONNECTION_REFUSED",
            "net::ERR_CONNECTION_RESET",
            "net::ERR_CONNECTION_CLOSED",
            "Navigation failed: net::ERR_NAME_NOT_RESOLVED at https://id.trip.com",
        ] {
            assert!(!is_lost(message), "{}", message);
        }
        assert!(matches!(
            classify(CdpError::ChromeMessage("net::ERR_CONNECTION_REFUSED".to_string())),
            ExecError::Script(_)
        ));
        assert!(matches!(classify(CdpError::NoResponse), ExecError::EnvironmentLost(_)));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn evaluates_in_a_real_page() {
        let settings = BrowserSettings {
            home_url: "data:text/html,<h1>Hello</h1>".to_string(),
            session_warmup_ms: 0,
            navigation_settle_ms: 0,
            close_delay_ms: 0,
            drain_delay_ms: 0,
            ..Default::default()
        };
        let factory = ChromiumFactory::new(settings);
        let session = factory.create_session().await.expect("launch failed");

        let heading = session
            .evaluate("document.querySelector('h1').textContent")
            .await
            .expect("evaluate failed");
        assert_eq!(heading, Value::String("Hello".to_string()));

        let awaited = session
            .evaluate("new Promise(resolve => setTimeout(() => resolve(42), 10))")
            .await
            .expect("promise evaluate failed");
        assert_eq!(awaited, Value::from(42));

        let thrown = session.evaluate("(() => { throw new Error('boom') })()").await;
        assert!(matches!(thrown, Err(ExecError::Script(msg)) if msg.contains("boom")));

        session.close().await.expect("close failed");
    }
}
