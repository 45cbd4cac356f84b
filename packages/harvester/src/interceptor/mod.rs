//! Drives a search page until its streaming response is captured.
//!
//! The stream never signals "done" in a way the page exposes reliably, so
//! completion is a heuristic: a body large enough and carrying a known result
//! marker, followed by a settle window for trailing events.

pub mod hooks;

use crate::config::{InterceptionSettings, Settings};
use crate::error::{AppError, AppResult};
use crate::session::{close_session, ExecError, ExecutionSession, SessionFactory};
use crate::sse::{decode_body, DecodedBody};
use anyhow::Context;
use chrono::{DateTime, Utc};
use hooks::{CapturedStream, Diagnostics, DIAGNOSTIC_SCRIPT, SNAPSHOT_SCRIPT};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterceptionState {
    NotStarted,
    Navigating,
    HooksInstalled,
    Polling,
    SettlingForTrailingEvents,
    Completed,
    TimedOut,
    ConnectionLost,
}

impl InterceptionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InterceptionState::Completed
                | InterceptionState::TimedOut
                | InterceptionState::ConnectionLost
        )
    }
}

/// A captured and decoded stream
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptionOutcome {
    pub url: String,
    pub status_code: u16,
    pub body: String,
    pub body_length: usize,
    pub captured_at: DateTime<Utc>,
    pub complete: bool,
    pub decoded: DecodedBody,
}

impl InterceptionOutcome {
    fn from_stream(stream: CapturedStream) -> Self {
        let captured_at =
            DateTime::from_timestamp_millis(stream.updated_at as i64).unwrap_or_else(Utc::now);
        InterceptionOutcome {
            decoded: decode_body(&stream.body),
            body_length: stream.body_chars(),
            url: stream.url,
            status_code: stream.status,
            captured_at,
            complete: stream.is_complete,
            body: stream.body,
        }
    }
}

/// True once a body looks like real search results rather than a preamble
pub fn looks_complete(body: &str, settings: &InterceptionSettings) -> bool {
    body.chars().count() > settings.min_body_chars
        && settings
            .completion_markers
            .iter()
            .any(|marker| body.contains(marker.as_str()))
}

pub struct Interceptor {
    factory: Arc<dyn SessionFactory>,
    settings: Arc<Settings>,
}

impl Interceptor {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: Arc<Settings>) -> Self {
        Self { factory, settings }
    }

    /// Open `url` in a fresh session and wait up to `timeout` for the target
    /// stream. The session is closed whatever the outcome.
    #[instrument(skip(self))]
    pub async fn intercept(&self, url: &str, timeout: Duration) -> AppResult<InterceptionOutcome> {
        let mut session = self
            .factory
            .create_session()
            .await
            .context("failed to start execution session")?;

        let mut run = InterceptionRun::new(url, timeout, &self.settings.interception);
        let result = run.drive(session.as_mut()).await;
        info!(
            state = ?run.state,
            terminal = run.state.is_terminal(),
            polls = run.polls,
            "Interception finished"
        );

        close_session(session, "interception").await;
        result
    }
}

/// State of one `intercept` call
struct InterceptionRun<'a> {
    url: String,
    timeout: Duration,
    settings: &'a InterceptionSettings,
    state: InterceptionState,
    deadline: Instant,
    polls: u32,
}

impl<'a> InterceptionRun<'a> {
    fn new(url: &str, timeout: Duration, settings: &'a InterceptionSettings) -> Self {
        Self {
            url: url.to_string(),
            timeout,
            settings,
            state: InterceptionState::NotStarted,
            deadline: Instant::now() + timeout,
            polls: 0,
        }
    }

    fn transition(&mut self, next: InterceptionState) {
        debug!(from = ?self.state, to = ?next, "Interception state change");
        self.state = next;
    }

    /// Record a failed evaluate and turn it into the request's error
    fn fail(&mut self, err: ExecError) -> AppError {
        if err.is_environment_lost() {
            self.transition(InterceptionState::ConnectionLost);
        }
        err.into()
    }

    fn timed_out(&mut self) -> AppError {
        self.transition(InterceptionState::TimedOut);
        AppError::InterceptionTimeout {
            target: self.settings.target_substring.clone(),
            timeout_secs: self.timeout.as_secs_f64(),
        }
    }

    /// Sleep for `wanted`, but never past the deadline
    async fn sleep_bounded(&self, wanted: Duration) {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(wanted.min(remaining)).await;
    }

    /// Await a session call, giving up once the deadline passes
    async fn within<T>(
        &mut self,
        call: impl Future<Output = Result<T, ExecError>>,
    ) -> AppResult<Result<T, ExecError>> {
        match tokio::time::timeout_at(self.deadline, call).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(url = %self.url, state = ?self.state, "Deadline reached during a session call");
                Err(self.timed_out())
            }
        }
    }

    async fn drive(&mut self, session: &mut dyn ExecutionSession) -> AppResult<InterceptionOutcome> {
        self.transition(InterceptionState::Navigating);
        let url = self.url.clone();
        if let Err(e) = self.within(session.navigate(&url)).await? {
            return Err(self.fail(e));
        }

        self.sleep_bounded(self.settings.install_delay()).await;
        let install = hooks::install_script(&self.settings.target_substring);
        if let Err(e) = self.within(session.evaluate(&install)).await? {
            return Err(self.fail(e));
        }
        self.transition(InterceptionState::HooksInstalled);

        self.sleep_bounded(self.settings.warmup()).await;
        self.transition(InterceptionState::Polling);
        self.poll(&*session).await
    }

    async fn poll(&mut self, session: &dyn ExecutionSession) -> AppResult<InterceptionOutcome> {
        loop {
            if Instant::now() >= self.deadline {
                warn!(url = %self.url, polls = self.polls, "No qualifying stream before deadline");
                return Err(self.timed_out());
            }
            self.polls += 1;

            match self.within(session.evaluate(SNAPSHOT_SCRIPT)).await? {
                Ok(value) => match CapturedStream::from_snapshot(value) {
                    Ok(Some(stream)) if looks_complete(&stream.body, self.settings) => {
                        info!(
                            url = %stream.url,
                            body_chars = stream.body_chars(),
                            polls = self.polls,
                            "Result stream detected"
                        );
                        return Ok(self.settle(session, stream).await);
                    }
                    Ok(Some(stream)) => {
                        debug!(body_chars = stream.body_chars(), "Stream not complete yet");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Unreadable snapshot"),
                },
                Err(ExecError::Script(msg)) => {
                    warn!(error = %msg, poll = self.polls, "Snapshot evaluation failed");
                }
                Err(lost) => return Err(self.fail(lost)),
            }

            let every = self.settings.diagnostic_every;
            if every > 0 && self.polls % every == 0 {
                self.log_diagnostics(session).await?;
            }

            self.sleep_bounded(self.settings.poll_interval()).await;
        }
    }

    async fn log_diagnostics(&mut self, session: &dyn ExecutionSession) -> AppResult<()> {
        match self.within(session.evaluate(DIAGNOSTIC_SCRIPT)).await? {
            Ok(value) => {
                let diag: Diagnostics = serde_json::from_value(value).unwrap_or_default();
                info!(
                    poll = self.polls,
                    installed = diag.installed,
                    requests = diag.request_count,
                    streams = diag.streams.len(),
                    largest_body = diag.streams.iter().map(|s| s.body_chars).max().unwrap_or(0),
                    "Interception progress"
                );
                Ok(())
            }
            Err(ExecError::Script(msg)) => {
                warn!(error = %msg, "Diagnostic evaluation failed");
                Ok(())
            }
            Err(lost) => Err(self.fail(lost)),
        }
    }

    /// Wait for trailing events, then keep whichever snapshot is larger
    async fn settle(
        &mut self,
        session: &dyn ExecutionSession,
        first: CapturedStream,
    ) -> InterceptionOutcome {
        self.transition(InterceptionState::SettlingForTrailingEvents);
        tokio::time::sleep(self.settings.settle_window()).await;

        let best = match session.evaluate(SNAPSHOT_SCRIPT).await {
            Ok(value) => match CapturedStream::from_snapshot(value) {
                Ok(Some(later)) if later.body_chars() > first.body_chars() => {
                    info!(
                        extra_chars = later.body_chars() - first.body_chars(),
                        "Collected trailing events"
                    );
                    later
                }
                _ => first,
            },
            Err(e) => {
                warn!(error = %e, "Re-snapshot after settle failed; keeping first capture");
                first
            }
        };

        self.transition(InterceptionState::Completed);
        InterceptionOutcome::from_stream(best)
    }
}
