//! Scripted in-memory sessions for tests.

use super::{ExecError, ExecutionSession, SessionFactory};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&str) -> Result<Value, ExecError> + Send + Sync;

/// What every session created by a [`FakeFactory`] was asked to do
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionLog {
    pub created: usize,
    pub closed: usize,
    pub navigations: Vec<String>,
    pub scripts: Vec<String>,
}

pub(crate) struct FakeFactory {
    responder: Arc<Responder>,
    log: Arc<Mutex<SessionLog>>,
    fail_launch: bool,
    fail_navigation: Option<ExecError>,
    fail_close: bool,
    navigation_delay: Duration,
    evaluation_delay: Duration,
}

impl FakeFactory {
    /// Every evaluate is answered by `responder`
    pub fn new(responder: impl Fn(&str) -> Result<Value, ExecError> + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            log: Arc::new(Mutex::new(SessionLog::default())),
            fail_launch: false,
            fail_navigation: None,
            fail_close: false,
            navigation_delay: Duration::ZERO,
            evaluation_delay: Duration::ZERO,
        }
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn failing_navigation(mut self, err: ExecError) -> Self {
        self.fail_navigation = Some(err);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Every navigate takes `delay` before it returns
    pub fn slow_navigation(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn slow_evaluation(mut self, delay: Duration) -> Self {
        self.evaluation_delay = delay;
        self
    }

    pub fn log(&self) -> SessionLog {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create_session(&self) -> anyhow::Result<Box<dyn ExecutionSession>> {
        if self.fail_launch {
            anyhow::bail!("browser binary not found");
        }
        self.log.lock().unwrap().created += 1;
        Ok(Box::new(FakeSession {
            responder: Arc::clone(&self.responder),
            log: Arc::clone(&self.log),
            fail_navigation: self.fail_navigation.clone(),
            fail_close: self.fail_close,
            navigation_delay: self.navigation_delay,
            evaluation_delay: self.evaluation_delay,
        }))
    }
}

pub(crate) struct FakeSession {
    responder: Arc<Responder>,
    log: Arc<Mutex<SessionLog>>,
    fail_navigation: Option<ExecError>,
    fail_close: bool,
    navigation_delay: Duration,
    evaluation_delay: Duration,
}

#[async_trait]
impl ExecutionSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ExecError> {
        self.log.lock().unwrap().navigations.push(url.to_string());
        tokio::time::sleep(self.navigation_delay).await;
        match &self.fail_navigation {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ExecError> {
        self.log.lock().unwrap().scripts.push(script.to_string());
        tokio::time::sleep(self.evaluation_delay).await;
        (self.responder)(script)
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.log.lock().unwrap().closed += 1;
        if self.fail_close {
            anyhow::bail!("browser process already gone");
        }
        Ok(())
    }
}
