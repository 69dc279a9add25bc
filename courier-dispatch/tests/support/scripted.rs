//! Backend with a scripted sequence of outcomes

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_dispatch::{BackendError, DeliveryBackend, DeliveryRequest, SendResult};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Outcome of one scripted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Accept the message
    Accept,
    /// Fail the call with `BackendError::Unavailable`
    Fail(&'static str),
    /// Answer with `success = false`
    Refuse(&'static str),
    /// Never answer
    Hang,
}

/// Plays back scripted outcomes, then repeats a fallback outcome forever.
///
/// Every call is counted and timestamped on the Tokio clock.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    latency: Duration,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, fallback: Outcome) -> Arc<Self> {
        Self::scripted(name, [], fallback)
    }

    pub fn scripted(
        name: &str,
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
    ) -> Arc<Self> {
        Self::with_latency(name, script, fallback, Duration::ZERO)
    }

    /// Like [`ScriptedBackend::scripted`], taking `latency` to answer each call
    pub fn with_latency(
        name: &str,
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            latency,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    fn next_outcome(&self) -> Outcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl DeliveryBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _request: &DeliveryRequest) -> Result<SendResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());
        let outcome = self.next_outcome();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            Outcome::Accept => Ok(SendResult::accepted(format!(
                "{}-{}",
                self.name,
                self.calls()
            ))),
            Outcome::Fail(reason) => Err(BackendError::Unavailable(reason.to_string())),
            Outcome::Refuse(reason) => Ok(SendResult::refused(reason)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}
