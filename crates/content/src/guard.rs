//! Guarded Invocation - bound the wall-clock time of async work
//!
//! Design: two contenders, first to settle wins.
//! - The operation future and a Tokio sleep are polled together.
//! - If the sleep wins, the operation future is dropped on the spot.
//!   Dropping a future is Rust's cancellation; the work stops at its
//!   current await point. Work the operation spawned elsewhere is not
//!   ours to stop.
//! - Operation errors pass through untouched; only the timeout is ours.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::GuardConfig;

#[derive(Error, Debug)]
pub enum GuardError<E> {
    #[error("{label} timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    #[error("{0}")]
    Failed(E),
}

impl<E> GuardError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GuardError::Timeout { .. })
    }

    /// The operation's own error, if that is what this is
    pub fn into_failed(self) -> Option<E> {
        match self {
            GuardError::Failed(e) => Some(e),
            GuardError::Timeout { .. } => None,
        }
    }
}

/// Applies a maximum duration to async operations
#[derive(Debug, Clone)]
pub struct Guard {
    timeout: Duration,
    slow_threshold: Duration,
    debug: bool,
    slow_calls: Arc<AtomicU64>,
}

impl Guard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            timeout: config.timeout(),
            slow_threshold: config.slow_threshold(),
            debug: false,
            slow_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Guard with a custom bound and the default slow threshold
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::new(&GuardConfig::default())
        }
    }

    /// Emit diagnostic notes for slow calls
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of successful calls that exceeded the slow threshold
    pub fn slow_calls(&self) -> u64 {
        self.slow_calls.load(Ordering::Relaxed)
    }

    /// Race `operation` against the bound
    pub async fn run<Fut, T, E>(&self, label: &str, operation: Fut) -> Result<T, GuardError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();

        let outcome = tokio::select! {
            // Ties go to the operation
            biased;
            result = operation => result,
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!("[Guard] {} timed out after {:?}", label, self.timeout);
                return Err(GuardError::Timeout {
                    label: label.to_string(),
                    after: self.timeout,
                });
            }
        };

        let elapsed = started.elapsed();
        if outcome.is_ok() && elapsed > self.slow_threshold {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
            if self.debug {
                tracing::debug!("[Guard] {} was slow: {:?}", label, elapsed);
            }
        }

        outcome.map_err(GuardError::Failed)
    }

    /// Wrap `operation` so that every call to it is guarded
    pub fn wrap<F>(&self, label: impl Into<String>, operation: F) -> Guarded<F> {
        Guarded {
            guard: self.clone(),
            label: label.into(),
            operation,
        }
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

/// An operation bound to a guard and a label
pub struct Guarded<F> {
    guard: Guard,
    label: String,
    operation: F,
}

impl<F> Guarded<F> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Invoke the operation with `args` under the guard
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, GuardError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard.run(&self.label, (self.operation)(args)).await
    }
}
