//! Retry decorator for registry clients
//!
//! [`RetryingClient`] wraps any [`RegistryClient`] and retries transient
//! failures with exponential backoff. Cancellation is honored before each
//! attempt and while waiting between attempts, never in the middle of one.

use crate::error::{CancelPoint, DaemonError, PushError, RegistryError, Result};
use crate::error::classify::chain_text;
use crate::registry::client::{PushResult, RegistryClient};
use crate::registry::progress::ProgressReporter;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Called before each wait with the 1-based number of the failed attempt,
/// the upcoming delay and the error that caused the retry.
pub type RetryNotifier = Arc<dyn Fn(u32, Duration, &PushError) + Send + Sync>;

#[derive(Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub notify: Option<RetryNotifier>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            notify: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

impl RetryConfig {
    /// Replace every zero field with its default.
    pub fn normalized(mut self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.initial_delay.is_zero() {
            self.initial_delay = DEFAULT_INITIAL_DELAY;
        }
        if self.max_delay.is_zero() {
            self.max_delay = DEFAULT_MAX_DELAY;
        }
        if self.backoff_multiplier == 0.0 || !self.backoff_multiplier.is_finite() {
            self.backoff_multiplier = DEFAULT_BACKOFF_MULTIPLIER;
        }
        self
    }

    pub fn with_notifier(mut self, notify: RetryNotifier) -> Self {
        self.notify = Some(notify);
        self
    }

    /// `initial_delay * multiplier^attempt`, capped at `max_delay`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "connection refused",
    "connection reset",
    "temporary failure",
    "network unreachable",
    "no such host",
    "i/o timeout",
    "eof",
    "broken pipe",
];

/// Whether a failed push is worth another attempt.
pub fn is_transient(err: &PushError) -> bool {
    if err.is_auth() {
        return false;
    }
    match err {
        PushError::Registry(registry) => registry.is_transient,
        PushError::Config(_)
        | PushError::InvalidReference { .. }
        | PushError::ImageNotFound { .. }
        | PushError::Daemon(_)
        | PushError::Auth(_)
        | PushError::Cancelled(_) => false,
        PushError::Archive(io_err) => {
            if from_daemon(io_err) {
                return false;
            }
            let text = chain_text(io_err).to_lowercase();
            TRANSIENT_PATTERNS.iter().any(|pattern| text.contains(pattern))
        }
    }
}

/// Whether a [`DaemonError`] sits anywhere inside `err`.
fn from_daemon(err: &std::io::Error) -> bool {
    let mut current = io_payload(err);
    while let Some(inner) = current {
        if inner.is::<DaemonError>() {
            return true;
        }
        current = match inner.downcast_ref::<std::io::Error>() {
            Some(io_err) => io_payload(io_err),
            None => inner.source(),
        };
    }
    false
}

fn io_payload(err: &std::io::Error) -> Option<&(dyn StdError + 'static)> {
    err.get_ref().map(|inner| inner as &(dyn StdError + 'static))
}

pub struct RetryingClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: RegistryClient> RetryingClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: RegistryClient> RegistryClient for RetryingClient<C> {
    async fn push(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
        dest_ref: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<PushResult> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PushError::Cancelled(CancelPoint::BeforeAttempt));
            }

            let err = match self.inner.push(cancel, image_ref, dest_ref, progress).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if !is_transient(&err) {
                return Err(err);
            }

            if attempt + 1 >= attempts {
                tracing::warn!(attempts, error = %err, "giving up on push");
                return Err(RegistryError::new(format!("push failed after {} attempts", attempts), false)
                    .with_cause(err)
                    .into());
            }

            let delay = self.config.calculate_delay(attempt);
            tracing::debug!(attempt = attempt + 1, ?delay, error = %err, "push attempt failed, retrying");
            if let Some(notify) = &self.config.notify {
                notify(attempt + 1, delay, &err);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(PushError::Cancelled(CancelPoint::RetryWait));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Notifier that writes two lines per retry to `out`.
pub fn stderr_retry_notifier<W: Write + Send + 'static>(out: W) -> RetryNotifier {
    let out = Mutex::new(out);
    Arc::new(move |attempt, delay, err| {
        let rounded = Duration::from_millis(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        let mut out = out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writeln!(out, "Push attempt {} failed: {}", attempt, err);
        let _ = writeln!(out, "Retrying in {:?}...", rounded);
    })
}
