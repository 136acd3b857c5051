//! Registry module for pushing images over the Registry HTTP API v2
//!
//! [`DefaultRegistryClient`] performs one push per call. [`RetryingClient`]
//! wraps any [`RegistryClient`] with exponential backoff and cancellation.

pub mod auth;
pub mod client;
pub mod progress;
pub mod retry;
pub mod transport;
pub(crate) mod upload;

pub use auth::Authenticator;
pub use client::{DefaultRegistryClient, PushResult, RegistryClient};
pub use progress::{NoopProgress, ProgressReporter, StderrProgressReporter};
pub use retry::{RetryConfig, RetryNotifier, RetryingClient, is_transient, stderr_retry_notifier};
pub use upload::DEFAULT_CHUNK_SIZE;
