//! Error taxonomy for push operations
//!
//! Every failure the crate surfaces is a [`PushError`]. The variants form a
//! closed set; each one maps to a distinct remediation for the caller, and the
//! retry layer decides eligibility from the variant alone.

pub mod classify;

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub use classify::{classify_remote_error, extract_status_code};

/// Boxed cause carried by the structured error types
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Debug, Error)]
pub enum PushError {
    /// Invalid or contradictory configuration, detected before any I/O
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("image not found: {reference}")]
    ImageNotFound { reference: String },
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("push cancelled{0}")]
    Cancelled(CancelPoint),
    /// The exported image archive could not be read or was malformed
    #[error("image archive error: {0}")]
    Archive(std::io::Error),
}

/// Archive read failures that carry a [`DaemonError`] from the export stream
/// surface as [`PushError::Daemon`].
impl From<std::io::Error> for PushError {
    fn from(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<DaemonError>()) {
            return PushError::Archive(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<DaemonError>()) {
            Some(Ok(daemon)) => PushError::Daemon(*daemon),
            Some(Err(inner)) => PushError::Archive(std::io::Error::new(kind, inner)),
            None => PushError::Archive(kind.into()),
        }
    }
}

/// Where a cancellation was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPoint {
    BeforeAttempt,
    RetryWait,
}

impl fmt::Display for CancelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelPoint::BeforeAttempt => Ok(()),
            CancelPoint::RetryWait => f.write_str(" during retry wait"),
        }
    }
}

impl PushError {
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        PushError::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// True when an [`AuthError`] is this error or anywhere in its cause chain.
    pub fn is_auth(&self) -> bool {
        if matches!(self, PushError::Auth(_)) {
            return true;
        }
        let mut current = self.source();
        while let Some(err) = current {
            if err.is::<AuthError>() || matches!(err.downcast_ref::<PushError>(), Some(PushError::Auth(_))) {
                return true;
            }
            current = err.source();
        }
        false
    }
}

fn write_with_cause(f: &mut fmt::Formatter<'_>, message: &str, cause: Option<&BoxError>) -> fmt::Result {
    match cause {
        Some(cause) => write!(f, "{}: {}", message, cause),
        None => f.write_str(message),
    }
}

fn cause_as_source(cause: &Option<BoxError>) -> Option<&(dyn StdError + 'static)> {
    cause.as_deref().map(|err| err as &(dyn StdError + 'static))
}

/// Failure talking to the local image store
#[derive(Debug)]
pub struct DaemonError {
    pub message: String,
    /// The store could not be reached at all; the user should check their container runtime
    pub is_not_running: bool,
    pub cause: Option<BoxError>,
}

impl DaemonError {
    pub fn new(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            is_not_running: false,
            cause: Some(cause.into()),
        }
    }

    pub fn not_running(cause: impl Into<BoxError>) -> Self {
        Self {
            message: "Cannot connect to Docker daemon".to_string(),
            is_not_running: true,
            cause: Some(cause.into()),
        }
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_with_cause(f, &self.message, self.cause.as_ref())
    }
}

impl StdError for DaemonError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        cause_as_source(&self.cause)
    }
}

/// The registry rejected the supplied credentials
#[derive(Debug)]
pub struct AuthError {
    pub message: String,
    pub cause: Option<BoxError>,
}

impl AuthError {
    pub fn new(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_with_cause(f, &self.message, self.cause.as_ref())
    }
}

impl StdError for AuthError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        cause_as_source(&self.cause)
    }
}

/// Network or server failure during a push
#[derive(Debug)]
pub struct RegistryError {
    /// HTTP status found in the failure, 0 when there was none
    pub status_code: u16,
    pub message: String,
    pub is_transient: bool,
    pub cause: Option<BoxError>,
}

impl RegistryError {
    pub fn new(message: impl Into<String>, is_transient: bool) -> Self {
        Self {
            status_code: 0,
            message: message.into(),
            is_transient,
            cause: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_with_cause(f, &self.message, self.cause.as_ref())
    }
}

impl StdError for RegistryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        cause_as_source(&self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_error_includes_cause() {
        let err = DaemonError {
            message: "daemon error".to_string(),
            is_not_running: true,
            cause: Some("underlying error".into()),
        };
        let text = err.to_string();
        assert!(text.contains("daemon error"));
        assert!(text.contains("underlying error"));
        assert_eq!(err.source().unwrap().to_string(), "underlying error");
    }

    #[test]
    fn test_image_not_found_message() {
        let err = PushError::ImageNotFound {
            reference: "myimage:v1.2.3".to_string(),
        };
        assert_eq!(err.to_string(), "image not found: myimage:v1.2.3");
    }

    #[test]
    fn test_registry_error_without_cause() {
        let err = RegistryError::new("registry operation failed", true).with_status(503);
        assert_eq!(err.to_string(), "registry operation failed");
        assert_eq!(err.status_code, 503);
        assert!(err.source().is_none());
    }

    #[test]
    fn test_cancel_messages_differ() {
        let before = PushError::Cancelled(CancelPoint::BeforeAttempt).to_string();
        let during = PushError::Cancelled(CancelPoint::RetryWait).to_string();
        assert_eq!(before, "push cancelled");
        assert_eq!(during, "push cancelled during retry wait");
    }

    #[test]
    fn test_io_error_from_daemon_becomes_daemon_error() {
        let io_err = std::io::Error::other(DaemonError::not_running("connection refused"));
        match PushError::from(io_err) {
            PushError::Daemon(daemon) => assert!(daemon.is_not_running),
            other => panic!("unexpected {other:?}"),
        }

        let io_err = std::io::Error::other("unexpected EOF");
        assert!(matches!(PushError::from(io_err), PushError::Archive(_)));
    }

    #[test]
    fn test_is_auth_sees_wrapped_auth_error() {
        let auth = PushError::Auth(AuthError::new("authentication failed", "status 401"));
        let wrapped = PushError::Registry(RegistryError::new("push failed after 3 attempts", false).with_cause(auth));
        assert!(wrapped.is_auth());

        let plain = PushError::Registry(RegistryError::new("registry operation failed", true));
        assert!(!plain.is_auth());
    }
}
