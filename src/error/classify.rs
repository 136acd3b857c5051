//! Classification of failures returned by the registry network layer
//!
//! The decision is a pattern match over the error text plus a look at the
//! typed cause chain for timeouts and connection failures.

use super::{AuthError, BoxError, PushError, RegistryError};
use std::error::Error as StdError;
use std::io;

const AUTH_PATTERNS: &[&str] = &["401", "403", "unauthorized", "forbidden", "authentication"];

const SERVER_ERROR_PATTERNS: &[&str] = &["50", "51", "52", "53"];

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "deadline exceeded", "temporary failure"];

const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "network unreachable",
    "host unreachable",
];

/// Convert a failure from the push network call into an [`AuthError`] or a
/// [`RegistryError`] carrying a transience flag and the status code found in
/// the message.
pub fn classify_remote_error(err: impl Into<BoxError>) -> PushError {
    let err = err.into();
    let message = chain_text(&*err).to_lowercase();

    if contains_any(&message, AUTH_PATTERNS) {
        return PushError::Auth(AuthError::new("authentication failed", err));
    }

    let status_code = extract_status_code(&message).unwrap_or(0);
    let is_transient = contains_any(&message, SERVER_ERROR_PATTERNS)
        || contains_any(&message, TIMEOUT_PATTERNS)
        || contains_any(&message, CONNECTION_PATTERNS)
        || status_code >= 500
        || has_temporary_signal(&*err);

    PushError::Registry(
        RegistryError::new("registry operation failed", is_transient)
            .with_status(status_code)
            .with_cause(err),
    )
}

/// First whitespace-separated token that, stripped of surrounding non-digits,
/// is an HTTP status in `[100, 600)`.
pub fn extract_status_code(message: &str) -> Option<u16> {
    message
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_ascii_digit()))
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<u32>().ok())
        .find(|code| (100..600).contains(code))
        .map(|code| code as u16)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Display text of an error followed by all of its sources. HTTP client errors
/// keep the interesting part ("connection refused") in their sources.
pub(crate) fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        let next = source.to_string();
        if !text.contains(&next) {
            text.push_str(": ");
            text.push_str(&next);
        }
        current = source.source();
    }
    text
}

fn has_temporary_signal(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() || http.is_connect() {
                return true;
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::Interrupted
            ) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient(err: &PushError) -> Option<bool> {
        match err {
            PushError::Registry(reg) => Some(reg.is_transient),
            _ => None,
        }
    }

    #[test]
    fn test_auth_statuses_become_auth_errors() {
        for message in ["status 401: Unauthorized", "status 403: Forbidden", "UNAUTHORIZED: access denied"] {
            let err = classify_remote_error(message);
            assert!(matches!(err, PushError::Auth(_)), "{message} should be an auth error");
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        for message in [
            "status 500: Internal Server Error",
            "status 503: Service Unavailable",
            "context deadline exceeded",
            "connection refused to registry",
        ] {
            let err = classify_remote_error(message);
            assert_eq!(transient(&err), Some(true), "{message} should be transient");
        }
    }

    #[test]
    fn test_invalid_reference_is_permanent() {
        let err = classify_remote_error("invalid image reference");
        assert_eq!(transient(&err), Some(false));
        match err {
            PushError::Registry(reg) => {
                assert_eq!(reg.status_code, 0);
                assert_eq!(reg.cause.unwrap().to_string(), "invalid image reference");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_code_is_recorded() {
        match classify_remote_error("manifest upload failed with status 503 Service Unavailable") {
            PushError::Registry(reg) => assert_eq!(reg.status_code, 503),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_io_timeout_signal_is_transient() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "stalled");
        assert_eq!(transient(&classify_remote_error(err)), Some(true));
    }

    #[test]
    fn test_extract_status_code() {
        assert_eq!(extract_status_code("status 500: oops"), Some(500));
        assert_eq!(extract_status_code("got (404) back"), Some(404));
        assert_eq!(extract_status_code("retry 7 times, status 502"), Some(502));
        assert_eq!(extract_status_code("no numbers here"), None);
        assert_eq!(extract_status_code("code 1000 and 42"), None);
    }
}
