//! Registry credential resolution
//!
//! Credentials come from command-line flags and environment variables. A
//! non-empty flag wins over its environment variable, field by field. Token
//! and username/password authentication are mutually exclusive.

use crate::error::{PushError, Result};
use std::collections::HashMap;
use std::fmt;

pub const ENV_REGISTRY_USERNAME: &str = "REGISTRY_USERNAME";
pub const ENV_REGISTRY_PASSWORD: &str = "REGISTRY_PASSWORD";
pub const ENV_REGISTRY_TOKEN: &str = "REGISTRY_TOKEN";

pub const MAX_USERNAME_LENGTH: usize = 256;
pub const MAX_PASSWORD_LENGTH: usize = 1024;

/// Resolved registry credentials.
///
/// Exactly one of: a bearer token, basic auth fields, or anonymous access.
/// `Debug` never prints secret values and there is no `Display`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub token: String,
    pub is_anonymous: bool,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self {
            is_anonymous: true,
            ..Self::default()
        }
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn has_basic(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }

    fn mode(&self) -> &'static str {
        if self.has_token() {
            "bearer"
        } else if self.has_basic() {
            "basic"
        } else {
            "anonymous"
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

/// Credential values as given on the command line
#[derive(Clone, Default)]
pub struct CredentialFlags {
    pub username: String,
    pub password: String,
    pub token: String,
}

/// Read access to environment variables.
///
/// Lets callers resolve credentials against something other than the real
/// process environment.
pub trait EnvironmentLookup {
    /// Value of `key`; unset and empty are both `None`.
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment
pub struct ProcessEnvironment;

impl EnvironmentLookup for ProcessEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl EnvironmentLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).filter(|value| !value.is_empty()).cloned()
    }
}

impl EnvironmentLookup for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    }
}

fn flag_or_env(flag: &str, env: &dyn EnvironmentLookup, key: &str) -> String {
    if flag.is_empty() {
        env.get(key).unwrap_or_default()
    } else {
        flag.to_string()
    }
}

/// Merge flags and environment into one set of credentials.
pub fn resolve(flags: &CredentialFlags, env: &dyn EnvironmentLookup) -> Result<Credentials> {
    let token = flag_or_env(&flags.token, env, ENV_REGISTRY_TOKEN);
    let username = flag_or_env(&flags.username, env, ENV_REGISTRY_USERNAME);
    let password = flag_or_env(&flags.password, env, ENV_REGISTRY_PASSWORD);

    let has_token = !token.is_empty();
    let has_basic = !username.is_empty() || !password.is_empty();

    if has_token && has_basic {
        return Err(PushError::Config(
            "cannot specify both token and username/password credentials".to_string(),
        ));
    }

    if !has_token && has_basic {
        validate_basic(&username, &password)?;
    }

    let credentials = if has_token {
        Credentials {
            token,
            ..Credentials::default()
        }
    } else {
        Credentials {
            username,
            password,
            token: String::new(),
            is_anonymous: !has_basic,
        }
    };

    tracing::debug!(mode = credentials.mode(), "resolved registry credentials");
    Ok(credentials)
}

/// Basic credentials need both halves and a username that is safe in a
/// `user:password` header.
fn validate_basic(username: &str, password: &str) -> Result<()> {
    let invalid = |message: &str| Err(PushError::Config(message.to_string()));

    if username.is_empty() {
        return invalid("username cannot be empty when password is provided");
    }
    if password.is_empty() {
        return invalid("password cannot be empty when username is provided");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'))
    {
        return invalid("username contains invalid characters");
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return invalid("username exceeds maximum length");
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return invalid("password exceeds maximum length");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(username: &str, password: &str, token: &str) -> CredentialFlags {
        CredentialFlags {
            username: username.to_string(),
            password: password.to_string(),
            token: token.to_string(),
        }
    }

    #[test]
    fn test_flags_win_per_field() {
        let env = HashMap::from([
            (ENV_REGISTRY_USERNAME, "env-user"),
            (ENV_REGISTRY_PASSWORD, "env-pass"),
        ]);
        let creds = resolve(&flags("flag-user", "", ""), &env).unwrap();
        assert_eq!(creds.username, "flag-user");
        assert_eq!(creds.password, "env-pass");
        assert!(!creds.is_anonymous);
    }

    #[test]
    fn test_environment_only() {
        let env = HashMap::from([
            (ENV_REGISTRY_USERNAME, "env-user"),
            (ENV_REGISTRY_PASSWORD, "env-pass"),
        ]);
        let creds = resolve(&CredentialFlags::default(), &env).unwrap();
        assert_eq!(creds.username, "env-user");
        assert_eq!(creds.password, "env-pass");
        assert!(creds.token.is_empty());
    }

    #[test]
    fn test_token_from_env_is_used_alone() {
        let env = HashMap::from([(ENV_REGISTRY_TOKEN, "secret-token")]);
        let creds = resolve(&CredentialFlags::default(), &env).unwrap();
        assert_eq!(creds.token, "secret-token");
        assert!(creds.username.is_empty());
        assert!(creds.password.is_empty());
        assert!(!creds.is_anonymous);
    }

    #[test]
    fn test_username_without_password_is_rejected() {
        let env: HashMap<&str, &str> = HashMap::new();
        let err = resolve(&flags("admin", "", ""), &env).unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
        assert!(err.to_string().contains("password cannot be empty"));
    }

    #[test]
    fn test_password_without_username_is_rejected() {
        let env = HashMap::from([(ENV_REGISTRY_PASSWORD, "env-pass")]);
        let err = resolve(&CredentialFlags::default(), &env).unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
        assert!(err.to_string().contains("username cannot be empty"));
    }

    #[test]
    fn test_username_format_and_length() {
        let env: HashMap<&str, &str> = HashMap::new();
        assert!(resolve(&flags("ci-bot@example.com", "pw", ""), &env).is_ok());
        assert!(resolve(&flags("first.last_1", "pw", ""), &env).is_ok());
        for bad in ["user name", "user:name", "team/user", "tab\tuser"] {
            let err = resolve(&flags(bad, "pw", ""), &env).unwrap_err();
            assert!(err.to_string().contains("invalid characters"), "{bad}");
        }

        let long_user = "a".repeat(MAX_USERNAME_LENGTH + 1);
        assert!(resolve(&flags(&long_user, "pw", ""), &env).is_err());
        let long_password = "p".repeat(MAX_PASSWORD_LENGTH + 1);
        assert!(resolve(&flags("admin", &long_password, ""), &env).is_err());
        let max_password = "p".repeat(MAX_PASSWORD_LENGTH);
        assert!(resolve(&flags("admin", &max_password, ""), &env).is_ok());
    }

    #[test]
    fn test_token_and_username_conflict() {
        let env: HashMap<&str, &str> = HashMap::new();
        let err = resolve(&flags("user", "", "token"), &env).unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
        assert!(err.to_string().contains("cannot specify both token and username/password"));
    }

    #[test]
    fn test_token_flag_conflicts_with_env_password() {
        let env = HashMap::from([(ENV_REGISTRY_PASSWORD, "env-pass")]);
        assert!(resolve(&flags("", "", "token"), &env).is_err());
    }

    #[test]
    fn test_nothing_set_is_anonymous() {
        let env: HashMap<&str, &str> = HashMap::new();
        let creds = resolve(&CredentialFlags::default(), &env).unwrap();
        assert!(creds.is_anonymous);
        assert_eq!(creds, Credentials::anonymous());
    }

    #[test]
    fn test_empty_env_values_count_as_unset() {
        let env = HashMap::from([(ENV_REGISTRY_TOKEN, ""), (ENV_REGISTRY_USERNAME, "")]);
        let creds = resolve(&CredentialFlags::default(), &env).unwrap();
        assert!(creds.is_anonymous);
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let env: HashMap<&str, &str> = HashMap::new();
        let creds = resolve(&flags("alice", "hunter2", ""), &env).unwrap();
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("basic"));
    }
}
