//! Registry connection settings

use crate::credentials::Credentials;
use std::fmt;

pub const DEFAULT_REGISTRY_URL: &str = "https://gitea.cnoe.localtest.me:8443";

/// Settings for one registry client.
///
/// `insecure` turns off certificate and hostname verification.
#[derive(Clone, Default)]
pub struct RegistryConfig {
    pub url: String,
    pub insecure: bool,
    pub username: String,
    pub password: String,
    pub token: String,
}

impl RegistryConfig {
    pub fn new(url: impl Into<String>, insecure: bool, credentials: &Credentials) -> Self {
        Self {
            url: url.into(),
            insecure,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            token: credentials.token.clone(),
        }
    }

    /// `http` when the URL asks for it, `https` otherwise
    pub fn scheme(&self) -> &'static str {
        if self.url.starts_with("http://") { "http" } else { "https" }
    }

    pub fn has_basic_auth(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "<redacted>" }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("url", &self.url)
            .field("insecure", &self.insecure)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .finish()
    }
}
