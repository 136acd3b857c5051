//! Authentication for registry access
//!
//! The configured credentials pick an [`Authenticator`]: a bearer token wins,
//! then basic auth, then anonymous access. Before a push the authenticator is
//! negotiated against the registry's `WWW-Authenticate` challenge, which may
//! exchange basic credentials (or nothing) for a bearer token.

use crate::config::RegistryConfig;
use crate::registry::transport::{RemoteError, RemoteResult, status_error};
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use url::Url;

#[derive(Clone, PartialEq, Eq)]
pub enum Authenticator {
    Anonymous,
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl Authenticator {
    /// Bearer token > username and password > anonymous
    pub fn from_config(config: &RegistryConfig) -> Self {
        if !config.token.is_empty() {
            Authenticator::Bearer {
                token: config.token.clone(),
            }
        } else if config.has_basic_auth() {
            Authenticator::Basic {
                username: config.username.clone(),
                password: config.password.clone(),
            }
        } else {
            Authenticator::Anonymous
        }
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authenticator::Anonymous => request,
            Authenticator::Basic { username, password } => request.basic_auth(username, Some(password)),
            Authenticator::Bearer { token } => request.bearer_auth(token),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Authenticator::Anonymous => "anonymous",
            Authenticator::Basic { .. } => "basic",
            Authenticator::Bearer { .. } => "bearer",
        }
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Authenticator({})", self.kind())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthChallenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parse a `WWW-Authenticate` header value.
pub(crate) fn parse_auth_challenge(header: &str) -> Option<AuthChallenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(AuthChallenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut values = HashMap::new();
    for param in params.split(',') {
        if let Some((key, value)) = param.split_once('=') {
            values.insert(key.trim().to_ascii_lowercase(), value.trim().trim_matches('"').to_string());
        }
    }

    let realm = values.remove("realm")?;
    Some(AuthChallenge::Bearer {
        realm,
        service: values.remove("service"),
        scope: values.remove("scope"),
    })
}

fn repository_scope(repository: &str) -> String {
    format!("repository:{}:pull,push", repository)
}

/// Settle on the authenticator to use for pushing to `repository`.
///
/// Bearer tokens are used as given. Otherwise the registry's `/v2/` endpoint
/// is pinged and its challenge answered.
pub async fn negotiate(
    http: &Client,
    base: &Url,
    repository: &str,
    configured: &Authenticator,
) -> RemoteResult<Authenticator> {
    if let Authenticator::Bearer { .. } = configured {
        return Ok(configured.clone());
    }

    let ping_url = base
        .join("/v2/")
        .map_err(|e| RemoteError::Protocol(format!("invalid registry URL: {}", e)))?;
    let response = configured
        .apply(http.get(ping_url))
        .send()
        .await
        .map_err(|source| RemoteError::Http {
            operation: "registry ping",
            source: source.without_url(),
        })?;

    if response.status().is_success() {
        tracing::debug!(auth = configured.kind(), "registry accepted credentials without challenge");
        return Ok(configured.clone());
    }
    if response.status() != StatusCode::UNAUTHORIZED {
        return Err(status_error(response, "registry ping").await);
    }

    let challenge = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_auth_challenge);

    match (challenge, configured) {
        (Some(AuthChallenge::Bearer { realm, service, scope }), _) => {
            tracing::debug!(realm = %realm, challenge_scope = ?scope, "requesting registry token");
            let token = fetch_token(http, &realm, service.as_deref(), repository, configured).await?;
            Ok(Authenticator::Bearer { token })
        }
        _ => Err(status_error(response, "registry ping").await),
    }
}

async fn fetch_token(
    http: &Client,
    realm: &str,
    service: Option<&str>,
    repository: &str,
    configured: &Authenticator,
) -> RemoteResult<String> {
    let mut url = Url::parse(realm)
        .map_err(|e| RemoteError::Protocol(format!("invalid token realm {}: {}", realm, e)))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(service) = service {
            query.append_pair("service", service);
        }
        query.append_pair("scope", &repository_scope(repository));
    }

    let request = match configured {
        Authenticator::Basic { username, password } => http.get(url).basic_auth(username, Some(password)),
        _ => http.get(url),
    };
    let response = request.send().await.map_err(|source| RemoteError::Http {
        operation: "token request",
        source: source.without_url(),
    })?;
    if !response.status().is_success() {
        return Err(status_error(response, "token request").await);
    }

    let body: TokenResponse = response.json().await.map_err(|source| RemoteError::Http {
        operation: "token decode",
        source: source.without_url(),
    })?;
    body.token
        .or(body.access_token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| RemoteError::Protocol("token service returned an empty token".to_string()))
}
