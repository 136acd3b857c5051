//! Registry HTTP API v2 transport
//!
//! Thin request layer over `reqwest` for the calls a push needs: blob
//! existence checks, chunked blob uploads and manifest uploads. Failures come
//! back as [`RemoteError`], which converts into the crate's error taxonomy
//! through [`classify_remote_error`].

use crate::error::{PushError, classify_remote_error};
use crate::registry::auth::Authenticator;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 512;

/// Failure of a single registry request
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{operation} request failed: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{0}")]
    Protocol(String),
}

impl From<RemoteError> for PushError {
    fn from(err: RemoteError) -> Self {
        classify_remote_error(err)
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// HTTP client for registry calls. `insecure` accepts any certificate and
/// hostname.
pub fn build_http_client(insecure: bool) -> RemoteResult<Client> {
    let builder = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT);

    let builder = if insecure {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
    } else {
        builder
    };

    builder.build().map_err(|source| RemoteError::Http {
        operation: "client setup",
        source,
    })
}

/// Turn a non-success response into [`RemoteError::Status`].
pub(crate) async fn check_status(response: Response, operation: &'static str) -> RemoteResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(status_error(response, operation).await)
}

pub(crate) async fn status_error(response: Response, operation: &'static str) -> RemoteError {
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    RemoteError::Status {
        operation,
        status,
        body: body.trim().to_string(),
    }
}

/// Requests against one repository of one registry
pub struct RegistryTransport {
    http: Client,
    base: Url,
    repository: String,
    auth: Authenticator,
}

impl RegistryTransport {
    pub fn new(http: Client, base: Url, repository: impl Into<String>, auth: Authenticator) -> Self {
        Self {
            http,
            base,
            repository: repository.into(),
            auth,
        }
    }

    fn endpoint(&self, path: &str) -> RemoteResult<Url> {
        self.base
            .join(&format!("/v2/{}/{}", self.repository, path))
            .map_err(|e| RemoteError::Protocol(format!("invalid registry endpoint {}: {}", path, e)))
    }

    /// Resolve an upload `Location` header against the registry base URL.
    fn upload_location(&self, response: &Response) -> RemoteResult<Url> {
        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| RemoteError::Protocol("missing Location header in upload response".to_string()))?
            .to_str()
            .map_err(|e| RemoteError::Protocol(format!("invalid Location header: {}", e)))?;

        let resolved = if location.starts_with("http://") || location.starts_with("https://") {
            Url::parse(location)
        } else if location.starts_with('/') {
            self.base.join(location)
        } else {
            self.base
                .join(&format!("/v2/{}/blobs/uploads/{}", self.repository, location))
        };
        resolved.map_err(|e| RemoteError::Protocol(format!("invalid Location header {}: {}", location, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder, operation: &'static str) -> RemoteResult<Response> {
        self.auth
            .apply(request)
            .send()
            .await
            .map_err(|source| RemoteError::Http {
                operation,
                source: source.without_url(),
            })
    }

    /// HEAD the blob; `true` when the registry already has it.
    pub async fn blob_exists(&self, digest: &str) -> RemoteResult<bool> {
        let url = self.endpoint(&format!("blobs/{}", digest))?;
        let response = self.send(self.http.head(url), "blob check").await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response, "blob check").await),
        }
    }

    /// Open an upload session and return its location.
    pub async fn start_upload(&self) -> RemoteResult<Url> {
        let url = self.endpoint("blobs/uploads/")?;
        let request = self.http.post(url).header(CONTENT_LENGTH, "0");
        let response = check_status(self.send(request, "upload start").await?, "upload start").await?;
        self.upload_location(&response)
    }

    /// Send one chunk starting at byte `offset`; returns the next location.
    pub async fn upload_chunk(&self, location: &Url, offset: u64, chunk: Bytes) -> RemoteResult<Url> {
        if chunk.is_empty() {
            return Ok(location.clone());
        }
        let end = offset + chunk.len() as u64 - 1;
        let request = self
            .http
            .patch(location.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, chunk.len().to_string())
            .header(CONTENT_RANGE, format!("{}-{}", offset, end))
            .body(chunk);
        let response = check_status(self.send(request, "chunk upload").await?, "chunk upload").await?;

        if response.headers().contains_key(LOCATION) {
            self.upload_location(&response)
        } else {
            Ok(location.clone())
        }
    }

    /// Close the upload session with the final bytes and the blob digest.
    pub async fn finish_upload(&self, location: &Url, digest: &str, remainder: Bytes) -> RemoteResult<()> {
        let mut url = location.clone();
        url.query_pairs_mut().append_pair("digest", digest);

        let request = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, remainder.len().to_string())
            .body(remainder);
        check_status(self.send(request, "upload completion").await?, "upload completion").await?;
        Ok(())
    }

    pub async fn put_manifest(&self, reference: &str, media_type: &str, body: Vec<u8>) -> RemoteResult<()> {
        let url = self.endpoint(&format!("manifests/{}", reference))?;
        let request = self.http.put(url).header(CONTENT_TYPE, media_type).body(body);
        check_status(self.send(request, "manifest upload").await?, "manifest upload").await?;
        Ok(())
    }
}
