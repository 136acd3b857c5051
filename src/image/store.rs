//! Access to the local image store
//!
//! [`DockerImageStore`] talks to the Docker Engine API. Connection settings
//! follow the usual Docker conventions, including `DOCKER_HOST`.

use crate::error::{BoxError, DaemonError, PushError, Result};
use crate::image::archive::ImageArchive;
use crate::image::reference::ImageReference;
use async_trait::async_trait;
use bollard::Docker;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

/// Snapshot of a local image's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Content digest of the image config
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size_bytes: u64,
    pub layer_count: usize,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self, cancel: &CancellationToken) -> Result<()>;

    /// Whether `image_ref` is present. Unparsable references do not exist.
    async fn image_exists(&self, cancel: &CancellationToken, image_ref: &str) -> Result<bool>;

    /// Metadata plus a streamed `docker save` archive of the image
    async fn get_image(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
    ) -> Result<(ImageInfo, ImageArchive)>;
}

const NOT_FOUND_PATTERNS: &[&str] = &["not found", "no such image", "manifest unknown"];

const UNAVAILABLE_PATTERNS: &[&str] = &[
    "cannot connect",
    "connection refused",
    "daemon running",
    "dial unix",
    "no such host",
];

/// How a store failure should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreFailure {
    NotFound,
    Unavailable,
    Other,
}

pub(crate) fn classify_store_error(err: &bollard::errors::Error) -> StoreFailure {
    if let bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } = err {
        return StoreFailure::NotFound;
    }
    classify_store_message(&err.to_string())
}

pub(crate) fn classify_store_message(message: &str) -> StoreFailure {
    let message = message.to_lowercase();
    if NOT_FOUND_PATTERNS.iter().any(|p| message.contains(p)) {
        StoreFailure::NotFound
    } else if UNAVAILABLE_PATTERNS.iter().any(|p| message.contains(p)) {
        StoreFailure::Unavailable
    } else {
        StoreFailure::Other
    }
}

/// Error for a failure in the middle of an export stream.
///
/// A daemon that went away or lost the image becomes a [`DaemonError`];
/// anything else is passed on as a plain stream failure.
pub(crate) fn export_error(err: bollard::errors::Error) -> BoxError {
    match classify_store_error(&err) {
        StoreFailure::Unavailable => Box::new(DaemonError::not_running(err)),
        StoreFailure::NotFound => Box::new(DaemonError::new("failed to export image", err)),
        StoreFailure::Other => Box::new(err),
    }
}

/// Image store backed by the local Docker daemon
pub struct DockerImageStore {
    docker: Docker,
}

impl DockerImageStore {
    /// Connect using the local defaults (`DOCKER_HOST` or the platform socket).
    ///
    /// No request is made until the first operation.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(DaemonError::not_running)?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn daemon_error(message: &str, err: bollard::errors::Error) -> PushError {
        match classify_store_error(&err) {
            StoreFailure::Unavailable => DaemonError::not_running(err).into(),
            _ => DaemonError::new(message, err).into(),
        }
    }
}

fn cancelled() -> PushError {
    PushError::Cancelled(crate::error::CancelPoint::BeforeAttempt)
}

#[async_trait]
impl ImageStore for DockerImageStore {
    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            result = self.docker.ping() => result,
        };

        match result {
            Ok(_) => Ok(()),
            Err(err) => match classify_store_error(&err) {
                StoreFailure::Unavailable => Err(DaemonError::not_running(err).into()),
                _ => {
                    tracing::debug!(error = %err, "daemon answered ping with an error");
                    Ok(())
                }
            },
        }
    }

    async fn image_exists(&self, cancel: &CancellationToken, image_ref: &str) -> Result<bool> {
        if ImageReference::parse(image_ref).is_err() {
            return Ok(false);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            result = self.docker.inspect_image(image_ref) => result,
        };

        match result {
            Ok(_) => Ok(true),
            Err(err) => match classify_store_error(&err) {
                StoreFailure::NotFound => Ok(false),
                _ => Err(Self::daemon_error("failed to inspect image", err)),
            },
        }
    }

    async fn get_image(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
    ) -> Result<(ImageInfo, ImageArchive)> {
        if ImageReference::parse(image_ref).is_err() {
            return Err(PushError::ImageNotFound {
                reference: image_ref.to_string(),
            });
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            result = self.docker.inspect_image(image_ref) => result,
        };

        let inspect = match result {
            Ok(inspect) => inspect,
            Err(err) => {
                return Err(match classify_store_error(&err) {
                    StoreFailure::NotFound => PushError::ImageNotFound {
                        reference: image_ref.to_string(),
                    },
                    _ => Self::daemon_error("failed to inspect image", err),
                });
            }
        };

        let info = ImageInfo {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            size_bytes: inspect.size.map(|size| size.max(0) as u64).unwrap_or(0),
            layer_count: inspect
                .root_fs
                .and_then(|root_fs| root_fs.layers)
                .map(|layers| layers.len())
                .unwrap_or(0),
        };

        tracing::debug!(
            image = image_ref,
            id = %info.id,
            layers = info.layer_count,
            size = info.size_bytes,
            "exporting image from daemon"
        );

        let archive = ImageArchive::spawn(self.docker.export_image(image_ref).map_err(export_error));
        Ok((info, archive))
    }
}
