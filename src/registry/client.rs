//! Registry client
//!
//! [`DefaultRegistryClient`] pushes one local image per call: it fetches the
//! image from an [`ImageStore`], negotiates authentication, streams every blob
//! to the registry and finishes with an OCI manifest.

use crate::config::RegistryConfig;
use crate::digest::DigestUtils;
use crate::error::{CancelPoint, PushError, Result};
use crate::image::manifest::OCI_MANIFEST_MEDIA_TYPE;
use crate::image::reference::{ImageReference, registry_host};
use crate::image::store::ImageStore;
use crate::registry::auth::{Authenticator, negotiate};
use crate::registry::progress::ProgressReporter;
use crate::registry::transport::{RegistryTransport, build_http_client};
use crate::registry::upload::{BlobUploader, DEFAULT_CHUNK_SIZE};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Outcome of a successful push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// `<destination>@<digest>`
    pub reference: String,
    /// Digest of the pushed manifest
    pub digest: String,
    /// Total size of the image layers
    pub size_bytes: u64,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Push the local image `image_ref` to `dest_ref`.
    ///
    /// `cancel` is observed before any network work begins. With a reporter,
    /// each call produces `start` (once the image is found) and then exactly
    /// one of `complete` or `error`.
    async fn push(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
        dest_ref: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<PushResult>;
}

pub struct DefaultRegistryClient {
    config: RegistryConfig,
    store: Arc<dyn ImageStore>,
    chunk_size: usize,
}

impl DefaultRegistryClient {
    pub fn new(config: RegistryConfig, store: Arc<dyn ImageStore>) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(PushError::Config("registry URL is required".to_string()));
        }
        if config.username.is_empty() != config.password.is_empty() {
            return Err(PushError::Config(
                "username and password must be provided together".to_string(),
            ));
        }
        Ok(Self {
            config,
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Largest request body used for blob uploads
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Base URL for API calls: the destination's registry host, or the
    /// configured URL's host when the destination names none.
    fn base_url(&self, destination: &ImageReference) -> Result<Url> {
        let host = destination
            .registry
            .as_deref()
            .unwrap_or_else(|| registry_host(&self.config.url));
        let raw = format!("{}://{}/", self.config.scheme(), host);
        Url::parse(&raw).map_err(|e| PushError::Config(format!("invalid registry URL {}: {}", raw, e)))
    }

    async fn push_inner(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
        dest_ref: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<PushResult> {
        ImageReference::parse(image_ref)?;
        let destination = ImageReference::parse(dest_ref)?;

        let (info, archive) = self.store.get_image(cancel, image_ref).await?;
        if let Some(progress) = progress {
            progress.start(image_ref, info.layer_count);
        }

        if cancel.is_cancelled() {
            archive.close();
            return Err(PushError::Cancelled(CancelPoint::BeforeAttempt));
        }

        let base = self.base_url(&destination)?;
        let http = build_http_client(self.config.insecure)?;
        let configured = Authenticator::from_config(&self.config);
        let auth = negotiate(&http, &base, &destination.repository, &configured).await?;
        tracing::debug!(
            registry = %base,
            repository = %destination.repository,
            auth = auth.kind(),
            "pushing image"
        );

        let transport = RegistryTransport::new(http, base, destination.repository.clone(), auth);
        let outcome = BlobUploader::new(&transport, progress, self.chunk_size)
            .upload_archive(archive)
            .await?;

        let manifest = outcome.index.build_manifest(&outcome.save_manifest)?;
        let manifest_bytes = manifest.to_bytes()?;
        let digest = DigestUtils::compute_docker_digest(&manifest_bytes);

        transport
            .put_manifest(destination.manifest_reference(), OCI_MANIFEST_MEDIA_TYPE, manifest_bytes)
            .await?;

        Ok(PushResult {
            reference: format!("{}@{}", dest_ref, digest),
            digest,
            size_bytes: manifest.layers_size(),
        })
    }
}

#[async_trait]
impl RegistryClient for DefaultRegistryClient {
    async fn push(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
        dest_ref: &str,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<PushResult> {
        let result = self.push_inner(cancel, image_ref, dest_ref, progress).await;

        if let Some(progress) = progress {
            match &result {
                Ok(pushed) => progress.complete(pushed),
                Err(err) => progress.error(err),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::archive::ImageArchive;
    use crate::image::store::ImageInfo;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageStore for CountingStore {
        async fn ping(&self, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn image_exists(&self, _cancel: &CancellationToken, _image_ref: &str) -> Result<bool> {
            Ok(false)
        }

        async fn get_image(
            &self,
            _cancel: &CancellationToken,
            image_ref: &str,
        ) -> Result<(ImageInfo, ImageArchive)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PushError::ImageNotFound {
                reference: image_ref.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn start(&self, image_ref: &str, _layer_count: usize) {
            self.events.lock().unwrap().push(format!("start {image_ref}"));
        }
        fn layer_progress(&self, _layer_digest: &str, _current: u64, _total: u64) {}
        fn layer_complete(&self, _layer_digest: &str) {}
        fn complete(&self, _result: &PushResult) {
            self.events.lock().unwrap().push("complete".to_string());
        }
        fn error(&self, err: &PushError) {
            self.events.lock().unwrap().push(format!("error {err}"));
        }
    }

    fn config(url: &str) -> RegistryConfig {
        RegistryConfig {
            url: url.to_string(),
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn test_empty_url_is_configuration_error() {
        let store = Arc::new(CountingStore::default());
        let err = DefaultRegistryClient::new(config(""), store).err().unwrap();
        assert!(matches!(err, PushError::Config(_)));
        assert!(err.to_string().contains("registry URL is required"));
    }

    #[test]
    fn test_partial_basic_credentials_are_rejected() {
        let store = Arc::new(CountingStore::default());
        let config = RegistryConfig {
            username: "admin".to_string(),
            ..config("https://registry.local")
        };
        let err = DefaultRegistryClient::new(config, store).err().unwrap();
        assert!(matches!(err, PushError::Config(_)));
        assert!(err.to_string().contains("username and password must be provided together"));
    }

    #[tokio::test]
    async fn test_invalid_reference_skips_store() {
        let store = Arc::new(CountingStore::default());
        let client = DefaultRegistryClient::new(config("https://registry.local"), store.clone()).unwrap();
        let progress = RecordingProgress::default();

        let err = client
            .push(&CancellationToken::new(), "Bad Ref", "registry.local/app:v1", Some(&progress))
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::InvalidReference { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        let events = progress.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error invalid reference"));
    }

    #[tokio::test]
    async fn test_missing_image_reports_error_once() {
        let store = Arc::new(CountingStore::default());
        let client = DefaultRegistryClient::new(config("https://registry.local"), store.clone()).unwrap();
        let progress = RecordingProgress::default();

        let err = client
            .push(&CancellationToken::new(), "app:v1", "registry.local/app:v1", Some(&progress))
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::ImageNotFound { .. }));
        assert_eq!(*progress.events.lock().unwrap(), vec!["error image not found: app:v1".to_string()]);
    }

    #[tokio::test]
    async fn test_push_without_reporter() {
        let store = Arc::new(CountingStore::default());
        let client = DefaultRegistryClient::new(config("https://registry.local"), store).unwrap();
        let err = client
            .push(&CancellationToken::new(), "app:v1", "registry.local/app:v1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::ImageNotFound { .. }));
    }

    #[test]
    fn test_base_url_prefers_destination_host() {
        let store = Arc::new(CountingStore::default());
        let client = DefaultRegistryClient::new(config("http://localhost:5000"), store).unwrap();

        let destination = ImageReference::parse("registry.local:8443/app:v1").unwrap();
        assert_eq!(client.base_url(&destination).unwrap().as_str(), "http://registry.local:8443/");

        let destination = ImageReference::parse("app:v1").unwrap();
        assert_eq!(client.base_url(&destination).unwrap().as_str(), "http://localhost:5000/");
    }
}
