//! Runner wiring the command line to the push pipeline

use crate::cli::args::Args;
use crate::config::RegistryConfig;
use crate::credentials::{self, ProcessEnvironment};
use crate::error::{PushError, Result};
use crate::image::reference::destination_reference;
use crate::image::store::{DockerImageStore, ImageStore};
use crate::logging::{Logger, format_duration, format_size};
use crate::registry::{
    DefaultRegistryClient, ProgressReporter, PushResult, RegistryClient, RetryConfig, RetryingClient,
    StderrProgressReporter, stderr_retry_notifier,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_LOCAL_IMAGE: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// Process exit status for a failed run
pub fn exit_code(err: &PushError) -> i32 {
    match err {
        PushError::Cancelled(_) => EXIT_CANCELLED,
        PushError::ImageNotFound { .. } | PushError::Daemon(_) => EXIT_LOCAL_IMAGE,
        _ => EXIT_FAILURE,
    }
}

pub struct Runner {
    args: Args,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let logger = Logger::new(args.verbose, args.quiet);
        Self { args, logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Push the image named on the command line and print its reference.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<PushResult> {
        self.logger.section("Image Pusher");

        let credentials = credentials::resolve(&self.args.credential_flags(), &ProcessEnvironment)?;
        let destination = destination_reference(&self.args.registry, &self.args.image)?;
        self.logger.info(&format!("Source: {}", self.args.image));
        self.logger.info(&format!("Destination: {}", destination));
        self.logger.detail(&format!("Credentials: {:?}", credentials));
        if self.args.insecure {
            self.logger.warning("TLS verification disabled");
        }

        let store = DockerImageStore::connect()?;
        store.ping(cancel).await?;
        if !store.image_exists(cancel, &self.args.image).await? {
            return Err(PushError::ImageNotFound {
                reference: self.args.image.clone(),
            });
        }
        self.logger.detail("Found image in local store");

        let config = RegistryConfig::new(self.args.registry.clone(), self.args.insecure, &credentials);
        let client = DefaultRegistryClient::new(config, Arc::new(store))?.with_chunk_size(self.args.chunk_size);

        let mut retry = RetryConfig {
            max_retries: self.args.max_retries,
            ..RetryConfig::default()
        };
        if !self.args.quiet {
            retry = retry.with_notifier(stderr_retry_notifier(std::io::stderr()));
        }
        let client = RetryingClient::new(client, retry);

        let reporter = (!self.args.quiet).then(StderrProgressReporter::stderr);
        let progress = reporter.as_ref().map(|r| r as &dyn ProgressReporter);

        let result = client.push(cancel, &self.args.image, &destination, progress).await?;

        self.logger.summary_kv(
            "Push Summary",
            &[
                ("Reference", result.reference.clone()),
                ("Digest", result.digest.clone()),
                ("Size", format_size(result.size_bytes)),
                ("Elapsed", format_duration(self.logger.elapsed())),
            ],
        );
        self.logger.success("Image pushed");
        println!("{}", result.reference);

        Ok(result)
    }
}
