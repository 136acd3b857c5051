//! Local image handling
//!
//! This module covers everything on the local side of a push: parsing image
//! references, talking to the local image store, and reading the archive the
//! store exports.
//!
//! # Overview
//!
//! - [`reference`] parses `[registry[:port]/]repository[:tag]` references and
//!   builds destination references for a target registry.
//! - [`store`] defines the [`ImageStore`] trait and the Docker-backed
//!   [`DockerImageStore`].
//! - [`archive`] provides the streamed [`ImageArchive`] and a tar walker that
//!   turns it into [`ArchiveEvent`]s.
//! - [`manifest`] reads the `docker save` manifest and builds the OCI manifest.
//!
//! # Usage
//!
//! ```no_run
//! use image_pusher::image::{DockerImageStore, ImageStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> image_pusher::error::Result<()> {
//! let store = DockerImageStore::connect()?;
//! let cancel = CancellationToken::new();
//! store.ping(&cancel).await?;
//! let (info, archive) = store.get_image(&cancel, "myapp:v1").await?;
//! println!("{} layers, {} bytes", info.layer_count, info.size_bytes);
//! archive.close();
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod manifest;
pub mod reference;
pub mod store;

pub use archive::{ArchiveEvent, ImageArchive, read_entries};
pub use manifest::{BlobIndex, OciManifest, SaveManifestEntry, UploadedBlob, is_gzipped, parse_save_manifest};
pub use reference::{ImageReference, destination_reference, registry_host, split_repository_tag};
pub use store::{DockerImageStore, ImageInfo, ImageStore};
