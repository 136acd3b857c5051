//! Streaming blob upload
//!
//! Walks the exported archive once. Every blob entry is hashed and sent to
//! the registry while it is read, in chunks of at most `chunk_size` bytes, so
//! memory use stays bounded by the chunk size. Blobs whose digest is known
//! from the archive layout are skipped when the registry already has them.

use crate::digest::{DigestUtils, StreamingDigest};
use crate::error::Result;
use crate::image::archive::{ArchiveEvent, ImageArchive, read_entries};
use crate::image::manifest::{BlobIndex, SaveManifestEntry, UploadedBlob, is_gzipped, parse_save_manifest};
use crate::registry::progress::ProgressReporter;
use crate::registry::transport::RegistryTransport;
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::io;
use tokio::sync::mpsc;

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

type Events = mpsc::Receiver<io::Result<ArchiveEvent>>;

/// Everything learned from the archive during upload
pub struct UploadOutcome {
    pub index: BlobIndex,
    pub save_manifest: SaveManifestEntry,
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Content digest implied by an archive path.
///
/// Only OCI layout blobs and top-level `<hex>.json` configs are named by
/// their content; legacy `<id>/layer.tar` directories are not.
fn content_digest_from_path(path: &str) -> Option<String> {
    let named_by_content = path.starts_with("blobs/sha256/")
        || (!path.contains('/') && path.ends_with(".json"));
    if !named_by_content {
        return None;
    }
    DigestUtils::extract_digest_from_layer_path(path).map(|hex| format!("sha256:{}", hex))
}

pub(crate) struct BlobUploader<'a> {
    transport: &'a RegistryTransport,
    progress: Option<&'a dyn ProgressReporter>,
    chunk_size: usize,
    pushed: HashSet<String>,
}

impl<'a> BlobUploader<'a> {
    pub fn new(
        transport: &'a RegistryTransport,
        progress: Option<&'a dyn ProgressReporter>,
        chunk_size: usize,
    ) -> Self {
        Self {
            transport,
            progress,
            chunk_size: chunk_size.max(1),
            pushed: HashSet::new(),
        }
    }

    /// Upload every blob in `archive` and collect its `manifest.json`.
    pub async fn upload_archive(mut self, archive: ImageArchive) -> Result<UploadOutcome> {
        let (mut events, walker) = read_entries(archive);
        let mut index = BlobIndex::new();
        let mut save_manifest = None;

        while let Some(event) = events.recv().await {
            match event? {
                ArchiveEvent::BlobStart { path, size } => {
                    let blob = self.upload_blob(&mut events, &path, size).await?;
                    index.insert_blob(path, blob);
                }
                ArchiveEvent::Metadata { path, data } => {
                    tracing::debug!(path = %path, "read image manifest from archive");
                    save_manifest = Some(parse_save_manifest(&data)?);
                }
                ArchiveEvent::Link { path, target } => index.insert_link(path, target),
                ArchiveEvent::BlobChunk(_) | ArchiveEvent::BlobEnd => {
                    return Err(invalid_data("blob data outside of a blob entry").into());
                }
            }
        }

        drop(events);
        walker
            .await
            .map_err(|e| io::Error::other(format!("archive reader failed: {}", e)))?;

        let save_manifest = save_manifest.ok_or_else(|| invalid_data("archive has no manifest.json"))?;
        Ok(UploadOutcome { index, save_manifest })
    }

    async fn upload_blob(&mut self, events: &mut Events, path: &str, size: u64) -> Result<UploadedBlob> {
        let known_digest = content_digest_from_path(path);
        let progress_key = known_digest.clone().unwrap_or_else(|| path.to_string());

        if let Some(digest) = &known_digest {
            if self.pushed.contains(digest) || self.transport.blob_exists(digest).await? {
                tracing::debug!(digest = %digest, "blob already present, skipping upload");
                let gzipped = drain_blob(events).await?;
                self.report_done(&progress_key, size);
                return Ok(UploadedBlob {
                    digest: digest.clone(),
                    size,
                    gzipped,
                });
            }
        }

        let mut location = self.transport.start_upload().await?;
        let mut hasher = StreamingDigest::new();
        let mut buffer = BytesMut::new();
        let mut offset = 0u64;
        let mut gzipped = None;

        loop {
            match next_blob_event(events).await? {
                ArchiveEvent::BlobChunk(chunk) => {
                    if gzipped.is_none() {
                        gzipped = Some(is_gzipped(&chunk));
                    }
                    hasher.update(&chunk);
                    buffer.extend_from_slice(&chunk);

                    while buffer.len() >= self.chunk_size {
                        let piece = buffer.split_to(self.chunk_size).freeze();
                        let piece_len = piece.len() as u64;
                        location = self.transport.upload_chunk(&location, offset, piece).await?;
                        offset += piece_len;
                        if let Some(progress) = self.progress {
                            progress.layer_progress(&progress_key, offset, size);
                        }
                    }
                }
                ArchiveEvent::BlobEnd => break,
                _ => return Err(invalid_data(format!("archive entry {} ended early", path)).into()),
            }
        }

        let (digest, total) = hasher.finalize();
        if let Some(expected) = &known_digest {
            if expected != &digest {
                return Err(invalid_data(format!(
                    "archive entry {} has digest {}, expected {}",
                    path, digest, expected
                ))
                .into());
            }
        }

        self.transport.finish_upload(&location, &digest, buffer.freeze()).await?;
        tracing::debug!(digest = %digest, size = total, "uploaded blob");

        self.report_done(&progress_key, total);
        self.pushed.insert(digest.clone());

        Ok(UploadedBlob {
            digest,
            size: total,
            gzipped: gzipped.unwrap_or(false),
        })
    }

    fn report_done(&self, key: &str, size: u64) {
        if let Some(progress) = self.progress {
            progress.layer_progress(key, size, size);
            progress.layer_complete(key);
        }
    }
}

async fn next_blob_event(events: &mut Events) -> io::Result<ArchiveEvent> {
    match events.recv().await {
        Some(event) => event,
        None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "archive ended inside a blob")),
    }
}

/// Skip the rest of a blob, returning whether it is gzip data.
async fn drain_blob(events: &mut Events) -> io::Result<bool> {
    let mut first: Option<Bytes> = None;
    loop {
        match next_blob_event(events).await? {
            ArchiveEvent::BlobChunk(chunk) => {
                if first.is_none() {
                    first = Some(chunk);
                }
            }
            ArchiveEvent::BlobEnd => return Ok(first.is_some_and(|chunk| is_gzipped(&chunk))),
            _ => return Err(invalid_data("archive blob ended early")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_content_digest_from_path() {
        assert_eq!(
            content_digest_from_path(&format!("blobs/sha256/{}", HEX)),
            Some(format!("sha256:{}", HEX))
        );
        assert_eq!(
            content_digest_from_path(&format!("{}.json", HEX)),
            Some(format!("sha256:{}", HEX))
        );
        assert_eq!(content_digest_from_path(&format!("{}/layer.tar", HEX)), None);
        assert_eq!(content_digest_from_path("config.json"), None);
    }

    #[tokio::test]
    async fn test_drain_blob_detects_gzip() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ok(ArchiveEvent::BlobChunk(Bytes::from_static(&[0x1f, 0x8b, 0x08]))))
            .await
            .unwrap();
        tx.send(Ok(ArchiveEvent::BlobChunk(Bytes::from_static(b"rest"))))
            .await
            .unwrap();
        tx.send(Ok(ArchiveEvent::BlobEnd)).await.unwrap();
        assert!(drain_blob(&mut rx).await.unwrap());
    }

    #[tokio::test]
    async fn test_truncated_blob_is_an_error() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ok(ArchiveEvent::BlobChunk(Bytes::from_static(b"data"))))
            .await
            .unwrap();
        drop(tx);
        let err = drain_blob(&mut rx).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
