//! Streamed image archives
//!
//! [`ImageArchive`] is the consumer end of a bounded pipe. A background task
//! forwards the exported archive into a channel of capacity one, so at most
//! one chunk sits between producer and consumer no matter how large the image
//! is. Producer failures surface on the consumer's next read.
//!
//! [`read_entries`] walks the tar inside the archive on a blocking thread and
//! hands entries back as [`ArchiveEvent`]s.

use crate::error::BoxError;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::{StreamReader, SyncIoBridge};

const PIPE_CAPACITY: usize = 1;
const EVENT_CAPACITY: usize = 4;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Readable handle on an exported image archive.
///
/// Dropping the archive stops the background producer.
pub struct ImageArchive {
    reader: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
    producer: Option<JoinHandle<()>>,
}

impl ImageArchive {
    /// Start a producer that forwards `source` into a new archive pipe.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S, E>(source: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(PIPE_CAPACITY);

        let producer = tokio::spawn(async move {
            let mut source = std::pin::pin!(source);
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("archive reader closed, stopping export");
                        return;
                    }
                    next = source.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        let err = io::Error::other(err.into());
                        tracing::debug!(error = %err, "image export failed");
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    None => return,
                }
            }
        });

        let chunks = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();

        Self {
            reader: StreamReader::new(chunks),
            producer: Some(producer),
        }
    }

    /// Archive over bytes already in memory
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let chunks: Vec<std::result::Result<Bytes, io::Error>> = data
            .chunks(READ_CHUNK_SIZE)
            .map(|chunk| Ok(data.slice_ref(chunk)))
            .collect();
        Self::spawn(stream::iter(chunks))
    }

    /// Release the archive and stop its producer.
    pub fn close(mut self) {
        self.stop_producer();
    }

    fn stop_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl Drop for ImageArchive {
    fn drop(&mut self) {
        self.stop_producer();
    }
}

impl AsyncRead for ImageArchive {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// One step of walking an image archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    /// A content blob begins; its bytes follow as chunks
    BlobStart { path: String, size: u64 },
    BlobChunk(Bytes),
    BlobEnd,
    /// Small metadata file read in full (`manifest.json`)
    Metadata { path: String, data: Bytes },
    /// `path` refers to the same content as the earlier entry `target`
    Link { path: String, target: String },
}

const METADATA_FILES: &[&str] = &["manifest.json"];
const IGNORED_FILES: &[&str] = &["index.json", "oci-layout", "repositories"];

fn is_ignored(path: &str) -> bool {
    IGNORED_FILES.contains(&path) || path.ends_with("/json") || path.ends_with("/VERSION")
}

/// Walk the tar inside `archive` on a blocking thread.
///
/// Events arrive in archive order through a small bounded channel. The walk
/// stops early when the receiver is dropped. A read error is delivered as the
/// last item.
pub fn read_entries(
    archive: ImageArchive,
) -> (mpsc::Receiver<io::Result<ArchiveEvent>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
    let bridge = SyncIoBridge::new(archive);

    let handle = tokio::task::spawn_blocking(move || {
        if let Err(err) = walk_archive(bridge, &tx) {
            let _ = tx.blocking_send(Err(err));
        }
    });

    (rx, handle)
}

/// Receiver went away; stop walking.
struct Closed;

fn send(tx: &mpsc::Sender<io::Result<ArchiveEvent>>, event: ArchiveEvent) -> Result<(), Closed> {
    tx.blocking_send(Ok(event)).map_err(|_| Closed)
}

fn walk_archive<R: Read>(reader: R, tx: &mpsc::Sender<io::Result<ArchiveEvent>>) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = normalize(&entry.path()?);
        let entry_type = entry.header().entry_type();

        let sent = if entry_type.is_dir() || path.is_empty() || is_ignored(&path) {
            Ok(())
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            let Some(link) = entry.link_name()? else {
                continue;
            };
            let target = if entry_type.is_symlink() {
                let parent = Path::new(&path).parent().unwrap_or(Path::new(""));
                normalize(&parent.join(link))
            } else {
                normalize(&link)
            };
            send(tx, ArchiveEvent::Link { path, target })
        } else if METADATA_FILES.contains(&path.as_str()) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            send(tx, ArchiveEvent::Metadata { path, data: data.into() })
        } else if entry_type.is_file() {
            let size = entry.header().size()?;
            stream_blob(&mut entry, path, size, tx)
        } else {
            Ok(())
        };

        if sent.is_err() {
            tracing::debug!("archive consumer went away, stopping walk");
            return Ok(());
        }
    }

    Ok(())
}

fn stream_blob<R: Read>(
    entry: &mut R,
    path: String,
    size: u64,
    tx: &mpsc::Sender<io::Result<ArchiveEvent>>,
) -> Result<(), Closed> {
    send(tx, ArchiveEvent::BlobStart { path, size })?;

    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match entry.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => send(tx, ArchiveEvent::BlobChunk(Bytes::copy_from_slice(&buffer[..n])))?,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return Err(Closed);
            }
        }
    }

    send(tx, ArchiveEvent::BlobEnd)
}

/// Archive path with `.` and `..` resolved and `/` separators
fn normalize(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    let normalized: PathBuf = parts.iter().collect();
    normalized.to_string_lossy().replace('\\', "/")
}
