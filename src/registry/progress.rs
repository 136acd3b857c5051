//! Push progress reporting
//!
//! The registry client reports through [`ProgressReporter`]; rendering is up
//! to the implementation. Per attempt the calls arrive as `start`, then any
//! mix of `layer_progress` / `layer_complete`, then exactly one of `complete`
//! or `error`.

use crate::error::PushError;
use crate::logging::{format_duration, format_size};
use crate::registry::client::PushResult;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

pub trait ProgressReporter: Send + Sync {
    fn start(&self, image_ref: &str, layer_count: usize);
    fn layer_progress(&self, layer_digest: &str, current: u64, total: u64);
    fn layer_complete(&self, layer_digest: &str);
    fn complete(&self, result: &PushResult);
    fn error(&self, err: &PushError);
}

/// Reporter that ignores every call
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn start(&self, _image_ref: &str, _layer_count: usize) {}
    fn layer_progress(&self, _layer_digest: &str, _current: u64, _total: u64) {}
    fn layer_complete(&self, _layer_digest: &str) {}
    fn complete(&self, _result: &PushResult) {}
    fn error(&self, _err: &PushError) {}
}

const MILESTONES: [u64; 3] = [25, 50, 75];
const SHORT_DIGEST_LEN: usize = 15;

struct ReporterState {
    out: Option<Box<dyn Write + Send>>,
    layers: HashMap<String, u64>,
    started: Instant,
}

/// Line-oriented reporter for terminals and CI logs.
///
/// Layer progress is printed only when a layer crosses 25, 50 or 75 percent.
/// Write failures are ignored. With no writer it prints nothing.
pub struct StderrProgressReporter {
    state: Mutex<ReporterState>,
}

impl StderrProgressReporter {
    pub fn new<W: Write + Send + 'static>(out: Option<W>) -> Self {
        Self {
            state: Mutex::new(ReporterState {
                out: out.map(|w| Box::new(w) as Box<dyn Write + Send>),
                layers: HashMap::new(),
                started: Instant::now(),
            }),
        }
    }

    /// Reporter writing to the process's stderr
    pub fn stderr() -> Self {
        Self::new(Some(std::io::stderr()))
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReporterState {
    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.write_fmt(text);
            let _ = out.write_all(b"\n");
            let _ = out.flush();
        }
    }
}

fn short_digest(digest: &str) -> &str {
    match digest.char_indices().nth(SHORT_DIGEST_LEN) {
        Some((end, _)) => &digest[..end],
        None => digest,
    }
}

impl ProgressReporter for StderrProgressReporter {
    fn start(&self, image_ref: &str, layer_count: usize) {
        let mut state = self.lock();
        if state.out.is_none() {
            return;
        }
        state.layers.clear();
        state.started = Instant::now();
        state.line(format_args!("Pushing {} ({} layers)...", image_ref, layer_count));
    }

    fn layer_progress(&self, layer_digest: &str, current: u64, total: u64) {
        if total == 0 {
            return;
        }
        let mut state = self.lock();
        if state.out.is_none() {
            return;
        }

        let previous = state.layers.insert(layer_digest.to_string(), current).unwrap_or(0);
        let old_percent = previous.saturating_mul(100) / total;
        let new_percent = current.saturating_mul(100) / total;

        if MILESTONES
            .iter()
            .any(|&milestone| old_percent < milestone && new_percent >= milestone)
        {
            state.line(format_args!(
                "  {}: {}% ({} / {})",
                short_digest(layer_digest),
                new_percent,
                format_size(current),
                format_size(total)
            ));
        }
    }

    fn layer_complete(&self, layer_digest: &str) {
        let mut state = self.lock();
        state.line(format_args!("  {}: done", short_digest(layer_digest)));
    }

    fn complete(&self, result: &PushResult) {
        let mut state = self.lock();
        let elapsed = state.started.elapsed();
        state.line(format_args!(
            "Push complete: {} ({} in {})",
            result.digest,
            format_size(result.size_bytes),
            format_duration(elapsed)
        ));
    }

    fn error(&self, err: &PushError) {
        let mut state = self.lock();
        state.line(format_args!("Push failed: {}", err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn result() -> PushResult {
        PushResult {
            reference: format!("registry.local/app:v1@{}", DIGEST),
            digest: DIGEST.to_string(),
            size_bytes: 2048,
        }
    }

    #[test]
    fn test_milestones_only() {
        let buffer = SharedBuffer::default();
        let reporter = StderrProgressReporter::new(Some(buffer.clone()));

        reporter.start("app:v1", 2);
        for current in [10, 20, 30, 40, 55, 60, 80, 100] {
            reporter.layer_progress(DIGEST, current, 100);
        }
        reporter.layer_complete(DIGEST);

        let text = buffer.text();
        assert!(text.starts_with("Pushing app:v1 (2 layers)...\n"));
        assert!(text.contains("  sha256:01234567: 30% (30 B / 100 B)\n"));
        assert!(text.contains("  sha256:01234567: 55% (55 B / 100 B)\n"));
        assert!(text.contains("  sha256:01234567: 80% (80 B / 100 B)\n"));
        assert!(!text.contains(": 10%"));
        assert!(!text.contains(": 100%"));
        assert!(text.ends_with("  sha256:01234567: done\n"));
    }

    #[test]
    fn test_complete_and_error_lines() {
        let buffer = SharedBuffer::default();
        let reporter = StderrProgressReporter::new(Some(buffer.clone()));

        reporter.start("app:v1", 1);
        reporter.complete(&result());
        reporter.error(&PushError::Config("bad".to_string()));

        let text = buffer.text();
        assert!(text.contains(&format!("Push complete: {} (2.00 KB in ", DIGEST)));
        assert!(text.contains("Push failed: configuration error: bad\n"));
    }

    #[test]
    fn test_without_writer_is_silent() {
        let reporter = StderrProgressReporter::new(None::<SharedBuffer>);
        reporter.layer_progress(DIGEST, 50, 100);
        reporter.layer_complete("short");
        reporter.complete(&result());
        reporter.error(&PushError::Config("bad".to_string()));
        reporter.start("app", 0);
        reporter.layer_progress(DIGEST, 1, 0);
    }

    #[test]
    fn test_noop_accepts_anything() {
        let reporter = NoopProgress;
        reporter.layer_complete("");
        reporter.layer_progress("", u64::MAX, 0);
        reporter.complete(&result());
        reporter.error(&PushError::Config(String::new()));
        reporter.start("", 0);
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(short_digest(DIGEST), "sha256:01234567");
        assert_eq!(short_digest("abc"), "abc");
    }
}
