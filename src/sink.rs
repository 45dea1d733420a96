//! Consumer sinks and the fan-out that feeds them. Sinks are registered once
//! per logical request and written to by whichever attempt reaches the
//! streaming phase; completion of a successful attempt is reported only after
//! every sink has ended.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::future::{BoxFuture, join_all};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Error;
use crate::util::lock_unpoisoned;

/// A consumer of response body data.
///
/// `end` resolves once the sink has durably finished (flushed, closed,
/// handed off); the fan-out joins on every sink's `end` before the request
/// completes. `destroy` is a synchronous best-effort teardown on failure or
/// abort; sinks backed by a named resource report it via `resource_path` so
/// partial output can be deleted.
pub trait BodySink: Send + Sync {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, io::Result<()>>;
    fn end(&mut self) -> BoxFuture<'_, io::Result<()>>;
    fn destroy(&mut self, error: &Error);
    fn resource_path(&self) -> Option<PathBuf> {
        None
    }
}

struct SinkEntry {
    sink: Box<dyn BodySink>,
    failed: bool,
    destroyed: bool,
}

/// Forwards chunks to every registered sink in registration order and
/// coordinates their end-of-stream.
#[derive(Default)]
pub(crate) struct SinkFanOut {
    entries: Vec<SinkEntry>,
}

impl SinkFanOut {
    pub(crate) fn register(&mut self, sink: Box<dyn BodySink>) {
        self.entries.push(SinkEntry {
            sink,
            failed: false,
            destroyed: false,
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best-effort forward: a sink write failure marks that sink failed and
    /// does not halt forwarding to the remaining sinks.
    pub(crate) async fn write(&mut self, chunk: &Bytes) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.failed || entry.destroyed {
                continue;
            }
            if let Err(source) = entry.sink.write(chunk.clone()).await {
                warn!(sink = index, error = %source, "sink write failed; continuing with remaining sinks");
                entry.failed = true;
            }
        }
    }

    /// Signals end-of-input to every live sink and resolves only after all of
    /// them have individually ended. Count-based join, order-independent;
    /// with zero sinks it resolves immediately.
    pub(crate) async fn finish(&mut self) {
        let ends = self
            .entries
            .iter_mut()
            .filter(|entry| !entry.destroyed)
            .map(|entry| entry.sink.end());
        for (index, result) in join_all(ends).await.into_iter().enumerate() {
            if let Err(source) = result {
                warn!(sink = index, error = %source, "sink failed to end cleanly");
            }
        }
    }

    /// Destroys every not-yet-destroyed sink and best-effort deletes any
    /// named resource behind it. Deletion runs on a spawned task so callers
    /// never block on filesystem work; failures are swallowed and logged,
    /// since the request outcome is already determined by the transport
    /// result.
    pub(crate) fn destroy_all(&mut self, error: &Error) {
        for entry in &mut self.entries {
            if entry.destroyed {
                continue;
            }
            entry.sink.destroy(error);
            entry.destroyed = true;
            if let Some(path) = entry.sink.resource_path() {
                tokio::spawn(async move {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => debug!(path = %path.display(), "removed partial sink output"),
                        Err(source) if source.kind() == io::ErrorKind::NotFound => {}
                        Err(source) => {
                            warn!(path = %path.display(), error = %source, "failed to remove partial sink output");
                        }
                    }
                });
            }
        }
    }
}

/// Sink that streams chunks into a file. The file is created lazily on the
/// first chunk so piping to a path never touches the filesystem for
/// requests that fail before any data arrives.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl BodySink for FileSink {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            if self.file.is_none() {
                self.file = Some(File::create(&self.path).await?);
            }
            match self.file.as_mut() {
                Some(file) => file.write_all(&chunk).await,
                None => Ok(()),
            }
        })
    }

    fn end(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            if let Some(file) = self.file.as_mut() {
                file.flush().await?;
                file.sync_all().await?;
            }
            Ok(())
        })
    }

    fn destroy(&mut self, _error: &Error) {
        self.file = None;
    }

    fn resource_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// In-memory sink with a shared buffer, handy for observing streamed output.
#[derive(Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
    ended: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        lock_unpoisoned(&self.buffer).clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl BodySink for MemorySink {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, io::Result<()>> {
        lock_unpoisoned(&self.buffer).extend_from_slice(&chunk);
        Box::pin(std::future::ready(Ok(())))
    }

    fn end(&mut self) -> BoxFuture<'_, io::Result<()>> {
        self.ended.store(true, Ordering::SeqCst);
        Box::pin(std::future::ready(Ok(())))
    }

    fn destroy(&mut self, _error: &Error) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
