//! Bounded pool of fetch workers draining a FIFO queue
//!
//! Workers are spawned before anything is enqueued. Shutdown sends exactly
//! one [`FetchMessage::Shutdown`] per worker behind all real work, so every
//! item enqueued earlier is handled before the last worker exits.

use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{MirrorError, Result};
use crate::local_store::LocalStore;
use crate::metrics::TransferCounters;
use crate::progress::ProgressReporter;
use crate::source::{ObjectDescriptor, ObjectSource};

/// Default number of fetch workers
pub const DEFAULT_WORKERS: usize = 8;
/// Default fetch queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Message on the fetch queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMessage {
    Work(ObjectDescriptor),
    Shutdown,
}

/// What a pass does when one object fails to fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the pass at the first failure and report it as the pass error
    #[default]
    Abort,
    /// Record the failure and carry on with the remaining objects
    Continue,
}

/// Options for the fetch pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPoolOptions {
    /// Number of concurrent workers
    pub workers: usize,
    /// Queue slots before the producer waits
    pub queue_capacity: usize,
    pub error_policy: ErrorPolicy,
}

impl Default for FetchPoolOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            error_policy: ErrorPolicy::default(),
        }
    }
}

/// One object that could not be fetched
#[derive(Debug)]
pub struct FetchFailure {
    pub key: String,
    pub error: MirrorError,
}

/// Outcome of the shutdown handshake
#[derive(Debug)]
pub struct PoolShutdown {
    /// Every recorded failure, in the order it happened
    pub failures: Vec<FetchFailure>,
    pub workers_exited: usize,
    /// Messages still queued after every worker exited
    pub pending: usize,
}

/// Failures shared by every worker and the listing stage. Recording one
/// under [`ErrorPolicy::Abort`] cancels the pass.
#[derive(Clone)]
struct FailureLog {
    entries: Arc<Mutex<Vec<FetchFailure>>>,
    error_policy: ErrorPolicy,
    cancel: CancellationToken,
    reporter: Option<ProgressReporter>,
}

impl FailureLog {
    async fn record(&self, key: String, error: MirrorError) {
        // Event order matches log order
        let mut entries = self.entries.lock().await;
        if let Some(reporter) = &self.reporter {
            reporter.fetch_failed(&key, error.to_string());
        }
        if self.error_policy == ErrorPolicy::Abort {
            self.cancel.cancel();
        }
        entries.push(FetchFailure { key, error });
    }

    async fn take(&self) -> Vec<FetchFailure> {
        std::mem::take(&mut *self.entries.lock().await)
    }
}

struct Worker {
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<FetchMessage>>>,
    source: Arc<dyn ObjectSource>,
    store: Arc<LocalStore>,
    counters: Arc<TransferCounters>,
    cancel: CancellationToken,
    failures: FailureLog,
    reporter: Option<ProgressReporter>,
}

/// Fixed-size set of workers sharing one queue
pub struct FetchPool {
    sender: mpsc::Sender<FetchMessage>,
    workers: Vec<JoinHandle<()>>,
    failures: FailureLog,
}

impl FetchPool {
    /// Spawn the workers; each blocks on the queue until work arrives
    pub fn start(
        source: Arc<dyn ObjectSource>,
        store: Arc<LocalStore>,
        counters: Arc<TransferCounters>,
        options: &FetchPoolOptions,
        cancel: CancellationToken,
        reporter: Option<ProgressReporter>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(receiver));
        let failures = FailureLog {
            entries: Arc::new(Mutex::new(Vec::new())),
            error_policy: options.error_policy,
            cancel: cancel.clone(),
            reporter: reporter.clone(),
        };

        let workers = (0..options.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    source: Arc::clone(&source),
                    store: Arc::clone(&store),
                    counters: Arc::clone(&counters),
                    cancel: cancel.clone(),
                    failures: failures.clone(),
                    reporter: reporter.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        debug!(workers = options.workers.max(1), capacity = options.queue_capacity, "Fetch pool started");

        Self {
            sender,
            workers,
            failures,
        }
    }

    /// Queue one object. Waits while the queue is full.
    pub async fn enqueue(&self, descriptor: ObjectDescriptor) -> Result<()> {
        self.sender
            .send(FetchMessage::Work(descriptor))
            .await
            .map_err(|_| MirrorError::Worker("fetch queue closed".to_string()))
    }

    /// Record a failure that happened outside the workers, such as a key
    /// that could not be reconciled
    pub async fn record_failure(&self, key: impl Into<String>, error: MirrorError) {
        self.failures.record(key.into(), error).await;
    }

    /// Messages currently queued
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Send one shutdown message per worker and wait for all of them to exit
    pub async fn shutdown(self) -> Result<PoolShutdown> {
        for _ in 0..self.workers.len() {
            self.sender
                .send(FetchMessage::Shutdown)
                .await
                .map_err(|_| MirrorError::Worker("fetch queue closed before shutdown".to_string()))?;
        }

        let mut workers_exited = 0;
        let mut join_error = None;

        for handle in self.workers {
            match handle.await {
                Ok(()) => workers_exited += 1,
                Err(e) => {
                    error!(error = %e, "Fetch worker terminated abnormally");
                    join_error.get_or_insert_with(|| MirrorError::Worker(e.to_string()));
                }
            }
        }

        if let Some(e) = join_error {
            return Err(e);
        }

        let failures = self.failures.take().await;
        let pending = self.sender.max_capacity() - self.sender.capacity();
        debug!(workers_exited, pending, failures = failures.len(), "Fetch pool drained");

        Ok(PoolShutdown {
            failures,
            workers_exited,
            pending,
        })
    }
}

impl Worker {
    async fn run(self) {
        loop {
            let message = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };

            let descriptor = match message {
                Some(FetchMessage::Work(descriptor)) => descriptor,
                Some(FetchMessage::Shutdown) | None => break,
            };

            // Keep draining after an abort so the shutdown handshake completes
            if self.cancel.is_cancelled() {
                debug!(worker = self.id, key = %descriptor.key, "Dropped after abort");
                continue;
            }

            let started = Instant::now();
            match fetch_object(self.source.as_ref(), &self.store, &descriptor).await {
                Ok(bytes) => {
                    self.counters.record_synced(bytes);
                    info!(key = %descriptor.key, bytes, "Fetched {} ({} bytes)", descriptor.key, bytes);
                    if let Some(reporter) = &self.reporter {
                        reporter.fetch_completed(&descriptor.key, bytes, started.elapsed());
                    }
                }
                Err(error) => {
                    error!(
                        worker = self.id,
                        key = %descriptor.key,
                        kind = error.kind(),
                        error = %error,
                        "Fetch failed"
                    );
                    self.failures.record(descriptor.key, error).await;
                }
            }
        }

        debug!(worker = self.id, "Fetch worker exited");
    }
}

/// Download one object into the local tree, returning the bytes copied.
/// A failed copy leaves the truncated local file in place.
pub async fn fetch_object(
    source: &dyn ObjectSource,
    store: &LocalStore,
    descriptor: &ObjectDescriptor,
) -> Result<u64> {
    let key = descriptor.key.as_str();
    let path = store.resolve(key)?;

    store.ensure_parent_dir(key).await?;
    let mut file = store.create_for_write(key).await?;

    let mut reader = source.open_reader(key).await.map_err(|e| {
        MirrorError::transfer_error(key, &path, format!("Failed to open remote stream: {}", e))
    })?;

    let bytes = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
        MirrorError::transfer_error(key, &path, format!("Failed to copy remote stream: {}", e))
    })?;

    file.flush().await.map_err(|e| {
        MirrorError::transfer_error(key, &path, format!("Failed to flush file: {}", e))
    })?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use crate::progress::{ProgressChannel, ProgressEvent};
    use crate::source::MemoryObjectSource;

    fn pool_for(
        source: MemoryObjectSource,
        temp_dir: &TempDir,
        options: FetchPoolOptions,
    ) -> (FetchPool, Arc<TransferCounters>, CancellationToken) {
        let store = Arc::new(LocalStore::open(temp_dir.path()).unwrap());
        let counters = Arc::new(TransferCounters::new());
        let cancel = CancellationToken::new();
        let pool = FetchPool::start(
            Arc::new(source),
            store,
            Arc::clone(&counters),
            &options,
            cancel.clone(),
            None,
        );
        (pool, counters, cancel)
    }

    #[tokio::test]
    async fn test_fetch_object_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        let source = MemoryObjectSource::default().with_object("b/c.txt", "twenty bytes of data");

        let bytes = fetch_object(&source, &store, &ObjectDescriptor::new("b/c.txt", 20))
            .await
            .unwrap();

        assert_eq!(bytes, 20);
        let content = tokio::fs::read(temp_dir.path().join("b").join("c.txt")).await.unwrap();
        assert_eq!(content, b"twenty bytes of data");
    }

    #[tokio::test]
    async fn test_fetch_object_truncates_existing() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("a.txt"), b"a much longer stale local copy").await.unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        let source = MemoryObjectSource::default().with_object("a.txt", "fresh");

        fetch_object(&source, &store, &ObjectDescriptor::new("a.txt", 5)).await.unwrap();

        let content = tokio::fs::read(temp_dir.path().join("a.txt")).await.unwrap();
        assert_eq!(content, b"fresh");
    }

    #[tokio::test]
    async fn test_failed_open_leaves_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        let source = MemoryObjectSource::default().with_failing_key("bad.txt");

        let err = fetch_object(&source, &store, &ObjectDescriptor::new("bad.txt", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::Transfer { ref key, .. } if key == "bad.txt"));
        assert_eq!(store.stat("bad.txt").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_pool_drains_everything_before_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MemoryObjectSource::default();
        for i in 0..50 {
            source.insert(format!("dir{}/file{}.txt", i % 5, i), vec![b'x'; i]);
        }
        let options = FetchPoolOptions {
            workers: 4,
            queue_capacity: 3,
            ..Default::default()
        };
        let (pool, counters, _cancel) = pool_for(source, &temp_dir, options);
        assert_eq!(pool.worker_count(), 4);

        for i in 0..50 {
            pool.enqueue(ObjectDescriptor::new(format!("dir{}/file{}.txt", i % 5, i), i as u64))
                .await
                .unwrap();
        }

        let shutdown = pool.shutdown().await.unwrap();
        assert_eq!(shutdown.workers_exited, 4);
        assert_eq!(shutdown.pending, 0);
        assert!(shutdown.failures.is_empty());

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.synced_files, 50);
        assert_eq!(snapshot.synced_bytes, (0..50u64).sum::<u64>());
    }

    #[tokio::test]
    async fn test_abort_policy_cancels_and_still_joins() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemoryObjectSource::default()
            .with_object("good.txt", "ok")
            .with_failing_key("bad.txt");
        let options = FetchPoolOptions {
            workers: 1,
            ..Default::default()
        };
        let (pool, counters, cancel) = pool_for(source, &temp_dir, options);

        pool.enqueue(ObjectDescriptor::new("bad.txt", 3)).await.unwrap();
        pool.enqueue(ObjectDescriptor::new("good.txt", 2)).await.unwrap();

        let shutdown = pool.shutdown().await.unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(shutdown.workers_exited, 1);
        assert_eq!(shutdown.pending, 0);
        assert_eq!(shutdown.failures.len(), 1);
        assert_eq!(shutdown.failures[0].key, "bad.txt");
        // The single worker saw the failure first and skipped the rest
        assert_eq!(counters.snapshot().synced_files, 0);
    }

    #[tokio::test]
    async fn test_continue_policy_collects_failures() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemoryObjectSource::default()
            .with_object("good.txt", "ok")
            .with_failing_key("bad.txt");
        let options = FetchPoolOptions {
            workers: 1,
            error_policy: ErrorPolicy::Continue,
            ..Default::default()
        };
        let (pool, counters, cancel) = pool_for(source, &temp_dir, options);

        pool.enqueue(ObjectDescriptor::new("bad.txt", 3)).await.unwrap();
        pool.enqueue(ObjectDescriptor::new("good.txt", 2)).await.unwrap();

        let shutdown = pool.shutdown().await.unwrap();
        assert!(!cancel.is_cancelled());
        assert_eq!(shutdown.failures.len(), 1);
        assert_eq!(counters.snapshot().synced_files, 1);
        assert_eq!(counters.snapshot().synced_bytes, 2);
    }

    #[tokio::test]
    async fn test_failures_are_kept_in_the_order_they_happened() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = MemoryObjectSource::default();
        for i in 0..12 {
            let key = format!("bad-{:02}.txt", i);
            source.insert(key.clone(), "x");
            source = source.with_failing_key(key);
        }
        let store = Arc::new(LocalStore::open(temp_dir.path()).unwrap());
        let (reporter, mut channel) = ProgressChannel::new();
        let options = FetchPoolOptions {
            workers: 4,
            error_policy: ErrorPolicy::Continue,
            ..Default::default()
        };
        let pool = FetchPool::start(
            Arc::new(source),
            store,
            Arc::new(TransferCounters::new()),
            &options,
            CancellationToken::new(),
            Some(reporter),
        );

        pool.record_failure("../outside.txt", MirrorError::invalid_key("../outside.txt", "escapes root"))
            .await;
        for i in 0..12 {
            pool.enqueue(ObjectDescriptor::new(format!("bad-{:02}.txt", i), 1)).await.unwrap();
        }
        let shutdown = pool.shutdown().await.unwrap();

        let mut reported = Vec::new();
        while let Some(event) = channel.recv().await {
            if let ProgressEvent::FetchFailed { key, .. } = event {
                reported.push(key);
            }
        }
        let recorded: Vec<String> = shutdown.failures.iter().map(|f| f.key.clone()).collect();

        assert_eq!(recorded.len(), 13);
        assert_eq!(recorded[0], "../outside.txt");
        assert_eq!(recorded, reported);
    }

    #[tokio::test]
    async fn test_recorded_failure_cancels_under_abort() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, _counters, cancel) = pool_for(MemoryObjectSource::default(), &temp_dir, FetchPoolOptions::default());

        pool.record_failure("../x", MirrorError::invalid_key("../x", "escapes root")).await;
        assert!(cancel.is_cancelled());

        let shutdown = pool.shutdown().await.unwrap();
        assert_eq!(shutdown.failures.len(), 1);
        assert!(matches!(shutdown.failures[0].error, MirrorError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_with_no_work() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, counters, _cancel) = pool_for(MemoryObjectSource::default(), &temp_dir, FetchPoolOptions::default());
        assert_eq!(pool.pending(), 0);

        let shutdown = pool.shutdown().await.unwrap();
        assert_eq!(shutdown.workers_exited, DEFAULT_WORKERS);
        assert_eq!(counters.snapshot().synced_files, 0);
    }
}
