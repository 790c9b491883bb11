//! Bucket Mirror Library
//!
//! Mirrors a remote object-storage bucket onto a local directory tree:
//! - Paginated listing with a seen set of remote keys
//! - Size-based reconciliation against the local tree
//! - Bounded pool of concurrent fetch workers with an ordered shutdown
//! - Pruning of local files that no longer exist remotely
//! - Progress events and transfer counters

pub mod source;
pub mod local_store;
pub mod reconciler;
pub mod lister;
pub mod fetch_pool;
pub mod engine;
pub mod pruner;
pub mod progress;
pub mod metrics;
pub mod error;

use std::sync::Arc;

// Re-export main types and functions
pub use source::{ListPage, ListRequest, MemoryObjectSource, ObjectDescriptor, ObjectReader, ObjectSource};
#[cfg(feature = "s3")]
pub use source::{S3ObjectSource, S3Settings};
pub use local_store::{LocalFile, LocalStore};
pub use reconciler::{Decision, Reconciler};
pub use lister::{ListOptions, Lister, SeenSet};
pub use fetch_pool::{ErrorPolicy, FetchFailure, FetchMessage, FetchPool, FetchPoolOptions};
pub use engine::{MirrorEngine, MirrorOptions, MirrorReport, MirrorState};
pub use pruner::{PruneOptions, PruneReport, Pruner};
pub use progress::{ProgressChannel, ProgressEvent, ProgressReporter};
pub use metrics::{DeletionCounters, TransferCounters, TransferSnapshot};
pub use error::{MirrorError, Result};

/// Run one mirror pass of `source` into `store`
pub async fn mirror_bucket(
    source: Arc<dyn ObjectSource>,
    store: LocalStore,
    options: MirrorOptions,
) -> Result<MirrorReport> {
    let mut engine = MirrorEngine::new(source, store, options);
    engine.run().await
}

/// Delete every regular file under the store root that is not in `keep`
pub async fn prune_directory(
    store: &LocalStore,
    keep: &SeenSet,
    options: PruneOptions,
) -> Result<PruneReport> {
    Pruner::new(store, keep, options).run().await
}

/// List `source` without fetching anything, returning the seen set
pub async fn list_keys(source: Arc<dyn ObjectSource>, options: ListOptions) -> Result<SeenSet> {
    let mut lister = Lister::new(source, options);
    while lister.next_page().await?.is_some() {}
    Ok(lister.into_seen())
}
