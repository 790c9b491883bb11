//! Removes local files that were not seen remotely

use std::collections::HashSet;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::lister::SeenSet;
use crate::local_store::LocalStore;
use crate::metrics::DeletionCounters;
use crate::progress::ProgressReporter;

/// Options for a prune pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneOptions {
    /// Count what would be deleted without touching anything
    pub dry_run: bool,
}

/// Result of a prune pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted: DeletionCounters,
    pub kept_files: u64,
    pub dry_run: bool,
    pub duration: Duration,
}

impl PruneReport {
    pub fn summary(&self) -> String {
        if self.dry_run {
            format!("DRY RUN: {}", self.deleted.summary())
        } else {
            self.deleted.summary()
        }
    }
}

/// Walks the mirror root and deletes every regular file whose relative path
/// is absent from the keep set. Keep-set keys are compared in their
/// normalized form (see [`LocalStore::normalize_key`]), so `/a.txt` and
/// `a//b.txt` protect the files they were mirrored to. Empty directories are
/// left behind.
pub struct Pruner<'a> {
    store: &'a LocalStore,
    keep: &'a SeenSet,
    options: PruneOptions,
    reporter: Option<ProgressReporter>,
}

impl<'a> Pruner<'a> {
    pub fn new(store: &'a LocalStore, keep: &'a SeenSet, options: PruneOptions) -> Self {
        Self {
            store,
            keep,
            options,
            reporter: None,
        }
    }

    /// Attach a progress reporter
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run the walk. The first walk or delete failure ends the pass.
    pub async fn run(&self) -> Result<PruneReport> {
        let start_time = Instant::now();
        let mut deleted = DeletionCounters::default();
        let mut kept_files = 0u64;
        let keep: HashSet<String> = self
            .keep
            .iter()
            .filter_map(|key| LocalStore::normalize_key(key).ok())
            .collect();

        info!(
            root = %self.store.root().display(),
            keep = self.keep.len(),
            dry_run = self.options.dry_run,
            "Starting prune pass"
        );

        for file in self.store.regular_files() {
            let file = file?;

            if keep.contains(&file.key) {
                kept_files += 1;
                continue;
            }

            if self.options.dry_run {
                info!(key = %file.key, bytes = file.size, "DRY RUN: would delete {}", file.key);
            } else {
                self.store.delete(&file.key).await?;
                debug!(path = %file.path.display(), bytes = file.size, "Deleted {}", file.key);
            }

            deleted.record_deleted(file.size);
            if let Some(reporter) = &self.reporter {
                reporter.file_deleted(&file.key, file.size);
            }
        }

        let duration = start_time.elapsed();
        deleted.log_completion(self.options.dry_run, duration.as_secs_f64());

        let report = PruneReport {
            deleted,
            kept_files,
            dry_run: self.options.dry_run,
            duration,
        };
        if let Some(reporter) = &self.reporter {
            reporter.pass_completed(report.summary());
        }

        Ok(report)
    }
}
