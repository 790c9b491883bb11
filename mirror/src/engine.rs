//! Mirror engine: orchestrates listing, reconciliation and the fetch pool

use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MirrorError, Result};
use crate::fetch_pool::{ErrorPolicy, FetchFailure, FetchPool, FetchPoolOptions};
use crate::lister::{ListOptions, Lister, SeenSet};
use crate::local_store::LocalStore;
use crate::metrics::{TransferCounters, TransferSnapshot};
use crate::progress::ProgressReporter;
use crate::reconciler::{Decision, Reconciler};
use crate::source::ObjectSource;

/// Options for a mirror pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Listing options
    pub list: ListOptions,
    /// Fetch pool options
    pub fetch: FetchPoolOptions,
}

impl MirrorOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.fetch.workers = workers;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.fetch.error_policy = policy;
        self
    }
}

/// Lifecycle of one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorState {
    Idle,
    Listing,
    Draining,
    Done,
}

/// Result of a completed mirror pass
#[derive(Debug)]
pub struct MirrorReport {
    pub transfer: TransferSnapshot,
    /// Every key listed during the pass; the keep set for pruning
    pub seen: SeenSet,
    /// Fetch and reconcile failures tolerated under [`ErrorPolicy::Continue`],
    /// in the order they happened
    pub failures: Vec<FetchFailure>,
    pub pages: usize,
    pub duration: Duration,
}

impl MirrorReport {
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        self.transfer.summary()
    }
}

/// One-shot mirror pass: `Idle → Listing → Draining → Done`
pub struct MirrorEngine {
    source: Arc<dyn ObjectSource>,
    store: Arc<LocalStore>,
    options: MirrorOptions,
    reconciler: Reconciler,
    counters: Arc<TransferCounters>,
    reporter: Option<ProgressReporter>,
    state: MirrorState,
}

impl MirrorEngine {
    pub fn new(source: Arc<dyn ObjectSource>, store: LocalStore, options: MirrorOptions) -> Self {
        Self {
            source,
            store: Arc::new(store),
            options,
            reconciler: Reconciler::new(),
            counters: Arc::new(TransferCounters::new()),
            reporter: None,
            state: MirrorState::Idle,
        }
    }

    /// Attach a progress reporter
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    /// Live counters; advisory until the pass is `Done`
    pub fn counters(&self) -> Arc<TransferCounters> {
        Arc::clone(&self.counters)
    }

    /// Run the pass. Fetch workers start before listing; shutdown waits for
    /// every worker. Any error is returned only after the pool has drained.
    pub async fn run(&mut self) -> Result<MirrorReport> {
        if self.state != MirrorState::Idle {
            return Err(MirrorError::InvalidState(format!(
                "mirror pass already ran (state {:?})",
                self.state
            )));
        }

        let start_time = Instant::now();
        info!(
            source = %self.source.describe(),
            destination = %self.store.root().display(),
            workers = self.options.fetch.workers,
            "Starting bucket sync from {} to {}",
            self.source.describe(),
            self.store.root().display()
        );
        if let Some(reporter) = &self.reporter {
            reporter.pass_started(self.source.describe(), self.store.root().to_string_lossy());
        }

        let cancel = CancellationToken::new();
        let pool = FetchPool::start(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.counters),
            &self.options.fetch,
            cancel.clone(),
            self.reporter.clone(),
        );

        self.transition(MirrorState::Listing);
        let mut lister = Lister::new(Arc::clone(&self.source), self.options.list.clone());
        let listing = self.list_and_enqueue(&mut lister, &pool, &cancel).await;
        if let Err(e) = &listing {
            error!(kind = e.kind(), error = %e, "Listing stage failed; draining fetch pool");
            cancel.cancel();
        }

        self.transition(MirrorState::Draining);
        let shutdown = pool.shutdown().await;
        self.transition(MirrorState::Done);

        let shutdown = shutdown?;
        listing?;

        let mut failures = shutdown.failures;
        if self.options.fetch.error_policy == ErrorPolicy::Abort && !failures.is_empty() {
            if failures.len() > 1 {
                warn!(failures = failures.len(), "Multiple objects failed before the pass stopped");
            }
            // The failure that triggered the abort
            return Err(failures.swap_remove(0).error);
        }

        let transfer = self.counters.snapshot();
        let duration = start_time.elapsed();
        transfer.log_completion(duration.as_secs_f64());
        if !failures.is_empty() {
            warn!(failures = failures.len(), "Mirror pass completed with failed fetches");
        }
        if let Some(reporter) = &self.reporter {
            reporter.pass_completed(transfer.summary());
        }

        Ok(MirrorReport {
            transfer,
            pages: lister.pages_fetched(),
            seen: lister.into_seen(),
            failures,
            duration,
        })
    }

    /// Listing stage: every descriptor is counted, reconciled and, when it
    /// needs fetching, queued. A descriptor that cannot be reconciled is
    /// recorded as a failure like a failed fetch. Stops early once the pass
    /// is cancelled.
    async fn list_and_enqueue(
        &self,
        lister: &mut Lister,
        pool: &FetchPool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while let Some(page) = lister.next_page().await? {
            if let Some(reporter) = &self.reporter {
                reporter.page_listed(lister.pages_fetched(), page.len());
            }

            for descriptor in page {
                if cancel.is_cancelled() {
                    debug!("Pass cancelled; listing stopped");
                    return Ok(());
                }

                self.counters.record_listed(descriptor.size);

                let decision = match self.reconciler.decide(&self.store, &descriptor).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        error!(key = %descriptor.key, kind = e.kind(), error = %e, "Reconcile failed");
                        pool.record_failure(descriptor.key, e).await;
                        continue;
                    }
                };

                match decision {
                    Decision::Skip => {
                        if let Some(reporter) = &self.reporter {
                            reporter.skipped(&descriptor.key);
                        }
                    }
                    Decision::FetchMismatch { local_size } => {
                        if let Some(reporter) = &self.reporter {
                            reporter.size_mismatch(&descriptor.key, descriptor.size, local_size);
                        }
                        pool.enqueue(descriptor).await?;
                    }
                    Decision::Fetch => {
                        pool.enqueue(descriptor).await?;
                    }
                }
            }
        }

        Ok(())
    }

    fn transition(&mut self, next: MirrorState) {
        debug!(from = ?self.state, to = ?next, "Mirror state transition");
        self.state = next;
    }
}
