//! Counters and summaries for mirror and prune passes

use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Add-only transfer counters shared by the listing stage and every fetch worker
#[derive(Debug, Default)]
pub struct TransferCounters {
    total_files: AtomicU64,
    total_bytes: AtomicU64,
    synced_files: AtomicU64,
    synced_bytes: AtomicU64,
}

impl TransferCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one listed object
    pub fn record_listed(&self, size: u64) {
        self.total_files.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Record one fetched object and the bytes actually copied
    pub fn record_synced(&self, bytes: u64) {
        self.synced_files.fetch_add(1, Ordering::Relaxed);
        self.synced_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Point-in-time copy. Only exact once every worker has exited.
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            total_files: self.total_files.load(Ordering::Acquire),
            total_bytes: self.total_bytes.load(Ordering::Acquire),
            synced_files: self.synced_files.load(Ordering::Acquire),
            synced_bytes: self.synced_bytes.load(Ordering::Acquire),
        }
    }
}

/// Plain copy of [`TransferCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub total_files: u64,
    pub total_bytes: u64,
    pub synced_files: u64,
    pub synced_bytes: u64,
}

impl TransferSnapshot {
    /// Files that already matched locally
    pub fn skipped_files(&self) -> u64 {
        self.total_files.saturating_sub(self.synced_files)
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        format!(
            "Synced {}/{} seen files, updated {}/{} bytes",
            self.synced_files, self.total_files, self.synced_bytes, self.total_bytes
        )
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Emit the structured completion event for a mirror pass
    pub fn log_completion(&self, duration_secs: f64) {
        info!(
            total_files = self.total_files,
            total_bytes = self.total_bytes,
            synced_files = self.synced_files,
            synced_bytes = self.synced_bytes,
            synced_human = %format_bytes(self.synced_bytes),
            duration_secs,
            "Mirror pass completed"
        );
    }
}

/// Counters owned by a single prune run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCounters {
    pub deleted_files: u64,
    pub deleted_bytes: u64,
}

impl DeletionCounters {
    /// Record one deleted file
    pub fn record_deleted(&mut self, size: u64) {
        self.deleted_files += 1;
        self.deleted_bytes += size;
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        format!(
            "Deleted {} files ({} bytes)",
            self.deleted_files, self.deleted_bytes
        )
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Emit the structured completion event for a prune pass
    pub fn log_completion(&self, dry_run: bool, duration_secs: f64) {
        info!(
            deleted_files = self.deleted_files,
            deleted_bytes = self.deleted_bytes,
            deleted_human = %format_bytes(self.deleted_bytes),
            dry_run,
            duration_secs,
            "Prune pass completed"
        );
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
