//! Presence and size reconciliation of one listed object against the local tree

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::source::ObjectDescriptor;

/// What to do with one listed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Local copy already has the listed size
    Skip,
    /// No local copy
    Fetch,
    /// Local copy exists with a different size
    FetchMismatch { local_size: u64 },
}

impl Decision {
    /// Whether the object has to be downloaded
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Decision::Skip)
    }
}

/// Decides skip/fetch by comparing sizes. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    /// Decide what to do with `descriptor` given the current local state
    pub async fn decide(&self, store: &LocalStore, descriptor: &ObjectDescriptor) -> Result<Decision> {
        // Directory placeholder objects carry no content
        if descriptor.key.ends_with('/') {
            debug!(key = %descriptor.key, "Skipped directory placeholder");
            return Ok(Decision::Skip);
        }

        let decision = match store.stat(&descriptor.key).await? {
            None => Decision::Fetch,
            Some(local_size) if local_size == descriptor.size => Decision::Skip,
            Some(local_size) => Decision::FetchMismatch { local_size },
        };

        match decision {
            Decision::Skip => debug!(key = %descriptor.key, "Skipped"),
            Decision::FetchMismatch { local_size } => warn!(
                key = %descriptor.key,
                expected_bytes = descriptor.size,
                local_bytes = local_size,
                "Mismatched size for {} (expecting {} bytes, got {} bytes)",
                descriptor.key,
                descriptor.size,
                local_size
            ),
            Decision::Fetch => {}
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case::absent(None, 10, Decision::Fetch)]
    #[case::same_size(Some(10), 10, Decision::Skip)]
    #[case::empty_both(Some(0), 0, Decision::Skip)]
    #[case::smaller_local(Some(5), 20, Decision::FetchMismatch { local_size: 5 })]
    #[case::larger_local(Some(30), 20, Decision::FetchMismatch { local_size: 30 })]
    #[tokio::test]
    async fn test_decide(#[case] local_size: Option<usize>, #[case] remote_size: u64, #[case] expected: Decision) {
        let temp_dir = TempDir::new().unwrap();
        if let Some(size) = local_size {
            tokio::fs::create_dir_all(temp_dir.path().join("dir")).await.unwrap();
            tokio::fs::write(temp_dir.path().join("dir").join("file.bin"), vec![0u8; size])
                .await
                .unwrap();
        }
        let store = LocalStore::open(temp_dir.path()).unwrap();

        let decision = Reconciler::new()
            .decide(&store, &ObjectDescriptor::new("dir/file.bin", remote_size))
            .await
            .unwrap();

        assert_eq!(decision, expected);
        assert_eq!(decision.needs_fetch(), expected != Decision::Skip);
    }

    #[tokio::test]
    async fn test_directory_placeholder_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        let decision = Reconciler::new()
            .decide(&store, &ObjectDescriptor::new("photos/", 0))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Skip);
    }

    #[tokio::test]
    async fn test_escaping_key_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        let result = Reconciler::new()
            .decide(&store, &ObjectDescriptor::new("../outside.txt", 1))
            .await;
        assert!(result.is_err());
    }
}
