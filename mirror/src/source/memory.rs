//! In-process object source backed by a sorted map

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{MirrorError, Result};
use super::{ListPage, ListRequest, ObjectDescriptor, ObjectReader, ObjectSource};

/// Bucket held in memory. Listing honours prefix, delimiter, marker and
/// `max_keys`, capped by the configured page size.
pub struct MemoryObjectSource {
    name: String,
    objects: BTreeMap<String, Bytes>,
    page_size: usize,
    failing_keys: HashSet<String>,
    fail_listing_after: Option<usize>,
    list_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl Default for MemoryObjectSource {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryObjectSource {
    /// Create an empty bucket
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: BTreeMap::new(),
            page_size: 1000,
            failing_keys: HashSet::new(),
            fail_listing_after: None,
            list_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
        }
    }

    /// Add or replace an object
    pub fn with_object(mut self, key: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.insert(key, content);
        self
    }

    /// Cap every page at `page_size` descriptors
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make `open_reader` fail for `key`
    pub fn with_failing_key(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    /// Make every listing call after the first `pages` fail
    pub fn with_listing_failure_after(mut self, pages: usize) -> Self {
        self.fail_listing_after = Some(pages);
        self
    }

    /// Add or replace an object in place
    pub fn insert(&mut self, key: impl Into<String>, content: impl Into<Bytes>) {
        self.objects.insert(key.into(), content.into());
    }

    /// Number of listing round-trips served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of reads opened so far
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Collapse a key to its common prefix when a delimiter follows the prefix
    fn rolls_up(key: &str, request: &ListRequest) -> bool {
        match &request.delimiter {
            Some(delimiter) if !delimiter.is_empty() => key[request.prefix.len()..].contains(delimiter.as_str()),
            _ => false,
        }
    }
}

#[async_trait]
impl ObjectSource for MemoryObjectSource {
    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_listing_after {
            if call >= limit {
                return Err(MirrorError::listing_error(
                    request.marker.clone(),
                    "simulated listing failure",
                ));
            }
        }

        let limit = request.max_keys.min(self.page_size).max(1);
        let mut candidates = self
            .objects
            .iter()
            .filter(|(key, _)| key.as_str() > request.marker.as_str())
            .filter(|(key, _)| key.starts_with(&request.prefix))
            .filter(|(key, _)| !Self::rolls_up(key, request))
            .map(|(key, content)| ObjectDescriptor::new(key.clone(), content.len() as u64));

        let objects: Vec<ObjectDescriptor> = candidates.by_ref().take(limit).collect();
        let is_truncated = candidates.next().is_some();

        Ok(ListPage {
            objects,
            is_truncated,
        })
    }

    async fn open_reader(&self, key: &str) -> Result<ObjectReader> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_keys.contains(key) {
            return Err(MirrorError::Generic(anyhow::anyhow!(
                "simulated read failure for '{}'",
                key
            )));
        }

        let content = self.objects.get(key).cloned().ok_or_else(|| {
            MirrorError::Generic(anyhow::anyhow!("no such key '{}' in {}", key, self.name))
        })?;

        Ok(Box::pin(Cursor::new(content)))
    }

    fn describe(&self) -> String {
        format!("memory bucket '{}'", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn request(marker: &str, max_keys: usize) -> ListRequest {
        ListRequest {
            marker: marker.to_string(),
            max_keys,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pagination_by_marker() {
        let source = MemoryObjectSource::default()
            .with_object("a.txt", "aaaa")
            .with_object("b.txt", "bb")
            .with_object("c.txt", "c")
            .with_page_size(2);

        let first = source.list(&request("", 1000)).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.objects[0], ObjectDescriptor::new("a.txt", 4));

        let second = source.list(&request("b.txt", 1000)).await.unwrap();
        assert_eq!(second.objects, vec![ObjectDescriptor::new("c.txt", 1)]);
        assert!(!second.is_truncated);
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_prefix_and_delimiter() {
        let source = MemoryObjectSource::default()
            .with_object("logs/a.txt", "1")
            .with_object("logs/deep/b.txt", "2")
            .with_object("other.txt", "3");

        let page = source
            .list(&ListRequest {
                prefix: "logs/".to_string(),
                delimiter: Some("/".to_string()),
                max_keys: 1000,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.objects, vec![ObjectDescriptor::new("logs/a.txt", 1)]);
    }

    #[tokio::test]
    async fn test_open_reader() {
        let source = MemoryObjectSource::default()
            .with_object("a.txt", "hello")
            .with_failing_key("broken.txt");

        let mut reader = source.open_reader("a.txt").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "hello");

        assert!(source.open_reader("broken.txt").await.is_err());
        assert!(source.open_reader("missing.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_listing_failure() {
        let source = MemoryObjectSource::default()
            .with_object("a.txt", "a")
            .with_listing_failure_after(0);

        let err = source.list(&request("", 10)).await.unwrap_err();
        assert!(matches!(err, MirrorError::Listing { .. }));
    }
}
