//! Drains paginated remote listings and tracks every key seen during a pass

use std::collections::HashSet;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::source::{ListRequest, ObjectDescriptor, ObjectSource};

/// Default number of keys requested per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Keys observed remotely during one listing pass. Used as the prune keep set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenSet {
    keys: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key; returns false when it was already present
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl<K: Into<String>> FromIterator<K> for SeenSet {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Options for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOptions {
    /// Only list keys under this prefix
    pub prefix: String,
    /// Roll keys up at this delimiter (not used by a full mirror)
    pub delimiter: Option<String>,
    /// Keys requested per round-trip
    pub page_size: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            delimiter: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Marker-based pagination cursor over an [`ObjectSource`]
pub struct Lister {
    source: Arc<dyn ObjectSource>,
    options: ListOptions,
    marker: String,
    finished: bool,
    pages_fetched: usize,
    seen: SeenSet,
}

impl Lister {
    pub fn new(source: Arc<dyn ObjectSource>, options: ListOptions) -> Self {
        Self {
            source,
            options,
            marker: String::new(),
            finished: false,
            pages_fetched: 0,
            seen: SeenSet::new(),
        }
    }

    /// Fetch the next page, recording each key in the seen set before
    /// handing the page downstream. `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectDescriptor>>> {
        if self.finished {
            return Ok(None);
        }

        let request = ListRequest {
            prefix: self.options.prefix.clone(),
            delimiter: self.options.delimiter.clone(),
            marker: self.marker.clone(),
            max_keys: self.options.page_size,
        };

        let page = match self.source.list(&request).await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        self.pages_fetched += 1;

        for descriptor in &page.objects {
            self.seen.insert(descriptor.key.clone());
        }

        match page.objects.last() {
            Some(last) if page.is_truncated => {
                self.marker = last.key.clone();
            }
            None if page.is_truncated => {
                warn!(
                    marker = %self.marker,
                    "Source reported more pages after an empty page; stopping"
                );
                self.finished = true;
            }
            _ => {
                self.finished = true;
            }
        }

        debug!(
            page = self.pages_fetched,
            objects = page.objects.len(),
            is_truncated = page.is_truncated,
            "Listed page"
        );

        Ok(Some(page.objects))
    }

    /// Drain every remaining page into one vector
    pub async fn collect_all(&mut self) -> Result<Vec<ObjectDescriptor>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn into_seen(self) -> SeenSet {
        self.seen
    }
}
