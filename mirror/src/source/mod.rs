//! Remote object sources: paginated listing and byte-stream fetch by key

use std::pin::Pin;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::Result;

mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use memory::MemoryObjectSource;
#[cfg(feature = "s3")]
pub use s3::{S3ObjectSource, S3Settings};

/// Key and size of a listed object, without its content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Relative path within the bucket namespace
    pub key: String,
    /// Size in bytes
    pub size: u64,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Parameters of one listing round-trip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    /// List keys strictly after this one; empty for the first page
    pub marker: String,
    pub max_keys: usize,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// More pages remain after this one
    pub is_truncated: bool,
}

/// Remote content stream
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// A bucket that can be listed page by page and read object by object.
///
/// Implementations must tolerate concurrent `open_reader` calls for distinct keys.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetch one page of descriptors, ordered by key
    async fn list(&self, request: &ListRequest) -> Result<ListPage>;

    /// Open a read stream over the content of `key`
    async fn open_reader(&self, key: &str) -> Result<ObjectReader>;

    /// Human-readable name used in logs
    fn describe(&self) -> String {
        "object source".to_string()
    }
}
