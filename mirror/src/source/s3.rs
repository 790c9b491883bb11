//! Amazon S3 (and S3-compatible) object source

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MirrorError, Result};
use super::{ListPage, ListRequest, ObjectDescriptor, ObjectReader, ObjectSource};

/// Connection settings for a bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Static credentials; the default AWS provider chain is used when either is missing
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible stores
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "eu-west-1".to_string(),
            access_key: None,
            secret_key: None,
            endpoint: None,
            force_path_style: false,
        }
    }
}

/// Bucket reached through `aws-sdk-s3`
pub struct S3ObjectSource {
    client: Client,
    bucket: String,
}

impl S3ObjectSource {
    /// Build a client from settings
    pub async fn connect(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.force_path_style);

        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "bucket-mirror",
            ));
        }

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        Self::from_client(Client::from_conf(builder.build()), settings.bucket.clone())
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        let max_keys = i32::try_from(request.max_keys).unwrap_or(i32::MAX);

        let output = self
            .client
            .list_objects()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .marker(&request.marker)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| {
                MirrorError::listing_error(request.marker.clone(), DisplayErrorContext(&e).to_string())
            })?;

        let mut objects = Vec::with_capacity(output.contents().len());
        for object in output.contents() {
            let key = object.key().ok_or_else(|| {
                MirrorError::listing_error(request.marker.clone(), "listed object without a key")
            })?;
            let size = object.size().unwrap_or_default().max(0) as u64;
            objects.push(ObjectDescriptor::new(key, size));
        }

        let is_truncated = output.is_truncated().unwrap_or(false);
        debug!(
            bucket = %self.bucket,
            marker = %request.marker,
            objects = objects.len(),
            is_truncated,
            "Listed page"
        );

        Ok(ListPage {
            objects,
            is_truncated,
        })
    }

    async fn open_reader(&self, key: &str) -> Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| MirrorError::Generic(anyhow::anyhow!(DisplayErrorContext(&e).to_string())))?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
