use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use mirror::{ErrorPolicy, FetchPoolOptions, ListOptions, MirrorOptions, S3Settings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub bucket: BucketConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            bucket: BucketConfig::default(),
            transfer: TransferConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            region: default_region(),
            access_key: None,
            secret_key: None,
            endpoint: None,
            prefix: String::new(),
            force_path_style: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            page_size: default_page_size(),
            continue_on_error: false,
        }
    }
}

impl MirrorConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: MirrorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.name.is_empty() {
            anyhow::bail!("Bucket name cannot be empty");
        }
        if self.bucket.access_key.is_some() != self.bucket.secret_key.is_some() {
            anyhow::bail!("Access key and secret key must be given together");
        }
        if let Some(endpoint) = &self.bucket.endpoint {
            url::Url::parse(endpoint)?;
        }
        if self.transfer.workers == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }
        if self.transfer.queue_capacity == 0 {
            anyhow::bail!("Queue capacity must be at least 1");
        }
        if self.transfer.page_size == 0 || self.transfer.page_size > 1000 {
            anyhow::bail!("Page size must be between 1 and 1000");
        }
        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("Unknown log level: {}", self.log_level);
        }

        Ok(())
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            bucket: self.bucket.name.clone(),
            region: self.bucket.region.clone(),
            access_key: self.bucket.access_key.clone(),
            secret_key: self.bucket.secret_key.clone(),
            endpoint: self.bucket.endpoint.clone(),
            force_path_style: self.bucket.force_path_style,
        }
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            prefix: self.bucket.prefix.clone(),
            delimiter: None,
            page_size: self.transfer.page_size,
        }
    }

    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions {
            list: self.list_options(),
            fetch: FetchPoolOptions {
                workers: self.transfer.workers,
                queue_capacity: self.transfer.queue_capacity,
                error_policy: if self.transfer.continue_on_error {
                    ErrorPolicy::Continue
                } else {
                    ErrorPolicy::Abort
                },
            },
        }
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_region() -> String { "eu-west-1".to_string() }

fn default_workers() -> usize { 8 }
fn default_queue_capacity() -> usize { 10_000 }
fn default_page_size() -> usize { 1000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.bucket.region, "eu-west-1");
        assert_eq!(config.transfer.workers, 8);
        assert_eq!(config.transfer.queue_capacity, 10_000);
        assert_eq!(config.mirror_options().fetch.error_policy, ErrorPolicy::Abort);
        // No bucket configured yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: MirrorConfig = toml::from_str(
            r#"
            [bucket]
            name = "backups"
            prefix = "photos/"
            endpoint = "http://localhost:9000"
            force_path_style = true

            [transfer]
            workers = 16
            continue_on_error = true
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.bucket.region, "eu-west-1");
        assert_eq!(config.transfer.page_size, 1000);

        let options = config.mirror_options();
        assert_eq!(options.fetch.workers, 16);
        assert_eq!(options.fetch.error_policy, ErrorPolicy::Continue);
        assert_eq!(options.list.prefix, "photos/");

        let settings = config.s3_settings();
        assert_eq!(settings.bucket, "backups");
        assert!(settings.force_path_style);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = MirrorConfig::default();
        config.bucket.name = "bucket".to_string();
        config.validate().unwrap();

        config.transfer.workers = 0;
        assert!(config.validate().is_err());
        config.transfer.workers = 4;

        config.bucket.access_key = Some("AKIA".to_string());
        assert!(config.validate().is_err());
        config.bucket.secret_key = Some("secret".to_string());
        config.validate().unwrap();

        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("mirror.toml");
        tokio::fs::write(&path, "log_level = \"debug\"\n[bucket]\nname = \"media\"\n")
            .await
            .unwrap();

        let config = MirrorConfig::load(&path).await.unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.bucket.name, "media");
    }
}
