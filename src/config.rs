use std::{path::Path, time::Duration};

use crate::{Error, Result};

pub const ENV_PREFIX: &str = "BFS_CRAWLER";

/// Construction-time settings shared by every crawl run through one `Crawler`.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrawlerConfig {
    pub downloader_workers: usize,
    pub extractor_workers: usize,
    pub per_host_limit: usize,
    pub shutdown_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            downloader_workers: 8,
            extractor_workers: 4,
            per_host_limit: 2,
            shutdown_timeout_secs: 30,
            user_agent: None,
            request_timeout_secs: 10,
        }
    }
}

impl CrawlerConfig {
    pub fn new(downloader_workers: usize, extractor_workers: usize, per_host_limit: usize) -> Self {
        Self {
            downloader_workers,
            extractor_workers,
            per_host_limit,
            ..Default::default()
        }
    }

    /// Layers an optional file and `BFS_CRAWLER_*` environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.downloader_workers == 0 {
            return Err(Error::Config("downloader_workers must be at least 1".into()));
        }
        if self.extractor_workers == 0 {
            return Err(Error::Config("extractor_workers must be at least 1".into()));
        }
        if self.per_host_limit == 0 {
            return Err(Error::Config("per_host_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
