//! Breadth-first, depth-bounded crawler.
//!
//! Each round downloads every newly discovered link concurrently on a shared
//! download pool, throttled per host, and extracts outbound links on a
//! separate extraction pool. A round only starts once every download and
//! extraction of the previous one has finished.

pub mod barrier;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod host;
pub mod http;
pub mod pool;

pub use crate::config::CrawlerConfig;
pub use crate::crawler::{BfsWebCrawler, CrawlResult, CrawlSummary, Crawler};
pub use crate::downloader::{Document, Downloader};
pub use crate::error::{Error, Result};
pub use crate::host::{host_of, HostProcessor};
pub use crate::http::{HtmlDocument, HttpDownloader};

// == Client ==
pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
