use async_trait::async_trait;

use crate::Result;

/// Fetches a single link. One call per admitted link per crawl; retries,
/// caching and redirects are the implementation's business.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, link: &str) -> Result<Box<dyn Document>>;
}

/// A downloaded page. Link extraction runs on the extraction pool, off the
/// async workers, so it may be CPU heavy.
pub trait Document: Send + 'static {
    fn extract_links(&self) -> Result<Vec<String>>;
}
