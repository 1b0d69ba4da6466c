use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::FutureExt;
use ulid::Ulid;

use crate::{
    barrier::{RoundBarrier, RoundTicket},
    downloader::{Document, Downloader},
    host::{host_of, HostProcessor},
    pool::WorkerPool,
    CrawlerConfig, Error, Result,
};

/// Outcome of one crawl: every admitted link ends up in exactly one of the
/// two buckets, unless the pools were shut down underneath it.
#[derive(Debug, Default)]
pub struct CrawlResult {
    downloaded: Vec<String>,
    errors: HashMap<String, Error>,
}

impl CrawlResult {
    pub fn downloaded(&self) -> &[String] {
        &self.downloaded
    }

    pub fn errors(&self) -> &HashMap<String, Error> {
        &self.errors
    }

    pub fn is_downloaded(&self, link: &str) -> bool {
        self.downloaded.iter().any(|downloaded| downloaded == link)
    }

    pub fn len(&self) -> usize {
        self.downloaded.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> CrawlSummary {
        let mut downloaded = self.downloaded.clone();
        downloaded.sort();
        CrawlSummary {
            downloaded,
            errors: self
                .errors
                .iter()
                .map(|(link, err)| (link.clone(), err.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CrawlSummary {
    pub downloaded: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

/// One breadth-first crawl. Lives for a single `Crawler::download` call and
/// owns all of that call's shared state; only the pools outlive it.
pub struct BfsWebCrawler {
    id: Ulid,
    downloader: Arc<dyn Downloader>,
    download_pool: Arc<WorkerPool>,
    extract_pool: Arc<WorkerPool>,
    per_host_limit: usize,
    visited: Mutex<HashSet<String>>,
    layer: Mutex<Vec<String>>,
    hosts: Mutex<HashMap<String, Arc<HostProcessor>>>,
    downloaded: Mutex<HashSet<String>>,
    errors: Mutex<HashMap<String, Error>>,
}

impl BfsWebCrawler {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        download_pool: Arc<WorkerPool>,
        extract_pool: Arc<WorkerPool>,
        per_host_limit: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Ulid::new(),
            downloader,
            download_pool,
            extract_pool,
            per_host_limit,
            visited: Mutex::default(),
            layer: Mutex::default(),
            hosts: Mutex::default(),
            downloaded: Mutex::default(),
            errors: Mutex::default(),
        })
    }

    #[tracing::instrument(name = "crawl", skip(self), fields(id = %self.id))]
    pub async fn run(self: Arc<Self>, seed: String, depth: usize) -> CrawlResult {
        lock(&self.layer).push(seed);

        for round in 0..depth {
            let last_round = round + 1 == depth;
            let discovered = std::mem::take(&mut *lock(&self.layer));
            let admitted: Vec<String> = discovered
                .into_iter()
                .filter(|link| self.admit(link))
                .collect();
            if admitted.is_empty() {
                tracing::debug!(round, "nothing left to crawl");
                break;
            }
            tracing::debug!(round, links = admitted.len(), "starting round");

            let barrier = RoundBarrier::new();
            for link in admitted {
                self.dispatch(link, &barrier, last_round);
            }
            barrier.wait().await;
            tracing::debug!(round, "round finished");
        }

        let result = self.finish();
        tracing::info!(
            downloaded = result.downloaded().len(),
            errors = result.errors().len(),
            "crawl finished"
        );
        result
    }

    /// Add-if-absent on the visited set.
    fn admit(&self, link: &str) -> bool {
        let mut visited = lock(&self.visited);
        // checked first so already visited links cost no allocation
        if visited.contains(link) {
            return false;
        }
        visited.insert(link.to_string());
        true
    }

    fn dispatch(self: &Arc<Self>, link: String, barrier: &RoundBarrier, last_round: bool) {
        let host = match host_of(&link) {
            Ok(host) => host,
            Err(err) => {
                tracing::warn!(%link, "skipping link: {}", err);
                self.record_error(link, err);
                return;
            }
        };

        let ticket = barrier.register();
        let crawl = Arc::clone(self);
        let barrier = barrier.clone();
        let task = async move {
            let _ticket = ticket;
            crawl.download(link, &barrier, last_round).await;
        };
        self.host_processor(&host).submit(task.boxed());
    }

    async fn download(self: &Arc<Self>, link: String, barrier: &RoundBarrier, last_round: bool) {
        match self.downloader.download(&link).await {
            Ok(document) => {
                tracing::trace!(%link, "downloaded");
                lock(&self.downloaded).insert(link.clone());
                if !last_round {
                    // registered before this download's own ticket is released
                    self.extract(link, document, barrier.register());
                }
            }
            Err(err) => {
                tracing::warn!(%link, "download failed: {}", err);
                self.record_error(link, err);
            }
        }
    }

    fn extract(self: &Arc<Self>, link: String, document: Box<dyn Document>, ticket: RoundTicket) {
        let crawl = Arc::clone(self);
        let job = async move {
            let _ticket = ticket;
            match tokio::task::spawn_blocking(move || document.extract_links()).await {
                Ok(Ok(links)) => {
                    tracing::trace!(%link, found = links.len(), "extracted links");
                    lock(&crawl.layer).extend(links);
                }
                Ok(Err(err)) => tracing::debug!(%link, "extraction failed: {}", err),
                Err(err) => tracing::debug!(%link, "extraction task failed: {}", err),
            }
        };
        if let Err(err) = self.extract_pool.submit(job.boxed()) {
            tracing::debug!("extraction not scheduled: {}", err);
        }
    }

    fn host_processor(&self, host: &str) -> Arc<HostProcessor> {
        let mut hosts = lock(&self.hosts);
        let processor = hosts.entry(host.to_string()).or_insert_with(|| {
            Arc::new(HostProcessor::new(
                host,
                self.per_host_limit,
                Arc::clone(&self.download_pool),
            ))
        });
        Arc::clone(processor)
    }

    fn record_error(&self, link: String, err: Error) {
        lock(&self.errors).entry(link).or_insert(err);
    }

    fn finish(&self) -> CrawlResult {
        let downloaded = std::mem::take(&mut *lock(&self.downloaded));
        let errors = std::mem::take(&mut *lock(&self.errors));
        CrawlResult {
            downloaded: downloaded.into_iter().collect(),
            errors,
        }
    }
}

/// Long-lived entry point. Owns the download and extraction pools that every
/// crawl started through it shares.
///
/// Host processors are created per crawl, so two concurrent crawls of the
/// same host are throttled independently of each other.
pub struct Crawler {
    config: CrawlerConfig,
    downloader: Arc<dyn Downloader>,
    download_pool: Arc<WorkerPool>,
    extract_pool: Arc<WorkerPool>,
}

impl Crawler {
    pub fn new(config: CrawlerConfig, downloader: Arc<dyn Downloader>) -> Result<Self> {
        config.validate()?;
        let download_pool = Arc::new(WorkerPool::new("download", config.downloader_workers)?);
        let extract_pool = Arc::new(WorkerPool::new("extract", config.extractor_workers)?);
        tracing::info!(
            downloader_workers = config.downloader_workers,
            extractor_workers = config.extractor_workers,
            per_host_limit = config.per_host_limit,
            "crawler ready"
        );
        Ok(Self {
            config,
            downloader,
            download_pool,
            extract_pool,
        })
    }

    /// Crawls `depth` layers starting at `seed`. Per-link failures end up in
    /// the result; only a closed crawler fails the call.
    pub async fn download(&self, seed: impl Into<String>, depth: usize) -> Result<CrawlResult> {
        for pool in [&self.download_pool, &self.extract_pool] {
            if pool.is_closed() {
                return Err(Error::PoolClosed(pool.name()));
            }
        }
        let crawl = BfsWebCrawler::new(
            Arc::clone(&self.downloader),
            Arc::clone(&self.download_pool),
            Arc::clone(&self.extract_pool),
            self.config.per_host_limit,
        );
        Ok(crawl.run(seed.into(), depth).await)
    }

    /// Stops both pools from taking new work. Crawls still running finish
    /// with whatever they had completed.
    pub fn close(&self) {
        self.download_pool.close();
        self.extract_pool.close();
    }

    /// Closes the crawler and waits up to the configured timeout for in-flight
    /// work. Returns `false` if either pool was still busy.
    pub async fn shutdown(&self) -> bool {
        self.close();
        let timeout = self.config.shutdown_timeout();
        let (downloads, extractions) = tokio::join!(
            self.download_pool.await_termination(timeout),
            self.extract_pool.await_termination(timeout),
        );
        let drained = downloads && extractions;
        if drained {
            tracing::info!("crawler shut down");
        } else {
            tracing::warn!(?timeout, "crawler shutdown timed out with work in flight");
        }
        drained
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Page(Vec<&'static str>);

    impl Document for Page {
        fn extract_links(&self) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|link| link.to_string()).collect())
        }
    }

    /// Every page links back to the seed and to itself.
    struct SelfLinking;

    #[async_trait]
    impl Downloader for SelfLinking {
        async fn download(&self, _link: &str) -> Result<Box<dyn Document>> {
            Ok(Box::new(Page(vec!["https://a.test/", "https://a.test/"])))
        }
    }

    #[tokio::test]
    async fn admit_is_add_if_absent() {
        let crawl = BfsWebCrawler::new(
            Arc::new(SelfLinking),
            Arc::new(WorkerPool::new("download", 1).unwrap()),
            Arc::new(WorkerPool::new("extract", 1).unwrap()),
            1,
        );
        assert!(crawl.admit("https://a.test/"));
        assert!(!crawl.admit("https://a.test/"));
        assert!(crawl.admit("https://a.test/other"));
    }

    #[tokio::test]
    async fn revisited_links_are_downloaded_once() {
        let crawler = Crawler::new(CrawlerConfig::new(2, 2, 1), Arc::new(SelfLinking)).unwrap();
        let result = crawler.download("https://a.test/", 5).await.unwrap();
        assert_eq!(result.downloaded(), ["https://a.test/".to_string()]);
        assert!(result.errors().is_empty());
    }

    #[tokio::test]
    async fn depth_zero_crawls_nothing() {
        let crawler = Crawler::new(CrawlerConfig::new(1, 1, 1), Arc::new(SelfLinking)).unwrap();
        let result = crawler.download("https://a.test/", 0).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn closed_crawler_rejects_new_crawls() {
        let crawler = Crawler::new(CrawlerConfig::new(1, 1, 1), Arc::new(SelfLinking)).unwrap();
        assert!(crawler.shutdown().await);
        assert!(matches!(
            crawler.download("https://a.test/", 1).await,
            Err(Error::PoolClosed("download"))
        ));
    }

    #[tokio::test]
    async fn invalid_config_fails_construction() {
        assert!(matches!(
            Crawler::new(CrawlerConfig::new(1, 1, 0), Arc::new(SelfLinking)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn summary_sorts_and_stringifies() {
        let mut errors = HashMap::new();
        errors.insert("bad".to_string(), Error::malformed("bad", "no host"));
        let result = CrawlResult {
            downloaded: vec!["https://b.test/".into(), "https://a.test/".into()],
            errors,
        };
        let summary = result.summary();
        assert_eq!(summary.downloaded, ["https://a.test/", "https://b.test/"]);
        assert_eq!(summary.errors["bad"], "malformed link 'bad': no host");
        assert_eq!(result.len(), 3);
        assert!(result.is_downloaded("https://a.test/"));
    }
}
