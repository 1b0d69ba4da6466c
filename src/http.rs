use std::fmt::Debug;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::{
    downloader::{Document, Downloader},
    CrawlerConfig, Error, Result,
};

pub struct HttpDownloader {
    http_client: Client,
}

impl HttpDownloader {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let user_agent = config
            .user_agent
            .as_deref()
            .unwrap_or(crate::APP_USER_AGENT);
        tracing::debug!(user_agent, "configuring HttpDownloader");
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http_client })
    }
}

impl Debug for HttpDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HttpDownloader {{ /* omitted */ }}")
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    #[tracing::instrument(skip(self))]
    async fn download(&self, link: &str) -> Result<Box<dyn Document>> {
        let response = self.http_client.get(link).send().await?;
        tracing::trace!("response status: {}", response.status());

        if !response.status().is_success() {
            return Err(Error::RequestReturnedError(response.status()));
        }

        let url = response.url().to_string();
        let body = response.text().await?;
        Ok(Box::new(HtmlDocument::new(url, body)))
    }
}

/// Body of a fetched page together with the URL it was served from.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    url: String,
    body: String,
}

impl HtmlDocument {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }
}

impl Document for HtmlDocument {
    fn extract_links(&self) -> Result<Vec<String>> {
        let base = Url::parse(&self.url)
            .map_err(|err| Error::Extraction(format!("bad base url '{}': {}", self.url, err)))?;
        let selector =
            Selector::parse("a[href]").map_err(|err| Error::Extraction(format!("{:?}", err)))?;

        let document = Html::parse_document(&self.body);
        let links = document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_link(&base, href))
            .collect();
        Ok(links)
    }
}

fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("javascript:")
    {
        return None;
    }
    let url = base.join(href).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url.into()),
        _ => None,
    }
}
