use std::{path::PathBuf, sync::Arc};

use bfs_crawler::{Crawler, CrawlerConfig, HttpDownloader};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Crawl a site breadth-first up to a fixed depth.
#[derive(Parser, Debug)]
#[command(name = "bfs-crawler", version)]
struct Cli {
    /// Link to start from
    seed: String,

    /// Number of layers to crawl; 1 downloads only the seed
    #[arg(long, default_value_t = 2)]
    depth: usize,

    /// Configuration file (toml, yaml or json); BFS_CRAWLER_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        eprintln!("Error: {:?}", err);
        std::process::exit(1);
    }
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // construct a subscriber that prints formatted traces to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bfs_crawler=info,warn")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = CrawlerConfig::load(cli.config.as_deref())?;
    let downloader = Arc::new(HttpDownloader::new(&config)?);
    let crawler = Crawler::new(config, downloader)?;

    let result = crawler.download(cli.seed.as_str(), cli.depth).await?;
    let summary = result.summary();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("downloaded {} link(s)", summary.downloaded.len());
        for link in &summary.downloaded {
            println!("  {}", link);
        }
        if !summary.errors.is_empty() {
            println!("failed {} link(s)", summary.errors.len());
            for (link, err) in &summary.errors {
                println!("  {}: {}", link, err);
            }
        }
    }

    crawler.shutdown().await;
    Ok(())
}
