use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;

use blog_aggregator::config::Config;
use blog_aggregator::feed::FeedFetcher;
use blog_aggregator::scheduler::PollScheduler;
use blog_aggregator::storage::{Database, StoreError};
use blog_aggregator::util::validate_url;

#[derive(Parser, Debug)]
#[command(
    name = "blog-aggregator",
    about = "Poll registered RSS feeds and store their posts"
)]
struct Args {
    /// TOML config file (optional, defaults apply when missing)
    #[arg(long, value_name = "FILE", default_value = "aggregator.toml")]
    config: PathBuf,

    /// SQLite database path, overrides `database_path`
    #[arg(long, value_name = "PATH")]
    database: Option<String>,

    /// Feeds polled per tick, overrides `concurrency`
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Seconds between ticks, overrides `interval_secs`
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Register a feed URL and exit
    #[arg(long, value_name = "URL", requires = "name")]
    add_feed: Option<String>,

    /// Display name for --add-feed
    #[arg(long, value_name = "NAME", requires = "add_feed")]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }
    config.validate()?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db.with_stale_after(config.stale_after()),
        Err(StoreError::Locked) => {
            eprintln!(
                "Error: database {} is locked by another process.",
                config.database_path
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    if let (Some(url), Some(name)) = (&args.add_feed, &args.name) {
        let url = validate_url(url).context("Refusing to register feed")?;
        let id = db
            .insert_feed(url.as_str(), name)
            .await
            .context("Failed to register feed")?;
        println!("Registered feed {} ({}) as #{}", name, url, id);
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("blog-aggregator/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = FeedFetcher::new(client).with_timeout(config.fetch_timeout());

    let scheduler = PollScheduler::new(db, fetcher, config.concurrency()?, config.interval())?;

    if args.once {
        let report = scheduler.tick().await;
        println!(
            "Polled {} feeds: {} succeeded, {} failed",
            report.selected, report.succeeded, report.failed
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested, finishing current tick"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C, stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}
