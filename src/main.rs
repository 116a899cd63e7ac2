mod catalog;
mod config;
mod fetch;
mod notify;
mod store;
mod sync;

use crate::store::CatalogStore;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offersync")]
#[command(about = "Keeps a local copy of a remote offer catalog fresh")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offersync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Catalog URL, overriding the config file
  #[arg(short, long)]
  url: Option<url::Url>,

  /// Path to the cache database (default: platform data dir)
  #[arg(long)]
  cache_db: Option<PathBuf>,

  /// Serve only what the local cache holds; never touch the network
  #[arg(long)]
  offline: bool,

  /// Drop the cached catalog record and exit
  #[arg(long)]
  clear_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let store = match &args.cache_db {
    Some(path) => store::SqliteStore::open_at(path)?,
    None => store::SqliteStore::open()?,
  };
  let store = Arc::new(store);

  if args.clear_cache {
    store.clear();
    println!("catalog cache cleared");
    return Ok(());
  }

  // The config file is only required when the URL comes from nowhere else
  let config = match config::Config::load(args.config.as_deref()) {
    Ok(config) => Some(config),
    Err(err) => {
      if args.url.is_none() && config::Config::env_catalog_url().is_none() {
        return Err(err);
      }
      None
    }
  };

  let url = args
    .url
    .or_else(config::Config::env_catalog_url)
    .or_else(|| config.as_ref().map(|c| c.catalog.url.clone()))
    .ok_or_else(|| eyre!("No catalog URL configured"))?;

  let ttl_hours = config
    .as_ref()
    .map_or(sync::DEFAULT_TTL_HOURS, |c| c.catalog.ttl_hours);
  let timeout_secs = config
    .as_ref()
    .map_or(fetch::DEFAULT_TIMEOUT.as_secs(), |c| c.catalog.timeout_secs);

  let fetcher = fetch::HttpFetcher::new(url)
    .with_timeout(std::time::Duration::from_secs(timeout_secs));

  let orchestrator = sync::SyncOrchestrator::new(store, Arc::new(fetcher))
    .with_ttl(chrono::Duration::hours(ttl_hours))
    .with_offline(args.offline);

  let mut events = orchestrator.subscribe();
  orchestrator.load().await;

  // Ready always fires; wait for it before reading the catalog
  let _ = events.recv().await;

  let catalog = orchestrator.current();
  if catalog.is_empty() {
    println!("no offers available");
  } else {
    for (code, offer) in &catalog {
      println!("{}  {}", code, offer.label);
      for line in &offer.desc {
        println!("    {}", line);
      }
    }
  }

  // Let an in-flight background refresh land before exiting
  orchestrator.settle().await;
  if let Ok(notify::CatalogEvent::Changed(_)) = events.try_recv() {
    println!();
    println!("catalog was updated in the background; run again for the latest");
  }

  Ok(())
}
