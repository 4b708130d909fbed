//! Basecamp CLI - drives the offline field kit from a terminal.
//!
//! Builds the offline cache against the configured origin, answers fetches
//! through the interception policy, and runs the tracking queue against the
//! remote document store.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use basecamp_core::cache::{
    CacheManager, DiskCacheStorage, GenerationRecord, PageMessage, WorkerMessage,
};
use basecamp_core::net::{HttpNetwork, Network, RequestMode, StaticNetwork};
use basecamp_core::remote::{ApiKeyStore, RestDocumentStore};
use basecamp_core::storage::{FileStore, KeyValueStore};
use basecamp_core::tracking::{Connectivity, FixedGeolocator, Geolocator, Position, Tracker};
use basecamp_core::Config;

// ============================================================================
// Constants
// ============================================================================

/// How often `track` checks whether enough samples were taken
const TRACK_POLL_INTERVAL_MS: u64 = 100;

/// Extra time `track` waits beyond the requested ticks
const TRACK_GRACE_SECS: u64 = 30;

/// Log file prefix inside `--log-dir`
const LOG_FILE_PREFIX: &str = "basecamp.log";

#[derive(Parser)]
#[command(name = "basecamp", version, about = "Offline field kit for the club website")]
struct Cli {
    /// Also write a daily-rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Populate and activate the configured cache generation
    Install,
    /// Print the cache status as a CACHE_STATUS message
    Status,
    /// Resolve a path through the offline fetch policy
    Fetch {
        path: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// Pretend the network is unreachable
        #[arg(long)]
        offline: bool,
    },
    /// Deliver buffered tracking samples to the remote store
    Sync,
    /// Erase an identity's remote records and clear the local buffer
    Purge {
        #[arg(long)]
        who: Option<String>,
    },
    /// Take samples at a fixed position
    Track {
        #[arg(long)]
        who: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 1)]
        ticks: usize,
    },
    /// Save the remote API key in the OS keychain
    SetKey { key: String },
    /// Remove the remote API key from the OS keychain
    ForgetKey,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config = Config::load()?;
    info!(origin = %config.origin, generation = %config.cache_version, "Basecamp starting");

    match cli.command {
        Command::Install => install(&config).await,
        Command::Status => status(&config).await,
        Command::Fetch {
            path,
            navigate,
            offline,
        } => fetch(&config, &path, navigate, offline).await,
        Command::Sync => sync(&config).await,
        Command::Purge { who } => purge(config, who).await,
        Command::Track {
            who,
            lat,
            lon,
            ticks,
        } => track(config, who, Position::new(lat, lon), ticks).await,
        Command::SetKey { key } => {
            let remote = remote_url(&config)?;
            ApiKeyStore::store(&remote, &key)?;
            println!("API key saved for {}", remote);
            Ok(())
        }
        Command::ForgetKey => {
            let remote = remote_url(&config)?;
            ApiKeyStore::delete(&remote)?;
            println!("API key removed for {}", remote);
            Ok(())
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    let dir = config.data_dir()?;
    Ok(Arc::new(FileStore::new(dir).context("Failed to open local store")?))
}

/// Build the cache manager and restore what the last run recorded.
async fn cache_manager(
    config: &Config,
    store: &dyn KeyValueStore,
    offline: bool,
) -> Result<CacheManager> {
    let storage = Arc::new(DiskCacheStorage::new(config.cache_dir()?)?);
    let network: Arc<dyn Network> = if offline {
        let network = StaticNetwork::new();
        network.set_online(false);
        Arc::new(network)
    } else {
        Arc::new(HttpNetwork::new()?)
    };

    let manager = CacheManager::new(config.cache_settings()?, storage, network);
    match GenerationRecord::load(store) {
        Ok(Some(record)) => manager.restore(&record).await,
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable generation record"),
    }
    Ok(manager)
}

fn remote_url(config: &Config) -> Result<String> {
    config
        .remote_base_url
        .clone()
        .ok_or_else(|| anyhow!("No remote configured; set BASECAMP_REMOTE_URL or remote_base_url"))
}

fn tracker(config: &Config, geolocator: Option<Position>) -> Result<Tracker> {
    let remote = remote_url(config)?;
    let api_key = match &config.api_key {
        Some(key) => key.clone(),
        None => ApiKeyStore::get(&remote)?,
    };
    let documents = Arc::new(RestDocumentStore::new(&remote, &api_key)?);
    let geolocator = geolocator.map(|position| {
        Arc::new(FixedGeolocator::new(position)) as Arc<dyn Geolocator>
    });

    Ok(Tracker::new(
        documents,
        geolocator,
        Connectivity::new(true),
        open_store(config)?,
        config.tracking_interval(),
    ))
}

fn identity(config: &Config, who: Option<String>) -> Result<String> {
    who.or_else(|| config.last_display_name.clone())
        .filter(|who| !who.trim().is_empty())
        .ok_or_else(|| anyhow!("No name given; pass --who"))
}

// ============================================================================
// Commands
// ============================================================================

async fn install(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let manager = cache_manager(config, store.as_ref(), false).await?;

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkerMessage::CacheProgress { progress }) => println!("{:>3}%", progress),
                Ok(WorkerMessage::CacheStatus { status, .. }) => println!("status: {}", status),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = manager.install().await;
    let activation = manager.activate().await?;
    if let Some(record) = manager.record().await {
        record.save(store.as_ref())?;
    }
    let status = manager.check_status().await;
    drop(manager);
    let _ = printer.await;

    println!(
        "Generation {}: {} of {} assets stored",
        report.generation, report.stored, report.total
    );
    for failed in &report.failed {
        println!("  failed {}: {}", failed.asset, failed.reason);
    }
    for removed in &activation.removed {
        println!("  removed {}", removed);
    }
    if let Some(error) = status.error {
        println!("{}", error);
    }
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let manager = cache_manager(config, store.as_ref(), false).await?;
    let message = manager.handle_message(PageMessage::CheckCache).await;
    println!("{}", serde_json::to_string_pretty(&message)?);

    match GenerationRecord::load_stored(&store) {
        Ok(Some(stored)) => println!(
            "Generation {} ({:?}, {} assets) recorded {}",
            stored.value.name,
            stored.value.state,
            stored.value.asset_list.len(),
            stored.age_display()
        ),
        Ok(None) => println!("No generation recorded yet"),
        Err(e) => warn!(error = %e, "Failed to read generation record"),
    }
    Ok(())
}

async fn fetch(config: &Config, path: &str, navigate: bool, offline: bool) -> Result<()> {
    let store = open_store(config)?;
    let manager = cache_manager(config, store.as_ref(), offline).await?;
    let mode = if navigate {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    };

    let response = manager.fetch_path(path, mode).await?;
    println!(
        "{} {} {} bytes",
        response.status,
        response.content_type.as_deref().unwrap_or("-"),
        response.body.len()
    );
    Ok(())
}

async fn sync(config: &Config) -> Result<()> {
    let tracker = tracker(config, None)?;
    let report = tracker.sync_offline_buffer().await;
    println!(
        "{} attempted, {} delivered, {} kept for later",
        report.attempted, report.delivered, report.failed
    );
    Ok(())
}

async fn purge(config: Config, who: Option<String>) -> Result<()> {
    let who = identity(&config, who)?;
    let tracker = tracker(&config, None)?;
    tracker.erase_identity(&who).await;
    println!("Erased records for {}", who);
    Ok(())
}

async fn track(mut config: Config, who: Option<String>, position: Position, ticks: usize) -> Result<()> {
    let who = identity(&config, who)?;
    let tracker = tracker(&config, Some(position))?;
    // Ticks run at the start of each interval, plus slack for slow writes
    let deadline = config.tracking_interval() * ticks.max(1) as u32 + Duration::from_secs(TRACK_GRACE_SECS);
    if !tracker.start_tracking(&who).await {
        return Err(anyhow!(tracker.status().await.unwrap_or_default()));
    }

    config.last_display_name = Some(who);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to remember display name");
    }

    let waited = tokio::time::timeout(deadline, async {
        while tracker.points().await.len() < ticks {
            tokio::time::sleep(Duration::from_millis(TRACK_POLL_INTERVAL_MS)).await;
        }
    })
    .await;
    if waited.is_err() {
        warn!(?deadline, "Gave up waiting for samples");
    }

    let taken = tracker.points().await.len();
    let pending = tracker.log().len().await?;
    if let Some(status) = tracker.status().await {
        println!("{}", status);
    }
    println!("{} of {} samples taken, {} waiting for delivery", taken, ticks, pending);
    Ok(())
}
