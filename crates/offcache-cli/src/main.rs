//! offcache - an offline-first local proxy in front of a static site.
//!
//! The site's app shell is seeded into a versioned cache bucket on disk.
//! Pages loaded through `offcache serve` are answered from that bucket first
//! and keep working when the origin is unreachable.

mod server;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offcache_core::{
    CacheRequest, CacheStorage, Config, DiskStorage, HttpFetcher, OfflineWorker, Registration,
    UpdateOutcome,
};

/// File name prefix for the rolling log inside `--log-dir`
const LOG_FILE_PREFIX: &str = "offcache.log";

#[derive(Parser, Debug)]
#[command(name = "offcache", version, about = "Offline-first cache in front of a static site")]
struct Cli {
    /// Origin the site is fetched from
    #[arg(long, global = true, value_name = "URL")]
    origin: Option<String>,

    /// Cache version; the bucket is named `<prefix>-<version>`
    #[arg(long = "cache-version", global = true, value_name = "VERSION")]
    cache_version: Option<String>,

    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Also write logs to a daily rolling file in DIR
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Keep a new version waiting until every open client has closed
    #[arg(long, global = true)]
    no_skip_waiting: bool,

    /// Leave already-open clients uncontrolled after activation
    #[arg(long, global = true)]
    no_claim: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the local proxy
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// Install and activate the configured version
    Install,
    /// Send one GET through the cache; the body is written to stdout
    Fetch {
        /// Path (and query) relative to the origin
        path: String,
    },
    /// List cache buckets
    Buckets,
    /// Delete every cache bucket
    Purge,
}

impl Cli {
    /// Command-line flags win over the config file and the environment.
    fn apply(&self, config: &mut Config) {
        if let Some(ref origin) = self.origin {
            config.origin = Some(origin.clone());
        }
        if let Some(ref version) = self.cache_version {
            config.version = Some(version.clone());
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if self.no_skip_waiting {
            config.skip_waiting = false;
        }
        if self.no_claim {
            config.claim_clients = false;
        }
        if let Command::Serve {
            listen: Some(ref listen),
        } = self.command
        {
            config.listen = Some(listen.clone());
        }
    }
}

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(default_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=offcache_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .build(dir)
                .with_context(|| format!("Failed to open log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Storage, fetcher and registration shared by every command.
pub(crate) struct Runtime {
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<HttpFetcher>,
    pub registration: Arc<Registration>,
}

impl Runtime {
    fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        let storage = DiskStorage::new(cache_dir.clone())
            .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
        let fetcher = Arc::new(HttpFetcher::with_timeout(config.request_timeout())?);
        let registration = Arc::new(Registration::new(fetcher.clone()));
        Ok(Self {
            storage: Arc::new(storage),
            fetcher,
            registration,
        })
    }

    /// A fresh worker for the configured version.
    pub fn worker(&self, config: &Config) -> Result<Arc<OfflineWorker>> {
        let worker = OfflineWorker::new(
            config.worker_settings()?,
            self.storage.clone(),
            self.fetcher.clone(),
        )?;
        Ok(Arc::new(worker))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let default_level = match cli.command {
        Command::Serve { .. } => "info",
        _ => "warn",
    };
    let _log_guard = init_tracing(default_level, cli.log_dir.as_deref())?;

    let mut config = Config::load()?.with_env();
    cli.apply(&mut config);
    let runtime = Runtime::new(&config)?;

    match cli.command {
        Command::Serve { .. } => server::run(&config, runtime).await,
        Command::Install => install(&config, &runtime).await,
        Command::Fetch { path } => fetch(&config, &runtime, &path).await,
        Command::Buckets => buckets(&config, &runtime).await,
        Command::Purge => purge(&runtime).await,
    }
}

async fn install(config: &Config, runtime: &Runtime) -> Result<()> {
    let bucket = config.bucket_name();
    eprintln!("Installing {} from {}...", bucket, config.origin()?);

    let outcome = runtime.registration.update(runtime.worker(config)?).await?;
    let entries = runtime.storage.entries(&bucket).await?;
    println!("Installed {} ({} entries)", bucket, entries.len());

    if let UpdateOutcome::Activated(report) = outcome {
        for name in &report.deleted {
            println!("Deleted old cache {}", name);
        }
        for name in &report.failed {
            println!("Could not delete old cache {}", name);
        }
    }
    Ok(())
}

async fn fetch(config: &Config, runtime: &Runtime, path: &str) -> Result<()> {
    if let Err(e) = runtime.registration.resume(runtime.worker(config)?).await {
        warn!(error = %e, "Install failed, fetching without the cache");
    }

    let client = runtime.registration.open_client().await;
    let request = CacheRequest::for_path("GET", &config.origin()?, path)?;
    let url = request.url().clone();
    let result = runtime.registration.fetch(client, request).await;
    let flushed = runtime.registration.settle().await;
    info!(%url, flushed, "Background stores settled");

    eprintln!(
        "{} {} ({})",
        result.response.status, result.response.status_text, result.outcome
    );
    let mut stdout = io::stdout().lock();
    stdout.write_all(&result.response.body)?;
    stdout.flush()?;
    Ok(())
}

async fn buckets(config: &Config, runtime: &Runtime) -> Result<()> {
    let names = runtime.storage.keys().await?;
    if names.is_empty() {
        println!("No cache buckets");
        return Ok(());
    }

    let current = config.bucket_name();
    for name in names {
        let entries = runtime.storage.entries(&name).await?;
        let newest = entries
            .iter()
            .max_by_key(|e| e.cached_at)
            .map(|e| e.age_display())
            .unwrap_or_else(|| "empty".to_string());
        let marker = if name == current { "*" } else { " " };
        println!("{} {:<32} {:>5} entries  {}", marker, name, entries.len(), newest);
    }
    Ok(())
}

async fn purge(runtime: &Runtime) -> Result<()> {
    for name in runtime.storage.keys().await? {
        if runtime.storage.delete(&name).await? {
            println!("Deleted {}", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "offcache",
            "--origin",
            "https://example.com/",
            "--cache-version",
            "v2",
            "--no-claim",
            "serve",
            "--listen",
            "0.0.0.0:9000",
        ])
        .unwrap();

        let mut config = Config {
            version: Some("v1".to_string()),
            ..Default::default()
        };
        cli.apply(&mut config);

        assert_eq!(config.bucket_name(), "research-terminal-v2");
        assert_eq!(config.origin().unwrap().as_str(), "https://example.com/");
        assert_eq!(config.listen(), "0.0.0.0:9000");
        assert!(config.skip_waiting);
        assert!(!config.claim_clients);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["offcache", "buckets", "--no-skip-waiting"]).unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert!(!config.skip_waiting);
        assert!(matches!(cli.command, Command::Buckets));
    }

    #[test]
    fn test_fetch_requires_path() {
        assert!(Cli::try_parse_from(["offcache", "fetch"]).is_err());
        let cli = Cli::try_parse_from(["offcache", "fetch", "/index.html?v=2"]).unwrap();
        match cli.command {
            Command::Fetch { path } => assert_eq!(path, "/index.html?v=2"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
