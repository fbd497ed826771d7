//! Thread downloader: owns the shared state for downloading threads.
//!
//! The `ThreadDownloader` struct and its methods are organized by concern:
//! - [`orchestration`] - Batch lifecycle: fetch, resolve, transfer, retry
//! - [`transfer`] - Single-file transfer and atomic finalization

mod orchestration;
mod transfer;


use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{FileLedger, HashLedger};
use crate::manifest::ManifestFetcher;
use crate::progress::ProgressReporter;
use crate::types::Event;

/// Connect timeout for every request; transfers themselves have no deadline
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Downloads threads into the configured output directory (cloneable, all fields are Arc-wrapped)
///
/// All state that lives longer than one file transfer (HTTP client,
/// configuration, ledger, reporter) is owned here and handed to workers
/// explicitly; nothing is process-global.
#[derive(Clone)]
pub struct ThreadDownloader {
    /// HTTP client shared by manifest requests and file transfers
    pub(crate) client: reqwest::Client,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Manifest fetcher using the shared client
    pub(crate) fetcher: ManifestFetcher,
    /// Optional "already downloaded" hash ledger
    pub(crate) ledger: Option<Arc<dyn HashLedger>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Where progress events go; the broadcast channel unless replaced
    pub(crate) reporter: Arc<dyn ProgressReporter>,
}

impl ThreadDownloader {
    /// Create a downloader from a validated configuration
    ///
    /// Opens the ledger at `config.ledger_path` when one is set; an unreadable
    /// ledger is a configuration error.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let ledger: Option<Arc<dyn HashLedger>> = match &config.ledger_path {
            Some(path) => {
                let ledger = FileLedger::open(path).await?;
                tracing::info!(path = ?ledger.path(), hashes = ledger.len(), "using hash ledger");
                Some(Arc::new(ledger))
            }
            None => None,
        };

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(config.connections)
            .build()
            .map_err(|e| Error::config("user_agent", format!("failed to create HTTP client: {}", e)))?;

        let fetcher = ManifestFetcher::new(client.clone(), &config);
        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let reporter: Arc<dyn ProgressReporter> = Arc::new(event_tx.clone());

        tracing::debug!(
            output_dir = ?config.output_dir,
            connections = config.connections,
            retries = config.retry.retries,
            "thread downloader initialized"
        );

        Ok(Self {
            client,
            config: Arc::new(config),
            fetcher,
            ledger,
            event_tx,
            reporter,
        })
    }

    /// Use `ledger` to skip files downloaded before under any name
    ///
    /// Replaces any ledger opened from the configuration.
    pub fn with_ledger(mut self, ledger: Arc<dyn HashLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Send progress events to `reporter` instead of the broadcast channel
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Subscribe to progress events
    ///
    /// Only receives events while the default reporter is in use.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
