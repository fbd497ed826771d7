//! # chan-dl
//!
//! Download every media attachment of a 4chan thread into a local directory.
//!
//! A thread is fetched as a JSON manifest, each attachment gets a collision-free
//! local name, and files are transferred concurrently with bounded parallelism.
//! Transfers stream into `<name>.part` and are renamed into place only once
//! complete, so an interrupted run never leaves a truncated file under its
//! final name. Running the same thread again downloads only what is missing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chan_dl::{Config, ThreadDownloader, ThreadRef};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = ThreadDownloader::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let thread = ThreadRef::parse("https://boards.4chan.org/wg/thread/7654321")?;
//!     let outcome = downloader
//!         .download_thread(&thread, &CancellationToken::new())
//!         .await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Removal of temporary artifacts
pub mod cleanup;
/// Configuration types
pub mod config;
/// Thread downloader (orchestration and transfers)
pub mod downloader;
/// Error types
pub mod error;
/// "Already downloaded" hash ledger
pub mod ledger;
/// Thread manifest fetching
pub mod manifest;
/// Local name resolution
pub mod naming;
/// Progress reporting
pub mod progress;
/// Retry budget and backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, NamingMode, RetryConfig};
pub use downloader::ThreadDownloader;
pub use error::{Error, FailureReason, Result};
pub use ledger::{FileLedger, HashLedger};
pub use progress::{NoopReporter, ProgressReporter};
pub use types::{
    BatchSummary, Event, FileDescriptor, ResolvedTarget, ThreadOutcome, ThreadRef,
    TransferOutcome,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use chan_dl::cancel_on_signal;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let cancel = CancellationToken::new();
///     tokio::spawn(cancel_on_signal(cancel.clone()));
///     // pass `&cancel` to ThreadDownloader::download_thread
/// }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        signal = wait_for_signal() => {
            tracing::info!(signal, "received signal, cancelling downloads");
            token.cancel();
        }
        // Nothing to do once someone else cancelled
        _ = token.cancelled() => {}
    }
}

/// Wait for the first termination signal and return its name
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    // Registration can fail in restricted environments; a missing stream never fires
    fn register(kind: SignalKind, name: &str) -> Option<Signal> {
        signal(kind)
            .map_err(|e| tracing::warn!(error = %e, "cannot listen for {}", name))
            .ok()
    }

    async fn next(stream: &mut Option<Signal>) {
        match stream {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::warn!("no signal handlers registered, falling back to ctrl_c");
        return wait_for_ctrl_c().await;
    }

    tokio::select! {
        _ = next(&mut sigterm) => "SIGTERM",
        _ = next(&mut sigint) => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a listener downloads can only end on their own
        tracing::error!(error = %e, "cannot listen for Ctrl+C, downloads will not be interruptible");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
