//! Batch orchestration: the lifecycle of downloading one thread.
//!
//! Phases:
//! 1. Fetch the manifest (empty means `NothingToDo`)
//! 2. Create the thread directory and resolve every final name once
//! 3. Run attempts, each submitting the whole batch to the transfer pool
//! 4. After a failed attempt, wait and resubmit until the retry budget runs out

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::cleanup::remove_part_files;
use crate::error::{Error, FailureReason, Result};
use crate::naming::{NameResolver, thread_directory};
use crate::progress::ProgressCounter;
use crate::retry::{Backoff, RetryBudget, sleep_or_cancel};
use crate::types::{BatchSummary, Event, ResolvedTarget, ThreadOutcome, ThreadRef, TransferOutcome};

use super::ThreadDownloader;
use super::transfer::TransferWorker;

/// Aggregated result of one attempt over the whole batch
#[derive(Debug, Default)]
struct AttemptResults {
    completed: usize,
    skipped: usize,
    failed: usize,
    last_error: Option<FailureReason>,
}

/// State carried across the attempts of one batch
struct BatchState {
    thread: String,
    directory: PathBuf,
    targets: Vec<ResolvedTarget>,
    /// Final paths needing no further work (completed or skipped)
    finalized: HashSet<PathBuf>,
    /// Files already present when the first attempt ran
    skipped_at_start: usize,
    attempts: u32,
}

impl ThreadDownloader {
    /// Download every attachment of `thread`
    ///
    /// Returns once every file is on disk, the thread has nothing to download,
    /// or the batch failed for good. Cancelling `cancel` stops dispatching new
    /// transfers, aborts in-flight ones, and returns [`Error::Cancelled`];
    /// files finalized before that stay on disk.
    pub async fn download_thread(
        &self,
        thread: &ThreadRef,
        cancel: &CancellationToken,
    ) -> Result<ThreadOutcome> {
        let label = thread.to_string();

        // Phase 1: manifest
        let descriptors = self.fetcher.fetch(thread, cancel).await?;
        if descriptors.is_empty() {
            tracing::info!(thread = %label, "thread has no attachments");
            self.reporter.report(Event::NothingToDo { thread: label });
            return Ok(ThreadOutcome::NothingToDo);
        }

        // Phase 2: directory and name resolution
        let directory = thread_directory(&self.config.output_dir, thread, self.config.naming);
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| Error::filesystem(&directory, e))?;

        if let Some(ledger) = &self.ledger {
            ledger.reload().await?;
        }

        let resolver = NameResolver::new(&directory).with_hash_check(self.config.verify_hashes);
        let targets = tokio::task::spawn_blocking(move || resolver.resolve_all(descriptors))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("name resolution panicked: {}", e))))??;

        tracing::info!(
            thread = %label,
            directory = ?directory,
            files = targets.len(),
            "starting thread download"
        );

        let mut batch = BatchState {
            thread: label,
            directory,
            targets,
            finalized: HashSet::new(),
            skipped_at_start: 0,
            attempts: 0,
        };

        // Phase 3 and 4: attempts
        let summary = self.run_batch(&mut batch, cancel).await?;
        Ok(ThreadOutcome::Succeeded(summary))
    }

    /// Run attempts until the batch succeeds, is cancelled, or exhausts its budget
    async fn run_batch(
        &self,
        batch: &mut BatchState,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let total = batch.targets.len();
        let budget = RetryBudget::from(self.config.retry.retries);
        let mut backoff = Backoff::new(&self.config.retry);

        // Leftovers from an interrupted earlier run
        let stale = remove_part_files(&batch.directory).await?;
        if stale > 0 {
            tracing::info!(thread = %batch.thread, removed = stale, "removed stale temporary files");
        }

        self.reporter.report(Event::ThreadStarted {
            thread: batch.thread.clone(),
            total,
        });

        let progress = Arc::new(ProgressCounter::new(
            batch.thread.clone(),
            total,
            self.reporter.clone(),
        ));
        let worker = TransferWorker {
            client: self.client.clone(),
            ledger: self.ledger.clone(),
            progress: progress.clone(),
            verify_hashes: self.config.verify_hashes,
            cancel: cancel.clone(),
        };

        loop {
            batch.attempts += 1;
            let attempt = batch.attempts;
            tracing::debug!(thread = %batch.thread, attempt, files = total, "starting attempt");

            let results = self.run_attempt(&worker, batch).await;
            if attempt == 1 {
                batch.skipped_at_start = results.skipped;
            }

            // No temporary artifact outlives an attempt
            remove_part_files(&batch.directory).await?;

            tracing::debug!(
                thread = %batch.thread,
                attempt,
                completed = results.completed,
                skipped = results.skipped,
                failed = results.failed,
                "attempt finished"
            );

            if results.failed == 0 {
                let completed = progress.completed().await;
                debug_assert_eq!(batch.finalized.len(), total);
                tracing::info!(
                    thread = %batch.thread,
                    completed,
                    skipped = batch.skipped_at_start,
                    attempts = attempt,
                    "thread download complete"
                );
                self.reporter.report(Event::ThreadFinished {
                    thread: batch.thread.clone(),
                    completed,
                    skipped: batch.skipped_at_start,
                });
                return Ok(BatchSummary {
                    directory: batch.directory.clone(),
                    total,
                    completed,
                    skipped: batch.skipped_at_start,
                    attempts: attempt,
                });
            }

            if cancel.is_cancelled() {
                tracing::info!(thread = %batch.thread, attempt, "thread download cancelled");
                return Err(Error::Cancelled);
            }

            let last_error = results
                .last_error
                .unwrap_or_else(|| FailureReason::Connection("unknown failure".to_string()));
            tracing::warn!(
                thread = %batch.thread,
                attempt,
                failed = results.failed,
                error = %last_error,
                "attempt failed"
            );
            self.reporter.report(Event::AttemptFailed {
                thread: batch.thread.clone(),
                attempt,
                failed: results.failed,
            });

            let retries_done = attempt - 1;
            if !budget.allows(retries_done) {
                tracing::error!(
                    thread = %batch.thread,
                    attempts = attempt,
                    failed = results.failed,
                    "giving up on thread"
                );
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    failed: results.failed,
                    last_error,
                });
            }

            self.reporter.report(Event::Retrying {
                thread: batch.thread.clone(),
                attempt: retries_done + 1,
                max_attempts: budget.limit(),
            });
            let delay = backoff.next_delay();
            tracing::info!(
                thread = %batch.thread,
                retry = retries_done + 1,
                delay_secs = delay.as_secs_f64(),
                "retrying failed files"
            );

            if let Err(e) = sleep_or_cancel(delay, cancel).await {
                tracing::info!(thread = %batch.thread, "cancelled while waiting to retry");
                return Err(e);
            }
            remove_part_files(&batch.directory).await?;
        }
    }

    /// Submit every target to the bounded transfer pool and aggregate the outcomes
    async fn run_attempt(&self, worker: &TransferWorker, batch: &mut BatchState) -> AttemptResults {
        let outcomes: Vec<(PathBuf, TransferOutcome)> = stream::iter(batch.targets.iter())
            .map(|target| async move {
                let outcome = worker.transfer(target).await;
                (target.final_path.clone(), outcome)
            })
            .buffer_unordered(self.config.connections)
            .collect()
            .await;

        let mut results = AttemptResults::default();
        for (path, outcome) in outcomes {
            match outcome {
                TransferOutcome::Completed => {
                    results.completed += 1;
                    batch.finalized.insert(path);
                }
                TransferOutcome::Skipped => {
                    results.skipped += 1;
                    batch.finalized.insert(path);
                }
                TransferOutcome::Failed(reason) => {
                    results.failed += 1;
                    log_failure(&batch.thread, &path, &reason);
                    results.last_error = Some(reason);
                }
            }
        }
        results
    }
}

fn log_failure(thread: &str, path: &Path, reason: &FailureReason) {
    if matches!(reason, FailureReason::Cancelled) {
        return;
    }
    tracing::warn!(thread, path = ?path, error = %reason, "file download failed");
}
