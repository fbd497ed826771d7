//! Transfer worker: one file from remote source to finalized local path.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::FailureReason;
use crate::ledger::HashLedger;
use crate::progress::ProgressCounter;
use crate::types::{ResolvedTarget, TransferOutcome};

/// Everything a transfer needs, shared by all transfers of one batch
pub(super) struct TransferWorker {
    pub(super) client: reqwest::Client,
    pub(super) ledger: Option<Arc<dyn HashLedger>>,
    pub(super) progress: Arc<ProgressCounter>,
    pub(super) verify_hashes: bool,
    pub(super) cancel: CancellationToken,
}

impl TransferWorker {
    /// Bring `target` onto disk, or explain why it is not there
    ///
    /// Never retries. A failure before the rename leaves no final file; a
    /// leftover `.part` file is reclaimed by the orchestrator's cleanup.
    pub(super) async fn transfer(&self, target: &ResolvedTarget) -> TransferOutcome {
        if tokio::fs::try_exists(&target.final_path)
            .await
            .unwrap_or(false)
        {
            tracing::debug!(path = ?target.final_path, "already on disk, skipping");
            return TransferOutcome::Skipped;
        }

        if let (Some(ledger), Some(hash)) = (&self.ledger, &target.descriptor.content_hash)
            && ledger.contains(hash)
        {
            tracing::debug!(path = ?target.final_path, %hash, "hash in ledger, skipping");
            return TransferOutcome::Skipped;
        }

        if self.cancel.is_cancelled() {
            return TransferOutcome::Failed(FailureReason::Cancelled);
        }

        if let Err(reason) = self.download(target).await {
            tracing::debug!(
                url = %target.descriptor.source_url,
                error = %reason,
                "transfer failed"
            );
            return TransferOutcome::Failed(reason);
        }

        if let (Some(ledger), Some(hash)) = (&self.ledger, &target.descriptor.content_hash)
            && let Err(e) = ledger.record(hash).await
        {
            // The file is finalized; losing the ledger entry only costs a future re-check
            tracing::warn!(%hash, error = %e, "failed to record hash in ledger");
        }

        self.progress.complete(target.final_path.clone()).await;
        TransferOutcome::Completed
    }

    /// Stream the body into the temporary artifact, verify it, then rename
    async fn download(&self, target: &ResolvedTarget) -> Result<(), FailureReason> {
        let request = self.client.get(&target.descriptor.source_url).send();
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
            response = request => response?,
        };
        let response = response.error_for_status()?;
        let expected_len = response.content_length();

        let part_path = target.part_path();
        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = md5::Context::new();
        let mut received: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    hasher.consume(&bytes);
                    received += bytes.len() as u64;
                }
                Some(Err(e)) => return Err(FailureReason::Connection(e.to_string())),
                None => break,
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected_len
            && received != expected
        {
            return Err(FailureReason::Truncated { received, expected });
        }

        if self.verify_hashes
            && let Some(expected) = &target.descriptor.content_hash
        {
            let actual = format!("{:x}", hasher.compute());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(FailureReason::HashMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        // After this point the file survives interruption
        tokio::fs::rename(&part_path, &target.final_path).await?;
        Ok(())
    }
}
