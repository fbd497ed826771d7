//! Hash ledger: remembers which files were downloaded, independent of their names
//!
//! The ledger is an injected collaborator. The orchestrator calls
//! [`HashLedger::reload`] before each batch, workers consult
//! [`HashLedger::contains`] before touching the network, and every finalized
//! file is appended with [`HashLedger::record`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Lookup/record capability for content hashes of downloaded files
#[async_trait::async_trait]
pub trait HashLedger: Send + Sync {
    /// Whether `hash` was recorded before the current batch started
    fn contains(&self, hash: &str) -> bool;

    /// Persist `hash` as downloaded
    async fn record(&self, hash: &str) -> Result<()>;

    /// Refresh the lookup snapshot from storage
    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// Append-only text file with one hex hash per line
///
/// Lookups are answered from a snapshot taken by [`reload`](HashLedger::reload);
/// hashes appended during a batch become visible at the next reload, so the
/// set of skipped files is fixed for the whole batch.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    known: RwLock<HashSet<String>>,
    writer: tokio::sync::Mutex<()>,
}

impl FileLedger {
    /// Open a ledger file and load its current contents
    ///
    /// A missing file is an empty ledger and is created on first append. A
    /// path that exists but cannot be read as text is rejected.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let known = read_hashes(&path).await?;
        debug!(?path, hashes = known.len(), "ledger loaded");

        Ok(Self {
            path,
            known: RwLock::new(known),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Location of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of hashes in the current snapshot
    pub fn len(&self) -> usize {
        match self.known.read() {
            Ok(known) => known.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the current snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl HashLedger for FileLedger {
    fn contains(&self, hash: &str) -> bool {
        match self.known.read() {
            Ok(known) => known.contains(hash),
            Err(poisoned) => poisoned.into_inner().contains(hash),
        }
    }

    async fn record(&self, hash: &str) -> Result<()> {
        let _guard = self.writer.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::filesystem(&self.path, e))?;
        file.write_all(format!("{}\n", hash).as_bytes())
            .await
            .map_err(|e| Error::filesystem(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| Error::filesystem(&self.path, e))?;

        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let fresh = read_hashes(&self.path).await?;
        match self.known.write() {
            Ok(mut known) => *known = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(())
    }
}

async fn read_hashes(path: &Path) -> Result<HashSet<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(Error::config(
            "ledger_path",
            format!("{} is not a valid ledger: {}", path.display(), e),
        )),
    }
}
