//! Removal of temporary `.part` artifacts from an output directory

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::PART_SUFFIX;

/// Delete every `*.part` file directly inside `dir`
///
/// Finalized files are never touched. A missing directory is not an error.
/// Files that cannot be removed are logged and left behind; the count of
/// removed files is returned.
pub async fn remove_part_files(dir: &Path) -> Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?dir, "output directory does not exist, nothing to clean");
            return Ok(0);
        }
        Err(e) => return Err(Error::filesystem(dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::filesystem(dir, e))?
    {
        let path = entry.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PART_SUFFIX));
        if !is_part {
            continue;
        }

        let is_file = match entry.file_type().await {
            Ok(ft) => ft.is_file(),
            Err(_) => continue,
        };
        if !is_file {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(?path, "removed temporary artifact");
                removed += 1;
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to remove temporary artifact");
            }
        }
    }

    if removed > 0 {
        debug!(?dir, removed, "cleanup complete");
    }
    Ok(removed)
}
