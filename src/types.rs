//! Core types and events for chan-dl

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::{Error, FailureReason, Result};

/// Hosts that serve thread pages
const THREAD_HOSTS: [&str; 2] = ["boards.4chan.org", "boards.4channel.org"];

/// Suffix of in-flight temporary artifacts
pub const PART_SUFFIX: &str = ".part";

/// A validated reference to one thread
///
/// Parsed from a thread URL of the form
/// `https://boards.4chan.org/<board>/thread/<id>[/<slug>]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef {
    /// The URL with any `#fragment` removed
    pub url: String,
    /// Board identifier (e.g. "wg")
    pub board: String,
    /// Numeric thread identifier
    pub thread: u64,
    /// Optional human-readable slug following the thread id
    pub slug: Option<String>,
}

impl ThreadRef {
    /// Parse and validate a thread URL
    ///
    /// Fails with [`Error::MalformedInput`] before any network access when the
    /// reference does not match the expected shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use chan_dl::ThreadRef;
    ///
    /// let thread = ThreadRef::parse("https://boards.4chan.org/wg/thread/7654321/space#p7654400").unwrap();
    /// assert_eq!(thread.board, "wg");
    /// assert_eq!(thread.thread, 7654321);
    /// assert_eq!(thread.slug.as_deref(), Some("space"));
    /// assert_eq!(thread.url, "https://boards.4chan.org/wg/thread/7654321/space");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |why: &str| Error::MalformedInput(format!("{input}: {why}"));

        let mut url = url::Url::parse(input.trim()).map_err(|e| malformed(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(malformed("not an http(s) URL"));
        }
        match url.host_str() {
            Some(host) if THREAD_HOSTS.contains(&host) => {}
            _ => return Err(malformed("not a 4chan thread host")),
        }
        url.set_fragment(None);

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (board, thread, slug) = match segments.as_slice() {
            [board, "thread", id] => (*board, *id, None),
            [board, "thread", id, slug] => (*board, *id, Some((*slug).to_string())),
            _ => return Err(malformed("expected /<board>/thread/<id>")),
        };
        let thread: u64 = thread
            .parse()
            .map_err(|_| malformed("thread id is not a number"))?;

        Ok(Self {
            url: url.to_string(),
            board: board.to_string(),
            thread,
            slug,
        })
    }
}

impl std::str::FromStr for ThreadRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.board, self.thread)
    }
}

/// One remote attachment as described by the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Where the bytes live; identifies the descriptor
    pub source_url: String,
    /// Preferred local filename (may collide with other descriptors)
    pub suggested_name: String,
    /// Hex-encoded MD5 of the file, when the manifest provides one
    pub content_hash: Option<String>,
}

/// A descriptor paired with the local path it will be written to
///
/// Computed once per batch and reused unchanged for every attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// The descriptor being downloaded
    pub descriptor: FileDescriptor,
    /// Final location of the file
    pub final_path: PathBuf,
}

impl ResolvedTarget {
    /// Location of the temporary artifact used while the transfer is in flight
    pub fn part_path(&self) -> PathBuf {
        let mut name = OsString::from(self.final_path.as_os_str());
        name.push(PART_SUFFIX);
        PathBuf::from(name)
    }

    /// Final filename, for display
    pub fn file_name(&self) -> String {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of one transfer worker run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes were downloaded and the file finalized
    Completed,
    /// Nothing to do: the file is already on disk or recorded in the ledger
    Skipped,
    /// The file is not on disk under its final name
    Failed(FailureReason),
}

/// Counts for a batch that reached `Succeeded`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Directory the files were written to
    pub directory: PathBuf,
    /// Number of descriptors in the batch
    pub total: usize,
    /// Files downloaded during this invocation
    pub completed: usize,
    /// Files that were already present (on disk or in the ledger) at invocation start
    pub skipped: usize,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Terminal, successful result of downloading one thread
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThreadOutcome {
    /// The thread exists but has no attachments
    NothingToDo,
    /// Every file is on disk
    Succeeded(BatchSummary),
}

/// Progress events emitted while downloading a thread
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Manifest fetched, names resolved; transfers are about to start
    ThreadStarted {
        /// "board/thread"
        thread: String,
        /// Number of files in the batch
        total: usize,
    },

    /// The thread has no attachments
    NothingToDo {
        /// "board/thread"
        thread: String,
    },

    /// A file was downloaded and finalized
    FileCompleted {
        /// "board/thread"
        thread: String,
        /// Running count of completed files, including this one
        completed: usize,
        /// Number of files in the batch
        total: usize,
        /// Final location of the file
        path: PathBuf,
    },

    /// An attempt ended with at least one failed file
    AttemptFailed {
        /// "board/thread"
        thread: String,
        /// 1-based attempt number
        attempt: u32,
        /// Number of files that failed in this attempt
        failed: usize,
    },

    /// Waiting before the next attempt
    Retrying {
        /// "board/thread"
        thread: String,
        /// 1-based number of the retry about to run
        attempt: u32,
        /// Retry budget, `None` when unlimited
        max_attempts: Option<u32>,
    },

    /// The batch reached `Succeeded`
    ThreadFinished {
        /// "board/thread"
        thread: String,
        /// Files downloaded
        completed: usize,
        /// Files already present
        skipped: usize,
    },
}
