//! Local naming: collision-free filenames and the per-thread output directory

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::NamingMode;
use crate::error::{Error, Result};
use crate::types::{FileDescriptor, ResolvedTarget, ThreadRef};

/// Maximum number of numbered candidates tried before giving up
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Replace characters that cannot appear in a single path component
///
/// Returns `fallback` when nothing usable is left.
///
/// # Examples
///
/// ```
/// use chan_dl::naming::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("a/b.jpg", "1.jpg"), "a_b.jpg");
/// assert_eq!(sanitize_file_name("..", "1.jpg"), "1.jpg");
/// ```
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Split a filename into stem and extension at the last dot
///
/// A leading dot does not start an extension (".hidden" has none).
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// The `n`-th numbered variant of a name: `stem.n.ext`
fn numbered(name: &str, n: u32) -> String {
    match split_name(name) {
        (stem, Some(ext)) => format!("{}.{}.{}", stem, n, ext),
        (stem, None) => format!("{}.{}", stem, n),
    }
}

/// Computes unique local filenames inside one output directory
///
/// Resolution is a pure function of the directory contents and the set of
/// names already assigned in the batch, so resolving the same descriptors
/// against the same state always yields the same names.
#[derive(Clone, Debug)]
pub struct NameResolver {
    dir: PathBuf,
    /// Compare an existing file's MD5 before reusing its name
    verify_hashes: bool,
}

impl NameResolver {
    /// Resolve names for files that will live in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            verify_hashes: true,
        }
    }

    /// Whether an existing file must match the descriptor's hash to be reused
    ///
    /// With verification off any regular file at the candidate path counts
    /// as the previous run's download.
    pub fn with_hash_check(mut self, verify_hashes: bool) -> Self {
        self.verify_hashes = verify_hashes;
        self
    }

    /// Pick a filename for `descriptor` that does not clash with `assigned`
    ///
    /// Starts from the suggested name and tries `stem.1.ext`, `stem.2.ext`, ...
    /// A candidate is taken when it is free on disk, or when the file already
    /// there is this descriptor's content (hash match, no hash to compare, or
    /// hash checking disabled), so that a previous run's file is recognised instead of duplicated.
    pub fn resolve(
        &self,
        descriptor: &FileDescriptor,
        assigned: &HashSet<String>,
    ) -> Result<String> {
        let base = descriptor.suggested_name.as_str();

        for n in 0..=MAX_RENAME_ATTEMPTS {
            let candidate = if n == 0 {
                base.to_string()
            } else {
                numbered(base, n)
            };
            if assigned.contains(&candidate) {
                continue;
            }

            let path = self.dir.join(&candidate);
            if !path.exists() || self.holds_descriptor(&path, descriptor) {
                return Ok(candidate);
            }
        }

        Err(Error::filesystem(
            self.dir.join(base),
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "no free name after {} numbered candidates",
                    MAX_RENAME_ATTEMPTS
                ),
            ),
        ))
    }

    /// Resolve every descriptor once, in order, into targets
    pub fn resolve_all(&self, descriptors: Vec<FileDescriptor>) -> Result<Vec<ResolvedTarget>> {
        let mut assigned = HashSet::with_capacity(descriptors.len());
        let mut targets = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let name = self.resolve(&descriptor, &assigned)?;
            if name != descriptor.suggested_name {
                tracing::debug!(
                    suggested = %descriptor.suggested_name,
                    resolved = %name,
                    "renamed to avoid collision"
                );
            }
            targets.push(ResolvedTarget {
                final_path: self.dir.join(&name),
                descriptor,
            });
            assigned.insert(name);
        }

        Ok(targets)
    }

    /// Whether the file at `path` is the download this descriptor describes
    fn holds_descriptor(&self, path: &Path, descriptor: &FileDescriptor) -> bool {
        if !path.is_file() {
            return false;
        }
        if !self.verify_hashes {
            return true;
        }
        match &descriptor.content_hash {
            None => true,
            Some(expected) => match md5_file(path) {
                Ok(actual) => actual.eq_ignore_ascii_case(expected),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "could not hash existing file");
                    false
                }
            },
        }
    }
}

/// Hex MD5 of a file's contents
pub(crate) fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Directory under `<root>/<board>/` that a thread's files go into
///
/// Always the thread id, except in original-name mode when a directory named
/// after the URL slug already exists; that directory is then reused.
pub fn thread_directory(root: &Path, thread: &ThreadRef, naming: NamingMode) -> PathBuf {
    let board_dir = root.join(&thread.board);
    let id_dir = board_dir.join(thread.thread.to_string());

    let slug = match (naming, &thread.slug) {
        (NamingMode::Original, Some(slug)) => sanitize_file_name(slug, ""),
        _ => return id_dir,
    };
    if slug.is_empty() {
        return id_dir;
    }

    let slug_dir = board_dir.join(slug);
    if slug_dir.is_dir() { slug_dir } else { id_dir }
}
