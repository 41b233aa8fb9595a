//! File-backed cache for remote metadata responses
//!
//! Every remote XML response is persisted under a key derived from the
//! query, so repeated runs hit the filesystem instead of the network.
//! A file's modification time is its age: entries older than
//! [`MAX_CACHE_AGE`] are evicted before they can be read, and the oldest
//! surviving episode-data entry bounds the incremental updates query.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Cache entries older than this are considered invalid
pub const MAX_CACHE_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Characters that must not appear in a cache file name
const ILLEGAL_KEY_CHARS: &[char] = &['/', '\\', ':', '*', '"', '<', '>', '|', '?'];

/// Keyed blob persistence for remote responses.
///
/// The production backend is [`FileCache`]; tests substitute an
/// in-memory implementation.
pub trait CacheStore: Send + Sync {
    /// Read an entry, `None` if it does not exist or cannot be read
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Persist an entry, overwriting any previous content
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Delete an entry if present
    fn invalidate(&self, key: &str);

    /// Delete every entry older than `max_age`, returning the number of
    /// entries removed. Individual delete failures are logged, never fatal.
    fn evict_stale(&self, max_age: Duration) -> usize;

    /// Minimum modification time (unix seconds) among entries whose key
    /// starts with `prefix`; `None` when no such entry exists
    fn oldest_timestamp(&self, prefix: &str) -> Option<i64>;
}

/// Strip characters that are not filesystem-safe from a key component
pub fn sanitize_key(component: &str) -> String {
    component
        .chars()
        .filter(|c| !ILLEGAL_KEY_CHARS.contains(c))
        .collect()
}

/// Filesystem-backed cache store rooted at a single directory
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }

    fn modified_unix_seconds(path: &Path) -> Option<i64> {
        let modified = fs::metadata(path).ok()?.modified().ok()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(since_epoch.as_secs() as i64)
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        match fs::read(&path) {
            Ok(bytes) => {
                debug!(key = %key, "Cache hit");
                Some(bytes)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache entry");
                None
            }
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create cache directory {}", self.root.display()))?;
        let path = self.entry_path(key);
        fs::write(&path, bytes)
            .with_context(|| format!("Failed to write cache entry {}", path.display()))?;
        debug!(key = %key, size = bytes.len(), "Persisted cache entry");
        Ok(())
    }

    fn invalidate(&self, key: &str) {
        let path = self.entry_path(key);
        if path.exists()
            && let Err(e) = fs::remove_file(&path)
        {
            warn!(key = %key, error = %e, "Failed to invalidate cache entry");
        }
    }

    fn evict_stale(&self, max_age: Duration) -> usize {
        let cutoff = SystemTime::now() - max_age;
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            // No cache directory yet means nothing to evict
            Err(_) => return 0,
        };

        let mut evicted = 0;
        let mut failures = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stale = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => evicted += 1,
                    Err(_) => failures += 1,
                }
            }
        }

        if evicted > 0 {
            info!(count = evicted, "Evicted stale cache entries");
        }
        if failures > 0 {
            warn!(
                count = failures,
                "Could not delete stale cache entries, check file permissions"
            );
        }
        evicted
    }

    fn oldest_timestamp(&self, prefix: &str) -> Option<i64> {
        let entries = fs::read_dir(&self.root).ok()?;
        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(prefix)
            })
            .filter_map(|entry| Self::modified_unix_seconds(&entry.path()))
            .min()
    }
}
