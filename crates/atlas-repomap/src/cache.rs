//! SQLite-backed persistent cache for per-file tags and computed results.
//!
//! Failures never surface to callers as errors once the cache is open: a
//! failed read is a miss and a failed write is logged and dropped.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use atlas_core::{AtlasError, CacheConfig};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::parser::Tag;

/// Bumped whenever the stored tag or entry format changes.
const SCHEMA_VERSION: &str = "1";

/// Database file name inside the cache directory.
pub const CACHE_FILE_NAME: &str = "cache.db";

/// Persistent cache shared by every operation on one project root.
///
/// The connection is guarded by a mutex, so one cache may be used from
/// several threads at once.
///
/// # Examples
///
/// ```
/// use atlas_repomap::cache::TagCache;
///
/// let cache = TagCache::in_memory().unwrap();
/// assert!(cache.lookup_tags("src/lib.rs", Some(1)).is_none());
/// ```
pub struct TagCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl TagCache {
    /// Open or create a cache database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the database cannot be opened or its
    /// schema cannot be created (for example when the file is corrupt).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use atlas_repomap::cache::TagCache;
    ///
    /// let cache = TagCache::open(Path::new(".atlas/cache.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, AtlasError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AtlasError::Cache(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AtlasError::Cache(format!("failed to open cache: {e}")))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| AtlasError::Cache(format!("failed to set busy timeout: {e}")))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| AtlasError::Cache(format!("failed to enable WAL: {e}")))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened tag cache");

        let cache = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Create an in-memory cache that lives as long as the value.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if schema creation fails.
    pub fn in_memory() -> Result<Self, AtlasError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AtlasError::Cache(format!("failed to create in-memory cache: {e}"))
        })?;
        let cache = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Open the cache configured for a project, degrading to an in-memory
    /// cache when persistence is disabled or the database is unusable.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] only if not even an in-memory database
    /// can be created.
    pub fn for_project(root: &Path, config: &CacheConfig) -> Result<Self, AtlasError> {
        if !config.enabled {
            return Self::in_memory();
        }
        let path = root.join(&config.dir).join(CACHE_FILE_NAME);
        match Self::open(&path) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "persistent cache unavailable, using memory");
                Self::in_memory()
            }
        }
    }

    /// Location of the backing database, if it is on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), AtlasError> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_tags (
                path TEXT PRIMARY KEY,
                mtime INTEGER,
                fingerprint TEXT NOT NULL,
                tags TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| AtlasError::Cache(format!("failed to create schema: {e}")))?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AtlasError::Cache(format!("failed to read schema version: {e}")))?;

        if stored.as_deref() != Some(SCHEMA_VERSION) {
            if stored.is_some() {
                tracing::info!(
                    from = stored.as_deref().unwrap_or_default(),
                    to = SCHEMA_VERSION,
                    "cache schema changed, discarding old entries"
                );
            }
            conn.execute_batch("DELETE FROM file_tags; DELETE FROM entries;")
                .map_err(|e| AtlasError::Cache(format!("failed to reset cache: {e}")))?;
            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(|e| AtlasError::Cache(format!("failed to record schema version: {e}")))?;
        }
        Ok(())
    }

    /// Cached tags for `file` if they were stored for the same modification time.
    ///
    /// Files without a known modification time never hit.
    pub fn lookup_tags(&self, file: &str, mtime: Option<i64>) -> Option<Vec<Tag>> {
        let mtime = mtime?;
        let result = self
            .conn()
            .query_row(
                "SELECT tags FROM file_tags WHERE path = ?1 AND mtime = ?2",
                params![file, mtime],
                |row| row.get::<_, String>(0),
            )
            .optional();
        self.decode_tags(file, result)
    }

    /// Cached tags for `file` if they were stored for identical content.
    ///
    /// Used when a file was touched without changing, so a new mtime does not
    /// force a re-parse.
    pub fn lookup_tags_by_fingerprint(&self, file: &str, fingerprint: &str) -> Option<Vec<Tag>> {
        let result = self
            .conn()
            .query_row(
                "SELECT tags FROM file_tags WHERE path = ?1 AND fingerprint = ?2",
                params![file, fingerprint],
                |row| row.get::<_, String>(0),
            )
            .optional();
        self.decode_tags(file, result)
    }

    fn decode_tags(
        &self,
        file: &str,
        result: rusqlite::Result<Option<String>>,
    ) -> Option<Vec<Tag>> {
        match result {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(tags) => Some(tags),
                Err(e) => {
                    tracing::debug!(file, error = %e, "discarding undecodable cached tags");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(file, error = %e, "tag cache read failed");
                None
            }
        }
    }

    /// Store the tags extracted from `file`.
    pub fn store_tags(&self, file: &str, mtime: Option<i64>, fingerprint: &str, tags: &[Tag]) {
        let raw = match serde_json::to_string(tags) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(file, error = %e, "failed to encode tags for cache");
                return;
            }
        };
        let result = self.conn().execute(
            "INSERT OR REPLACE INTO file_tags (path, mtime, fingerprint, tags) VALUES (?1, ?2, ?3, ?4)",
            params![file, mtime, fingerprint, raw],
        );
        if let Err(e) = result {
            tracing::warn!(file, error = %e, "tag cache write failed");
        }
    }

    /// Return the value cached under `key`, or compute and store it.
    ///
    /// With `force_refresh` the stored value is ignored and overwritten. The
    /// boolean in the result reports a cache hit. `compute` runs without the
    /// cache lock held, so it may use this cache itself.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `compute`; cache failures are misses.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_repomap::cache::TagCache;
    ///
    /// let cache = TagCache::in_memory().unwrap();
    /// let (value, hit) = cache
    ///     .get_or_compute("answer", false, || Ok::<_, std::io::Error>(42u32))
    ///     .unwrap();
    /// assert_eq!((value, hit), (42, false));
    /// let (value, hit) = cache
    ///     .get_or_compute("answer", false, || Ok::<_, std::io::Error>(0u32))
    ///     .unwrap();
    /// assert_eq!((value, hit), (42, true));
    /// ```
    pub fn get_or_compute<T, E, F>(
        &self,
        key: &str,
        force_refresh: bool,
        compute: F,
    ) -> Result<(T, bool), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if !force_refresh {
            if let Some(raw) = self.read_entry(key) {
                match serde_json::from_str(&raw) {
                    Ok(value) => return Ok((value, true)),
                    Err(e) => tracing::debug!(key, error = %e, "discarding undecodable cache entry"),
                }
            }
        }

        let value = compute()?;
        match serde_json::to_string(&value) {
            Ok(raw) => self.write_entry(key, &raw),
            Err(e) => tracing::warn!(key, error = %e, "failed to encode cache entry"),
        }
        Ok((value, false))
    }

    fn read_entry(&self, key: &str) -> Option<String> {
        let result = self
            .conn()
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional();
        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    fn write_entry(&self, key: &str, value: &str) {
        let result = self.conn().execute(
            "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
            params![key, value],
        );
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    /// Drop every cached tag and entry.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the tables cannot be cleared.
    pub fn clear(&self) -> Result<(), AtlasError> {
        self.conn()
            .execute_batch("DELETE FROM file_tags; DELETE FROM entries;")
            .map_err(|e| AtlasError::Cache(format!("failed to clear cache: {e}")))
    }

    /// Number of files with cached tags.
    pub fn tag_count(&self) -> usize {
        self.conn()
            .query_row("SELECT COUNT(*) FROM file_tags", [], |row| row.get::<_, i64>(0))
            .map(|n| usize::try_from(n).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Close the database, flushing pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if SQLite reports a failure while closing.
    pub fn close(self) -> Result<(), AtlasError> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close()
            .map_err(|(_, e)| AtlasError::Cache(format!("failed to close cache: {e}")))
    }
}

/// Hex SHA-256 of file content, used to recognise unchanged files.
///
/// # Examples
///
/// ```
/// use atlas_repomap::cache::fingerprint;
///
/// assert_eq!(fingerprint("a"), fingerprint("a"));
/// assert_ne!(fingerprint("a"), fingerprint("b"));
/// assert_eq!(fingerprint("").len(), 64);
/// ```
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Incrementally builds a stable cache key from labelled parts.
///
/// Parts are separated by NUL so `["ab", "c"]` and `["a", "bc"]` differ.
#[derive(Default)]
pub struct CacheKey {
    hasher: Sha256,
}

impl CacheKey {
    pub fn new(namespace: &str) -> Self {
        let mut key = Self::default();
        key.push(namespace);
        key
    }

    pub fn push(&mut self, part: &str) -> &mut Self {
        self.hasher.update(part.as_bytes());
        self.hasher.update(b"\0");
        self
    }

    pub fn push_all<'a>(&mut self, parts: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for part in parts {
            self.push(part);
        }
        self
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::Language;
    use atlas_core::TagKind;

    fn sample_tags() -> Vec<Tag> {
        vec![Tag {
            file: "src/db.py".into(),
            name: "connect".into(),
            kind: TagKind::Definition,
            line: 4,
            language: Language::Python,
        }]
    }

    #[test]
    fn tags_hit_only_on_matching_mtime() {
        let cache = TagCache::in_memory().unwrap();
        cache.store_tags("src/db.py", Some(10), "abc", &sample_tags());

        assert_eq!(cache.lookup_tags("src/db.py", Some(10)), Some(sample_tags()));
        assert!(cache.lookup_tags("src/db.py", Some(11)).is_none());
        assert!(cache.lookup_tags("src/db.py", None).is_none());
        assert!(cache.lookup_tags("src/other.py", Some(10)).is_none());
    }

    #[test]
    fn fingerprint_lookup_survives_touch() {
        let cache = TagCache::in_memory().unwrap();
        cache.store_tags("src/db.py", Some(10), "abc", &sample_tags());
        assert_eq!(
            cache.lookup_tags_by_fingerprint("src/db.py", "abc"),
            Some(sample_tags())
        );
        assert!(cache.lookup_tags_by_fingerprint("src/db.py", "def").is_none());
    }

    #[test]
    fn store_replaces_previous_entry() {
        let cache = TagCache::in_memory().unwrap();
        cache.store_tags("src/db.py", Some(10), "abc", &sample_tags());
        cache.store_tags("src/db.py", Some(20), "def", &[]);
        assert_eq!(cache.tag_count(), 1);
        assert_eq!(cache.lookup_tags("src/db.py", Some(20)), Some(Vec::new()));
    }

    #[test]
    fn force_refresh_recomputes() {
        let cache = TagCache::in_memory().unwrap();
        let first: (String, bool) = cache
            .get_or_compute("k", false, || Ok::<_, AtlasError>("one".to_string()))
            .unwrap();
        let second: (String, bool) = cache
            .get_or_compute("k", true, || Ok::<_, AtlasError>("two".to_string()))
            .unwrap();
        let third: (String, bool) = cache
            .get_or_compute("k", false, || Ok::<_, AtlasError>("three".to_string()))
            .unwrap();
        assert_eq!(first, ("one".to_string(), false));
        assert_eq!(second, ("two".to_string(), false));
        assert_eq!(third, ("two".to_string(), true));
    }

    #[test]
    fn compute_errors_propagate_and_are_not_cached() {
        let cache = TagCache::in_memory().unwrap();
        let err = cache
            .get_or_compute::<u32, _, _>("k", false, || Err(AtlasError::InvalidInput("bad".into())))
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidInput(_)));
        let (value, hit) = cache
            .get_or_compute("k", false, || Ok::<_, AtlasError>(7u32))
            .unwrap();
        assert_eq!((value, hit), (7, false));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".atlas").join(CACHE_FILE_NAME);
        {
            let cache = TagCache::open(&path).unwrap();
            cache.store_tags("src/db.py", Some(10), "abc", &sample_tags());
            cache.close().unwrap();
        }
        let cache = TagCache::open(&path).unwrap();
        assert_eq!(cache.lookup_tags("src/db.py", Some(10)), Some(sample_tags()));
        assert_eq!(cache.path(), Some(path.as_path()));
    }

    #[test]
    fn corrupt_database_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join(".atlas");
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join(CACHE_FILE_NAME), b"this is not sqlite at all, just text padding to exceed a header").unwrap();

        assert!(TagCache::open(&cache_dir.join(CACHE_FILE_NAME)).is_err());
        let cache = TagCache::for_project(dir.path(), &CacheConfig::default()).unwrap();
        assert!(cache.path().is_none());
    }

    #[test]
    fn disabled_cache_is_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = TagCache::for_project(dir.path(), &config).unwrap();
        assert!(cache.path().is_none());
        assert!(!dir.path().join(".atlas").exists());
    }

    #[test]
    fn cache_keys_are_separator_aware() {
        let mut a = CacheKey::new("map");
        a.push_all(["ab", "c"]);
        let mut b = CacheKey::new("map");
        b.push_all(["a", "bc"]);
        assert_ne!(a.finish(), b.finish());
    }
}
