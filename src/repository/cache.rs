use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::LATEST_VERSION_TAG;
use crate::metadata::types::PackageIndex;
use crate::repository::clock::{Clock, SystemClock};
use crate::repository::error::CacheError;

/// Trait for storing and retrieving package indices
pub trait IndexStore: Send + Sync + 'static {
    /// Fresh index for a repository/version pair.
    ///
    /// `Ok(None)` is a miss: no entry, a stale entry, or an entry whose
    /// payload can no longer be decoded.
    fn get(
        &self,
        repository: &str,
        version_tag: Option<&str>,
    ) -> Result<Option<PackageIndex>, CacheError>;

    /// Replace the index for a repository/version pair.
    fn put(
        &self,
        repository: &str,
        version_tag: Option<&str>,
        index: &PackageIndex,
    ) -> Result<(), CacheError>;
}

/// Cache key: `{versionTag|latest}_{repository}`
pub fn cache_key(repository: &str, version_tag: Option<&str>) -> String {
    format!(
        "{}_{}",
        version_tag.unwrap_or(LATEST_VERSION_TAG),
        repository
    )
}

/// SQLite-backed package index cache
pub struct IndexCache {
    conn: Mutex<Connection>,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl IndexCache {
    pub fn new(db_path: &Path, ttl_ms: i64) -> Result<Self, CacheError> {
        Self::with_clock(db_path, ttl_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db_path: &Path,
        ttl_ms: i64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        info!("Initializing index cache at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let cache = Self {
            conn: Mutex::new(conn),
            ttl_ms,
            clock,
        };

        cache.create_schema()?;
        info!("Index cache initialized successfully");

        Ok(cache)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<(), CacheError> {
        debug!("Creating index cache schema");

        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS package_indices (
                cache_key TEXT PRIMARY KEY,
                repository TEXT NOT NULL,
                version_tag TEXT NOT NULL,
                package_count INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_indices_updated_at ON package_indices(updated_at)",
            [],
        )?;

        Ok(())
    }

    /// Timestamp of the stored entry regardless of freshness
    pub fn updated_at(
        &self,
        repository: &str,
        version_tag: Option<&str>,
    ) -> Result<Option<i64>, CacheError> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT updated_at FROM package_indices WHERE cache_key = ?1",
            [cache_key(repository, version_tag)],
            |row| row.get(0),
        );

        match result {
            Ok(updated_at) => Ok(Some(updated_at)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl IndexStore for IndexCache {
    fn get(
        &self,
        repository: &str,
        version_tag: Option<&str>,
    ) -> Result<Option<PackageIndex>, CacheError> {
        let key = cache_key(repository, version_tag);
        let conn = self.lock_conn()?;

        let result = conn.query_row(
            "SELECT payload, updated_at FROM package_indices WHERE cache_key = ?1",
            [&key],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        );
        drop(conn);

        let (payload, updated_at) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                debug!("Cache miss for {}", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let age = self.clock.now_ms() - updated_at;
        if age >= self.ttl_ms {
            debug!("Cache entry {} is stale ({} ms old)", key, age);
            return Ok(None);
        }

        match serde_json::from_str::<PackageIndex>(&payload) {
            Ok(index) => {
                debug!("Cache hit for {} ({} packages)", key, index.len());
                Ok(Some(index))
            }
            Err(e) => {
                warn!("Discarding corrupt cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    fn put(
        &self,
        repository: &str,
        version_tag: Option<&str>,
        index: &PackageIndex,
    ) -> Result<(), CacheError> {
        let key = cache_key(repository, version_tag);
        let payload = serde_json::to_string(index)?;
        let now = self.clock.now_ms();

        debug!("Saving {} packages under {}", index.len(), key);

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO package_indices (cache_key, repository, version_tag, package_count, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(cache_key) DO UPDATE SET
                package_count = excluded.package_count,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            (
                &key,
                repository,
                version_tag.unwrap_or(LATEST_VERSION_TAG),
                index.len() as i64,
                &payload,
                now,
            ),
        )?;

        tx.commit()?;

        debug!("Successfully saved index {}", key);
        Ok(())
    }
}
