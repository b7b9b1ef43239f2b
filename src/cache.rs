use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::Connection as _;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::database::models::{encode_local_path, NewCachedEntry};
use crate::database::{self, api, Connection, DatabaseResult};
use crate::errors::{CacheError, ConfigurationError, Lookup, NonUtf8PathError, UsageError};
use crate::{CacheConfig, CachedEntry};

type Result<T> = std::result::Result<T, CacheError>;

/// Outcome of [`Cache::clean`].
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Expired entries which were removed. Their files go away once the scope commits.
    pub removed: Vec<CachedEntry>,

    /// Expired entries which could not be removed. Their rows are left untouched.
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    /// Whether every expired entry was removed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Expired entry which failed to be removed during a sweep.
#[derive(Debug)]
pub struct SweepFailure {
    /// Entry which is still in the catalog.
    pub entry: CachedEntry,

    /// Reason the entry was kept.
    pub error: CacheError,
}

/// Catalog of cached files.
///
/// Maps remote URLs to opaque files in the artifact directory. The catalog is
/// stored in SQLite, so several processes may share it: readers never block,
/// writers wait on each other for up to 10 seconds.
///
/// Mutating operations ([`Cache::add`], [`Cache::update`], [`Cache::delete`],
/// [`Cache::remove`], [`Cache::clean`]) must be called inside [`Cache::transaction`],
/// otherwise they fail with [`UsageError::ScopeNotOpen`]. Lookups may be called
/// anywhere: outside of a scope they use a short-lived connection.
///
/// A single instance supports one open scope at a time. Share it between
/// threads only behind a lock.
pub struct Cache {
    config: CacheConfig,

    /// Absolute path to the artifact directory.
    artifact_dir: PathBuf,

    database_url: String,

    /// Connection of the open scope.
    connection: Option<Connection>,

    /// Files of entries deleted in the open scope, removed on commit.
    pending_removals: Vec<PathBuf>,
}

impl Cache {
    /// Initialize cache.
    ///
    /// Creates artifact directory and catalog database if they don't exist
    /// and brings the catalog schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if artifact directory path exists but
    /// is not a directory, or if the database would be placed inside it.
    pub fn init(config: CacheConfig) -> Result<Self> {
        let artifact_dir = std::path::absolute(&config.artifact_dir)?;
        if !artifact_dir.exists() {
            debug!("creating artifact directory {}", artifact_dir.display());
            fs::create_dir_all(&artifact_dir)?;
        }
        if !artifact_dir.is_dir() {
            return Err(ConfigurationError::NotADirectory(artifact_dir).into());
        }
        // Catalog stores paths of cached files, they must not depend on how the root is spelled
        let artifact_dir = fs::canonicalize(&artifact_dir)?;

        let database_path = canonical_file_path(&config.database_path)?;
        if database_path.starts_with(&artifact_dir) {
            return Err(ConfigurationError::DatabaseInsideArtifactDir(database_path).into());
        }
        let database_url = database_path
            .to_str()
            .ok_or(NonUtf8PathError)?
            .to_string();

        database::run_migrations(&database_url)?;

        debug!(
            "cache initialized: artifacts in {}, catalog in {}",
            artifact_dir.display(),
            database_url
        );
        Ok(Self {
            config,
            artifact_dir,
            database_url,
            connection: None,
            pending_removals: Vec::new(),
        })
    }

    /// Cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Absolute path to the artifact directory.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Path to the catalog database.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Whether a scope is open, i.e. we are inside [`Cache::transaction`].
    pub fn is_scope_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Run `f` in a scope: a dedicated connection with an immediate transaction.
    ///
    /// The transaction is committed if `f` returns `Ok` and rolled back if it returns
    /// `Err` or panics. The connection is released in every case.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::ScopeAlreadyOpen`] when called from inside another scope.
    pub fn transaction<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<CacheError>,
    {
        self.open_scope().map_err(E::from)?;
        let scope = Scope { cache: self };
        let result = f(&mut *scope.cache);
        let commit = result.is_ok();
        match scope.close(commit) {
            Ok(()) => result,
            Err(err) if commit => Err(E::from(err)),
            Err(err) => {
                // the error which caused the rollback is more relevant
                error!("failed to roll back scope: {}", err);
                result
            }
        }
    }

    /// Add URL to the catalog and allocate an opaque file path for it.
    ///
    /// Nothing is written to the allocated path, materializing the file is up to the caller.
    ///
    /// # Errors
    ///
    /// Fails with unique violation (see [`CacheError::is_unique_violation`]) if URL is
    /// already cached. Requires an open scope.
    pub fn add(&mut self, url: &str) -> Result<CachedEntry> {
        let local_path = self.generate_unique_filename();
        let conn = self.scoped_connection("add")?;
        let new_entry = NewCachedEntry::new(url, &local_path)?;
        let entry: CachedEntry = api::insert(conn, &new_entry)?.into();
        debug!("added URL '{}' as {}", url, entry.local_path.display());
        Ok(entry)
    }

    /// Change local path of an entry. Refreshes `updated_at`. Returns updated entry.
    ///
    /// Requires an open scope.
    pub fn update(&mut self, entry: &CachedEntry) -> Result<CachedEntry> {
        let conn = self.scoped_connection("update")?;
        let local_path = encode_local_path(&entry.local_path)?;
        match api::update_local_path(conn, entry.id, local_path) {
            Ok(row) => Ok(row.into()),
            Err(err) if err.is_not_found() => Err(CacheError::NotFound(Lookup::Id(entry.id))),
            Err(err) => Err(err.into()),
        }
    }

    /// Get entry by id.
    pub fn by_id(&mut self, id: i32) -> Result<CachedEntry> {
        match self.read(|conn| api::get(conn, id)) {
            Ok(row) => Ok(row.into()),
            Err(CacheError::Database(err)) if err.is_not_found() => {
                Err(CacheError::NotFound(Lookup::Id(id)))
            }
            Err(err) => Err(err),
        }
    }

    /// Get entry by URL.
    pub fn by_url(&mut self, url: &str) -> Result<CachedEntry> {
        self.read(|conn| api::get_by_url(conn, url))?
            .map(CachedEntry::from)
            .ok_or_else(|| CacheError::NotFound(Lookup::Url(url.to_string())))
    }

    /// Find entry owning a file in the artifact directory.
    pub fn by_local_path<P>(&mut self, path: P) -> Result<Option<CachedEntry>>
    where
        P: AsRef<Path>,
    {
        let path = encode_local_path(path.as_ref())?;
        Ok(self
            .read(|conn| api::get_by_local_path(conn, path))?
            .map(CachedEntry::from))
    }

    /// Whether URL is cached.
    pub fn contains(&mut self, url: &str) -> Result<bool> {
        match self.by_url(url) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// List all entries. Order is unspecified.
    pub fn list(&mut self) -> Result<Vec<CachedEntry>> {
        Ok(self
            .read(api::get_all)?
            .into_iter()
            .map(CachedEntry::from)
            .collect())
    }

    /// List entries which were not modified for at least `expire_days`.
    ///
    /// Empty if expiry is not configured.
    pub fn list_expired(&mut self) -> Result<Vec<CachedEntry>> {
        let Some(expire_days) = self.config.expire_days else {
            return Ok(Vec::new());
        };
        let now = Local::now();
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| entry.is_expired(now, expire_days))
            .collect())
    }

    /// Remove entry from the catalog and its file from the artifact directory.
    ///
    /// The file is removed only after the scope commits, a rolled back scope keeps
    /// both the row and the file. A file which is already gone is not an error.
    /// If something other than a file occupies the entry's path, the row is kept.
    /// Requires an open scope.
    pub fn delete(&mut self, entry: &CachedEntry) -> Result<()> {
        let conn = self.scoped_connection("delete")?;
        conn.transaction(|conn| {
            if api::delete(conn, entry.id)? == 0 {
                return Err(CacheError::NotFound(Lookup::Id(entry.id)));
            }
            check_removable(&entry.local_path)
        })?;
        self.pending_removals.push(entry.local_path.clone());
        debug!("removed URL '{}' from cache", entry.url);
        Ok(())
    }

    /// Remove entry given either its id or its URL. Returns removed entry.
    ///
    /// Requires an open scope.
    pub fn remove(&mut self, url_or_id: &str) -> Result<CachedEntry> {
        self.scoped_connection("remove")?;
        let entry = match url_or_id.parse::<i32>() {
            Ok(id) => self.by_id(id)?,
            Err(_) => self.by_url(url_or_id)?,
        };
        self.delete(&entry)?;
        Ok(entry)
    }

    /// Remove all expired entries. Does nothing if expiry is not configured.
    ///
    /// Failure to remove one entry does not stop the sweep, failures are collected
    /// in the report. Requires an open scope.
    pub fn clean(&mut self) -> Result<SweepReport> {
        self.scoped_connection("clean")?;
        let mut report = SweepReport::default();
        if self.config.expire_days.is_none() {
            debug!("expiry is not configured, nothing to clean");
            return Ok(report);
        }

        let expired = self.list_expired()?;
        info!("expired entries: {}", expired.len());
        for entry in expired {
            match self.delete(&entry) {
                Ok(()) => {
                    info!("removed expired URL '{}'", entry.url);
                    report.removed.push(entry);
                }
                Err(error) => {
                    error!("failed to remove expired URL '{}': {}", entry.url, error);
                    report.failed.push(SweepFailure { entry, error });
                }
            }
        }
        Ok(report)
    }

    /// Opaque file name in the artifact directory, unrelated to the URL.
    fn generate_unique_filename(&self) -> PathBuf {
        self.artifact_dir.join(Uuid::new_v4().simple().to_string())
    }

    fn scoped_connection(&mut self, operation: &'static str) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or(CacheError::Usage(UsageError::ScopeNotOpen(operation)))
    }

    /// Run read-only query on the scope connection, or on a short-lived one.
    fn read<T, F>(&mut self, query: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> DatabaseResult<T>,
    {
        match self.connection.as_mut() {
            Some(conn) => Ok(query(conn)?),
            None => {
                let mut conn = database::establish_connection(&self.database_url)?;
                Ok(query(&mut conn)?)
            }
        }
    }

    fn open_scope(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Err(UsageError::ScopeAlreadyOpen.into());
        }
        let mut conn = database::establish_connection(&self.database_url)?;
        trace!("BEGIN IMMEDIATE");
        AnsiTransactionManager::begin_transaction_sql(&mut conn, "BEGIN IMMEDIATE")?;
        debug!("scope opened");
        self.connection = Some(conn);
        Ok(())
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("artifact_dir", &self.artifact_dir)
            .field("database_url", &self.database_url)
            .field("expire_days", &self.config.expire_days)
            .field("scope_open", &self.is_scope_open())
            .finish()
    }
}

/// Open scope of a [`Cache`]. Rolls back the transaction if dropped without [`Scope::close`].
struct Scope<'c> {
    cache: &'c mut Cache,
}

impl Scope<'_> {
    /// Commit or roll back the transaction and release the connection.
    ///
    /// Files of deleted entries are removed after a successful commit.
    fn close(self, commit: bool) -> Result<()> {
        let Some(mut conn) = self.cache.connection.take() else {
            return Ok(());
        };
        let removals = std::mem::take(&mut self.cache.pending_removals);
        if commit {
            trace!("COMMIT");
            AnsiTransactionManager::commit_transaction(&mut conn)?;
            debug!("scope committed");
            for path in removals {
                // rows are gone for good, a leftover file is pruned by maintenance
                if let Err(err) = remove_backing_file(&path) {
                    error!("failed to remove file '{}': {}", path.display(), err);
                }
            }
        } else {
            trace!("ROLLBACK");
            AnsiTransactionManager::rollback_transaction(&mut conn)?;
            debug!("scope rolled back");
        }
        Ok(())
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.cache.pending_removals.clear();
        if let Some(mut conn) = self.cache.connection.take() {
            warn!("scope was not closed, rolling back");
            if let Err(err) = AnsiTransactionManager::rollback_transaction(&mut conn) {
                error!("failed to roll back scope: {}", err);
            }
        }
    }
}

/// Absolute path of a file which may not exist yet, with its parent directory
/// created and resolved.
fn canonical_file_path(path: &Path) -> Result<PathBuf> {
    let path = std::path::absolute(path)?;
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            fs::create_dir_all(parent)?;
            Ok(fs::canonicalize(parent)?.join(name))
        }
        _ => Ok(path),
    }
}

/// Fail if the backing file of an entry exists but is not something `remove_file` can handle.
fn check_removable(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(std::io::Error::other(format!(
            "cached path is a directory: {}",
            path.display()
        ))
        .into()),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Remove the backing file of an entry. The file being already absent is tolerated.
fn remove_backing_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("cached file is already missing: {}", path.display());
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
