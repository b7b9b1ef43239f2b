//! Cache configuration.
//!
//! Resolving configuration files is left to the application. [`CacheConfig`]
//! derives [`Deserialize`], so any loader can produce it.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Name of the artifact directory inside cache root.
pub const ARTIFACT_DIR_NAME: &str = "artifacts";

/// Name of the catalog database file inside cache root.
pub const DATABASE_FILE_NAME: &str = "cache.db";

/// Default cache root based on OS.
fn default_cache_root() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "minato") {
        proj_dirs.cache_dir().to_path_buf()
    } else {
        PathBuf::from(".minato")
    }
}

/// Paths and expiry settings of a [`Cache`](crate::Cache).
///
/// Use [`CacheConfig::builder`], [`CacheConfig::with_root`] or [`CacheConfig::default`] to create.
///
/// The database must live outside of the artifact directory: every file there
/// which is not in the catalog counts as dangling, see
/// [`MaintenanceRunner::prune_dangling_files`](crate::maintenance::MaintenanceRunner::prune_dangling_files).
/// [`Cache::init`](crate::Cache::init) rejects such a configuration.
#[derive(Builder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct CacheConfig {
    /// Directory holding materialized files.
    pub artifact_dir: PathBuf,

    /// Path to the catalog SQLite database file.
    pub database_path: PathBuf,

    /// Entries not modified for this many days are considered expired.
    ///
    /// If not set, entries never expire.
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub expire_days: Option<u32>,
}

impl CacheConfig {
    /// Create new builder for cache configuration.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Configuration with both artifact directory and database placed under `root`.
    pub fn with_root<P>(root: P) -> Self
    where
        P: AsRef<Path>,
    {
        let root = root.as_ref();
        Self {
            artifact_dir: root.join(ARTIFACT_DIR_NAME),
            database_path: root.join(DATABASE_FILE_NAME),
            expire_days: None,
        }
    }

    /// Set expiry threshold in days.
    pub fn with_expire_days(mut self, days: Option<u32>) -> Self {
        self.expire_days = days;
        self
    }
}

impl Default for CacheConfig {
    /// Configuration rooted at the OS cache directory.
    fn default() -> Self {
        Self::with_root(default_cache_root())
    }
}
