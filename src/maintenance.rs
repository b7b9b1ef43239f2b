//! Maintenance operations on cache.
//!
//! Deleting a catalog row and its file are two separate operations, so a crash
//! in between leaves the cache inconsistent: either a row without a file or a
//! file without a row. [`MaintenanceRunner`] finds and fixes both, and runs the
//! expiry sweep.
//!
//! # Example
//!
//! ```rust
//! # use minato::Cache;
//! # fn test(cache: &mut Cache) {
//! use minato::maintenance::{MaintenanceOpts, MaintenanceRunner};
//!
//! // Configure maintenance
//! let opts = MaintenanceOpts::builder()
//!     .run_cache_cleaning(true)
//!     .remove_missing(true)
//!     .prune_dangling(true)
//!     .build()
//!     .unwrap();
//!
//! // Create runner
//! let mut runner = MaintenanceRunner::new(cache, opts);
//!
//! // Run all configured steps
//! let report = runner.run_once().unwrap();
//! println!("{:?}", report);
//! # }
//! ```

use std::fs::{self, DirEntry};

use derive_builder::Builder;
use tracing::{debug, error, info, warn};

use crate::errors::{CacheError, MaintenanceError};
use crate::Cache;

/// Maintenance options. Use [`MaintenanceOptsBuilder`] to create.
#[derive(Default, Builder, Debug, Clone, Copy)]
#[builder(setter(into))]
#[builder(default)]
pub struct MaintenanceOpts {
    /// Run cache cleaning.
    ///
    /// Remove expired entries, see [`Cache::clean`].
    /// Enables step [`MaintenanceRunner::run_cache_cleaning`].
    run_cache_cleaning: bool,

    /// Remove catalog entries whose file does not exist.
    ///
    /// Enables step [`MaintenanceRunner::remove_missing_entries`].
    remove_missing: bool,

    /// Remove dangling files from artifact directory.
    ///
    /// Search for files which are not in the catalog and remove them.
    /// Enables step [`MaintenanceRunner::prune_dangling_files`].
    prune_dangling: bool,
}

impl MaintenanceOpts {
    /// Create new builder for maintenance options.
    pub fn builder() -> MaintenanceOptsBuilder {
        MaintenanceOptsBuilder::default()
    }
}

/// Counters of a maintenance run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expired entries removed.
    pub expired: usize,

    /// Entries removed because their file was missing.
    pub missing: usize,

    /// Files removed from artifact directory because no entry owned them.
    pub dangling: usize,

    /// Items which could not be handled. Details are logged.
    pub failures: usize,
}

/// Maintenance operations for a [`Cache`].
///
/// Failure to handle a single item is logged and counted, the run goes on.
pub struct MaintenanceRunner<'c> {
    cache: &'c mut Cache,
    opts: MaintenanceOpts,
}

impl<'c> MaintenanceRunner<'c> {
    /// Create new maintenance runner.
    pub fn new(cache: &'c mut Cache, opts: MaintenanceOpts) -> Self {
        Self { cache, opts }
    }

    /// Run all configured maintenance steps once.
    ///
    /// Missing entries are removed before dangling files are pruned.
    pub fn run_once(&mut self) -> Result<MaintenanceReport, MaintenanceError> {
        let mut report = MaintenanceReport::default();
        if self.opts.run_cache_cleaning {
            let step = self.run_cache_cleaning()?;
            report.expired = step.expired;
            report.failures += step.failures;
        }
        if self.opts.remove_missing {
            let step = self.remove_missing_entries()?;
            report.missing = step.missing;
            report.failures += step.failures;
        }
        if self.opts.prune_dangling {
            let step = self.prune_dangling_files()?;
            report.dangling = step.dangling;
            report.failures += step.failures;
        }
        info!("maintenance done: {:?}", report);
        Ok(report)
    }

    /// Run cache cleaning: remove all expired entries.
    pub fn run_cache_cleaning(&mut self) -> Result<MaintenanceReport, MaintenanceError> {
        info!("running cache cleaning");
        let sweep = self.cache.transaction(|cache| cache.clean())?;
        Ok(MaintenanceReport {
            expired: sweep.removed.len(),
            failures: sweep.failed.len(),
            ..Default::default()
        })
    }

    /// Remove catalog entries whose file does not exist in artifact directory.
    pub fn remove_missing_entries(&mut self) -> Result<MaintenanceReport, MaintenanceError> {
        info!("removing entries with missing files");
        let mut report = MaintenanceReport::default();
        self.cache.transaction(|cache| {
            for entry in cache.list()? {
                if entry.local_path.exists() {
                    continue;
                }
                match cache.delete(&entry) {
                    Ok(()) => {
                        info!("removed entry of missing file (URL '{}')", entry.url);
                        report.missing += 1;
                    }
                    Err(err) => {
                        error!(
                            "failed to remove entry of missing file (URL '{}'): {}",
                            entry.url, err
                        );
                        report.failures += 1;
                    }
                }
            }
            Ok::<_, CacheError>(())
        })?;
        Ok(report)
    }

    /// Prune dangling files from artifact directory.
    ///
    /// Files allocated by a scope which is not committed yet are not visible
    /// to the runner, so don't run this step next to active writers.
    pub fn prune_dangling_files(&mut self) -> Result<MaintenanceReport, MaintenanceError> {
        info!("pruning dangling files");
        debug!(
            "reading entries in artifact directory: {}",
            self.cache.artifact_dir().display()
        );
        let mut report = MaintenanceReport::default();
        for entry in fs::read_dir(self.cache.artifact_dir())? {
            let result = entry
                .map_err(MaintenanceError::from)
                .and_then(|entry| self.check_dir_entry(&entry));
            match result {
                Ok(true) => report.dangling += 1,
                Ok(false) => {}
                Err(err) => {
                    error!("failed to handle artifact directory entry: {}", err);
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Check directory entry for presence in catalog and remove it if it's not found.
    ///
    /// Returns whether the file was removed.
    fn check_dir_entry(&mut self, entry: &DirEntry) -> Result<bool, MaintenanceError> {
        let path = entry.path();
        let metadata = entry.metadata()?;

        // Nothing apart from regular files should be in artifact directory,
        // but we are not going to clean other things up.
        if !metadata.is_file() {
            warn!("entry in artifact directory is not a file: {}", path.display());
            return Ok(false);
        }

        if self.cache.by_local_path(&path)?.is_some() {
            return Ok(false);
        }
        info!(
            "file '{}' is not found in catalog - removing it",
            path.display()
        );
        fs::remove_file(&path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fixtures::{cache, CacheFixture};
    use crate::CacheConfig;
    use chrono::TimeDelta;
    use rstest::rstest;
    use tracing_test::traced_test;

    const URL: &str = "https://example.com/path/to/file";

    fn all_steps() -> MaintenanceOpts {
        MaintenanceOpts::builder()
            .run_cache_cleaning(true)
            .remove_missing(true)
            .prune_dangling(true)
            .build()
            .unwrap()
    }

    #[rstest]
    #[traced_test]
    fn test_remove_missing_entries(mut cache: CacheFixture) {
        let kept = cache.add_with_content("https://example.com/kept", "content");
        let lost = cache.add_with_content("https://example.com/lost", "content");
        fs::remove_file(&lost.local_path).unwrap();

        let mut runner = MaintenanceRunner::new(&mut cache.cache, MaintenanceOpts::default());
        let report = runner
            .remove_missing_entries()
            .expect("remove missing entries");
        assert_eq!(report.missing, 1);
        assert_eq!(cache.cache.list().unwrap(), vec![kept]);
    }

    #[rstest]
    #[traced_test]
    fn test_prune_dangling_files(mut cache: CacheFixture) {
        let kept = cache.add_with_content("https://example.com/kept", "content");
        let dangling = cache.cache.artifact_dir().join("dangling");
        fs::write(&dangling, "content").unwrap();
        let subdir = cache.cache.artifact_dir().join("subdir");
        fs::create_dir(&subdir).unwrap();

        let mut runner = MaintenanceRunner::new(&mut cache.cache, MaintenanceOpts::default());
        let report = runner.prune_dangling_files().expect("prune dangling files");
        assert_eq!(report.dangling, 1);
        assert_eq!(report.failures, 0);
        assert!(!dangling.exists());
        assert!(subdir.exists());
        assert!(kept.local_path.exists());
    }

    #[rstest]
    #[traced_test]
    fn test_prune_dangling_files_keeps_files_of_reopened_cache() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let mut cache =
            Cache::init(CacheConfig::with_root(tmp.path().join("sub/../root"))).unwrap();
        let entry = cache.transaction(|cache| cache.add(URL)).unwrap();
        fs::write(&entry.local_path, "content").unwrap();

        let mut reopened = Cache::init(CacheConfig::with_root(tmp.path().join("root"))).unwrap();
        let mut runner = MaintenanceRunner::new(&mut reopened, MaintenanceOpts::default());
        let report = runner.prune_dangling_files().expect("prune dangling files");
        assert_eq!(report, MaintenanceReport::default());
        assert!(entry.local_path.exists());
        assert_eq!(reopened.list().unwrap(), vec![entry]);
    }

    #[rstest]
    #[traced_test]
    fn test_run_once(#[with(Some(7))] mut cache: CacheFixture) {
        let expired = cache.add_with_content("https://example.com/expired", "content");
        cache.backdate(&expired, TimeDelta::days(8));
        let lost = cache.add_with_content("https://example.com/lost", "content");
        fs::remove_file(&lost.local_path).unwrap();
        let kept = cache.add_with_content("https://example.com/kept", "content");
        fs::write(cache.cache.artifact_dir().join("dangling"), "content").unwrap();

        let mut runner = MaintenanceRunner::new(&mut cache.cache, all_steps());
        let report = runner.run_once().expect("run maintenance");
        assert_eq!(
            report,
            MaintenanceReport {
                expired: 1,
                missing: 1,
                dangling: 1,
                failures: 0,
            }
        );
        assert_eq!(cache.cache.list().unwrap(), vec![kept.clone()]);
        let files: Vec<_> = fs::read_dir(cache.cache.artifact_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files, vec![kept.local_path]);
    }

    #[rstest]
    #[traced_test]
    fn test_disabled_steps_do_nothing(mut cache: CacheFixture) {
        let lost = cache.add_with_content("https://example.com/lost", "content");
        fs::remove_file(&lost.local_path).unwrap();

        let mut runner = MaintenanceRunner::new(&mut cache.cache, MaintenanceOpts::default());
        let report = runner.run_once().unwrap();
        assert_eq!(report, MaintenanceReport::default());
        assert_eq!(cache.cache.list().unwrap().len(), 1);
    }
}
