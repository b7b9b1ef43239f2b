//! # Minato
//!
//! Local cache catalog: maps remote URLs to files materialized in a local
//! artifact directory. The catalog is an SQLite database, every entry records
//! when it was created and last modified, and entries older than a configured
//! number of days can be swept.
//!
//! Fetching the bytes is up to the caller: the catalog only decides whether a
//! URL is cached, where its file lives and when it expires.
//!
//! ## Example
//!
//! ```rust
//! # fn test(root: &std::path::Path, url: &str) -> Result<(), minato::errors::CacheError> {
//! use minato::{Cache, CacheConfig};
//!
//! // Open cache, creating directories and catalog if needed
//! let config = CacheConfig::with_root(root).with_expire_days(Some(30));
//! let mut cache = Cache::init(config)?;
//!
//! // Allocate a file for URL unless it's already cached
//! let entry = if cache.contains(url)? {
//!     cache.by_url(url)?
//! } else {
//!     cache.transaction(|cache| cache.add(url))?
//! };
//!
//! // download into `entry.local_path`
//! // ...
//!
//! // Evict entries not modified for 30 days
//! let report = cache.transaction(|cache| cache.clean())?;
//! println!("removed {} entries from cache, {} remain", report.removed.len(), cache.list()?.len());
//! # let _ = entry;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod database;
mod entry;

pub mod errors;
pub mod maintenance;

pub use cache::{Cache, SweepFailure, SweepReport};
pub use config::{CacheConfig, CacheConfigBuilder, CacheConfigBuilderError};
pub use entry::CachedEntry;

// Re-exports of public API arguments from extern crates
#[doc(no_inline)]
pub use chrono::{DateTime, Local};
