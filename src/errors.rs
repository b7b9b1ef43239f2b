//! Error types.

use std::fmt;
use std::path::PathBuf;

use diesel::result::DatabaseErrorKind;

#[doc(no_inline)]
pub use diesel::result::{ConnectionError, Error as DieselError};

/// Catalog database related errors.
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("connection failed")]
    ConnectionError(#[from] ConnectionError),

    #[error("migration failed: {0}")]
    MigrationError(String),

    #[error(transparent)]
    DieselError(#[from] DieselError),
}

impl DatabaseError {
    /// Whether the error is unique key violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            *self,
            DatabaseError::DieselError(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }

    /// Whether the error is caused by a query which matched no rows.
    pub fn is_not_found(&self) -> bool {
        matches!(*self, DatabaseError::DieselError(DieselError::NotFound))
    }
}

/// Misuse of the [`Cache`](crate::Cache) API.
///
/// These are programming errors rather than domain conditions and should not be
/// handled by retrying.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// Mutating operation was called outside of [`Cache::transaction`](crate::Cache::transaction).
    #[error("`{0}` requires an open scope, call it inside `Cache::transaction`")]
    ScopeNotOpen(&'static str),

    /// [`Cache::transaction`](crate::Cache::transaction) was called while a scope is open.
    #[error("a scope is already open on this cache")]
    ScopeAlreadyOpen,
}

/// Invalid cache configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("artifact directory path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("catalog database must not be inside artifact directory: {}", .0.display())]
    DatabaseInsideArtifactDir(PathBuf),
}

/// Non UTF-8 symbol in path.
#[derive(thiserror::Error, Debug)]
#[error("non-UTF-8 symbol in path")]
pub struct NonUtf8PathError;

/// Key of a lookup which matched nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Id(i32),
    Url(String),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id={}", id),
            Self::Url(url) => write!(f, "url={}", url),
        }
    }
}

/// Cache error.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("cache entry not found with {0}")]
    NotFound(Lookup),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    NonUtf8Path(#[from] NonUtf8PathError),
}

impl From<DieselError> for CacheError {
    fn from(err: DieselError) -> Self {
        Self::Database(DatabaseError::from(err))
    }
}

impl CacheError {
    /// Whether the error is a unique key violation, e.g. inserting an already cached URL.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Database(err) if err.is_unique_violation())
    }

    /// Whether the error means that lookup matched no entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the error is a misuse of the API.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// Maintenance operations error.
#[derive(thiserror::Error, Debug)]
pub enum MaintenanceError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("cache error: {0}")]
    CacheError(#[from] CacheError),
}
