//! Catalog database.
//!
//! An SQLite database built with migrations from `./migrations`.

use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::{Connection as _, SqliteConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use tracing::{debug, trace};

use crate::errors::DatabaseError;

pub mod api;
pub mod models;
pub mod schema;

/// Inner SQLite connection type.
pub type Connection = SqliteConnection;

/// Result of database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

const MIGRATIONS: EmbeddedMigrations =
    diesel_migrations::embed_migrations!("src/database/migrations");

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Establish connection to SQLite database with `database_url`.
///
/// If database does not exist, it will be created.
///
/// When connection established, following configs will be applied:
/// - `PRAGMA journal_mode = WAL`
/// - `PRAGMA synchronous = NORMAL`
/// - `PRAGMA busy_timeout = 10_000`
pub fn establish_connection(database_url: &str) -> DatabaseResult<Connection> {
    trace!("establishing connection with {}", database_url);
    let mut connection = Connection::establish(database_url)?;
    let query = format!(
        "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = {};",
        BUSY_TIMEOUT.as_millis()
    );
    trace!("executing: {}", &query);
    connection.batch_execute(&query)?;
    Ok(connection)
}

/// Run pending migrations on SQLite database specified with `database_url`.
///
/// Safe to call on every startup: applied migrations are skipped.
pub fn run_migrations(database_url: &str) -> DatabaseResult<()> {
    let mut connection = establish_connection(database_url)?;
    debug!("running pending migrations on {}", database_url);
    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| DatabaseError::MigrationError(err.to_string()))?;
    if applied.is_empty() {
        trace!("no migrations applied");
    } else {
        trace!("migrations applied:");
        for migration in &applied {
            trace!(" - {}", migration);
        }
    }
    Ok(())
}
