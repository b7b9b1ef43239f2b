//! Convenient API to interact with catalog database.
//!
//! Basically just fancy wrappers around transactions on [`Connection`].
//! Called inside an open transaction, each function runs in a savepoint.

use diesel::sql_types::Timestamp;
use diesel::{
    Connection as _, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl, SelectableHelper,
};
use tracing::trace;

use crate::database::models::{CachedEntryRow, NewCachedEntry};
use crate::database::schema::cached_files;

use super::{Connection, DatabaseResult};

/// SQL expression of the current local wall clock time, the same as the column defaults.
fn now_local() -> diesel::expression::SqlLiteral<Timestamp> {
    diesel::dsl::sql::<Timestamp>("datetime('now', 'localtime')")
}

/// Insert new entry. Returns inserted row with assigned id and timestamps.
///
/// Fails with unique violation if the URL is already in the catalog.
pub fn insert(
    connection: &mut Connection,
    new_entry: &NewCachedEntry,
) -> DatabaseResult<CachedEntryRow> {
    connection
        .transaction(|conn| {
            trace!("INSERT {:?}", new_entry);
            diesel::insert_into(cached_files::table)
                .values(new_entry)
                .returning(CachedEntryRow::as_returning())
                .get_result(conn)
        })
        .map_err(Into::into)
}

/// Get entry from database by primary key.
pub fn get(connection: &mut Connection, pk: i32) -> DatabaseResult<CachedEntryRow> {
    connection
        .transaction(|conn| {
            trace!("SELECT pk={}", pk);
            cached_files::table
                .find(pk)
                .select(CachedEntryRow::as_select())
                .first(conn)
        })
        .map_err(Into::into)
}

/// Get entry from database by URL field.
pub fn get_by_url(
    connection: &mut Connection,
    url: &str,
) -> DatabaseResult<Option<CachedEntryRow>> {
    connection
        .transaction(|conn| {
            trace!("SELECT url={}", url);
            cached_files::table
                .filter(cached_files::url.eq(url))
                .select(CachedEntryRow::as_select())
                .first(conn)
                .optional()
        })
        .map_err(Into::into)
}

/// Get entry from database by its local path field.
pub fn get_by_local_path(
    connection: &mut Connection,
    local_path: &str,
) -> DatabaseResult<Option<CachedEntryRow>> {
    connection
        .transaction(|conn| {
            trace!("SELECT local_path={}", local_path);
            cached_files::table
                .filter(cached_files::local_path.eq(local_path))
                .select(CachedEntryRow::as_select())
                .first(conn)
                .optional()
        })
        .map_err(Into::into)
}

/// Get all entries from database.
pub fn get_all(connection: &mut Connection) -> DatabaseResult<Vec<CachedEntryRow>> {
    connection
        .transaction(|conn| {
            trace!("SELECT *");
            cached_files::table
                .select(CachedEntryRow::as_select())
                .get_results(conn)
        })
        .map_err(Into::into)
}

/// Set new local path and refresh `updated_at`. Returns updated entry.
pub fn update_local_path(
    connection: &mut Connection,
    pk: i32,
    local_path: &str,
) -> DatabaseResult<CachedEntryRow> {
    connection
        .transaction(|conn| {
            trace!("UPDATE pk={}, local_path = {}", pk, local_path);
            diesel::update(cached_files::table.find(pk))
                .set((
                    cached_files::local_path.eq(local_path),
                    cached_files::updated_at.eq(now_local()),
                ))
                .returning(CachedEntryRow::as_returning())
                .get_result(conn)
        })
        .map_err(Into::into)
}

/// Delete entry by primary key. Returns number of deleted rows.
pub fn delete(connection: &mut Connection, pk: i32) -> DatabaseResult<usize> {
    connection
        .transaction(|conn| {
            trace!("DELETE pk={}", pk);
            diesel::delete(cached_files::table.find(pk)).execute(conn)
        })
        .map_err(Into::into)
}

/// Overwrite `updated_at` of an entry.
#[cfg(test)]
pub fn set_updated_at(
    connection: &mut Connection,
    pk: i32,
    updated_at: chrono::NaiveDateTime,
) -> DatabaseResult<CachedEntryRow> {
    connection
        .transaction(|conn| {
            trace!("UPDATE pk={}, updated_at = {}", pk, updated_at);
            diesel::update(cached_files::table.find(pk))
                .set(cached_files::updated_at.eq(updated_at))
                .returning(CachedEntryRow::as_returning())
                .get_result(conn)
        })
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::fixtures::{
        database, database_with_single_entry, DatabaseFixture, DEFAULT_PATH, DEFAULT_URL,
    };
    use crate::errors::{DatabaseError, DieselError};
    use rstest::rstest;
    use tracing_test::traced_test;

    #[rstest]
    #[traced_test]
    fn test_insert(mut database: DatabaseFixture) {
        let entry = insert(
            &mut database.conn,
            &NewCachedEntry {
                url: DEFAULT_URL,
                local_path: DEFAULT_PATH,
            },
        )
        .expect("add new entry");
        assert_eq!(entry.url, DEFAULT_URL);
        assert_eq!(entry.local_path, DEFAULT_PATH);
        assert_eq!(entry.created_at, entry.updated_at);
    }

    #[rstest]
    #[traced_test]
    fn test_insert_duplicate_url_fails(
        database_with_single_entry: (DatabaseFixture, CachedEntryRow),
    ) {
        let (mut db, _) = database_with_single_entry;
        let result = insert(
            &mut db.conn,
            &NewCachedEntry {
                url: DEFAULT_URL,
                local_path: "/var/cache/minato/other",
            },
        );
        assert!(
            result
                .as_ref()
                .is_err_and(DatabaseError::is_unique_violation),
            "URL must be unique"
        );
    }

    #[rstest]
    #[traced_test]
    fn test_get(database_with_single_entry: (DatabaseFixture, CachedEntryRow)) {
        let (mut db, inserted) = database_with_single_entry;
        let entry = get(&mut db.conn, inserted.id).expect("get entry");
        assert_eq!(entry, inserted);
    }

    #[rstest]
    #[traced_test]
    fn test_get_missing_fails(mut database: DatabaseFixture) {
        let result = get(&mut database.conn, 123);
        assert!(matches!(
            result,
            Err(DatabaseError::DieselError(DieselError::NotFound))
        ));
    }

    #[rstest]
    #[traced_test]
    fn test_get_by_url(database_with_single_entry: (DatabaseFixture, CachedEntryRow)) {
        let (mut db, inserted) = database_with_single_entry;
        let entry = get_by_url(&mut db.conn, DEFAULT_URL)
            .expect("get entry by url")
            .expect("get some entry by url");
        assert_eq!(entry, inserted);
        assert!(get_by_url(&mut db.conn, "https://example.com/other")
            .unwrap()
            .is_none());
    }

    #[rstest]
    #[traced_test]
    fn test_get_by_local_path(database_with_single_entry: (DatabaseFixture, CachedEntryRow)) {
        let (mut db, inserted) = database_with_single_entry;
        let entry = get_by_local_path(&mut db.conn, DEFAULT_PATH)
            .expect("get entry by local path")
            .expect("get some entry by local path");
        assert_eq!(entry, inserted);
    }

    #[rstest]
    #[traced_test]
    fn test_get_all(database_with_single_entry: (DatabaseFixture, CachedEntryRow)) {
        let (mut db, inserted) = database_with_single_entry;
        let all = get_all(&mut db.conn).expect("get all entries");
        assert_eq!(all, vec![inserted]);
    }

    #[rstest]
    #[traced_test]
    fn test_update_local_path_refreshes_updated_at(
        database_with_single_entry: (DatabaseFixture, CachedEntryRow),
    ) {
        let (mut db, inserted) = database_with_single_entry;
        let old = chrono::Local::now().naive_local() - chrono::Duration::days(3);
        set_updated_at(&mut db.conn, inserted.id, old).unwrap();

        let entry = update_local_path(&mut db.conn, inserted.id, "/var/cache/minato/new")
            .expect("update local path");
        assert_eq!(entry.local_path, "/var/cache/minato/new");
        assert_eq!(entry.created_at, inserted.created_at);
        assert!(entry.updated_at > old);
    }

    #[rstest]
    #[traced_test]
    fn test_delete(database_with_single_entry: (DatabaseFixture, CachedEntryRow)) {
        let (mut db, inserted) = database_with_single_entry;
        assert_eq!(delete(&mut db.conn, inserted.id).expect("delete entry"), 1);
        assert_eq!(delete(&mut db.conn, inserted.id).unwrap(), 0);
        assert!(get_all(&mut db.conn).unwrap().is_empty());
    }
}
