use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use diesel::sqlite::Sqlite;
use diesel::{Insertable, Queryable, Selectable};

use crate::database::schema;
use crate::errors::NonUtf8PathError;
use crate::CachedEntry;

/// Raw `cached_files` row. Converted into [`CachedEntry`] at every read site.
#[derive(Queryable, Selectable)]
#[diesel(table_name = schema::cached_files)]
#[diesel(check_for_backend(Sqlite))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedEntryRow {
    pub id: i32,
    pub url: String,
    pub local_path: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Insertable row. Timestamps are filled by column defaults.
#[derive(Insertable)]
#[diesel(table_name = schema::cached_files)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCachedEntry<'a> {
    pub url: &'a str,
    pub local_path: &'a str,
}

impl<'a> NewCachedEntry<'a> {
    pub fn new(url: &'a str, local_path: &'a Path) -> Result<Self, NonUtf8PathError> {
        Ok(Self {
            url,
            local_path: encode_local_path(local_path)?,
        })
    }
}

impl From<CachedEntryRow> for CachedEntry {
    fn from(row: CachedEntryRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            local_path: decode_local_path(row.local_path),
            created_at: decode_timestamp(row.created_at),
            updated_at: decode_timestamp(row.updated_at),
        }
    }
}

pub fn encode_local_path(path: &Path) -> Result<&str, NonUtf8PathError> {
    path.as_os_str().to_str().ok_or(NonUtf8PathError)
}

pub fn decode_local_path(path: String) -> PathBuf {
    PathBuf::from(path)
}

/// Timestamps are stored as local wall clock time without offset.
pub fn decode_timestamp(ts: NaiveDateTime) -> DateTime<Local> {
    // `None` is a wall clock time skipped by a DST transition
    Local
        .from_local_datetime(&ts)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&ts))
}
