use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Seconds in one expiry day.
const SECONDS_PER_DAY: u64 = 86_400;

/// Cached resource: maps a remote URL to the file materialized in the artifact directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CachedEntry {
    /// Catalog identifier, assigned on insertion.
    pub id: i32,

    /// Remote URL. Unique across the catalog.
    pub url: String,

    /// Absolute path to the materialized bytes.
    pub local_path: PathBuf,

    /// Time the entry was added.
    pub created_at: DateTime<Local>,

    /// Time the entry was last modified.
    pub updated_at: DateTime<Local>,
}

impl CachedEntry {
    /// Time elapsed since the last modification, as seen at `now`.
    ///
    /// Entries modified "in the future" (clock skew) have zero age.
    pub fn age(&self, now: DateTime<Local>) -> Duration {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the entry is at least `expire_days` old at `now`.
    pub fn is_expired(&self, now: DateTime<Local>, expire_days: u32) -> bool {
        self.age(now) >= expiry_threshold(expire_days)
    }
}

fn expiry_threshold(expire_days: u32) -> Duration {
    Duration::from_secs(u64::from(expire_days) * SECONDS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rstest::rstest;

    fn entry_updated_at(updated_at: DateTime<Local>) -> CachedEntry {
        CachedEntry {
            id: 1,
            url: "https://example.com/file".to_string(),
            local_path: PathBuf::from("/var/cache/minato/file"),
            created_at: updated_at,
            updated_at,
        }
    }

    #[rstest]
    #[case::fresh(TimeDelta::hours(1), 1, false)]
    #[case::one_second_short(TimeDelta::days(1) - TimeDelta::seconds(1), 1, false)]
    #[case::exactly_threshold(TimeDelta::days(1), 1, true)]
    #[case::past_threshold(TimeDelta::days(31), 30, true)]
    #[case::zero_days_expires_everything(TimeDelta::zero(), 0, true)]
    fn test_is_expired(#[case] age: TimeDelta, #[case] expire_days: u32, #[case] expired: bool) {
        let now = Local::now();
        let entry = entry_updated_at(now - age);
        assert_eq!(entry.is_expired(now, expire_days), expired);
    }

    #[test]
    fn test_age_of_entry_from_the_future_is_zero() {
        let now = Local::now();
        let entry = entry_updated_at(now + TimeDelta::minutes(5));
        assert_eq!(entry.age(now), Duration::ZERO);
        assert!(!entry.is_expired(now, 1));
    }
}
