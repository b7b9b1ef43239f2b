diesel::table! {
    /// Catalog of cached files.
    cached_files (id) {
        /// Primary key.
        id -> Integer,

        // UNIQUE is declared in up.sql
        /// Remote URL of the cached resource.
        url -> Text,

        /// Absolute path to the materialized file in the artifact directory.
        local_path -> Text,

        /// Entry creation time, local wall clock.
        created_at -> Timestamp,

        /// Last modification time, local wall clock.
        updated_at -> Timestamp,
    }
}
