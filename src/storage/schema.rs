use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i32 = 2;

/// Create all tables, dropping those of a previous recording
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS frames;
        DROP TABLE IF EXISTS samples;
        DROP TABLE IF EXISTS profile_modules;
        DROP TABLE IF EXISTS profiles;
        DROP TABLE IF EXISTS modules;
        DROP TABLE IF EXISTS meta;

        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per burst, in publication order
        CREATE TABLE profiles (
            id INTEGER PRIMARY KEY,
            duration_us INTEGER NOT NULL,
            sampling_period_us INTEGER NOT NULL,
            preserve_sample_ordering INTEGER NOT NULL
        );

        -- Modules are shared between profiles of one recording
        CREATE TABLE modules (
            id INTEGER PRIMARY KEY,
            base_address INTEGER NOT NULL,
            build_id TEXT NOT NULL,
            path TEXT NOT NULL,
            UNIQUE(base_address, build_id, path)
        );

        -- A profile's module list; ordinal is the index frames refer to
        CREATE TABLE profile_modules (
            profile_id INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            module_id INTEGER NOT NULL,
            PRIMARY KEY (profile_id, ordinal),
            FOREIGN KEY (profile_id) REFERENCES profiles(id),
            FOREIGN KEY (module_id) REFERENCES modules(id)
        );

        CREATE TABLE samples (
            id INTEGER PRIMARY KEY,
            profile_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            FOREIGN KEY (profile_id) REFERENCES profiles(id)
        );

        CREATE INDEX idx_samples_profile ON samples(profile_id, seq);

        -- depth 0 is the innermost frame; module_index NULL when unresolved
        CREATE TABLE frames (
            sample_id INTEGER NOT NULL,
            depth INTEGER NOT NULL,
            instruction_pointer INTEGER NOT NULL,
            module_index INTEGER,
            PRIMARY KEY (sample_id, depth),
            FOREIGN KEY (sample_id) REFERENCES samples(id)
        );

        CREATE INDEX idx_frames_leaf ON frames(depth, module_index);
        "#,
    )
}

/// Set a metadata key
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata key
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}
