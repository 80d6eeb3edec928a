//! SQLite schema creation and migration.
//!
//! Creates the base memory table and the four layer detail tables on first boot.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 2;

/// Per-connection settings. Foreign keys are off by default in SQLite and
/// the detail-table cascades depend on them.
pub fn configure_connection(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Version 1: Create the base table and the layer detail tables.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        -- Base memory record shared by every layer
        CREATE TABLE IF NOT EXISTS user_memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            memory_layer TEXT NOT NULL,
            memory_category TEXT,
            memory_type TEXT,
            title TEXT,
            title_vector BLOB,
            summary TEXT,
            summary_vector BLOB,
            details TEXT,
            details_vector BLOB,
            tags TEXT,
            status TEXT,
            metadata TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL,
            accessed_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_user_memories_user_layer ON user_memories(user_id, memory_layer);

        -- Context: aggregates one or more base records through a JSON id list
        CREATE TABLE IF NOT EXISTS user_memories_contexts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_memory_ids TEXT NOT NULL DEFAULT '[]',
            title TEXT,
            description TEXT,
            description_vector BLOB,
            associated_subjects TEXT,
            associated_objects TEXT,
            current_status TEXT,
            score_impact REAL,
            score_urgency REAL,
            type TEXT,
            tags TEXT,
            metadata TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_contexts_user ON user_memories_contexts(user_id);

        -- Experience: one base record per row
        CREATE TABLE IF NOT EXISTS user_memories_experiences (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_memory_id TEXT NOT NULL REFERENCES user_memories(id) ON DELETE CASCADE,
            situation TEXT,
            situation_vector BLOB,
            action TEXT,
            action_vector BLOB,
            key_learning TEXT,
            key_learning_vector BLOB,
            reasoning TEXT,
            possible_outcome TEXT,
            score_confidence REAL,
            type TEXT,
            tags TEXT,
            metadata TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_experiences_user ON user_memories_experiences(user_id);
        CREATE INDEX IF NOT EXISTS idx_experiences_memory ON user_memories_experiences(user_memory_id);

        -- Identity: one base record per row
        CREATE TABLE IF NOT EXISTS user_memories_identities (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_memory_id TEXT NOT NULL REFERENCES user_memories(id) ON DELETE CASCADE,
            description TEXT,
            description_vector BLOB,
            role TEXT,
            relationship TEXT,
            type TEXT,
            episodic_date TEXT,
            tags TEXT,
            metadata TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_identities_user ON user_memories_identities(user_id);
        CREATE INDEX IF NOT EXISTS idx_identities_memory ON user_memories_identities(user_memory_id);

        -- Preference: one base record per row
        CREATE TABLE IF NOT EXISTS user_memories_preferences (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_memory_id TEXT NOT NULL REFERENCES user_memories(id) ON DELETE CASCADE,
            conclusion_directives TEXT,
            conclusion_directives_vector BLOB,
            suggestions TEXT,
            score_priority REAL,
            type TEXT,
            tags TEXT,
            metadata TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_preferences_user ON user_memories_preferences(user_id);
        CREATE INDEX IF NOT EXISTS idx_preferences_memory ON user_memories_preferences(user_memory_id);

        -- Migration tracking
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT
        );

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (1, datetime('now'), 'Initial layered memory schema');
        ",
    )?;
    Ok(())
}

/// Version 2: Keep context id lists consistent when a base record goes away.
///
/// Context rows reference base records through a JSON array, so no foreign
/// key can cascade. The trigger drops contexts whose only member was the
/// deleted record and prunes the id from every other context.
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TRIGGER IF NOT EXISTS trg_user_memories_prune_contexts
        AFTER DELETE ON user_memories
        BEGIN
            DELETE FROM user_memories_contexts
             WHERE user_id = OLD.user_id
               AND EXISTS (SELECT 1 FROM json_each(user_memories_contexts.user_memory_ids) WHERE value = OLD.id)
               AND NOT EXISTS (SELECT 1 FROM json_each(user_memories_contexts.user_memory_ids) WHERE value != OLD.id);

            UPDATE user_memories_contexts
               SET user_memory_ids = (
                   SELECT json_group_array(value)
                     FROM json_each(user_memories_contexts.user_memory_ids)
                    WHERE value != OLD.id
               )
             WHERE user_id = OLD.user_id
               AND EXISTS (SELECT 1 FROM json_each(user_memories_contexts.user_memory_ids) WHERE value = OLD.id);
        END;

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (2, datetime('now'), 'Prune context memory id lists on base record delete');
        ",
    )?;
    Ok(())
}
