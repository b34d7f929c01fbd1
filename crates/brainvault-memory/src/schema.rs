//! SQLite schema for the brain database.
//!
//! One table per category, plus archive tables for the two categories that
//! consolidation may archive, the keyword index and the relation graph.
//! Range invariants are enforced twice: by the typed constructors before a
//! write, and by `CHECK` constraints as the last line.

use brainvault_types::Category;
use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Scoring and bookkeeping columns shared by every record table.
const META_COLUMNS: &str = "
    importance INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 10),
    confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0 CHECK (access_count >= 0)";

/// Table holding the active records of `category`.
pub fn table_name(category: Category) -> &'static str {
    match category {
        Category::Conversation => "conversations",
        Category::Fact => "facts",
        Category::Preference => "preferences",
        Category::Pattern => "patterns",
        Category::Skill => "skills",
        Category::Mistake => "mistakes",
        Category::Topic => "topics",
        Category::ContextWindow => "context_windows",
        Category::CachedContent => "cached_content",
        Category::ScanResult => "scan_results",
        Category::ExternalData => "external_data",
    }
}

/// Archive table for `category`, if it can be archived.
pub fn archive_table_name(category: Category) -> Option<&'static str> {
    match category {
        Category::Conversation => Some("conversations_archive"),
        Category::Pattern => Some("patterns_archive"),
        _ => None,
    }
}

/// Open-time pragmas and table creation.  Safe to call on every open.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    let fresh: bool = conn.query_row(
        "SELECT COUNT(*) = 0 FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    if fresh {
        // auto_vacuum only takes effect when set before the first table exists.
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
    }
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    let mut ddl = String::new();

    ddl.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            input TEXT NOT NULL,
            response TEXT NOT NULL,
            success INTEGER NOT NULL CHECK (success IN (0, 1)),{META_COLUMNS}
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_age ON conversations(importance, created_at);
        CREATE TABLE IF NOT EXISTS conversations_archive (
            id INTEGER PRIMARY KEY,
            input TEXT NOT NULL,
            response TEXT NOT NULL,
            success INTEGER NOT NULL,{META_COLUMNS},
            archived_at TEXT NOT NULL
        );"
    ));

    for category in Category::ALL.into_iter().filter(Category::is_knowledge) {
        let table = table_name(category);
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL CHECK (length(key) > 0),
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                strengthened_at_count INTEGER NOT NULL DEFAULT 0,{META_COLUMNS}
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_key ON {table}(key);"
        ));
    }

    ddl.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS patterns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_type TEXT NOT NULL CHECK (length(pattern_type) > 0),
            pattern_key TEXT NOT NULL,
            pattern_data TEXT NOT NULL,
            frequency INTEGER NOT NULL DEFAULT 0 CHECK (frequency >= 0),
            success_count INTEGER NOT NULL DEFAULT 0 CHECK (success_count >= 0),
            total_count INTEGER NOT NULL DEFAULT 0 CHECK (total_count >= success_count),{META_COLUMNS}
        );
        CREATE INDEX IF NOT EXISTS idx_patterns_identity ON patterns(pattern_type, pattern_key);
        CREATE TABLE IF NOT EXISTS patterns_archive (
            id INTEGER PRIMARY KEY,
            pattern_type TEXT NOT NULL,
            pattern_key TEXT NOT NULL,
            pattern_data TEXT NOT NULL,
            frequency INTEGER NOT NULL,
            success_count INTEGER NOT NULL,
            total_count INTEGER NOT NULL,{META_COLUMNS},
            archived_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS skills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            skill_name TEXT NOT NULL UNIQUE CHECK (length(skill_name) > 0),
            proficiency REAL NOT NULL CHECK (proficiency >= 0.0 AND proficiency <= 1.0),
            usage_count INTEGER NOT NULL DEFAULT 0 CHECK (usage_count >= 0),{META_COLUMNS}
        );

        CREATE TABLE IF NOT EXISTS mistakes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mistake_type TEXT NOT NULL CHECK (length(mistake_type) > 0),
            context TEXT NOT NULL CHECK (length(context) > 0),
            solution TEXT,
            learned INTEGER NOT NULL DEFAULT 0 CHECK (learned IN (0, 1)),
            learned_at TEXT,{META_COLUMNS},
            CHECK (learned = 0 OR solution IS NOT NULL)
        );

        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_name TEXT NOT NULL UNIQUE CHECK (length(topic_name) > 0),
            frequency REAL NOT NULL DEFAULT 0 CHECK (frequency >= 0.0),
            decayed_at TEXT NOT NULL,{META_COLUMNS}
        );

        CREATE TABLE IF NOT EXISTS keyword_index (
            term TEXT NOT NULL,
            category TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            PRIMARY KEY (term, category, record_id)
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS idx_keyword_record ON keyword_index(category, record_id);

        CREATE TABLE IF NOT EXISTS relations (
            from_category TEXT NOT NULL,
            from_id INTEGER NOT NULL,
            to_category TEXT NOT NULL,
            to_id INTEGER NOT NULL,
            label TEXT NOT NULL CHECK (length(label) > 0),
            created_at TEXT NOT NULL,
            PRIMARY KEY (from_category, from_id, to_category, to_id, label)
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_category, to_id);"
    ));

    ddl.push_str(&format!(
        "INSERT OR IGNORE INTO schema_version (version) VALUES ({SCHEMA_VERSION});"
    ));

    conn.execute_batch(&ddl)
}

/// Version recorded in an initialised database.
pub fn schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn every_category_has_a_table() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        for category in Category::ALL {
            let n: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", table_name(category)),
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(n, 0, "{category}");
        }
    }

    #[test]
    fn only_conversations_and_patterns_archive() {
        let archivable: Vec<_> = Category::ALL
            .into_iter()
            .filter(|c| archive_table_name(*c).is_some())
            .collect();
        assert_eq!(archivable, vec![Category::Conversation, Category::Pattern]);
    }

    #[test]
    fn check_constraints_reject_out_of_range_scores() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO facts (key, value, updated_at, importance, confidence, created_at, last_accessed_at)
             VALUES ('k', '1', 't', 11, 0.5, 't', 't')",
            [],
        );
        assert!(err.is_err());
        let err = conn.execute(
            "INSERT INTO facts (key, value, updated_at, importance, confidence, created_at, last_accessed_at)
             VALUES ('k', '1', 't', 5, 1.5, 't', 't')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn learned_mistake_requires_solution() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO mistakes (mistake_type, context, learned, importance, confidence, created_at, last_accessed_at)
             VALUES ('t', 'c', 1, 8, 1.0, 't', 't')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn fresh_database_uses_incremental_auto_vacuum() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("brain.db")).unwrap();
        initialize_schema(&conn).unwrap();
        let mode: i64 = conn
            .query_row("PRAGMA auto_vacuum", [], |row| row.get(0))
            .unwrap();
        // 2 = INCREMENTAL
        assert_eq!(mode, 2);
    }
}
