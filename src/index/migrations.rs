//! Schema versioning for the snapshot database.
//!
//! The version lives in the `meta` table under `schema_version`. A snapshot
//! written by another version is never migrated: its tables are dropped and
//! recreated, and the next refresh rebuilds the index from scratch.

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Current schema version. Increment on any table change.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const TABLES: &[&str] = &[
    "files",
    "symbols",
    "symbol_files",
    "call_edges",
    "dependencies",
    "header_claims",
    "compile_args",
    "failed_files",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    /// Empty database, tables just created.
    Created,
    Current,
    /// Stored version differed; tables were recreated.
    Recreated { found: u32 },
}

/// Makes sure the tables exist at [`CURRENT_SCHEMA_VERSION`].
pub fn ensure_schema(conn: &Connection) -> Result<SchemaState> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let state = match read_schema_version(conn)? {
        None => SchemaState::Created,
        Some(v) if v == CURRENT_SCHEMA_VERSION => SchemaState::Current,
        Some(found) => {
            tracing::warn!(
                "Snapshot schema version {} != {}, recreating tables",
                found,
                CURRENT_SCHEMA_VERSION
            );
            drop_tables(conn)?;
            SchemaState::Recreated { found }
        }
    };

    create_tables(conn)?;
    set_schema_version(conn, CURRENT_SCHEMA_VERSION)?;
    Ok(state)
}

pub fn read_schema_version(conn: &Connection) -> Result<Option<u32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    // An unparsable version is treated like a foreign one.
    Ok(value.map(|v| v.parse().unwrap_or(0)))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Drops every snapshot table and all meta entries.
pub fn drop_tables(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
    }
    conn.execute("DELETE FROM meta", [])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            is_source INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS symbols (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            namespace TEXT NOT NULL,
            kind TEXT NOT NULL,
            defining_file TEXT NOT NULL,
            decl_file TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            signature TEXT NOT NULL,
            base_types TEXT NOT NULL,
            is_template_specialization INTEGER NOT NULL,
            is_definition INTEGER NOT NULL
        );

        -- Lookup by (name, file)
        CREATE INDEX IF NOT EXISTS idx_symbols_name_file ON symbols(name, defining_file);

        -- One row per (symbol, contributing file)
        CREATE TABLE IF NOT EXISTS symbol_files (
            symbol_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            signature TEXT NOT NULL,
            base_types TEXT NOT NULL,
            is_definition INTEGER NOT NULL,
            PRIMARY KEY (symbol_id, file_path)
        );
        CREATE INDEX IF NOT EXISTS idx_symbol_files_file ON symbol_files(file_path);

        CREATE TABLE IF NOT EXISTS call_edges (
            file_path TEXT NOT NULL,
            caller TEXT NOT NULL,
            callee TEXT NOT NULL,
            PRIMARY KEY (file_path, caller, callee)
        );
        CREATE INDEX IF NOT EXISTS idx_call_edges_callee ON call_edges(callee);

        CREATE TABLE IF NOT EXISTS dependencies (
            includer TEXT NOT NULL,
            included TEXT NOT NULL,
            PRIMARY KEY (includer, included)
        );
        CREATE INDEX IF NOT EXISTS idx_dependencies_included ON dependencies(included);

        CREATE TABLE IF NOT EXISTS header_claims (
            header TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS compile_args (
            file_path TEXT PRIMARY KEY,
            args_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS failed_files (
            file_path TEXT PRIMARY KEY,
            reason TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_fresh_database_is_created() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(ensure_schema(&conn).unwrap(), SchemaState::Created);
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
        for table in TABLES {
            assert!(table_exists(&conn, table), "missing {}", table);
        }
        assert_eq!(ensure_schema(&conn).unwrap(), SchemaState::Current);
    }

    #[test]
    fn test_foreign_version_recreates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO failed_files (file_path, reason) VALUES ('/a.cpp', 'x')",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE meta SET value = '999' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();

        assert_eq!(
            ensure_schema(&conn).unwrap(),
            SchemaState::Recreated { found: 999 }
        );
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM failed_files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
