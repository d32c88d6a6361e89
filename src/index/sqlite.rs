use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::{IndexerError, Result};
use crate::index::migrations::{self, SchemaState};
use crate::index::{
    CallEdge, CallGraphIndex, ConfigFingerprint, DependencyGraph, FileRecord, IndexTables,
    ProgressRecord, SymbolKind, SymbolObservation, SymbolStore,
};
use crate::indexer::header_claims::HeaderClaimTracker;

const FINGERPRINT_KEY: &str = "config_fingerprint";
const PROGRESS_KEY: &str = "progress";

/// Durable snapshot of [`IndexTables`] in one SQLite file.
///
/// The whole snapshot is rewritten in a single transaction, so a crash or a
/// failed write leaves the previous snapshot intact.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    recovered: Option<String>,
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn corruption(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::CacheCorruption(e.to_string())
}

impl SnapshotStore {
    /// Opens (or creates) the snapshot at `db_path`. An unreadable database is
    /// deleted and recreated; [`recovered`](Self::recovered) then says why.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::open_checked(db_path) {
            Ok((conn, state)) => Ok(Self {
                conn: Mutex::new(conn),
                path: Some(db_path.to_path_buf()),
                recovered: match state {
                    SchemaState::Recreated { found } => {
                        Some(format!("schema version {} replaced", found))
                    }
                    _ => None,
                },
            }),
            Err(e) => {
                tracing::warn!(
                    "Snapshot {} is unreadable ({}), rebuilding from scratch",
                    db_path.display(),
                    e
                );
                Self::remove_database_files(db_path)?;
                let (conn, _) = Self::open_checked(db_path)?;
                Ok(Self {
                    conn: Mutex::new(conn),
                    path: Some(db_path.to_path_buf()),
                    recovered: Some(e.to_string()),
                })
            }
        }
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_pragmas(&conn)?;
        migrations::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            recovered: None,
        })
    }

    fn open_checked(db_path: &Path) -> Result<(Connection, SchemaState)> {
        let conn = Connection::open(db_path)?;
        Self::configure_pragmas(&conn)?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(corruption(format!("quick_check: {}", check)));
        }

        let state = migrations::ensure_schema(&conn)?;
        Ok((conn, state))
    }

    /// Configure SQLite PRAGMA settings.
    /// - WAL mode: readers are not blocked by the snapshot write
    /// - NORMAL synchronous: durable at transaction boundaries in WAL mode
    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        Ok(())
    }

    fn remove_database_files(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut name = db_path.as_os_str().to_owned();
            name.push(suffix);
            match std::fs::remove_file(&name) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Why the snapshot was discarded on open, if it was.
    pub fn recovered(&self) -> Option<&str> {
        self.recovered.as_deref()
    }

    /// Reads the snapshot back. `None` when nothing was ever saved.
    /// Rows that cannot be decoded are reported as [`IndexerError::CacheCorruption`].
    pub fn load(&self) -> Result<Option<IndexTables>> {
        let conn = self.conn.lock();

        let fingerprint: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [FINGERPRINT_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(corruption)?;
        let Some(fingerprint) = fingerprint else {
            return Ok(None);
        };
        let fingerprint: ConfigFingerprint =
            serde_json::from_str(&fingerprint).map_err(corruption)?;

        Self::load_tables(&conn, fingerprint)
            .map(Some)
            .map_err(|e| match e {
                IndexerError::CacheCorruption(_) => e,
                other => corruption(other),
            })
    }

    fn load_tables(conn: &Connection, fingerprint: ConfigFingerprint) -> Result<IndexTables> {
        let mut tables = IndexTables::new();
        tables.fingerprint = Some(fingerprint);

        let mut stmt =
            conn.prepare("SELECT path, content_hash, size, mtime, is_source FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                FileRecord {
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    content_hash: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    last_observed_mtime: row.get(3)?,
                },
                row.get::<_, bool>(4)?,
            ))
        })?;
        for row in rows {
            let (record, is_source) = row?;
            if is_source {
                tables.sources.insert(record.path.clone());
            }
            tables.files.insert(record.path.clone(), record);
        }

        tables.symbols = Self::load_symbols(conn)?;
        tables.calls = Self::load_call_edges(conn)?;

        let mut stmt = conn.prepare("SELECT includer, included FROM dependencies")?;
        let edges = stmt
            .query_map([], |row| {
                Ok((
                    PathBuf::from(row.get::<_, String>(0)?),
                    PathBuf::from(row.get::<_, String>(1)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tables.deps = DependencyGraph::from_edges(edges);

        let mut stmt = conn.prepare("SELECT header, content_hash FROM header_claims")?;
        let claims = stmt
            .query_map([], |row| {
                Ok((PathBuf::from(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let tracker = HeaderClaimTracker::new();
        tracker.restore(claims);
        tables.claims = tracker;

        tables.compile_args = Self::load_path_map(conn, "SELECT file_path, args_hash FROM compile_args")?;
        tables.failed = Self::load_path_map(conn, "SELECT file_path, reason FROM failed_files")?;

        Ok(tables)
    }

    fn load_path_map(conn: &Connection, sql: &str) -> Result<BTreeMap<PathBuf, String>> {
        let mut stmt = conn.prepare(sql)?;
        let map = stmt
            .query_map([], |row| {
                Ok((PathBuf::from(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(map)
    }

    fn load_symbols(conn: &Connection) -> Result<SymbolStore> {
        struct Header {
            name: String,
            qualified_name: String,
            namespace: String,
            kind: String,
            defining_file: String,
            is_template_specialization: bool,
        }

        let mut stmt = conn.prepare(
            "SELECT id, name, qualified_name, namespace, kind, defining_file, is_template_specialization
             FROM symbols",
        )?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Header {
                        name: row.get(1)?,
                        qualified_name: row.get(2)?,
                        namespace: row.get(3)?,
                        kind: row.get(4)?,
                        defining_file: row.get(5)?,
                        is_template_specialization: row.get(6)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        let mut stmt = conn.prepare(
            "SELECT symbol_id, file_path, start_line, end_line, signature, base_types, is_definition
             FROM symbol_files",
        )?;
        let sites = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut observations = Vec::with_capacity(sites.len());
        for (id, file, start_line, end_line, signature, base_types, is_definition) in sites {
            let header = headers
                .get(&id)
                .ok_or_else(|| corruption(format!("site for unknown symbol {}", id)))?;
            let kind = SymbolKind::from_str(&header.kind)
                .ok_or_else(|| corruption(format!("unknown symbol kind {}", header.kind)))?;
            observations.push((
                PathBuf::from(file),
                SymbolObservation {
                    id,
                    name: header.name.clone(),
                    qualified_name: header.qualified_name.clone(),
                    namespace: header.namespace.clone(),
                    kind,
                    start_line,
                    end_line,
                    signature,
                    base_types: serde_json::from_str(&base_types)?,
                    is_definition,
                    is_template_specialization: header.is_template_specialization,
                },
            ));
        }

        let winners = headers
            .into_iter()
            .map(|(id, header)| (id, PathBuf::from(header.defining_file)));
        Ok(SymbolStore::restore(observations, winners))
    }

    fn load_call_edges(conn: &Connection) -> Result<CallGraphIndex> {
        let mut stmt = conn.prepare("SELECT file_path, caller, callee FROM call_edges")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    PathBuf::from(row.get::<_, String>(0)?),
                    CallEdge::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut grouped: BTreeMap<PathBuf, Vec<CallEdge>> = BTreeMap::new();
        for (file, edge) in rows {
            grouped.entry(file).or_default().push(edge);
        }

        let mut calls = CallGraphIndex::new();
        for (file, edges) in grouped {
            calls.record_edges(&file, edges);
        }
        Ok(calls)
    }

    /// Replaces the whole snapshot with `tables` in one transaction.
    /// Any failure is a [`IndexerError::Persistence`] and leaves the old snapshot.
    pub fn save(&self, tables: &IndexTables) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| IndexerError::Persistence(e.to_string()))?;
        Self::write_tables(&tx, tables)
            .and_then(|_| tx.commit().map_err(IndexerError::from))
            .map_err(|e| IndexerError::Persistence(e.to_string()))
    }

    fn write_tables(tx: &Transaction, tables: &IndexTables) -> Result<()> {
        tx.execute_batch(
            r#"
            DELETE FROM files;
            DELETE FROM symbols;
            DELETE FROM symbol_files;
            DELETE FROM call_edges;
            DELETE FROM dependencies;
            DELETE FROM header_claims;
            DELETE FROM compile_args;
            DELETE FROM failed_files;
            "#,
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO files (path, content_hash, size, mtime, is_source)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (path, record) in &tables.files {
                stmt.execute(params![
                    path_str(path),
                    record.content_hash,
                    record.size as i64,
                    record.last_observed_mtime,
                    tables.sources.contains(path),
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO symbols (id, name, qualified_name, namespace, kind, defining_file,
                    decl_file, start_line, end_line, signature, base_types,
                    is_template_specialization, is_definition)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for record in tables.symbols.records() {
                stmt.execute(params![
                    record.id,
                    record.name,
                    record.qualified_name,
                    record.namespace,
                    record.kind.as_str(),
                    path_str(&record.defining_file),
                    record.decl_file.as_deref().map(path_str),
                    record.start_line,
                    record.end_line,
                    record.signature,
                    serde_json::to_string(&record.base_types)?,
                    record.is_template_specialization,
                    record.is_definition,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO symbol_files (symbol_id, file_path, start_line, end_line, signature,
                    base_types, is_definition)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (file, site) in tables.symbols.observations() {
                stmt.execute(params![
                    site.id,
                    path_str(&file),
                    site.start_line,
                    site.end_line,
                    site.signature,
                    serde_json::to_string(&site.base_types)?,
                    site.is_definition,
                ])?;
            }
        }

        {
            let mut stmt =
                tx.prepare("INSERT INTO call_edges (file_path, caller, callee) VALUES (?1, ?2, ?3)")?;
            for (file, edge) in tables.calls.file_edges() {
                stmt.execute(params![path_str(&file), edge.caller, edge.callee])?;
            }
        }

        {
            let mut stmt =
                tx.prepare("INSERT INTO dependencies (includer, included) VALUES (?1, ?2)")?;
            for (includer, included) in tables.deps.edges() {
                stmt.execute(params![path_str(&includer), path_str(&included)])?;
            }
        }

        {
            let mut stmt =
                tx.prepare("INSERT INTO header_claims (header, content_hash) VALUES (?1, ?2)")?;
            for (header, hash) in tables.claims.done_claims() {
                stmt.execute(params![path_str(&header), hash])?;
            }
        }

        {
            let mut stmt =
                tx.prepare("INSERT INTO compile_args (file_path, args_hash) VALUES (?1, ?2)")?;
            for (file, hash) in &tables.compile_args {
                stmt.execute(params![path_str(file), hash])?;
            }
        }

        {
            let mut stmt =
                tx.prepare("INSERT INTO failed_files (file_path, reason) VALUES (?1, ?2)")?;
            for (file, reason) in &tables.failed {
                stmt.execute(params![path_str(file), reason])?;
            }
        }

        match &tables.fingerprint {
            Some(fingerprint) => {
                tx.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                    params![FINGERPRINT_KEY, serde_json::to_string(fingerprint)?],
                )?;
            }
            None => {
                tx.execute("DELETE FROM meta WHERE key = ?1", [FINGERPRINT_KEY])?;
            }
        }

        Ok(())
    }

    pub fn write_progress(&self, record: &ProgressRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![PROGRESS_KEY, serde_json::to_string(record)?],
        )?;
        Ok(())
    }

    pub fn read_progress(&self) -> Result<Option<ProgressRecord>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [PROGRESS_KEY],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| serde_json::from_str(&v).map_err(IndexerError::from))
            .transpose()
    }

    /// Deletes every snapshot row, progress included.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::drop_tables(&conn)?;
        migrations::ensure_schema(&conn)?;
        Ok(())
    }
}
