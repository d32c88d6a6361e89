use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Fingerprint of one tracked file (source or header).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    /// xxh3-128 of the full file bytes, 32 hex chars.
    pub content_hash: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch, 0 when the platform reports none.
    pub last_observed_mtime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Struct,
    Function,
    Method,
    Constructor,
    Destructor,
    /// Explicit or partial specialization of a class template.
    TemplateSpecialization,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Destructor => "destructor",
            SymbolKind::TemplateSpecialization => "template_specialization",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "class" => Some(SymbolKind::Class),
            "struct" => Some(SymbolKind::Struct),
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "constructor" => Some(SymbolKind::Constructor),
            "destructor" => Some(SymbolKind::Destructor),
            "template_specialization" => Some(SymbolKind::TemplateSpecialization),
            _ => None,
        }
    }

    /// Kinds that can appear as a caller or callee in the call graph.
    pub fn is_callable(&self) -> bool {
        match self {
            SymbolKind::Function
            | SymbolKind::Method
            | SymbolKind::Constructor
            | SymbolKind::Destructor => true,
            SymbolKind::Class | SymbolKind::Struct | SymbolKind::TemplateSpecialization => false,
        }
    }

    pub fn is_type(&self) -> bool {
        !self.is_callable()
    }
}

/// One symbol in the store. Identity is `id`, never `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub namespace: String,
    pub kind: SymbolKind,
    /// File whose observation currently wins (definition over declaration).
    pub defining_file: PathBuf,
    pub decl_file: Option<PathBuf>,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: String,
    pub base_types: Vec<String>,
    pub is_template_specialization: bool,
    pub is_definition: bool,
    /// Every file that currently contributes this symbol. Never empty.
    pub defined_in_files: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
}

impl CallEdge {
    pub fn new(caller: impl Into<String>, callee: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
        }
    }
}

/// External inputs that shape the whole index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    pub compile_database_hash: String,
    pub analyzer_config_hash: String,
    pub schema_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    #[default]
    Incremental,
    /// Discard every cached table and re-parse the whole project.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: PathBuf, error: &IndexerError) -> Self {
        Self {
            path,
            reason: error.to_string(),
        }
    }
}

/// Result of one completed refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Translation units parsed plus headers extracted in this refresh.
    pub files_analyzed: usize,
    /// Tracked sources and headers that disappeared from the tree.
    pub files_removed: usize,
    pub elapsed: Duration,
    pub sources_parsed: usize,
    pub headers_extracted: usize,
    pub symbols_added: usize,
    pub symbols_updated: usize,
    pub symbols_removed: usize,
    /// Sources whose parse was fatal. They keep their previous contributions.
    pub failed_files: Vec<FileFailure>,
    /// Files that could not be read this time and were skipped.
    pub transient_errors: Vec<FileFailure>,
    /// Whether the refresh started from an empty index.
    pub reset: bool,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.files_analyzed == 0
            && self.files_removed == 0
            && self.failed_files.is_empty()
            && self.transient_errors.is_empty()
            && !self.reset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Complete,
    Interrupted,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Complete => "complete",
            ProgressStatus::Interrupted => "interrupted",
        }
    }
}

/// Durable progress record, stored alongside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub total_files: usize,
    pub indexed_files: usize,
    pub failed_files: usize,
    pub status: ProgressStatus,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: usize,
    pub symbols: usize,
    pub headers_tracked: usize,
    pub call_edges: usize,
    pub dependency_edges: usize,
    pub failed_files: usize,
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
