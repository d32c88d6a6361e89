pub mod call_graph;
pub mod dependency_graph;
pub mod migrations;
pub mod models;
pub mod sqlite;
pub mod symbols;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::indexer::header_claims::HeaderClaimTracker;

pub use call_graph::CallGraphIndex;
pub use dependency_graph::{DependencyGraph, FileId};
pub use models::*;
pub use sqlite::SnapshotStore;
pub use symbols::{MergeOutcome, SymbolObservation, SymbolStore};

/// Every mutable table of one project index.
///
/// A refresh works on a clone and swaps it in only after the snapshot is
/// persisted, so readers never see a half-applied refresh.
#[derive(Debug, Clone, Default)]
pub struct IndexTables {
    pub files: BTreeMap<PathBuf, FileRecord>,
    /// Tracked files that are translation units. Every other tracked file is a header.
    pub sources: BTreeSet<PathBuf>,
    pub symbols: SymbolStore,
    pub calls: CallGraphIndex,
    pub deps: DependencyGraph,
    pub claims: HeaderClaimTracker,
    /// Compile-argument hash each source was last parsed with.
    pub compile_args: BTreeMap<PathBuf, String>,
    /// Files whose last parse was fatal, with the reason.
    pub failed: BTreeMap<PathBuf, String>,
    pub fingerprint: Option<ConfigFingerprint>,
}

impl IndexTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_source(&self, path: &Path) -> bool {
        self.sources.contains(path)
    }

    /// Tracked headers, sorted.
    pub fn headers(&self) -> Vec<PathBuf> {
        self.files
            .keys()
            .filter(|path| !self.sources.contains(*path))
            .cloned()
            .collect()
    }

    /// Drops every trace of `path` except its failed-file entry.
    pub fn forget_file(&mut self, path: &Path) -> MergeOutcome {
        let outcome = self.symbols.remove_file(path);
        self.calls.remove_file(path);
        self.deps.remove_file(path);
        self.claims.invalidate(path);
        self.files.remove(path);
        self.sources.remove(path);
        self.compile_args.remove(path);
        outcome
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            files: self.files.len(),
            symbols: self.symbols.len(),
            headers_tracked: self.claims.done_claims().len(),
            call_edges: self.calls.edge_count(),
            dependency_edges: self.deps.edge_count(),
            failed_files: self.failed.len(),
        }
    }
}
