use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::index::models::{CallEdge, SymbolKind};
use crate::index::symbols::SymbolObservation;

/// The front end consulted for each translation unit.
///
/// A parse covers the source file plus every header it reaches. Results are
/// tagged with the file they were observed in so the caller can split them.
/// A header's symbols and calls are only extracted when `headers` grants it.
pub trait SourceParser: Send + Sync {
    fn parse(&self, path: &Path, args: &[String], headers: &dyn HeaderGate) -> ParseOutput;
}

/// Decides which of the headers reached by a parse get extracted.
pub trait HeaderGate {
    /// Asked once per header, before any of its symbols are visited.
    fn claim(&self, header: &Path) -> bool;

    /// The claimed header's extraction is finished.
    fn extracted(&self, header: &Path);
}

/// Extracts every header reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractAll;

impl HeaderGate for ExtractAll {
    fn claim(&self, _header: &Path) -> bool {
        true
    }

    fn extracted(&self, _header: &Path) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbol {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub namespace: String,
    pub kind: SymbolKind,
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: String,
    pub base_types: Vec<String>,
    pub is_definition: bool,
    pub is_template_specialization: bool,
    /// Qualified name of the enclosing record, for members.
    pub parent: Option<String>,
}

impl ParsedSymbol {
    pub fn into_observation(self) -> SymbolObservation {
        SymbolObservation {
            id: self.id,
            name: self.name,
            qualified_name: self.qualified_name,
            namespace: self.namespace,
            kind: self.kind,
            start_line: self.start_line,
            end_line: self.end_line,
            signature: self.signature,
            base_types: self.base_types,
            is_definition: self.is_definition,
            is_template_specialization: self.is_template_specialization,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Inclusion {
    pub includer: PathBuf,
    pub included: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub caller: String,
    pub callee: String,
    /// File containing the call expression.
    pub file: PathBuf,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub symbols: Vec<ParsedSymbol>,
    pub includes: Vec<Inclusion>,
    pub call_edges: Vec<CallSite>,
    pub diagnostics: Vec<Diagnostic>,
    /// No usable result; the file is marked failed.
    pub fatal: bool,
}

impl ParseOutput {
    pub fn fatal(file: &Path, message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic {
                file: file.to_path_buf(),
                line: 0,
                message: message.into(),
            }],
            fatal: true,
            ..Self::default()
        }
    }

    /// First diagnostic message, used as the failure reason.
    pub fn failure_reason(&self) -> String {
        self.diagnostics
            .first()
            .map(|d| d.message.clone())
            .unwrap_or_else(|| "fatal parse error".to_string())
    }

    /// Splits the output by the file each piece was observed in. Every file
    /// reached by the parse gets an entry, even without symbols.
    pub fn into_contributions(self) -> BTreeMap<PathBuf, FileContribution> {
        let mut by_file: BTreeMap<PathBuf, FileContribution> = BTreeMap::new();

        for inclusion in self.includes {
            by_file
                .entry(inclusion.included.clone())
                .or_default();
            by_file
                .entry(inclusion.includer)
                .or_default()
                .includes
                .insert(inclusion.included);
        }
        for symbol in self.symbols {
            by_file
                .entry(symbol.file.clone())
                .or_default()
                .symbols
                .push(symbol.into_observation());
        }
        for call in self.call_edges {
            by_file
                .entry(call.file)
                .or_default()
                .call_edges
                .push(CallEdge::new(call.caller, call.callee));
        }

        by_file
    }
}

/// What one file contributes to the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContribution {
    pub symbols: Vec<SymbolObservation>,
    pub call_edges: Vec<CallEdge>,
    /// Files this one includes directly.
    pub includes: BTreeSet<PathBuf>,
}
