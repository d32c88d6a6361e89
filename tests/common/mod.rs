//! Shared fixtures for the integration tests.
//!
//! `ScriptedParser` understands a tiny line format instead of C++, so tests
//! can describe symbols, includes and calls precisely:
//!
//! ```text
//! #include "common.h"      follow an include, relative to the includer
//! def ns::helper           function definition, id c:@F@ns::helper
//! decl ns::helper          function declaration
//! class ns::Widget         class definition, id c:@S@ns::Widget
//! call main ns::helper     call edge between the two function ids
//! FATAL                    the whole translation unit fails
//! ```
//!
//! Every reached file is scanned for includes, but symbols and calls are only
//! extracted from the source and from headers the gate grants.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cpp_indexer::config::absolutize;
use cpp_indexer::indexer::{
    CallSite, Diagnostic, HeaderGate, Inclusion, ParseOutput, ParsedSymbol,
};
use cpp_indexer::{IndexContext, IndexOptions, SourceParser, SymbolKind};

pub fn function_id(qualified: &str) -> String {
    format!("c:@F@{}", qualified)
}

pub fn class_id(qualified: &str) -> String {
    format!("c:@S@{}", qualified)
}

#[derive(Default)]
pub struct ScriptedParser {
    /// Number of times each file's symbols were extracted.
    extractions: Mutex<HashMap<PathBuf, usize>>,
    /// Translation units handed to `parse`, in call order.
    units: Mutex<Vec<PathBuf>>,
    cancel_after_first: Mutex<Option<CancellationToken>>,
}

impl ScriptedParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancels `token` as soon as the first translation unit is parsed.
    pub fn cancel_on_first_parse(&self, token: CancellationToken) {
        *self.cancel_after_first.lock() = Some(token);
    }

    pub fn units(&self) -> Vec<PathBuf> {
        let mut units = self.units.lock().clone();
        units.sort();
        units
    }

    pub fn unit_count(&self) -> usize {
        self.units.lock().len()
    }

    pub fn extractions_of(&self, path: &Path) -> usize {
        self.extractions
            .lock()
            .get(&absolutize(path))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        self.extractions.lock().clear();
        self.units.lock().clear();
    }

    fn read_file(
        &self,
        path: &Path,
        output: &mut ParseOutput,
        visited: &mut BTreeSet<PathBuf>,
        headers: &dyn HeaderGate,
        extract: bool,
    ) -> bool {
        if extract {
            *self
                .extractions
                .lock()
                .entry(path.to_path_buf())
                .or_insert(0) += 1;
        }

        let Ok(text) = fs::read_to_string(path) else {
            return false;
        };

        for (index, line) in text.lines().enumerate() {
            let line_no = index as u32 + 1;
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["FATAL"] => return false,
                ["#include", target] => {
                    let target = target.trim_matches('"');
                    let dir = path.parent().unwrap_or(Path::new("/"));
                    let included = absolutize(&dir.join(target));
                    if !included.is_file() {
                        output.diagnostics.push(Diagnostic {
                            file: path.to_path_buf(),
                            line: line_no,
                            message: format!("cannot open {}", included.display()),
                        });
                        continue;
                    }
                    output.includes.push(Inclusion {
                        includer: path.to_path_buf(),
                        included: included.clone(),
                    });
                    if visited.insert(included.clone()) {
                        let claimed = headers.claim(&included);
                        self.read_file(&included, output, visited, headers, claimed);
                        if claimed {
                            headers.extracted(&included);
                        }
                    }
                }
                _ if !extract => {}
                ["def", name] | ["decl", name] => {
                    output.symbols.push(symbol(
                        path,
                        name,
                        SymbolKind::Function,
                        line_no,
                        words[0] == "def",
                    ));
                }
                ["class", name] => {
                    output
                        .symbols
                        .push(symbol(path, name, SymbolKind::Class, line_no, true));
                }
                ["call", caller, callee] => output.call_edges.push(CallSite {
                    caller: function_id(caller),
                    callee: function_id(callee),
                    file: path.to_path_buf(),
                    line: line_no,
                }),
                _ => {}
            }
        }
        true
    }
}

fn symbol(file: &Path, qualified: &str, kind: SymbolKind, line: u32, definition: bool) -> ParsedSymbol {
    let (namespace, name) = match qualified.rsplit_once("::") {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (String::new(), qualified.to_string()),
    };
    let id = if kind == SymbolKind::Class {
        class_id(qualified)
    } else {
        function_id(qualified)
    };
    ParsedSymbol {
        id,
        name,
        qualified_name: qualified.to_string(),
        namespace,
        kind,
        file: file.to_path_buf(),
        start_line: line,
        end_line: line,
        signature: qualified.to_string(),
        base_types: Vec::new(),
        is_definition: definition,
        is_template_specialization: false,
        parent: None,
    }
}

impl SourceParser for ScriptedParser {
    fn parse(&self, path: &Path, _args: &[String], headers: &dyn HeaderGate) -> ParseOutput {
        self.units.lock().push(path.to_path_buf());

        let mut output = ParseOutput::default();
        let mut visited = BTreeSet::from([path.to_path_buf()]);
        if !self.read_file(path, &mut output, &mut visited, headers, true) {
            return ParseOutput::fatal(path, "scripted failure");
        }

        if let Some(token) = self.cancel_after_first.lock().take() {
            token.cancel();
        }
        output
    }
}

/// A temporary project tree plus the parser driving it.
pub struct Project {
    pub dir: TempDir,
    pub parser: Arc<ScriptedParser>,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            parser: ScriptedParser::new(),
        }
    }

    pub fn root(&self) -> PathBuf {
        absolutize(self.dir.path())
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, content).expect("Failed to write file");
        absolutize(&path)
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.dir.path().join(name)).expect("Failed to remove file");
    }

    pub fn open(&self) -> IndexContext {
        self.open_with(IndexOptions::default())
    }

    pub fn open_with(&self, options: IndexOptions) -> IndexContext {
        let parser: Arc<dyn SourceParser> = self.parser.clone();
        IndexContext::open_with_parser(self.dir.path(), options, parser)
            .expect("Failed to open index")
    }

    /// `main.cpp` and `helper.cpp` both include `common.h`.
    pub fn with_shared_header() -> Self {
        let project = Self::new();
        project.write("common.h", "decl util::log\nclass util::Logger\n");
        project.write(
            "main.cpp",
            "#include \"common.h\"\ndef main\ncall main util::log\ncall main helper\n",
        );
        project.write(
            "helper.cpp",
            "#include \"common.h\"\ndef helper\ndef util::log\ncall helper util::log\n",
        );
        project
    }
}
