//! End-to-end tests with the tree-sitter C++ front end.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use cpp_indexer::{IndexContext, RefreshMode, SymbolKind};

const UTIL_H: &str = r#"#pragma once

namespace util {

int add(int a, int b);

class Counter {
public:
    void bump();
    int value() const;

private:
    int n = 0;
};

}  // namespace util
"#;

const UTIL_CPP: &str = r#"#include "util.h"

namespace util {

int add(int a, int b) { return a + b; }

void Counter::bump() { n = add(n, 1); }

int Counter::value() const { return n; }

}  // namespace util
"#;

const MAIN_CPP: &str = r#"#include "util.h"

int main() {
    util::Counter c;
    c.bump();
    return util::add(c.value(), 2);
}
"#;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).expect("Failed to write file");
}

fn project() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(dir.path(), "util.h", UTIL_H);
    write(dir.path(), "util.cpp", UTIL_CPP);
    write(dir.path(), "main.cpp", MAIN_CPP);
    dir
}

fn short_names(symbols: &[cpp_indexer::SymbolRecord]) -> BTreeSet<String> {
    symbols.iter().map(|s| s.name.clone()).collect()
}

#[test]
fn test_indexes_symbols_across_header_and_sources() {
    let dir = project();
    let context = IndexContext::initialize(dir.path(), None).expect("open");

    let report = context.refresh(RefreshMode::Incremental).expect("refresh");

    assert_eq!(report.sources_parsed, 2);
    assert_eq!(report.headers_extracted, 1);
    assert!(report.failed_files.is_empty());

    let add = context.symbols_by_name("util::add");
    assert_eq!(add.len(), 1);
    assert_eq!(add[0].kind, SymbolKind::Function);
    assert!(add[0].is_definition);
    assert_eq!(add[0].defining_file.file_name().unwrap(), "util.cpp");
    assert_eq!(add[0].defined_in_files.len(), 2);

    let counter = context.symbols_by_name("Counter");
    assert_eq!(counter.len(), 1);
    assert_eq!(counter[0].kind, SymbolKind::Class);
    assert_eq!(counter[0].qualified_name, "util::Counter");

    let bump = context.symbols_by_name("util::Counter::bump");
    assert_eq!(bump.len(), 1);
    assert_eq!(bump[0].kind, SymbolKind::Method);
}

#[test]
fn test_call_graph_from_real_sources() {
    let dir = project();
    let context = IndexContext::initialize(dir.path(), None).expect("open");
    context.refresh(RefreshMode::Incremental).expect("refresh");

    let add = context.symbols_by_name("util::add").remove(0);
    let callers = short_names(&context.callers(&add.id));
    assert!(callers.contains("main"));
    assert!(callers.contains("bump"));

    let main = context.symbols_by_name("main").remove(0);
    let callees = short_names(&context.callees(&main.id));
    assert!(callees.contains("add"));
    assert!(callees.contains("bump"));
    assert!(callees.contains("value"));

    let bump = context.symbols_by_name("util::Counter::bump").remove(0);
    assert_eq!(context.paths(&main.id, &add.id, 3).len(), 2);
    assert_eq!(context.paths(&main.id, &bump.id, 1).len(), 1);
}

#[test]
fn test_header_edit_with_real_parser() {
    let dir = project();
    let context = IndexContext::initialize(dir.path(), None).expect("open");
    context.refresh(RefreshMode::Incremental).expect("refresh");

    write(
        dir.path(),
        "util.h",
        &UTIL_H.replace("int add(int a, int b);", "int add(int a, int b);\nint sub(int a, int b);"),
    );
    let report = context.refresh(RefreshMode::Incremental).expect("refresh");

    assert_eq!(report.sources_parsed, 2);
    assert_eq!(report.headers_extracted, 1);
    let sub = context.symbols_by_name("sub");
    assert_eq!(sub.len(), 1);
    assert!(!sub[0].is_definition);
    assert_eq!(sub[0].defining_file.file_name().unwrap(), "util.h");
}
