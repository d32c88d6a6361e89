//! Tree-sitter backed C++ front end.
//!
//! Parses a translation unit (the source plus every header it can resolve),
//! extracts records and functions with stable ids, include edges and call
//! edges resolved against the functions the unit declares. Headers the gate
//! does not grant are only scanned for declarations, so calls into them still
//! resolve, but none of their symbols are reported.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tree_sitter::{Node, Query, QueryCursor, StreamingIterator, Tree};

use crate::config::absolutize;
use crate::index::models::SymbolKind;
use crate::indexer::compile_commands::IncludeDirs;
use crate::indexer::parser::{
    CallSite, Diagnostic, HeaderGate, Inclusion, ParseOutput, ParsedSymbol, SourceParser,
};

static INCLUDE_QUERY: OnceCell<Query> = OnceCell::new();

const ANONYMOUS_NAMESPACE: &str = "(anonymous)";

fn cpp_language() -> tree_sitter::Language {
    tree_sitter_cpp::LANGUAGE.into()
}

fn include_query() -> Option<&'static Query> {
    INCLUDE_QUERY
        .get_or_try_init(|| Query::new(&cpp_language(), "(preproc_include path: (_) @path)"))
        .map_err(|e| tracing::warn!("Invalid include query: {}", e))
        .ok()
}

struct ParsedFile {
    path: PathBuf,
    source: String,
    tree: Tree,
    /// Symbols and calls are reported for this file.
    extract: bool,
}

impl ParsedFile {
    fn node_text(&self, node: &Node) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IncludeSpec {
    Quoted(String),
    Angled(String),
}

#[derive(Debug, Clone)]
struct FunctionInfo {
    id: String,
    qualified: String,
    name: String,
    parent: Option<String>,
    namespace: Vec<String>,
    min_arity: usize,
    max_arity: Option<usize>,
}

impl FunctionInfo {
    fn accepts(&self, arity: usize) -> bool {
        arity >= self.min_arity && self.max_arity.map_or(true, |max| arity <= max)
    }
}

#[derive(Debug, Clone)]
struct CallerContext {
    id: String,
    parent: Option<String>,
    namespace: Vec<String>,
}

#[derive(Debug, Clone)]
struct RawCall {
    caller: CallerContext,
    name: String,
    qualifier: Option<String>,
    member: bool,
    this_call: bool,
    arity: usize,
    file: PathBuf,
    line: u32,
}

/// C++ parser collaborator built on tree-sitter-cpp.
pub struct CppParser {
    project_root: PathBuf,
}

impl CppParser {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    fn parse_tree(source: &str) -> Option<Tree> {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&cpp_language()).ok()?;
        parser.parse(source, None)
    }

    fn read_source(path: &Path) -> std::io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn includes_of(file: &ParsedFile) -> Vec<IncludeSpec> {
        let Some(query) = include_query() else {
            return Vec::new();
        };

        let mut specs = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, file.tree.root_node(), file.source.as_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let text = file.node_text(&capture.node).trim();
                if let Some(inner) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
                    specs.push(IncludeSpec::Angled(inner.to_string()));
                } else if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"'))
                {
                    specs.push(IncludeSpec::Quoted(inner.to_string()));
                }
            }
        }
        specs
    }

    /// Quoted: includer dir, `-iquote`, `-I`, `-isystem`, project root.
    /// Angled: `-I`, `-isystem`.
    fn resolve_include(
        &self,
        includer: &Path,
        spec: &IncludeSpec,
        dirs: &IncludeDirs,
    ) -> Option<PathBuf> {
        let mut search: Vec<&Path> = Vec::new();
        let name = match spec {
            IncludeSpec::Quoted(name) => {
                if let Some(parent) = includer.parent() {
                    search.push(parent);
                }
                search.extend(dirs.quote.iter().map(PathBuf::as_path));
                search.extend(dirs.angled.iter().map(PathBuf::as_path));
                search.extend(dirs.system.iter().map(PathBuf::as_path));
                search.push(&self.project_root);
                name
            }
            IncludeSpec::Angled(name) => {
                search.extend(dirs.angled.iter().map(PathBuf::as_path));
                search.extend(dirs.system.iter().map(PathBuf::as_path));
                name
            }
        };

        search
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .map(|found| absolutize(&found))
    }

    fn syntax_error_line(root: Node) -> Option<u32> {
        if !root.has_error() {
            return None;
        }
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.is_error() || node.is_missing() {
                return Some(node.start_position().row as u32 + 1);
            }
            if node.has_error() {
                let mut cursor = node.walk();
                let children: Vec<_> = node.children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
        Some(root.start_position().row as u32 + 1)
    }
}

impl SourceParser for CppParser {
    fn parse(&self, path: &Path, args: &[String], headers: &dyn HeaderGate) -> ParseOutput {
        let source = match Self::read_source(path) {
            Ok(source) => source,
            Err(e) => return ParseOutput::fatal(path, format!("cannot read {}: {}", path.display(), e)),
        };
        let Some(tree) = Self::parse_tree(&source) else {
            return ParseOutput::fatal(path, "tree-sitter produced no tree");
        };

        let dirs = IncludeDirs::from_args(args);
        let mut output = ParseOutput::default();
        let mut files = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue = VecDeque::new();

        visited.insert(path.to_path_buf());
        queue.push_back(ParsedFile {
            path: path.to_path_buf(),
            source,
            tree,
            extract: true,
        });

        while let Some(file) = queue.pop_front() {
            for spec in Self::includes_of(&file) {
                let Some(included) = self.resolve_include(&file.path, &spec, &dirs) else {
                    tracing::trace!("Unresolved include {:?} in {}", spec, file.path.display());
                    continue;
                };
                output.includes.push(Inclusion {
                    includer: file.path.clone(),
                    included: included.clone(),
                });
                if !visited.insert(included.clone()) {
                    continue;
                }

                let parsed = Self::read_source(&included)
                    .map_err(|e| e.to_string())
                    .and_then(|text| {
                        Self::parse_tree(&text)
                            .map(|tree| (text, tree))
                            .ok_or_else(|| "tree-sitter produced no tree".to_string())
                    });
                match parsed {
                    Ok((text, tree)) => {
                        let extract = headers.claim(&included);
                        queue.push_back(ParsedFile {
                            path: included,
                            source: text,
                            tree,
                            extract,
                        });
                    }
                    Err(message) => output.diagnostics.push(Diagnostic {
                        file: included,
                        line: 0,
                        message,
                    }),
                }
            }

            if let Some(line) = Self::syntax_error_line(file.tree.root_node()) {
                output.diagnostics.push(Diagnostic {
                    file: file.path.clone(),
                    line,
                    message: format!("syntax error near line {}", line),
                });
            }
            files.push(file);
        }

        let mut records = HashSet::new();
        for file in &files {
            collect_records(file, file.tree.root_node(), &mut Vec::new(), &mut records);
        }

        let mut functions = Vec::new();
        let mut calls = Vec::new();
        for file in &files {
            let mut visitor = Visitor {
                file,
                records: &records,
                symbols: &mut output.symbols,
                functions: &mut functions,
                calls: &mut calls,
            };
            visitor.visit_children(file.tree.root_node(), &Scope::default());
            if file.extract && file.path != path {
                headers.extracted(&file.path);
            }
        }

        output.call_edges = resolve_calls(&functions, calls);
        output
    }
}

/// Splits `a::b<c::d>::e` on `::` outside template arguments.
fn split_scope(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ':' if depth == 0 && chars.peek() == Some(&':') => {
                chars.next();
                let part = current.trim().to_string();
                if !part.is_empty() {
                    parts.push(part);
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    let part = current.trim().to_string();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

fn strip_template_args(name: &str) -> &str {
    if name.starts_with("operator") {
        return name;
    }
    name.split('<').next().unwrap_or(name).trim()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-insensitive spelling of a type: `const Foo &` == `const Foo&`.
fn canonical_type(text: &str) -> String {
    const TIGHT: &[char] = &['*', '&', ',', '<', '>', '(', ')', '[', ']', ':'];
    let collapsed = collapse_whitespace(text);
    let chars: Vec<char> = collapsed.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        if *c == ' ' {
            let prev = out.chars().last();
            let next = chars.get(i + 1);
            if prev.map_or(true, |p| TIGHT.contains(&p)) || next.map_or(true, |n| TIGHT.contains(n))
            {
                continue;
            }
        }
        out.push(*c);
    }
    out
}

fn find_function_declarator(node: Node) -> Option<Node> {
    let mut current = node;
    loop {
        match current.kind() {
            "function_declarator" => return Some(current),
            "pointer_declarator" | "reference_declarator" => {
                current = current.child_by_field_name("declarator").or_else(|| {
                    let mut cursor = current.walk();
                    let last = current.named_children(&mut cursor).last();
                    last
                })?;
            }
            _ => return None,
        }
    }
}

fn record_name_segments(file: &ParsedFile, name_node: Node) -> Vec<String> {
    let text = collapse_whitespace(file.node_text(&name_node));
    if name_node.kind() == "template_type" {
        vec![text]
    } else {
        split_scope(&text)
    }
}

fn collect_records(file: &ParsedFile, node: Node, scope: &mut Vec<String>, out: &mut HashSet<String>) {
    match node.kind() {
        "namespace_definition" => {
            let names = match node.child_by_field_name("name") {
                Some(name) => split_scope(file.node_text(&name)),
                None => vec![ANONYMOUS_NAMESPACE.to_string()],
            };
            let depth = names.len();
            scope.extend(names);
            if let Some(body) = node.child_by_field_name("body") {
                collect_records(file, body, scope, out);
            }
            scope.truncate(scope.len() - depth);
        }
        "class_specifier" | "struct_specifier" | "union_specifier" => {
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };
            let segments = record_name_segments(file, name_node);
            let depth = segments.len();
            scope.extend(segments);
            out.insert(scope.join("::"));
            if let Some(last) = scope.last_mut() {
                let plain = strip_template_args(last).to_string();
                *last = plain;
                out.insert(scope.join("::"));
            }
            if let Some(body) = node.child_by_field_name("body") {
                collect_records(file, body, scope, out);
            }
            scope.truncate(scope.len() - depth);
        }
        "compound_statement" => {}
        _ => {
            let mut cursor = node.walk();
            let children: Vec<_> = node.named_children(&mut cursor).collect();
            for child in children {
                collect_records(file, child, scope, out);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    namespace: Vec<String>,
    records: Vec<String>,
}

impl Scope {
    fn prefix(&self) -> Vec<String> {
        self.namespace
            .iter()
            .chain(self.records.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Template {
    /// `template<>`: an explicit specialization.
    explicit: bool,
}

struct Visitor<'a> {
    file: &'a ParsedFile,
    records: &'a HashSet<String>,
    symbols: &'a mut Vec<ParsedSymbol>,
    functions: &'a mut Vec<FunctionInfo>,
    calls: &'a mut Vec<RawCall>,
}

impl Visitor<'_> {
    fn text(&self, node: Node) -> &str {
        self.file.node_text(&node)
    }

    fn line(node: Node) -> (u32, u32) {
        (
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
        )
    }

    fn visit_children(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        let children: Vec<_> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, scope, Template::default());
        }
    }

    fn visit(&mut self, node: Node, scope: &Scope, template: Template) {
        match node.kind() {
            "namespace_definition" => {
                let mut inner = scope.clone();
                match node.child_by_field_name("name") {
                    Some(name) => inner.namespace.extend(split_scope(self.text(name))),
                    None => inner.namespace.push(ANONYMOUS_NAMESPACE.to_string()),
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit_children(body, &inner);
                }
            }
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.record(node, scope, template)
            }
            "function_definition" => {
                if let Some(declarator) = node
                    .child_by_field_name("declarator")
                    .and_then(find_function_declarator)
                {
                    let body = node.child_by_field_name("body");
                    self.function(node, declarator, body, scope, template);
                }
            }
            "declaration" | "field_declaration" => self.declaration(node, scope, template),
            "template_declaration" => {
                let explicit = node
                    .child_by_field_name("parameters")
                    .map(|params| params.named_child_count() == 0)
                    .unwrap_or(false);
                let mut cursor = node.walk();
                let children: Vec<_> = node.named_children(&mut cursor).collect();
                for child in children {
                    if child.kind() != "template_parameter_list" {
                        self.visit(child, scope, Template { explicit });
                    }
                }
            }
            "compound_statement" | "friend_declaration" | "preproc_include" | "comment" => {}
            _ => self.visit_children(node, scope),
        }
    }

    fn declaration(&mut self, node: Node, scope: &Scope, template: Template) {
        if let Some(ty) = node.child_by_field_name("type") {
            if matches!(
                ty.kind(),
                "class_specifier" | "struct_specifier" | "union_specifier"
            ) {
                self.record(ty, scope, template);
            }
        }

        let mut cursor = node.walk();
        let declarators: Vec<_> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            if let Some(function) = find_function_declarator(declarator) {
                self.function(node, function, None, scope, template);
            }
        }
    }

    fn base_types(&self, record: Node) -> Vec<String> {
        let mut cursor = record.walk();
        let clause = record
            .named_children(&mut cursor)
            .find(|child| child.kind() == "base_class_clause");
        let Some(clause) = clause else {
            return Vec::new();
        };

        let mut cursor = clause.walk();
        let bases: Vec<_> = clause
            .named_children(&mut cursor)
            .filter(|child| {
                matches!(
                    child.kind(),
                    "type_identifier" | "qualified_identifier" | "template_type"
                )
            })
            .map(|child| collapse_whitespace(self.text(child)))
            .collect();
        bases
    }

    fn record(&mut self, node: Node, scope: &Scope, template: Template) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let body = node.child_by_field_name("body");
        let is_specialization = name_node.kind() == "template_type";

        let mut segments = record_name_segments(self.file, name_node);
        let Some(name) = segments.pop() else {
            return;
        };
        let mut qualified: Vec<String> = scope.prefix();
        qualified.extend(segments.iter().cloned());
        let parent = (!scope.records.is_empty() || !segments.is_empty())
            .then(|| qualified.join("::"))
            .filter(|p| self.records.contains(p));
        qualified.push(name.clone());
        let qualified_name = qualified.join("::");

        let kind = if is_specialization {
            SymbolKind::TemplateSpecialization
        } else if node.kind() == "class_specifier" {
            SymbolKind::Class
        } else {
            SymbolKind::Struct
        };

        let header_end = body.map(|b| b.start_byte()).unwrap_or_else(|| node.end_byte());
        let signature = self
            .file
            .source
            .get(node.start_byte()..header_end)
            .map(collapse_whitespace)
            .unwrap_or_default();
        let (start_line, end_line) = Self::line(node);

        if self.file.extract {
            self.symbols.push(ParsedSymbol {
                id: format!("c:@S@{}", qualified_name),
                name: strip_template_args(&name).to_string(),
                qualified_name,
                namespace: scope.namespace.join("::"),
                kind,
                file: self.file.path.clone(),
                start_line,
                end_line,
                signature,
                base_types: self.base_types(node),
                is_definition: body.is_some(),
                is_template_specialization: is_specialization || template.explicit,
                parent,
            });
        }

        if let Some(body) = body {
            let mut inner = scope.clone();
            inner.records.extend(segments);
            inner.records.push(name);
            self.visit_children(body, &inner);
        }
    }

    /// Parameter types with names and default values removed.
    fn parameters(&self, declarator: Node) -> (Vec<String>, usize, Option<usize>) {
        let Some(list) = declarator.child_by_field_name("parameters") else {
            return (Vec::new(), 0, Some(0));
        };

        let mut types = Vec::new();
        let mut required = 0;
        let mut variadic = false;

        let mut cursor = list.walk();
        let children: Vec<_> = list.children(&mut cursor).collect();
        for param in children {
            match param.kind() {
                "parameter_declaration" => {
                    types.push(self.parameter_type(param));
                    required += 1;
                }
                "optional_parameter_declaration" => types.push(self.parameter_type(param)),
                "variadic_parameter_declaration" | "..." => {
                    variadic = true;
                    types.push("...".to_string());
                }
                _ => {}
            }
        }

        if types.len() == 1 && types[0] == "void" {
            return (Vec::new(), 0, Some(0));
        }

        let max = if variadic {
            None
        } else {
            Some(types.len())
        };
        let required = if variadic { required.min(types.len().saturating_sub(1)) } else { required };
        (types, required, max)
    }

    fn parameter_type(&self, param: Node) -> String {
        let declarator = param.child_by_field_name("declarator");
        let end = declarator
            .map(|d| d.end_byte())
            .or_else(|| param.child_by_field_name("type").map(|t| t.end_byte()))
            .unwrap_or_else(|| param.end_byte());

        let mut name_range = None;
        let mut current = declarator;
        while let Some(node) = current {
            if matches!(node.kind(), "identifier" | "field_identifier") {
                name_range = Some((node.start_byte(), node.end_byte()));
                break;
            }
            current = node.child_by_field_name("declarator");
        }

        let source = &self.file.source;
        let start = param.start_byte();
        let text = match name_range {
            Some((name_start, name_end)) => format!(
                "{}{}",
                source.get(start..name_start).unwrap_or(""),
                source.get(name_end..end).unwrap_or("")
            ),
            None => source.get(start..end).unwrap_or("").to_string(),
        };
        canonical_type(&text)
    }

    fn is_const_method(&self, declarator: Node) -> bool {
        let mut cursor = declarator.walk();
        let is_const = declarator
            .children(&mut cursor)
            .any(|child| child.kind() == "type_qualifier" && self.text(child) == "const");
        is_const
    }

    fn function(
        &mut self,
        node: Node,
        declarator: Node,
        body: Option<Node>,
        scope: &Scope,
        template: Template,
    ) {
        let Some(name_node) = declarator.child_by_field_name("declarator") else {
            return;
        };
        let (written, is_template_function) = match name_node.kind() {
            "identifier" | "field_identifier" | "destructor_name" | "operator_name"
            | "qualified_identifier" => (collapse_whitespace(self.text(name_node)), false),
            "template_function" => match name_node.child_by_field_name("name") {
                Some(name) => (collapse_whitespace(self.text(name)), true),
                None => return,
            },
            _ => return,
        };

        let mut segments = split_scope(&written);
        let Some(raw_name) = segments.pop() else {
            return;
        };
        let is_template_function =
            is_template_function || strip_template_args(&raw_name) != raw_name;
        let name = strip_template_args(&raw_name).to_string();

        let mut full = scope.prefix();
        full.extend(segments);

        // Leading segments that are not records form the namespace.
        let namespace_len = if scope.records.is_empty() {
            (1..=full.len())
                .find(|&i| {
                    let prefix = full[..i].join("::");
                    self.records.contains(&prefix)
                })
                .map(|i| i - 1)
                .unwrap_or(full.len())
        } else {
            scope.namespace.len()
        };
        let parent = (namespace_len < full.len()).then(|| full.join("::"));
        let namespace = full[..namespace_len].to_vec();

        let kind = if name.starts_with('~') {
            SymbolKind::Destructor
        } else if let Some(parent) = &parent {
            let record = parent.rsplit("::").next().unwrap_or(parent);
            if strip_template_args(record) == name {
                SymbolKind::Constructor
            } else {
                SymbolKind::Method
            }
        } else {
            SymbolKind::Function
        };

        full.push(name.clone());
        let qualified = full.join("::");
        let (types, min_arity, max_arity) = self.parameters(declarator);
        let id = format!(
            "c:@F@{}({}){}",
            qualified,
            types.join(","),
            if self.is_const_method(declarator) { " const" } else { "" }
        );

        let signature_end = body.map(|b| b.start_byte()).unwrap_or_else(|| node.end_byte());
        let signature = self
            .file
            .source
            .get(node.start_byte()..signature_end)
            .map(|s| collapse_whitespace(s.trim_end().trim_end_matches(';')))
            .unwrap_or_default();
        let (start_line, end_line) = Self::line(node);

        self.functions.push(FunctionInfo {
            id: id.clone(),
            qualified: qualified.clone(),
            name: name.clone(),
            parent: parent.clone(),
            namespace: namespace.clone(),
            min_arity,
            max_arity,
        });
        if !self.file.extract {
            return;
        }

        self.symbols.push(ParsedSymbol {
            id: id.clone(),
            name,
            qualified_name: qualified,
            namespace: namespace.join("::"),
            kind,
            file: self.file.path.clone(),
            start_line,
            end_line,
            signature,
            base_types: Vec::new(),
            is_definition: body.is_some(),
            is_template_specialization: is_template_function || template.explicit,
            parent: parent.clone(),
        });

        if let Some(body) = body {
            let caller = CallerContext {
                id,
                parent,
                namespace,
            };
            self.collect_calls(body, &caller);
        }
    }

    fn collect_calls(&mut self, body: Node, caller: &CallerContext) {
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            if node.kind() == "call_expression" {
                self.call(node, caller);
            }
            let mut cursor = node.walk();
            stack.extend(node.named_children(&mut cursor));
        }
    }

    fn call(&mut self, node: Node, caller: &CallerContext) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let arity = node
            .child_by_field_name("arguments")
            .map(|args| {
                let mut cursor = args.walk();
                let count = args
                    .named_children(&mut cursor)
                    .filter(|a| a.kind() != "comment")
                    .count();
                count
            })
            .unwrap_or(0);

        let (name, qualifier, member, this_call) = match function.kind() {
            "identifier" => (self.text(function).to_string(), None, false, false),
            "template_function" => match function.child_by_field_name("name") {
                Some(name) => (self.text(name).to_string(), None, false, false),
                None => return,
            },
            "qualified_identifier" => {
                let mut segments = split_scope(&collapse_whitespace(self.text(function)));
                let Some(name) = segments.pop() else {
                    return;
                };
                let qualifier = (!segments.is_empty()).then(|| segments.join("::"));
                (name, qualifier, false, false)
            }
            "field_expression" => {
                let Some(field) = function.child_by_field_name("field") else {
                    return;
                };
                let this_call = function
                    .child_by_field_name("argument")
                    .map(|arg| self.text(arg) == "this")
                    .unwrap_or(false);
                (self.text(field).to_string(), None, true, this_call)
            }
            _ => return,
        };

        self.calls.push(RawCall {
            caller: caller.clone(),
            name: strip_template_args(&name).to_string(),
            qualifier: qualifier.map(|q| {
                split_scope(&q)
                    .iter()
                    .map(|s| strip_template_args(s).to_string())
                    .collect::<Vec<_>>()
                    .join("::")
            }),
            member,
            this_call,
            arity,
            file: self.file.path.clone(),
            line: node.start_position().row as u32 + 1,
        });
    }
}

fn shared_prefix(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Binds call sites to declared functions by name, arity and lexical scope.
/// Ties that survive every preference produce an edge to each candidate.
fn resolve_calls(functions: &[FunctionInfo], calls: Vec<RawCall>) -> Vec<CallSite> {
    let mut by_name: HashMap<&str, Vec<&FunctionInfo>> = HashMap::new();
    let mut seen_ids = HashSet::new();
    for function in functions {
        if seen_ids.insert(function.id.as_str()) {
            by_name.entry(function.name.as_str()).or_default().push(function);
        }
    }

    let mut edges = Vec::new();
    let mut emitted = HashSet::new();

    for call in calls {
        let Some(named) = by_name.get(call.name.as_str()) else {
            continue;
        };
        let mut candidates: Vec<&FunctionInfo> =
            named.iter().copied().filter(|f| f.accepts(call.arity)).collect();

        if let Some(qualifier) = &call.qualifier {
            let suffix = format!("{}::{}", qualifier, call.name);
            candidates.retain(|f| {
                f.qualified == suffix || f.qualified.ends_with(&format!("::{}", suffix))
            });
        } else if call.member && !call.this_call {
            candidates.retain(|f| f.parent.is_some());
            if let Some(own_class) = &call.caller.parent {
                let own: Vec<_> = candidates
                    .iter()
                    .copied()
                    .filter(|f| f.parent.as_ref() == Some(own_class))
                    .collect();
                if !own.is_empty() && own.len() < candidates.len() && candidates.len() > 1 {
                    candidates = own;
                }
            }
        } else {
            let in_class: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|f| f.parent.is_some() && f.parent == call.caller.parent)
                .collect();
            if !in_class.is_empty() {
                candidates = in_class;
            } else if !call.this_call {
                candidates.retain(|f| f.parent.is_none());
                let best = candidates
                    .iter()
                    .map(|f| shared_prefix(&f.namespace, &call.caller.namespace))
                    .max();
                if let Some(best) = best {
                    candidates
                        .retain(|f| shared_prefix(&f.namespace, &call.caller.namespace) == best);
                }
            }
        }

        for callee in candidates {
            if emitted.insert((call.caller.id.clone(), callee.id.clone(), call.file.clone())) {
                edges.push(CallSite {
                    caller: call.caller.id.clone(),
                    callee: callee.id.clone(),
                    file: call.file.clone(),
                    line: call.line,
                });
            }
        }
    }

    edges
}
