//! Symbol table keyed by stable id, with per-file provenance.
//!
//! Each file that observes a symbol leaves a *site* (its location, signature
//! and whether it saw a definition). The public [`SymbolRecord`] is derived from
//! the sites: a definition site wins over declaration-only sites, and the record
//! disappears together with its last site.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::index::models::{SymbolKind, SymbolRecord};

/// One file's observation of a symbol, as handed to [`SymbolStore::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolObservation {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub namespace: String,
    pub kind: SymbolKind,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: String,
    pub base_types: Vec<String>,
    pub is_definition: bool,
    pub is_template_specialization: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolSite {
    start_line: u32,
    end_line: u32,
    signature: String,
    base_types: Vec<String>,
    is_definition: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl MergeOutcome {
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolStore {
    symbols: HashMap<String, SymbolRecord>,
    sites: HashMap<String, BTreeMap<PathBuf, SymbolSite>>,
    by_file: HashMap<PathBuf, BTreeSet<String>>,
    by_name: HashMap<String, BTreeSet<String>>,
}

impl SymbolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `file`'s contributions with `parsed`.
    pub fn merge(&mut self, file: &Path, parsed: Vec<SymbolObservation>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        // Several observations of one id in a file collapse; a definition wins.
        let mut incoming: BTreeMap<String, SymbolObservation> = BTreeMap::new();
        for observation in parsed {
            match incoming.get(&observation.id) {
                Some(existing) if existing.is_definition && !observation.is_definition => {}
                _ => {
                    incoming.insert(observation.id.clone(), observation);
                }
            }
        }

        let previous = self.by_file.remove(file).unwrap_or_default();

        for stale in previous.iter().filter(|id| !incoming.contains_key(*id)) {
            if self.drop_site(stale, file) {
                outcome.removed += 1;
            } else {
                self.rebuild(stale);
            }
        }

        let mut contributed = BTreeSet::new();
        for (id, observation) in incoming {
            let site = SymbolSite {
                start_line: observation.start_line,
                end_line: observation.end_line,
                signature: observation.signature.clone(),
                base_types: observation.base_types.clone(),
                is_definition: observation.is_definition,
            };
            self.sites
                .entry(id.clone())
                .or_default()
                .insert(file.to_path_buf(), site);
            contributed.insert(id.clone());

            let before = self.symbols.get(&id).cloned();
            if before.is_none() {
                self.by_name
                    .entry(observation.name.clone())
                    .or_default()
                    .insert(id.clone());
                self.symbols
                    .insert(id.clone(), Self::seed_record(file, &observation));
            }
            self.rebuild(&id);

            match before {
                None => outcome.added += 1,
                Some(before) if self.symbols.get(&id) != Some(&before) => outcome.updated += 1,
                Some(_) => {}
            }
        }

        if !contributed.is_empty() {
            self.by_file.insert(file.to_path_buf(), contributed);
        }

        outcome
    }

    /// Rebuilds a store from persisted sites, keeping each record's persisted
    /// winning file when it is still eligible.
    pub fn restore(
        observations: Vec<(PathBuf, SymbolObservation)>,
        winners: impl IntoIterator<Item = (String, PathBuf)>,
    ) -> Self {
        let mut grouped: BTreeMap<PathBuf, Vec<SymbolObservation>> = BTreeMap::new();
        for (file, observation) in observations {
            grouped.entry(file).or_default().push(observation);
        }

        let mut store = Self::new();
        for (file, parsed) in grouped {
            store.merge(&file, parsed);
        }
        for (id, file) in winners {
            if let Some(record) = store.symbols.get_mut(&id) {
                record.defining_file = file;
            }
            store.rebuild(&id);
        }
        store
    }

    /// Same as merging an empty parse for `file`.
    pub fn remove_file(&mut self, file: &Path) -> MergeOutcome {
        self.merge(file, Vec::new())
    }

    fn seed_record(file: &Path, observation: &SymbolObservation) -> SymbolRecord {
        SymbolRecord {
            id: observation.id.clone(),
            name: observation.name.clone(),
            qualified_name: observation.qualified_name.clone(),
            namespace: observation.namespace.clone(),
            kind: observation.kind,
            defining_file: file.to_path_buf(),
            decl_file: None,
            start_line: observation.start_line,
            end_line: observation.end_line,
            signature: observation.signature.clone(),
            base_types: observation.base_types.clone(),
            is_template_specialization: observation.is_template_specialization,
            is_definition: observation.is_definition,
            defined_in_files: BTreeSet::new(),
        }
    }

    /// Removes `file`'s site. Returns true when the record went with it.
    fn drop_site(&mut self, id: &str, file: &Path) -> bool {
        let Some(sites) = self.sites.get_mut(id) else {
            return false;
        };
        sites.remove(file);
        if !sites.is_empty() {
            return false;
        }

        self.sites.remove(id);
        if let Some(record) = self.symbols.remove(id) {
            if let Some(ids) = self.by_name.get_mut(&record.name) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_name.remove(&record.name);
                }
            }
        }
        true
    }

    /// Recomputes the derived fields of a record from its sites.
    fn rebuild(&mut self, id: &str) {
        let (Some(sites), Some(record)) = (self.sites.get(id), self.symbols.get_mut(id)) else {
            return;
        };

        let current = record.defining_file.clone();
        let has_definition = sites.values().any(|s| s.is_definition);
        let eligible = |site: &SymbolSite| site.is_definition == has_definition;

        let winner = sites
            .get(&current)
            .filter(|site| eligible(site))
            .map(|_| current.clone())
            .or_else(|| {
                sites
                    .iter()
                    .find(|(_, site)| eligible(site))
                    .map(|(path, _)| path.clone())
            });
        let Some(winner) = winner else {
            return;
        };
        let site = &sites[&winner];

        record.defining_file = winner.clone();
        record.start_line = site.start_line;
        record.end_line = site.end_line;
        record.signature = site.signature.clone();
        record.base_types = site.base_types.clone();
        record.is_definition = site.is_definition;
        record.decl_file = sites
            .iter()
            .find(|(_, site)| !site.is_definition)
            .map(|(path, _)| path.clone());
        record.defined_in_files = sites.keys().cloned().collect();
    }

    pub fn get(&self, id: &str) -> Option<&SymbolRecord> {
        self.symbols.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.symbols.contains_key(id)
    }

    /// Symbols with exactly this short or qualified name, sorted by id.
    pub fn by_name(&self, name: &str) -> Vec<&SymbolRecord> {
        let mut found: BTreeSet<&str> = self
            .by_name
            .get(name)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();

        if name.contains("::") {
            let short = name.rsplit("::").next().unwrap_or(name);
            if let Some(ids) = self.by_name.get(short) {
                for id in ids {
                    if self.symbols.get(id).map(|s| s.qualified_name.as_str()) == Some(name) {
                        found.insert(id);
                    }
                }
            }
        }

        found.into_iter().filter_map(|id| self.symbols.get(id)).collect()
    }

    /// Symbols `file` contributes, sorted by line.
    pub fn file_symbols(&self, file: &Path) -> Vec<&SymbolRecord> {
        let mut symbols: Vec<_> = self
            .by_file
            .get(file)
            .map(|ids| ids.iter().filter_map(|id| self.symbols.get(id)).collect())
            .unwrap_or_default();
        symbols.sort_by(|a, b| (a.start_line, &a.id).cmp(&(b.start_line, &b.id)));
        symbols
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.by_file.keys()
    }

    /// Every record sorted by id.
    pub fn records(&self) -> Vec<&SymbolRecord> {
        let mut records: Vec<_> = self.symbols.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Every `(id, file, observation)` triple, for persistence.
    pub fn observations(&self) -> Vec<(PathBuf, SymbolObservation)> {
        let mut out = Vec::new();
        for record in self.records() {
            let Some(sites) = self.sites.get(&record.id) else {
                continue;
            };
            for (file, site) in sites {
                out.push((
                    file.clone(),
                    SymbolObservation {
                        id: record.id.clone(),
                        name: record.name.clone(),
                        qualified_name: record.qualified_name.clone(),
                        namespace: record.namespace.clone(),
                        kind: record.kind,
                        start_line: site.start_line,
                        end_line: site.end_line,
                        signature: site.signature.clone(),
                        base_types: site.base_types.clone(),
                        is_definition: site.is_definition,
                        is_template_specialization: record.is_template_specialization,
                    },
                ));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(id: &str, name: &str, line: u32, is_definition: bool) -> SymbolObservation {
        SymbolObservation {
            id: id.to_string(),
            name: name.to_string(),
            qualified_name: name.to_string(),
            namespace: String::new(),
            kind: SymbolKind::Function,
            start_line: line,
            end_line: line + 2,
            signature: format!("void {}()", name),
            base_types: Vec::new(),
            is_definition,
            is_template_specialization: false,
        }
    }

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_merge_adds_new_symbols() {
        let mut store = SymbolStore::new();
        let outcome = store.merge(
            &p("/a.cpp"),
            vec![observation("c:@F@f()", "f", 1, true), observation("c:@F@g()", "g", 5, true)],
        );

        assert_eq!(outcome, MergeOutcome { added: 2, updated: 0, removed: 0 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.file_symbols(&p("/a.cpp")).len(), 2);
    }

    #[test]
    fn test_shared_symbol_collapses_to_one_record() {
        let mut store = SymbolStore::new();
        store.merge(&p("/a.cpp"), vec![observation("c:@S@Widget", "Widget", 3, true)]);
        let outcome = store.merge(&p("/b.cpp"), vec![observation("c:@S@Widget", "Widget", 3, true)]);

        assert_eq!(outcome.added, 0);
        assert_eq!(store.len(), 1);
        let record = store.get("c:@S@Widget").unwrap();
        assert_eq!(record.defined_in_files.len(), 2);

        store.remove_file(&p("/b.cpp"));
        let record = store.get("c:@S@Widget").unwrap();
        assert_eq!(record.defined_in_files.len(), 1);
        assert!(record.defined_in_files.contains(&p("/a.cpp")));
    }

    #[test]
    fn test_last_site_removal_deletes_record() {
        let mut store = SymbolStore::new();
        store.merge(&p("/a.cpp"), vec![observation("c:@F@f()", "f", 1, true)]);
        let outcome = store.remove_file(&p("/a.cpp"));

        assert_eq!(outcome.removed, 1);
        assert!(store.is_empty());
        assert!(store.by_name("f").is_empty());
    }

    #[test]
    fn test_reparse_without_symbol_removes_it() {
        let mut store = SymbolStore::new();
        store.merge(
            &p("/a.cpp"),
            vec![observation("c:@F@f()", "f", 1, true), observation("c:@F@g()", "g", 5, true)],
        );
        let outcome = store.merge(&p("/a.cpp"), vec![observation("c:@F@f()", "f", 1, true)]);

        assert_eq!(outcome, MergeOutcome { added: 0, updated: 0, removed: 1 });
        assert!(store.get("c:@F@g()").is_none());
    }

    #[test]
    fn test_definition_wins_over_declaration() {
        let mut store = SymbolStore::new();
        store.merge(&p("/api.h"), vec![observation("c:@F@f()", "f", 2, false)]);
        store.merge(&p("/impl.cpp"), vec![observation("c:@F@f()", "f", 10, true)]);

        let record = store.get("c:@F@f()").unwrap();
        assert_eq!(record.defining_file, p("/impl.cpp"));
        assert_eq!(record.decl_file, Some(p("/api.h")));
        assert_eq!(record.start_line, 10);
        assert!(record.is_definition);

        // A later declaration never overwrites the definition.
        store.merge(&p("/other.h"), vec![observation("c:@F@f()", "f", 7, false)]);
        let record = store.get("c:@F@f()").unwrap();
        assert_eq!(record.defining_file, p("/impl.cpp"));
        assert_eq!(record.start_line, 10);
    }

    #[test]
    fn test_losing_definition_falls_back_to_declaration() {
        let mut store = SymbolStore::new();
        store.merge(&p("/api.h"), vec![observation("c:@F@f()", "f", 2, false)]);
        store.merge(&p("/impl.cpp"), vec![observation("c:@F@f()", "f", 10, true)]);
        store.remove_file(&p("/impl.cpp"));

        let record = store.get("c:@F@f()").unwrap();
        assert_eq!(record.defining_file, p("/api.h"));
        assert!(!record.is_definition);
        assert_eq!(record.start_line, 2);
    }

    #[test]
    fn test_duplicate_ids_in_one_file_collapse() {
        let mut store = SymbolStore::new();
        store.merge(
            &p("/a.cpp"),
            vec![
                observation("c:@F@f()", "f", 1, false),
                observation("c:@F@f()", "f", 9, true),
                observation("c:@F@f()", "f", 20, false),
            ],
        );

        let record = store.get("c:@F@f()").unwrap();
        assert_eq!(record.start_line, 9);
        assert!(record.is_definition);
        assert_eq!(record.defined_in_files.len(), 1);
    }

    #[test]
    fn test_moved_symbol_counts_as_update() {
        let mut store = SymbolStore::new();
        store.merge(&p("/a.cpp"), vec![observation("c:@F@f()", "f", 1, true)]);
        let outcome = store.merge(&p("/a.cpp"), vec![observation("c:@F@f()", "f", 4, true)]);

        assert_eq!(outcome.updated, 1);
        assert_eq!(store.get("c:@F@f()").unwrap().start_line, 4);

        let outcome = store.merge(&p("/a.cpp"), vec![observation("c:@F@f()", "f", 4, true)]);
        assert_eq!(outcome, MergeOutcome::default());
    }

    #[test]
    fn test_by_name_accepts_qualified_names() {
        let mut store = SymbolStore::new();
        let mut method = observation("c:@S@app@S@Widget@F@draw()", "draw", 3, true);
        method.qualified_name = "app::Widget::draw".to_string();
        method.kind = SymbolKind::Method;
        store.merge(&p("/w.cpp"), vec![method, observation("c:@F@draw()", "draw", 9, true)]);

        assert_eq!(store.by_name("draw").len(), 2);
        let qualified = store.by_name("app::Widget::draw");
        assert_eq!(qualified.len(), 1);
        assert_eq!(qualified[0].kind, SymbolKind::Method);
    }

    #[test]
    fn test_observations_rebuild_identical_store() {
        let mut store = SymbolStore::new();
        store.merge(&p("/api.h"), vec![observation("c:@F@f()", "f", 2, false)]);
        store.merge(&p("/impl.cpp"), vec![observation("c:@F@f()", "f", 10, true)]);
        store.merge(&p("/x.cpp"), vec![observation("c:@F@g()", "g", 1, true)]);

        let mut rebuilt = SymbolStore::new();
        let mut grouped: BTreeMap<PathBuf, Vec<SymbolObservation>> = BTreeMap::new();
        for (file, obs) in store.observations() {
            grouped.entry(file).or_default().push(obs);
        }
        for (file, obs) in grouped {
            rebuilt.merge(&file, obs);
        }

        assert_eq!(rebuilt.records(), store.records());
    }

    #[test]
    fn test_restore_keeps_persisted_winner() {
        let mut store = SymbolStore::new();
        store.merge(&p("/b.cpp"), vec![observation("c:@F@f()", "f", 5, true)]);
        store.merge(&p("/a.cpp"), vec![observation("c:@F@f()", "f", 1, true)]);
        assert_eq!(store.get("c:@F@f()").unwrap().defining_file, p("/b.cpp"));

        let winners = store
            .records()
            .into_iter()
            .map(|r| (r.id.clone(), r.defining_file.clone()))
            .collect::<Vec<_>>();
        let restored = SymbolStore::restore(store.observations(), winners);

        assert_eq!(restored.records(), store.records());
    }
}
