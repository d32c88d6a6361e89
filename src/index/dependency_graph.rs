//! Include graph over an arena of file nodes.
//!
//! Files are interned once and addressed by [`FileId`]. Every traversal is
//! guarded by a visited bitset, so include cycles terminate.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<PathBuf>,
    ids: HashMap<PathBuf, FileId>,
    /// includer -> included
    forward: Vec<BTreeSet<FileId>>,
    /// included -> includer
    reverse: Vec<BTreeSet<FileId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, path: &Path) -> FileId {
        if let Some(id) = self.ids.get(path) {
            return *id;
        }
        let id = FileId(self.nodes.len() as u32);
        self.nodes.push(path.to_path_buf());
        self.ids.insert(path.to_path_buf(), id);
        self.forward.push(BTreeSet::new());
        self.reverse.push(BTreeSet::new());
        id
    }

    pub fn id_of(&self, path: &Path) -> Option<FileId> {
        self.ids.get(path).copied()
    }

    pub fn path_of(&self, id: FileId) -> &Path {
        &self.nodes[id.index()]
    }

    /// Replaces every edge leaving `includer` with `included`.
    pub fn set_edges<I, P>(&mut self, includer: &Path, included: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let from = self.intern(includer);

        for old in std::mem::take(&mut self.forward[from.index()]) {
            self.reverse[old.index()].remove(&from);
        }

        for path in included {
            let to = self.intern(path.as_ref());
            if to == from {
                continue;
            }
            self.forward[from.index()].insert(to);
            self.reverse[to.index()].insert(from);
        }
    }

    /// The changed file plus every file that includes it, directly or not.
    pub fn invalidated_by(&self, changed: &Path) -> BTreeSet<PathBuf> {
        let mut result = BTreeSet::new();
        result.insert(changed.to_path_buf());

        let Some(start) = self.id_of(changed) else {
            return result;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        visited[start.index()] = true;
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for &includer in &self.reverse[current.index()] {
                if !visited[includer.index()] {
                    visited[includer.index()] = true;
                    result.insert(self.nodes[includer.index()].clone());
                    queue.push_back(includer);
                }
            }
        }

        result
    }

    /// Removes edges in both directions. The node slot stays interned.
    pub fn remove_file(&mut self, path: &Path) {
        let Some(id) = self.id_of(path) else {
            return;
        };

        for to in std::mem::take(&mut self.forward[id.index()]) {
            self.reverse[to.index()].remove(&id);
        }
        for from in std::mem::take(&mut self.reverse[id.index()]) {
            self.forward[from.index()].remove(&id);
        }
    }

    pub fn includes_of(&self, includer: &Path) -> Vec<PathBuf> {
        self.id_of(includer)
            .map(|id| {
                self.forward[id.index()]
                    .iter()
                    .map(|to| self.nodes[to.index()].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn includers_of(&self, included: &Path) -> Vec<PathBuf> {
        self.id_of(included)
            .map(|id| {
                self.reverse[id.index()]
                    .iter()
                    .map(|from| self.nodes[from.index()].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All edges sorted by `(includer, included)`.
    pub fn edges(&self) -> Vec<(PathBuf, PathBuf)> {
        let mut edges: Vec<_> = self
            .forward
            .iter()
            .enumerate()
            .flat_map(|(from, targets)| {
                targets
                    .iter()
                    .map(move |to| (self.nodes[from].clone(), self.nodes[to.index()].clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.forward.iter().map(|targets| targets.len()).sum()
    }

    /// Rebuilds a graph from persisted `(includer, included)` pairs.
    pub fn from_edges(edges: impl IntoIterator<Item = (PathBuf, PathBuf)>) -> Self {
        let mut grouped: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
        for (from, to) in edges {
            grouped.entry(from).or_default().push(to);
        }

        let mut graph = Self::new();
        let mut includers: Vec<_> = grouped.into_iter().collect();
        includers.sort();
        for (from, targets) in includers {
            graph.set_edges(&from, targets);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_invalidated_by_includes_transitive_includers() {
        let mut graph = DependencyGraph::new();
        graph.set_edges(&p("/main.cpp"), [p("/a.h")]);
        graph.set_edges(&p("/a.h"), [p("/b.h")]);
        graph.set_edges(&p("/other.cpp"), [p("/c.h")]);

        let affected = graph.invalidated_by(&p("/b.h"));
        assert_eq!(
            affected,
            [p("/a.h"), p("/b.h"), p("/main.cpp")].into_iter().collect()
        );
    }

    #[test]
    fn test_unknown_file_invalidates_only_itself() {
        let graph = DependencyGraph::new();
        let affected = graph.invalidated_by(&p("/x.h"));
        assert_eq!(affected.len(), 1);
        assert!(affected.contains(&p("/x.h")));
    }

    #[test]
    fn test_cycles_terminate() {
        let mut graph = DependencyGraph::new();
        graph.set_edges(&p("/a.h"), [p("/b.h")]);
        graph.set_edges(&p("/b.h"), [p("/a.h")]);
        graph.set_edges(&p("/main.cpp"), [p("/a.h")]);

        let affected = graph.invalidated_by(&p("/b.h"));
        assert_eq!(affected.len(), 3);
    }

    #[test]
    fn test_set_edges_replaces_stale_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_edges(&p("/main.cpp"), [p("/old.h")]);
        graph.set_edges(&p("/main.cpp"), [p("/new.h")]);

        assert!(!graph.invalidated_by(&p("/old.h")).contains(&p("/main.cpp")));
        assert!(graph.invalidated_by(&p("/new.h")).contains(&p("/main.cpp")));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_self_include_is_ignored() {
        let mut graph = DependencyGraph::new();
        graph.set_edges(&p("/a.h"), [p("/a.h")]);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_file_drops_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.set_edges(&p("/main.cpp"), [p("/a.h")]);
        graph.set_edges(&p("/a.h"), [p("/b.h")]);

        graph.remove_file(&p("/a.h"));

        assert_eq!(graph.edge_count(), 0);
        assert!(graph.includers_of(&p("/a.h")).is_empty());
        assert!(graph.includes_of(&p("/main.cpp")).is_empty());
    }

    #[test]
    fn test_edges_round_trip() {
        let mut graph = DependencyGraph::new();
        graph.set_edges(&p("/main.cpp"), [p("/a.h"), p("/b.h")]);
        graph.set_edges(&p("/a.h"), [p("/b.h")]);

        let rebuilt = DependencyGraph::from_edges(graph.edges());
        assert_eq!(rebuilt.edges(), graph.edges());
        assert_eq!(
            rebuilt.invalidated_by(&p("/b.h")),
            graph.invalidated_by(&p("/b.h"))
        );
    }
}
