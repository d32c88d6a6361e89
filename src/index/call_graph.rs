//! Caller/callee edges between symbol ids, with per-file provenance.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::index::models::CallEdge;

#[derive(Debug, Clone, Default)]
pub struct CallGraphIndex {
    by_file: HashMap<PathBuf, BTreeSet<CallEdge>>,
    /// How many files currently contribute each edge.
    refcount: HashMap<CallEdge, usize>,
    forward: HashMap<String, BTreeSet<String>>,
    reverse: HashMap<String, BTreeSet<String>>,
}

impl CallGraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every edge previously contributed by `file`.
    pub fn record_edges(&mut self, file: &Path, edges: impl IntoIterator<Item = CallEdge>) {
        self.remove_file(file);

        let edges: BTreeSet<CallEdge> = edges.into_iter().collect();
        for edge in &edges {
            let count = self.refcount.entry(edge.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                self.forward
                    .entry(edge.caller.clone())
                    .or_default()
                    .insert(edge.callee.clone());
                self.reverse
                    .entry(edge.callee.clone())
                    .or_default()
                    .insert(edge.caller.clone());
            }
        }

        if !edges.is_empty() {
            self.by_file.insert(file.to_path_buf(), edges);
        }
    }

    pub fn remove_file(&mut self, file: &Path) {
        let Some(old) = self.by_file.remove(file) else {
            return;
        };

        for edge in old {
            let Some(count) = self.refcount.get_mut(&edge) else {
                continue;
            };
            *count -= 1;
            if *count > 0 {
                continue;
            }
            self.refcount.remove(&edge);
            Self::unlink(&mut self.forward, &edge.caller, &edge.callee);
            Self::unlink(&mut self.reverse, &edge.callee, &edge.caller);
        }
    }

    fn unlink(map: &mut HashMap<String, BTreeSet<String>>, from: &str, to: &str) {
        if let Some(targets) = map.get_mut(from) {
            targets.remove(to);
            if targets.is_empty() {
                map.remove(from);
            }
        }
    }

    pub fn caller_ids(&self, id: &str) -> Vec<String> {
        self.reverse
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn callee_ids(&self, id: &str) -> Vec<String> {
        self.forward
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Simple call paths from `from` to `to` with at most `max_depth` edges,
    /// shortest first.
    pub fn paths(&self, from: &str, to: &str, max_depth: usize) -> Vec<Vec<String>> {
        if from == to {
            return vec![vec![from.to_string()]];
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(vec![from.to_string()]);

        while let Some(path) = queue.pop_front() {
            if path.len() > max_depth {
                continue;
            }
            let Some(last) = path.last() else {
                continue;
            };
            let Some(callees) = self.forward.get(last) else {
                continue;
            };

            for callee in callees {
                if path.contains(callee) {
                    continue;
                }
                let mut next = path.clone();
                next.push(callee.clone());
                if callee == to {
                    found.push(next);
                } else {
                    queue.push_back(next);
                }
            }
        }

        found
    }

    /// Every distinct edge, sorted.
    pub fn edges(&self) -> Vec<CallEdge> {
        let mut edges: Vec<_> = self.refcount.keys().cloned().collect();
        edges.sort();
        edges
    }

    /// `(file, edge)` provenance pairs sorted by file, for persistence.
    pub fn file_edges(&self) -> Vec<(PathBuf, CallEdge)> {
        let mut out: Vec<_> = self
            .by_file
            .iter()
            .flat_map(|(file, edges)| edges.iter().map(move |e| (file.clone(), e.clone())))
            .collect();
        out.sort();
        out
    }

    pub fn edge_count(&self) -> usize {
        self.refcount.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
