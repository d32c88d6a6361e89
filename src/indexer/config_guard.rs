//! Decides whether configuration drift requires a reset or a targeted re-parse.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::index::models::ConfigFingerprint;
use crate::indexer::compile_commands::NO_DATABASE_HASH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDecision {
    /// Drop every table and rebuild.
    Reset(String),
    /// Re-parse exactly these files.
    PartialInvalidate(BTreeSet<PathBuf>),
    NoChange,
}

/// Current configuration inputs compared against what the snapshot was built with.
#[derive(Debug, Clone)]
pub struct ConfigVersionGuard {
    current: ConfigFingerprint,
    current_entries: BTreeMap<PathBuf, String>,
}

impl ConfigVersionGuard {
    pub fn new(current: ConfigFingerprint, current_entries: BTreeMap<PathBuf, String>) -> Self {
        Self {
            current,
            current_entries,
        }
    }

    pub fn fingerprint(&self) -> &ConfigFingerprint {
        &self.current
    }

    pub fn entries(&self) -> &BTreeMap<PathBuf, String> {
        &self.current_entries
    }

    pub fn evaluate(
        &self,
        stored: Option<&ConfigFingerprint>,
        stored_entries: &BTreeMap<PathBuf, String>,
    ) -> ConfigDecision {
        let Some(stored) = stored else {
            return ConfigDecision::Reset("no previous snapshot".to_string());
        };

        if stored.schema_version != self.current.schema_version {
            return ConfigDecision::Reset(format!(
                "schema version {} -> {}",
                stored.schema_version, self.current.schema_version
            ));
        }

        if stored.analyzer_config_hash != self.current.analyzer_config_hash {
            return ConfigDecision::Reset("analyzer configuration changed".to_string());
        }

        if stored.compile_database_hash == self.current.compile_database_hash {
            return ConfigDecision::NoChange;
        }

        let appeared_or_vanished = (stored.compile_database_hash == NO_DATABASE_HASH)
            != (self.current.compile_database_hash == NO_DATABASE_HASH);
        if appeared_or_vanished {
            return ConfigDecision::Reset("compile database added or removed".to_string());
        }

        let mut affected = BTreeSet::new();
        for (file, hash) in &self.current_entries {
            if stored_entries.get(file) != Some(hash) {
                affected.insert(file.clone());
            }
        }
        for file in stored_entries.keys() {
            if !self.current_entries.contains_key(file) {
                affected.insert(file.clone());
            }
        }

        if affected.is_empty() {
            // Reordered or reformatted without changing any file's flags.
            ConfigDecision::NoChange
        } else {
            ConfigDecision::PartialInvalidate(affected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(db: &str, config: &str, schema: u32) -> ConfigFingerprint {
        ConfigFingerprint {
            compile_database_hash: db.to_string(),
            analyzer_config_hash: config.to_string(),
            schema_version: schema,
        }
    }

    fn entries(list: &[(&str, &str)]) -> BTreeMap<PathBuf, String> {
        list.iter()
            .map(|(f, h)| (PathBuf::from(f), h.to_string()))
            .collect()
    }

    #[test]
    fn test_no_baseline_resets() {
        let guard = ConfigVersionGuard::new(fp("none", "c", 1), BTreeMap::new());
        assert!(matches!(
            guard.evaluate(None, &BTreeMap::new()),
            ConfigDecision::Reset(_)
        ));
    }

    #[test]
    fn test_identical_fingerprint_is_no_change() {
        let guard = ConfigVersionGuard::new(fp("db1", "c", 1), entries(&[("/a.cpp", "x")]));
        assert_eq!(
            guard.evaluate(Some(&fp("db1", "c", 1)), &entries(&[("/a.cpp", "x")])),
            ConfigDecision::NoChange
        );
    }

    #[test]
    fn test_schema_and_config_mismatch_reset() {
        let guard = ConfigVersionGuard::new(fp("db1", "c", 2), BTreeMap::new());
        assert!(matches!(
            guard.evaluate(Some(&fp("db1", "c", 1)), &BTreeMap::new()),
            ConfigDecision::Reset(_)
        ));

        let guard = ConfigVersionGuard::new(fp("db1", "c2", 1), BTreeMap::new());
        assert!(matches!(
            guard.evaluate(Some(&fp("db1", "c", 1)), &BTreeMap::new()),
            ConfigDecision::Reset(_)
        ));
    }

    #[test]
    fn test_database_appearing_resets() {
        let guard = ConfigVersionGuard::new(fp("db1", "c", 1), entries(&[("/a.cpp", "x")]));
        assert!(matches!(
            guard.evaluate(Some(&fp(NO_DATABASE_HASH, "c", 1)), &BTreeMap::new()),
            ConfigDecision::Reset(_)
        ));
    }

    #[test]
    fn test_changed_entry_is_partial() {
        let guard = ConfigVersionGuard::new(
            fp("db2", "c", 1),
            entries(&[("/a.cpp", "x2"), ("/b.cpp", "y"), ("/new.cpp", "n")]),
        );
        let decision = guard.evaluate(
            Some(&fp("db1", "c", 1)),
            &entries(&[("/a.cpp", "x"), ("/b.cpp", "y"), ("/old.cpp", "o")]),
        );

        let expected: BTreeSet<PathBuf> = ["/a.cpp", "/new.cpp", "/old.cpp"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(decision, ConfigDecision::PartialInvalidate(expected));
    }

    #[test]
    fn test_reordered_database_is_no_change() {
        let guard = ConfigVersionGuard::new(fp("db2", "c", 1), entries(&[("/a.cpp", "x")]));
        assert_eq!(
            guard.evaluate(Some(&fp("db1", "c", 1)), &entries(&[("/a.cpp", "x")])),
            ConfigDecision::NoChange
        );
    }
}
