use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use ignore::WalkBuilder;

use crate::config::{absolutize, AnalyzerConfig};
use crate::error::Result;

/// Finds the translation units of a project, honoring `.gitignore` and the
/// analyzer config's exclusions.
pub struct SourceWalker {
    root: PathBuf,
    config: AnalyzerConfig,
    skipped_dirs: HashSet<String>,
    patterns: Vec<Pattern>,
    cache_dir: Option<PathBuf>,
}

impl SourceWalker {
    pub fn new(root: &Path, config: &AnalyzerConfig) -> Self {
        let mut skipped_dirs: HashSet<String> =
            config.exclude_directories.iter().cloned().collect();
        if !config.include_dependencies {
            skipped_dirs.extend(config.dependency_directories.iter().cloned());
        }

        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("Ignoring invalid exclude pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();

        let root = absolutize(root);
        let cache_dir = config.cache_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                root.join(dir)
            }
        });

        Self {
            root,
            config: config.clone(),
            skipped_dirs,
            patterns,
            cache_dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source files under the root, absolute and sorted.
    pub fn walk(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let skipped_dirs = self.skipped_dirs.clone();
        let cache_dir = self.cache_dir.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    return true;
                }
                let skipped_name = entry
                    .file_name()
                    .to_str()
                    .map(|name| skipped_dirs.contains(name))
                    .unwrap_or(false);
                let in_cache = cache_dir
                    .as_ref()
                    .map(|dir| entry.path().starts_with(dir))
                    .unwrap_or(false);
                !skipped_name && !in_cache
            })
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() || !self.config.is_source(path) || self.matches_pattern(path) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.len() > self.config.max_file_size_bytes() {
                    tracing::debug!("Skipping oversized file {}", path.display());
                    continue;
                }
            }
            files.push(absolutize(path));
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    fn matches_pattern(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.patterns
            .iter()
            .any(|p| p.matches(name) || p.matches_path(relative))
    }

    /// Whether a path (from the compile database or a watcher event) lies
    /// outside what the walk would consider.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if let Some(cache_dir) = &self.cache_dir {
            if path.starts_with(cache_dir) {
                return true;
            }
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let in_skipped_dir = relative
            .parent()
            .map(|parent| {
                parent.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|name| self.skipped_dirs.contains(name))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        in_skipped_dir || self.matches_pattern(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        let root = absolutize(root);
        files
            .iter()
            .map(|f| f.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_walk_finds_sources_only() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "main.cpp", "int main() {}");
        create_file(temp_dir.path(), "util.cc", "");
        create_file(temp_dir.path(), "util.h", "");
        create_file(temp_dir.path(), "notes.txt", "");

        let walker = SourceWalker::new(temp_dir.path(), &AnalyzerConfig::default());
        let files = walker.walk().unwrap();

        assert_eq!(names(&files, temp_dir.path()), vec!["main.cpp", "util.cc"]);
    }

    #[test]
    fn test_walk_recursive() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "root.cpp", "");
        create_file(temp_dir.path(), "src/lib.cpp", "");
        create_file(temp_dir.path(), "src/module/deep/file.cxx", "");

        let walker = SourceWalker::new(temp_dir.path(), &AnalyzerConfig::default());
        assert_eq!(walker.walk().unwrap().len(), 3);
    }

    #[test]
    fn test_excluded_and_dependency_directories() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "main.cpp", "");
        create_file(temp_dir.path(), "build/CMakeFiles/feature_check.cpp", "");
        create_file(temp_dir.path(), "third_party/lib.cpp", "");
        create_file(temp_dir.path(), ".cpp-index/stale.cpp", "");

        let walker = SourceWalker::new(temp_dir.path(), &AnalyzerConfig::default());
        assert_eq!(
            names(&walker.walk().unwrap(), temp_dir.path()),
            vec!["main.cpp", "third_party/lib.cpp"]
        );

        let config = AnalyzerConfig {
            include_dependencies: false,
            ..AnalyzerConfig::default()
        };
        let walker = SourceWalker::new(temp_dir.path(), &config);
        assert_eq!(names(&walker.walk().unwrap(), temp_dir.path()), vec!["main.cpp"]);
    }

    #[test]
    fn test_exclude_patterns_and_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "main.cpp", "");
        create_file(temp_dir.path(), "main_test.cpp", "");
        create_file(temp_dir.path(), "gen/big.cpp", &"x".repeat(4096));

        let config = AnalyzerConfig {
            exclude_patterns: vec!["*_test.cpp".to_string()],
            max_file_size_mb: 0.001,
            ..AnalyzerConfig::default()
        };
        let walker = SourceWalker::new(temp_dir.path(), &config);
        assert_eq!(names(&walker.walk().unwrap(), temp_dir.path()), vec!["main.cpp"]);
    }

    #[test]
    fn test_respects_gitignore() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        create_file(temp_dir.path(), ".gitignore", "generated/\n");
        create_file(temp_dir.path(), "main.cpp", "");
        create_file(temp_dir.path(), "generated/out.cpp", "");

        let walker = SourceWalker::new(temp_dir.path(), &AnalyzerConfig::default());
        assert_eq!(names(&walker.walk().unwrap(), temp_dir.path()), vec!["main.cpp"]);
    }

    #[test]
    fn test_is_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let walker = SourceWalker::new(temp_dir.path(), &AnalyzerConfig::default());
        let root = walker.root().to_path_buf();

        assert!(walker.is_excluded(&root.join(".git/hooks/x.cpp")));
        assert!(walker.is_excluded(&root.join(".cpp-index/index.db")));
        assert!(!walker.is_excluded(&root.join("src/main.cpp")));
    }
}
