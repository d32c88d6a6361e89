//! Analyzer configuration and project identity.
//!
//! Configuration is a JSON file (`cpp-analyzer-config.json`). Missing keys take
//! their defaults; a malformed file is reported and replaced by the defaults.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{IndexerError, Result};

pub const CONFIG_FILENAME: &str = "cpp-analyzer-config.json";
pub const CONFIG_ENV_VAR: &str = "CPP_ANALYZER_CONFIG";
pub const DEFAULT_CACHE_DIR: &str = ".cpp-index";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileCommandsConfig {
    pub enabled: bool,
    /// Relative to the project root unless absolute.
    pub path: String,
}

impl Default for CompileCommandsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "compile_commands.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub exclude_directories: Vec<String>,
    /// Glob patterns matched against file names and root-relative paths.
    pub exclude_patterns: Vec<String>,
    pub dependency_directories: Vec<String>,
    pub include_dependencies: bool,
    pub max_file_size_mb: f64,
    pub source_extensions: Vec<String>,
    pub header_extensions: Vec<String>,
    pub compile_commands: CompileCommandsConfig,
    pub max_workers: Option<usize>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            exclude_directories: [
                ".git",
                ".svn",
                ".hg",
                "node_modules",
                "__pycache__",
                ".vs",
                ".vscode",
                ".idea",
                "CMakeFiles",
                DEFAULT_CACHE_DIR,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude_patterns: Vec::new(),
            dependency_directories: [
                "vcpkg_installed",
                "third_party",
                "ThirdParty",
                "external",
                "External",
                "vendor",
                "dependencies",
                "packages",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            include_dependencies: true,
            max_file_size_mb: 10.0,
            source_extensions: ["cpp", "cc", "cxx", "c++", "c"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            header_extensions: ["h", "hh", "hpp", "hxx", "h++", "inl"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            compile_commands: CompileCommandsConfig::default(),
            max_workers: None,
            cache_dir: None,
        }
    }
}

/// The subset of the config that changes what ends up in the index.
#[derive(Serialize)]
struct SemanticView<'a> {
    exclude_directories: &'a [String],
    exclude_patterns: &'a [String],
    dependency_directories: &'a [String],
    include_dependencies: bool,
    max_file_size_mb: f64,
    source_extensions: &'a [String],
    header_extensions: &'a [String],
    compile_commands: &'a CompileCommandsConfig,
}

impl AnalyzerConfig {
    /// Parses a config file. Errors are `ConfigInvalid`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            IndexerError::ConfigInvalid(format!("malformed {}: {}", path.display(), e))
        })
    }

    /// Loads the effective config for a project. Never fails: an invalid file
    /// falls back to the defaults.
    ///
    /// Returns the config together with the file it came from, if any.
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> (Self, Option<PathBuf>) {
        let Some(path) = Self::locate(project_root, explicit) else {
            tracing::debug!("No analyzer config found, using defaults");
            return (Self::default(), None);
        };

        match Self::from_file(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                (config, Some(path))
            }
            Err(e) => {
                tracing::warn!("{}; using default configuration", e);
                (Self::default(), Some(path))
            }
        }
    }

    fn locate(project_root: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let env_path = PathBuf::from(env_path);
            if env_path.exists() {
                return Some(env_path);
            }
            tracing::warn!(
                "{} points to non-existent file: {}",
                CONFIG_ENV_VAR,
                env_path.display()
            );
        }

        let project_config = project_root.join(CONFIG_FILENAME);
        project_config.exists().then_some(project_config)
    }

    /// Hash of the settings that affect index contents. Worker count and cache
    /// location are excluded.
    pub fn semantic_hash(&self) -> String {
        let view = SemanticView {
            exclude_directories: &self.exclude_directories,
            exclude_patterns: &self.exclude_patterns,
            dependency_directories: &self.dependency_directories,
            include_dependencies: self.include_dependencies,
            max_file_size_mb: self.max_file_size_mb,
            source_extensions: &self.source_extensions,
            header_extensions: &self.header_extensions,
            compile_commands: &self.compile_commands,
        };
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        format!("{:032x}", xxh3_128(&bytes))
    }

    pub fn is_source(&self, path: &Path) -> bool {
        Self::has_extension(path, &self.source_extensions)
    }

    pub fn is_header(&self, path: &Path) -> bool {
        Self::has_extension(path, &self.header_extensions)
    }

    fn has_extension(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        (self.max_file_size_mb * 1024.0 * 1024.0) as u64
    }

    pub fn compile_commands_path(&self, project_root: &Path) -> Option<PathBuf> {
        if !self.compile_commands.enabled {
            return None;
        }
        let path = PathBuf::from(&self.compile_commands.path);
        Some(if path.is_absolute() {
            path
        } else {
            project_root.join(path)
        })
    }
}

/// A project is identified by its source root plus the config file in effect.
/// Different identities get different snapshot directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentity {
    pub source_root: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl ProjectIdentity {
    pub fn new(source_root: &Path, config_path: Option<&Path>) -> Self {
        Self {
            source_root: absolutize(source_root),
            config_path: config_path.map(absolutize),
        }
    }

    /// 16 hex chars (64 bits) of the identity hash.
    pub fn hash(&self) -> String {
        let mut combined = self.source_root.to_string_lossy().into_owned();
        if let Some(config) = &self.config_path {
            combined.push('|');
            combined.push_str(&config.to_string_lossy());
        }
        let full = format!("{:032x}", xxh3_128(combined.as_bytes()));
        full[..16].to_string()
    }

    pub fn cache_dir_name(&self) -> String {
        let name = self
            .source_root
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("project");
        format!("{}_{}", name, self.hash())
    }
}

/// Canonical path when the file exists, otherwise an absolute lexical path.
pub fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Resolves `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
