//! `compile_commands.json` loading and argument normalization.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::{absolutize, normalize_lexically, AnalyzerConfig};
use crate::error::{IndexerError, Result};
use crate::indexer::fingerprint::hash_bytes;

/// Hash recorded when no compile database is in effect.
pub const NO_DATABASE_HASH: &str = "none";

const COMPILER_NAMES: &[&str] = &["gcc", "g++", "clang", "clang++", "cc", "c++", "cl"];
const SOURCE_OPERAND_EXTENSIONS: &[&str] = &[".c", ".cc", ".cpp", ".cxx", ".c++", ".m", ".mm"];
const PATH_FLAGS: &[&str] = &["-I", "-isystem", "-iquote"];

#[derive(Debug, Deserialize)]
struct RawEntry {
    directory: String,
    file: String,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileEntry {
    pub file: PathBuf,
    pub directory: PathBuf,
    pub arguments: Vec<String>,
    pub args_hash: String,
}

#[derive(Debug, Clone)]
pub struct CompileDatabase {
    source: Option<PathBuf>,
    content_hash: String,
    entries: BTreeMap<PathBuf, CompileEntry>,
    fallback: Vec<String>,
}

impl CompileDatabase {
    /// A database with no entries; every file gets the fallback arguments.
    pub fn empty(project_root: &Path) -> Self {
        Self {
            source: None,
            content_hash: NO_DATABASE_HASH.to_string(),
            entries: BTreeMap::new(),
            fallback: fallback_args(project_root),
        }
    }

    /// Loads the configured database. A missing file yields [`empty`](Self::empty);
    /// a malformed one is logged and treated the same way.
    pub fn load(project_root: &Path, config: &AnalyzerConfig) -> Self {
        let Some(path) = config.compile_commands_path(project_root) else {
            return Self::empty(project_root);
        };
        if !path.is_file() {
            tracing::debug!("No compile database at {}", path.display());
            return Self::empty(project_root);
        }

        match Self::from_file(&path, project_root) {
            Ok(db) => {
                tracing::info!(
                    "Loaded {} compile commands from {}",
                    db.entries.len(),
                    path.display()
                );
                db
            }
            Err(e) => {
                tracing::warn!("{}; using fallback compile arguments", e);
                Self::empty(project_root)
            }
        }
    }

    pub fn from_file(path: &Path, project_root: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            IndexerError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        let raw: Vec<RawEntry> = serde_json::from_slice(&bytes).map_err(|e| {
            IndexerError::ConfigInvalid(format!("malformed {}: {}", path.display(), e))
        })?;

        // Relative `directory` values are relative to the database itself.
        let base = path
            .parent()
            .map(absolutize)
            .unwrap_or_else(|| project_root.to_path_buf());
        let mut entries = BTreeMap::new();
        for raw_entry in raw {
            let Some(entry) = Self::convert(raw_entry, &base) else {
                continue;
            };
            // First entry for a file wins.
            entries.entry(entry.file.clone()).or_insert(entry);
        }

        Ok(Self {
            source: Some(path.to_path_buf()),
            content_hash: hash_bytes(&bytes),
            entries,
            fallback: fallback_args(project_root),
        })
    }

    fn convert(raw: RawEntry, base: &Path) -> Option<CompileEntry> {
        let directory = normalize_lexically(&base.join(&raw.directory));
        let file = PathBuf::from(&raw.file);
        let file = absolutize(&normalize_lexically(&directory.join(file)));

        let arguments = match (raw.arguments, raw.command) {
            (Some(arguments), _) => arguments,
            (None, Some(command)) => match shell_words::split(&command) {
                Ok(words) => words,
                Err(e) => {
                    tracing::warn!("Skipping compile command for {}: {}", raw.file, e);
                    return None;
                }
            },
            (None, None) => return None,
        };

        let arguments = normalize_arguments(&filter_arguments(&arguments), &directory);
        let args_hash = hash_bytes(arguments.join("\u{1f}").as_bytes());

        Some(CompileEntry {
            file,
            directory,
            arguments,
            args_hash,
        })
    }

    /// Arguments for parsing `file`: its entry, else the fallback set.
    pub fn args_for(&self, file: &Path) -> Vec<String> {
        self.entries
            .get(file)
            .map(|e| e.arguments.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn entry(&self, file: &Path) -> Option<&CompileEntry> {
        self.entries.get(file)
    }

    pub fn entry_hashes(&self) -> BTreeMap<PathBuf, String> {
        self.entries
            .iter()
            .map(|(file, entry)| (file.clone(), entry.args_hash.clone()))
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }

    pub fn hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn fallback_args(project_root: &Path) -> Vec<String> {
    vec![
        "-std=c++17".to_string(),
        format!("-I{}", project_root.display()),
        format!("-I{}", project_root.join("src").display()),
        "-x".to_string(),
        "c++".to_string(),
    ]
}

/// Drops the compiler executable, `-c`, `-o <out>` and source operands.
pub fn filter_arguments(arguments: &[String]) -> Vec<String> {
    let mut rest = arguments;
    if let Some(first) = arguments.first() {
        let base = first
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(first)
            .to_lowercase();
        let base = base.strip_suffix(".exe").unwrap_or(&base);
        if COMPILER_NAMES.contains(&base) || first.starts_with('/') || first.starts_with('\\') {
            rest = &arguments[1..];
        }
    }

    let mut filtered = Vec::with_capacity(rest.len());
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        if arg == "-o" {
            iter.next();
            continue;
        }
        if arg == "-c" {
            continue;
        }
        if !arg.starts_with('-') {
            let lower = arg.to_lowercase();
            if SOURCE_OPERAND_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                continue;
            }
        }
        filtered.push(arg.clone());
    }
    filtered
}

/// Makes relative include directories absolute against the entry's directory.
pub fn normalize_arguments(arguments: &[String], directory: &Path) -> Vec<String> {
    let resolve = |path: &str| -> String {
        let path = Path::new(path);
        if path.is_absolute() {
            path.display().to_string()
        } else {
            normalize_lexically(&directory.join(path))
                .display()
                .to_string()
        }
    };

    let mut normalized = Vec::with_capacity(arguments.len());
    let mut i = 0;
    while i < arguments.len() {
        let arg = &arguments[i];

        if PATH_FLAGS.contains(&arg.as_str()) && i + 1 < arguments.len() {
            normalized.push(arg.clone());
            normalized.push(resolve(&arguments[i + 1]));
            i += 2;
            continue;
        }

        let joined = PATH_FLAGS
            .iter()
            .find_map(|flag| arg.strip_prefix(*flag).map(|rest| (*flag, rest)))
            .filter(|(_, rest)| !rest.is_empty());
        match joined {
            Some((flag, rest)) => normalized.push(format!("{}{}", flag, resolve(rest))),
            None => normalized.push(arg.clone()),
        }
        i += 1;
    }
    normalized
}

/// Include search directories from compile arguments, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeDirs {
    pub quote: Vec<PathBuf>,
    pub angled: Vec<PathBuf>,
    pub system: Vec<PathBuf>,
}

impl IncludeDirs {
    pub fn from_args(arguments: &[String]) -> Self {
        let mut dirs = Self::default();
        let mut i = 0;
        while i < arguments.len() {
            let arg = arguments[i].as_str();
            // Check the longer flags first: "-isystem" also starts with "-i".
            let (flag, value) = if let Some(rest) = arg.strip_prefix("-isystem") {
                ("-isystem", rest)
            } else if let Some(rest) = arg.strip_prefix("-iquote") {
                ("-iquote", rest)
            } else if let Some(rest) = arg.strip_prefix("-I") {
                ("-I", rest)
            } else {
                i += 1;
                continue;
            };

            let value = if value.is_empty() {
                i += 1;
                match arguments.get(i) {
                    Some(next) => next.as_str(),
                    None => break,
                }
            } else {
                value
            };

            let path = PathBuf::from(value);
            match flag {
                "-isystem" => dirs.system.push(path),
                "-iquote" => dirs.quote.push(path),
                _ => dirs.angled.push(path),
            }
            i += 1;
        }
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_drops_compiler_output_and_sources() {
        let filtered = filter_arguments(&args(&[
            "/usr/bin/clang++",
            "-c",
            "-o",
            "main.o",
            "-DDEBUG",
            "src/main.cpp",
            "-std=c++20",
        ]));
        assert_eq!(filtered, args(&["-DDEBUG", "-std=c++20"]));
    }

    #[test]
    fn test_filter_keeps_first_arg_when_not_compiler() {
        let filtered = filter_arguments(&args(&["-Wall", "-O2"]));
        assert_eq!(filtered, args(&["-Wall", "-O2"]));
    }

    #[test]
    fn test_normalize_relative_include_paths() {
        let normalized = normalize_arguments(
            &args(&["-I", "include", "-Ithird/../lib", "-isystem", "/opt/sdk", "-iquoteq", "-DX"]),
            Path::new("/work/build"),
        );
        assert_eq!(
            normalized,
            args(&[
                "-I",
                "/work/build/include",
                "-I/work/build/lib",
                "-isystem",
                "/opt/sdk",
                "-iquote/work/build/q",
                "-DX",
            ])
        );
    }

    #[test]
    fn test_include_dirs_from_args() {
        let dirs = IncludeDirs::from_args(&args(&[
            "-I/a",
            "-I",
            "/b",
            "-isystem/sys",
            "-iquote",
            "/q",
            "-DNOPE",
        ]));
        assert_eq!(dirs.angled, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(dirs.system, vec![PathBuf::from("/sys")]);
        assert_eq!(dirs.quote, vec![PathBuf::from("/q")]);
    }

    #[test]
    fn test_load_database_with_command_and_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let db_path = root.join("compile_commands.json");
        let json = serde_json::json!([
            {
                "directory": root.display().to_string(),
                "file": "a.cpp",
                "command": "g++ -c -Iinc -DA=1 a.cpp -o a.o"
            },
            {
                "directory": root.display().to_string(),
                "file": "b.cpp",
                "arguments": ["clang++", "-DB", "b.cpp"]
            },
            {
                "directory": root.display().to_string(),
                "file": "a.cpp",
                "arguments": ["clang++", "-DSECOND"]
            }
        ]);
        std::fs::write(&db_path, json.to_string()).unwrap();

        let db = CompileDatabase::from_file(&db_path, root).unwrap();
        assert_eq!(db.len(), 2);
        assert_ne!(db.hash(), NO_DATABASE_HASH);

        let a = absolutize(&root.join("a.cpp"));
        let a_args = db.args_for(&a);
        assert_eq!(
            a_args,
            vec![
                format!("-I{}", root.join("inc").display()),
                "-DA=1".to_string()
            ]
        );

        let unknown = db.args_for(&root.join("zzz.cpp"));
        assert_eq!(unknown[0], "-std=c++17");
    }

    #[test]
    fn test_args_hash_tracks_flag_changes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let db_path = root.join("compile_commands.json");
        let write = |flag: &str| {
            let json = serde_json::json!([
                {"directory": root.display().to_string(), "file": "a.cpp", "arguments": ["cc", flag]},
                {"directory": root.display().to_string(), "file": "b.cpp", "arguments": ["cc", "-O2"]}
            ]);
            std::fs::write(&db_path, json.to_string()).unwrap();
            CompileDatabase::from_file(&db_path, root).unwrap().entry_hashes()
        };

        let before = write("-O0");
        let after = write("-O3");
        let a = absolutize(&root.join("a.cpp"));
        let b = absolutize(&root.join("b.cpp"));
        assert_ne!(before[&a], after[&a]);
        assert_eq!(before[&b], after[&b]);
    }

    #[test]
    fn test_malformed_database_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("compile_commands.json"), "{oops").unwrap();

        let db = CompileDatabase::load(temp_dir.path(), &AnalyzerConfig::default());
        assert!(db.is_empty());
        assert_eq!(db.hash(), NO_DATABASE_HASH);
    }

    #[test]
    fn test_disabled_database_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("compile_commands.json"), "[]").unwrap();

        let mut config = AnalyzerConfig::default();
        config.compile_commands.enabled = false;
        let db = CompileDatabase::load(temp_dir.path(), &config);
        assert_eq!(db.hash(), NO_DATABASE_HASH);
        assert!(db.source().is_none());
    }

    #[test]
    fn test_relative_directory_resolves_against_database() {
        let temp_dir = TempDir::new().unwrap();
        let root = absolutize(temp_dir.path());
        std::fs::create_dir_all(root.join("build")).unwrap();
        let db_path = root.join("build/compile_commands.json");
        let json = serde_json::json!([
            {"directory": "..", "file": "src/a.cpp", "arguments": ["cc", "-Iinclude", "src/a.cpp"]}
        ]);
        std::fs::write(&db_path, json.to_string()).unwrap();

        let db = CompileDatabase::from_file(&db_path, &root).unwrap();

        let entry = db.entry(&root.join("src/a.cpp")).expect("entry for src/a.cpp");
        assert_eq!(entry.directory, root);
        assert_eq!(
            entry.arguments,
            vec![format!("-I{}", root.join("include").display())]
        );
    }
}
