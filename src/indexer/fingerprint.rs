use std::path::Path;
use std::time::UNIX_EPOCH;

use xxhash_rust::xxh3::xxh3_128;

use crate::index::FileRecord;

/// Outcome of fingerprinting a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Found(FileRecord),
    /// Missing or unreadable. Treated downstream as a deletion signal.
    NotFound,
}

impl Fingerprint {
    pub fn record(self) -> Option<FileRecord> {
        match self {
            Fingerprint::Found(record) => Some(record),
            Fingerprint::NotFound => None,
        }
    }
}

/// Hashes the full contents of a file. Stateless; safe to call from any thread.
pub fn fingerprint(path: &Path) -> Fingerprint {
    let Ok(bytes) = std::fs::read(path) else {
        return Fingerprint::NotFound;
    };

    let last_observed_mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    Fingerprint::Found(FileRecord {
        path: path.to_path_buf(),
        content_hash: hash_bytes(&bytes),
        size: bytes.len() as u64,
        last_observed_mtime,
    })
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:032x}", xxh3_128(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.cpp");
        std::fs::write(&path, "int main() { return 0; }").unwrap();

        let record = fingerprint(&path).record().unwrap();
        assert_eq!(record.path, path);
        assert_eq!(record.size, 24);
        assert_eq!(record.content_hash.len(), 32);
    }

    #[test]
    fn test_comment_only_change_changes_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.h");
        std::fs::write(&path, "void f();\n").unwrap();
        let before = fingerprint(&path).record().unwrap();

        std::fs::write(&path, "void f(); // note\n").unwrap();
        let after = fingerprint(&path).record().unwrap();

        assert_ne!(before.content_hash, after.content_hash);
    }

    #[test]
    fn test_same_content_same_hash() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.h");
        let b = temp_dir.path().join("b.h");
        std::fs::write(&a, "struct S {};").unwrap();
        std::fs::write(&b, "struct S {};").unwrap();

        assert_eq!(
            fingerprint(&a).record().unwrap().content_hash,
            fingerprint(&b).record().unwrap().content_hash
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            fingerprint(&temp_dir.path().join("gone.cpp")),
            Fingerprint::NotFound
        );
    }

    #[test]
    fn test_directory_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(fingerprint(temp_dir.path()), Fingerprint::NotFound);
    }
}
