use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};

use crate::error::{IndexerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Modified(path) | FileEvent::Deleted(path) => path,
        }
    }
}

type DebounceResult = std::result::Result<Vec<DebouncedEvent>, notify::Error>;

/// Debounced recursive watcher over a project root.
pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<DebounceResult>,
}

impl FileWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        let (tx, rx) = channel();

        let mut debouncer = new_debouncer(Duration::from_millis(500), tx)
            .map_err(|e| IndexerError::Watcher(e.to_string()))?;

        debouncer
            .watcher()
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| IndexerError::Watcher(e.to_string()))?;

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
        })
    }

    /// Blocks for the next batch. `None` once the watcher is gone; an empty
    /// batch when nothing in it passed `relevant`.
    pub fn recv(&self, relevant: impl Fn(&Path) -> bool) -> Option<Vec<FileEvent>> {
        match self.receiver.recv() {
            Ok(batch) => Some(Self::convert(batch, &relevant)),
            Err(_) => None,
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout` with an empty batch.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
        relevant: impl Fn(&Path) -> bool,
    ) -> Option<Vec<FileEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(batch) => Some(Self::convert(batch, &relevant)),
            Err(RecvTimeoutError::Timeout) => Some(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn convert(batch: DebounceResult, relevant: &impl Fn(&Path) -> bool) -> Vec<FileEvent> {
        let events = match batch {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Watch error: {}", e);
                return Vec::new();
            }
        };

        let mut converted: Vec<FileEvent> = events
            .into_iter()
            .filter(|e| relevant(&e.path))
            .filter_map(|e| {
                let path = e.path;
                if path.is_file() {
                    Some(FileEvent::Modified(path))
                } else if !path.exists() {
                    Some(FileEvent::Deleted(path))
                } else {
                    None
                }
            })
            .collect();
        converted.sort_by(|a, b| a.path().cmp(b.path()));
        converted.dedup();
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_mini::DebouncedEventKind;
    use tempfile::TempDir;

    fn event(path: PathBuf) -> DebouncedEvent {
        DebouncedEvent {
            path,
            kind: DebouncedEventKind::Any,
        }
    }

    #[test]
    fn test_convert_filters_and_classifies() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("main.cpp");
        std::fs::write(&present, "int main() {}").unwrap();
        let gone = temp_dir.path().join("old.cpp");
        let ignored = temp_dir.path().join("notes.txt");
        std::fs::write(&ignored, "").unwrap();

        let is_cpp = |p: &Path| p.extension().map(|e| e == "cpp").unwrap_or(false);
        let events = FileWatcher::convert(
            Ok(vec![
                event(present.clone()),
                event(gone.clone()),
                event(ignored),
                event(present.clone()),
            ]),
            &is_cpp,
        );

        assert_eq!(
            events,
            vec![FileEvent::Modified(present), FileEvent::Deleted(gone)]
        );
    }

    #[test]
    fn test_convert_swallows_watch_errors() {
        let events = FileWatcher::convert(Err(notify::Error::generic("boom")), &|_: &Path| true);
        assert!(events.is_empty());
    }
}
