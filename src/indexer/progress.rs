use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

#[derive(Clone)]
pub struct IndexingProgress {
    inner: Arc<Inner>,
}

struct Inner {
    files_total: AtomicUsize,
    files_processed: AtomicUsize,
    symbols_extracted: AtomicUsize,
    errors: AtomicUsize,
    is_active: AtomicBool,
    started_at: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub is_active: bool,
    pub files_total: usize,
    pub files_processed: usize,
    pub symbols_extracted: usize,
    pub errors: usize,
    pub elapsed_ms: u64,
    pub progress_pct: f64,
    pub eta_ms: Option<u64>,
}

impl Default for IndexingProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexingProgress {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                files_total: AtomicUsize::new(0),
                files_processed: AtomicUsize::new(0),
                symbols_extracted: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
                is_active: AtomicBool::new(false),
                started_at: Mutex::new(None),
            }),
        }
    }

    pub fn start(&self, total_files: usize) {
        self.inner.files_total.store(total_files, Ordering::Release);
        self.inner.files_processed.store(0, Ordering::Release);
        self.inner.symbols_extracted.store(0, Ordering::Release);
        self.inner.errors.store(0, Ordering::Release);
        self.inner.is_active.store(true, Ordering::Release);
        *self.inner.started_at.lock() = Some(Instant::now());
    }

    pub fn inc(&self, symbols_count: usize) {
        self.inner.files_processed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .symbols_extracted
            .fetch_add(symbols_count, Ordering::Relaxed);
    }

    pub fn inc_error(&self) {
        self.inner.files_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.inner.is_active.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let is_active = self.inner.is_active.load(Ordering::Acquire);
        let files_total = self.inner.files_total.load(Ordering::Acquire);
        let files_processed = self.inner.files_processed.load(Ordering::Acquire);
        let symbols_extracted = self.inner.symbols_extracted.load(Ordering::Acquire);
        let errors = self.inner.errors.load(Ordering::Acquire);

        let elapsed_ms = self
            .inner
            .started_at
            .lock()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let progress_pct = if files_total > 0 {
            (files_processed as f64 / files_total as f64) * 100.0
        } else {
            0.0
        };

        let eta_ms = if is_active && files_processed > 0 && files_processed < files_total {
            let remaining = files_total - files_processed;
            let ms_per_file = elapsed_ms as f64 / files_processed as f64;
            Some((remaining as f64 * ms_per_file) as u64)
        } else {
            None
        };

        ProgressSnapshot {
            is_active,
            files_total,
            files_processed,
            symbols_extracted,
            errors,
            elapsed_ms,
            progress_pct,
            eta_ms,
        }
    }
}

/// Refresh state machine: `Idle -> ComputingDelta -> Parsing -> Merging -> Persisting -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerState {
    Idle,
    ComputingDelta,
    Parsing,
    Merging,
    Persisting,
    Failed,
}

impl AnalyzerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerState::Idle => "idle",
            AnalyzerState::ComputingDelta => "computing_delta",
            AnalyzerState::Parsing => "parsing",
            AnalyzerState::Merging => "merging",
            AnalyzerState::Persisting => "persisting",
            AnalyzerState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: AnalyzerState,
    pub progress: ProgressSnapshot,
    pub current_file: Option<PathBuf>,
    /// Error of the last failed refresh, cleared when a refresh starts.
    pub last_error: Option<String>,
}

struct StatusFields {
    state: AnalyzerState,
    current_file: Option<PathBuf>,
    last_error: Option<String>,
}

/// Lock-protected status record, updated by the refresh at each checkpoint
/// and readable from any thread.
#[derive(Clone)]
pub struct StatusTracker {
    fields: Arc<RwLock<StatusFields>>,
    progress: IndexingProgress,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            fields: Arc::new(RwLock::new(StatusFields {
                state: AnalyzerState::Idle,
                current_file: None,
                last_error: None,
            })),
            progress: IndexingProgress::new(),
        }
    }

    pub fn progress(&self) -> &IndexingProgress {
        &self.progress
    }

    pub fn state(&self) -> AnalyzerState {
        self.fields.read().state
    }

    pub fn begin(&self) {
        let mut fields = self.fields.write();
        fields.state = AnalyzerState::ComputingDelta;
        fields.current_file = None;
        fields.last_error = None;
    }

    pub fn transition(&self, state: AnalyzerState) {
        let mut fields = self.fields.write();
        tracing::debug!("Refresh state {} -> {}", fields.state.as_str(), state.as_str());
        fields.state = state;
        if state != AnalyzerState::Parsing {
            fields.current_file = None;
        }
    }

    pub fn set_current_file(&self, path: &Path) {
        self.fields.write().current_file = Some(path.to_path_buf());
    }

    /// Passes through `Failed` and settles in `Idle`, keeping the error.
    pub fn fail(&self, error: &str) {
        self.transition(AnalyzerState::Failed);
        self.progress.finish();
        let mut fields = self.fields.write();
        fields.last_error = Some(error.to_string());
        fields.state = AnalyzerState::Idle;
    }

    pub fn finish(&self) {
        self.progress.finish();
        self.transition(AnalyzerState::Idle);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let fields = self.fields.read();
        StatusSnapshot {
            state: fields.state,
            progress: self.progress.snapshot(),
            current_file: fields.current_file.clone(),
            last_error: fields.last_error.clone(),
        }
    }
}
