//! Incremental refresh driver.
//!
//! An [`IndexContext`] owns every mutable table of one project. A refresh
//! clones the committed tables, applies the delta to the clone, persists it,
//! and only then swaps it in. Cancellation or a failed write drops the clone,
//! leaving both the in-memory and the on-disk state untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{absolutize, AnalyzerConfig, ProjectIdentity, DEFAULT_CACHE_DIR};
use crate::error::{IndexerError, Result};
use crate::index::migrations::CURRENT_SCHEMA_VERSION;
use crate::index::{
    ChangeReport, ConfigFingerprint, FileFailure, FileRecord, IndexStats, IndexTables,
    MergeOutcome, ProgressRecord, ProgressStatus, RefreshMode, SnapshotStore, SymbolRecord,
    unix_now,
};
use crate::indexer::compile_commands::CompileDatabase;
use crate::indexer::config_guard::{ConfigDecision, ConfigVersionGuard};
use crate::indexer::extractor::CppParser;
use crate::indexer::fingerprint::{fingerprint, Fingerprint};
use crate::indexer::header_claims::{ClaimGuard, HeaderClaimTracker};
use crate::indexer::parser::{FileContribution, HeaderGate, SourceParser};
use crate::indexer::progress::{AnalyzerState, StatusSnapshot, StatusTracker};
use crate::indexer::walker::SourceWalker;

const SNAPSHOT_FILENAME: &str = "index.db";

/// Overrides applied on top of the analyzer config.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub config_path: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub cache_dir: Option<PathBuf>,
}

/// Handle to one open project index. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IndexContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    root: PathBuf,
    identity: ProjectIdentity,
    config: AnalyzerConfig,
    parser: Arc<dyn SourceParser>,
    walker: SourceWalker,
    store: SnapshotStore,
    pool: rayon::ThreadPool,
    committed: RwLock<IndexTables>,
    status: StatusTracker,
    refresh_lock: Mutex<()>,
}

/// A source that was parsed this refresh, with every header whose claim it won.
struct ParsedUnit {
    source: PathBuf,
    record: FileRecord,
    contribution: FileContribution,
    headers: Vec<(FileRecord, FileContribution)>,
}

enum UnitOutcome {
    Parsed(ParsedUnit),
    Failed { source: PathBuf, reason: String },
    Unreadable { source: PathBuf },
    Skipped,
}

/// Takes header claims for one translation unit while it is parsed.
///
/// A claim is completed as soon as its header has been extracted. Claims
/// still pending when the gate is dropped are aborted by their guards.
struct UnitClaims<'a> {
    tracker: &'a HeaderClaimTracker,
    sources: &'a BTreeSet<PathBuf>,
    pending: Mutex<BTreeMap<PathBuf, (FileRecord, ClaimGuard<'a>)>>,
    extracted: Mutex<Vec<FileRecord>>,
}

impl<'a> UnitClaims<'a> {
    fn new(tracker: &'a HeaderClaimTracker, sources: &'a BTreeSet<PathBuf>) -> Self {
        Self {
            tracker,
            sources,
            pending: Mutex::new(BTreeMap::new()),
            extracted: Mutex::new(Vec::new()),
        }
    }

    /// Headers extracted by this unit. Their claims are already Done.
    fn into_extracted(self) -> Vec<FileRecord> {
        self.extracted.into_inner()
    }

    /// Undoes the completed claims of a unit whose output is discarded.
    fn revoke(self) {
        for record in self.extracted.into_inner() {
            self.tracker.invalidate(&record.path);
        }
    }
}

impl HeaderGate for UnitClaims<'_> {
    fn claim(&self, header: &Path) -> bool {
        // Sources are extracted by their own unit.
        if self.sources.contains(header) {
            return false;
        }
        let Some(record) = fingerprint(header).record() else {
            return false;
        };
        let (_, guard) = ClaimGuard::acquire(self.tracker, header, &record.content_hash);
        match guard {
            Some(guard) => {
                self.pending
                    .lock()
                    .insert(header.to_path_buf(), (record, guard));
                true
            }
            None => false,
        }
    }

    fn extracted(&self, header: &Path) {
        let Some((record, guard)) = self.pending.lock().remove(header) else {
            return;
        };
        guard.complete();
        self.extracted.lock().push(record);
    }
}

/// What changed on disk since the committed snapshot.
#[derive(Default)]
struct Delta {
    to_parse: BTreeMap<PathBuf, FileRecord>,
    removed: BTreeSet<PathBuf>,
    transient: Vec<FileFailure>,
}

impl IndexContext {
    /// Opens the index for `root` with the default tree-sitter parser.
    pub fn initialize(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        Self::open(
            root,
            IndexOptions {
                config_path: config_path.map(Path::to_path_buf),
                ..IndexOptions::default()
            },
        )
    }

    pub fn open(root: &Path, options: IndexOptions) -> Result<Self> {
        let root = absolutize(root);
        let parser = Arc::new(CppParser::new(&root));
        Self::open_with_parser(&root, options, parser)
    }

    pub fn open_with_parser(
        root: &Path,
        options: IndexOptions,
        parser: Arc<dyn SourceParser>,
    ) -> Result<Self> {
        let root = absolutize(root);
        if !root.is_dir() {
            return Err(IndexerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("project root {} is not a directory", root.display()),
            )));
        }

        let (mut config, config_path) = AnalyzerConfig::load(&root, options.config_path.as_deref());
        if options.max_workers.is_some() {
            config.max_workers = options.max_workers;
        }
        if options.cache_dir.is_some() {
            config.cache_dir = options.cache_dir;
        }

        let identity = ProjectIdentity::new(&root, config_path.as_deref());
        let cache_root = match &config.cache_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(DEFAULT_CACHE_DIR),
        };
        let db_path = cache_root
            .join(identity.cache_dir_name())
            .join(SNAPSHOT_FILENAME);

        let store = SnapshotStore::open(&db_path)?;
        let committed = match store.load() {
            Ok(Some(tables)) => tables,
            Ok(None) => IndexTables::new(),
            Err(e) => {
                tracing::warn!("Discarding unreadable snapshot: {}", e);
                store.clear()?;
                IndexTables::new()
            }
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers.unwrap_or(0))
            .thread_name(|i| format!("cpp-indexer-{}", i))
            .build()
            .map_err(|e| IndexerError::Io(std::io::Error::other(e.to_string())))?;

        tracing::info!(
            "Opened index for {} ({} files, snapshot {})",
            root.display(),
            committed.files.len(),
            db_path.display()
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                walker: SourceWalker::new(&root, &config),
                root,
                identity,
                config,
                parser,
                store,
                pool,
                committed: RwLock::new(committed),
                status: StatusTracker::new(),
                refresh_lock: Mutex::new(()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn identity(&self) -> &ProjectIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.inner.config
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.inner.store.path()
    }

    /// Fails with [`IndexerError::NotInitialized`] until a refresh has committed.
    pub fn require_snapshot(&self) -> Result<()> {
        if self.inner.committed.read().fingerprint.is_some() {
            Ok(())
        } else {
            Err(IndexerError::NotInitialized)
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.status.snapshot()
    }

    pub fn last_progress(&self) -> Result<Option<ProgressRecord>> {
        self.inner.store.read_progress()
    }

    pub fn refresh(&self, mode: RefreshMode) -> Result<ChangeReport> {
        self.refresh_with_cancel(mode, &CancellationToken::new())
    }

    /// Runs a refresh on a blocking thread. The handle resolves to the report
    /// and can cancel the refresh while it parses.
    pub fn spawn_refresh(&self, mode: RefreshMode) -> RefreshHandle {
        let token = CancellationToken::new();
        let context = self.clone();
        let child = token.clone();
        let task = tokio::task::spawn_blocking(move || context.refresh_with_cancel(mode, &child));
        RefreshHandle { task, token }
    }

    pub fn refresh_with_cancel(
        &self,
        mode: RefreshMode,
        cancel: &CancellationToken,
    ) -> Result<ChangeReport> {
        let Some(_running) = self.inner.refresh_lock.try_lock() else {
            return Err(IndexerError::Busy);
        };

        let status = &self.inner.status;
        status.begin();
        let started = Instant::now();

        match self.run_refresh(mode, cancel, started) {
            Ok(report) => {
                status.finish();
                Ok(report)
            }
            Err(e) => {
                let progress = status.progress().snapshot();
                self.write_progress(ProgressRecord {
                    total_files: progress.files_total,
                    indexed_files: progress.files_processed - progress.errors,
                    failed_files: progress.errors,
                    status: ProgressStatus::Interrupted,
                    timestamp: unix_now(),
                });
                if matches!(e, IndexerError::Cancelled) {
                    tracing::info!("Refresh cancelled, committed state unchanged");
                    status.finish();
                } else {
                    tracing::warn!("Refresh failed: {}", e);
                    status.fail(&e.to_string());
                }
                Err(e)
            }
        }
    }

    fn write_progress(&self, record: ProgressRecord) {
        if let Err(e) = self.inner.store.write_progress(&record) {
            tracing::warn!("Could not record progress: {}", e);
        }
    }

    fn run_refresh(
        &self,
        mode: RefreshMode,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ChangeReport> {
        let inner = &self.inner;
        let mut report = ChangeReport::default();

        let database = CompileDatabase::load(&inner.root, &inner.config);
        let guard = ConfigVersionGuard::new(
            ConfigFingerprint {
                compile_database_hash: database.hash().to_string(),
                analyzer_config_hash: inner.config.semantic_hash(),
                schema_version: CURRENT_SCHEMA_VERSION,
            },
            database.entry_hashes(),
        );

        let mut work = inner.committed.read().clone();
        let decision = match mode {
            RefreshMode::Full => ConfigDecision::Reset("full refresh requested".to_string()),
            RefreshMode::Incremental => {
                guard.evaluate(work.fingerprint.as_ref(), &work.compile_args)
            }
        };

        let mut forced = BTreeSet::new();
        match &decision {
            ConfigDecision::Reset(reason) => {
                tracing::info!("Rebuilding index: {}", reason);
                work.clear();
                report.reset = true;
            }
            ConfigDecision::PartialInvalidate(files) => {
                tracing::info!("Compile flags changed for {} files", files.len());
                forced.extend(files.iter().cloned());
            }
            ConfigDecision::NoChange => {}
        }
        let config_unchanged = work.fingerprint.as_ref() == Some(guard.fingerprint())
            && &work.compile_args == guard.entries();
        work.fingerprint = Some(guard.fingerprint().clone());
        work.compile_args = guard.entries().clone();

        let sources = self.collect_sources(&database)?;
        let delta = self.compute_delta(&mut work, &sources, &forced);
        report.transient_errors = delta.transient;
        for failure in &report.transient_errors {
            tracing::warn!("Skipping {}: {}", failure.path.display(), failure.reason);
        }

        let mut merged = MergeOutcome::default();
        for path in &delta.removed {
            tracing::debug!("Removed {}", path.display());
            merged.absorb(work.forget_file(path));
            work.failed.remove(path);
        }
        report.files_removed = delta.removed.len();

        if delta.to_parse.is_empty() && delta.removed.is_empty() && config_unchanged {
            report.elapsed = started.elapsed();
            tracing::info!("Index is up to date");
            return Ok(report);
        }

        let total = delta.to_parse.len();
        inner.status.progress().start(total);
        self.write_progress(ProgressRecord {
            total_files: total,
            indexed_files: 0,
            failed_files: 0,
            status: ProgressStatus::InProgress,
            timestamp: unix_now(),
        });

        inner.status.transition(AnalyzerState::Parsing);
        let outcomes = self.parse_units(&work, delta.to_parse, &sources, &database, cancel);
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }

        inner.status.transition(AnalyzerState::Merging);
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Parsed(unit) => {
                    report.sources_parsed += 1;
                    merged.absorb(Self::apply(&mut work, &unit.source, unit.record, unit.contribution, true));
                    work.failed.remove(&unit.source);
                    for (record, contribution) in unit.headers {
                        let header = record.path.clone();
                        merged.absorb(Self::apply(&mut work, &header, record, contribution, false));
                        report.headers_extracted += 1;
                    }
                }
                UnitOutcome::Failed { source, reason } => {
                    let failure = FileFailure::new(source, &IndexerError::Parse(reason));
                    tracing::warn!("Failed to parse {}: {}", failure.path.display(), failure.reason);
                    work.failed.insert(failure.path.clone(), failure.reason.clone());
                    report.failed_files.push(failure);
                }
                UnitOutcome::Unreadable { source } => {
                    report.transient_errors.push(FileFailure::new(
                        source,
                        &IndexerError::TransientFile("file vanished during refresh".to_string()),
                    ));
                }
                UnitOutcome::Skipped => {}
            }
        }
        merged.absorb(Self::sweep_orphan_headers(&mut work));

        report.files_analyzed = report.sources_parsed + report.headers_extracted;
        report.symbols_added = merged.added;
        report.symbols_updated = merged.updated;
        report.symbols_removed = merged.removed;

        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }

        inner.status.transition(AnalyzerState::Persisting);
        inner.store.save(&work)?;
        *inner.committed.write() = work;

        report.elapsed = started.elapsed();
        self.write_progress(ProgressRecord {
            total_files: total,
            indexed_files: report.sources_parsed,
            failed_files: report.failed_files.len(),
            status: ProgressStatus::Complete,
            timestamp: unix_now(),
        });
        tracing::info!(
            "Refresh complete: {} analyzed ({} sources, {} headers), {} removed, {} failed in {:?}",
            report.files_analyzed,
            report.sources_parsed,
            report.headers_extracted,
            report.files_removed,
            report.failed_files.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Walked sources plus compile-database entries that exist on disk.
    fn collect_sources(&self, database: &CompileDatabase) -> Result<BTreeSet<PathBuf>> {
        let inner = &self.inner;
        let mut sources: BTreeSet<PathBuf> = inner.walker.walk()?.into_iter().collect();
        for file in database.files() {
            if file.is_file() && !inner.config.is_header(file) && !inner.walker.is_excluded(file) {
                sources.insert(file.clone());
            }
        }
        Ok(sources)
    }

    fn compute_delta(
        &self,
        work: &mut IndexTables,
        sources: &BTreeSet<PathBuf>,
        forced: &BTreeSet<PathBuf>,
    ) -> Delta {
        let mut delta = Delta::default();

        let source_prints: Vec<(PathBuf, Fingerprint)> = self.inner.pool.install(|| {
            sources
                .par_iter()
                .map(|path| (path.clone(), fingerprint(path)))
                .collect()
        });
        for (path, print) in source_prints {
            match print {
                Fingerprint::Found(record) => {
                    let known = work.files.get(&path).map(|r| r.content_hash.as_str());
                    let needs_parse = known != Some(record.content_hash.as_str())
                        || !work.is_source(&path)
                        || forced.contains(&path)
                        || work.failed.contains_key(&path);
                    if needs_parse {
                        delta.to_parse.insert(path, record);
                    }
                }
                Fingerprint::NotFound if path.exists() => delta.transient.push(unreadable(path)),
                Fingerprint::NotFound => {
                    if work.is_source(&path) {
                        delta.removed.insert(path);
                    }
                }
            }
        }
        // A file whose first parse failed is only known through `failed`.
        for tracked in work.sources.iter().chain(work.failed.keys()) {
            if !sources.contains(tracked) {
                delta.removed.insert(tracked.clone());
            }
        }

        let mut changed_headers = Vec::new();
        for header in work.headers() {
            match fingerprint(&header) {
                Fingerprint::Found(record) => {
                    let known = work.files.get(&header).map(|r| r.content_hash.as_str());
                    if known != Some(record.content_hash.as_str()) {
                        changed_headers.push(header);
                    }
                }
                Fingerprint::NotFound if header.exists() => delta.transient.push(unreadable(header)),
                Fingerprint::NotFound => {
                    delta.removed.insert(header.clone());
                    changed_headers.push(header);
                }
            }
        }

        // Cascade before any removal touches the graph.
        for header in &changed_headers {
            work.claims.invalidate(header);
            for dependent in work.deps.invalidated_by(header) {
                if delta.to_parse.contains_key(&dependent)
                    || !work.is_source(&dependent)
                    || !sources.contains(&dependent)
                {
                    continue;
                }
                if let Some(record) = fingerprint(&dependent).record() {
                    tracing::debug!("{} invalidated by {}", dependent.display(), header.display());
                    delta.to_parse.insert(dependent, record);
                }
            }
        }

        delta
    }

    fn parse_units(
        &self,
        work: &IndexTables,
        to_parse: BTreeMap<PathBuf, FileRecord>,
        sources: &BTreeSet<PathBuf>,
        database: &CompileDatabase,
        cancel: &CancellationToken,
    ) -> Vec<UnitOutcome> {
        let inner = &self.inner;
        let units: Vec<(PathBuf, FileRecord)> = to_parse.into_iter().collect();

        inner.pool.install(|| {
            units
                .into_par_iter()
                .map(|(source, record)| {
                    if cancel.is_cancelled() {
                        return UnitOutcome::Skipped;
                    }
                    inner.status.set_current_file(&source);

                    let args = database.args_for(&source);
                    let claims = UnitClaims::new(&work.claims, sources);
                    let output = inner.parser.parse(&source, &args, &claims);
                    if output.fatal {
                        claims.revoke();
                        inner.status.progress().inc_error();
                        if !source.exists() {
                            return UnitOutcome::Unreadable { source };
                        }
                        return UnitOutcome::Failed {
                            reason: output.failure_reason(),
                            source,
                        };
                    }
                    for diagnostic in &output.diagnostics {
                        tracing::debug!(
                            "{}:{}: {}",
                            diagnostic.file.display(),
                            diagnostic.line,
                            diagnostic.message
                        );
                    }

                    let mut contributions = output.into_contributions();
                    let contribution = contributions.remove(&source).unwrap_or_default();
                    let mut symbols = contribution.symbols.len();

                    let headers: Vec<(FileRecord, FileContribution)> = claims
                        .into_extracted()
                        .into_iter()
                        .map(|record| {
                            let contribution =
                                contributions.remove(&record.path).unwrap_or_default();
                            symbols += contribution.symbols.len();
                            (record, contribution)
                        })
                        .collect();

                    inner.status.progress().inc(symbols);
                    UnitOutcome::Parsed(ParsedUnit {
                        source,
                        record,
                        contribution,
                        headers,
                    })
                })
                .collect()
        })
    }

    fn apply(
        work: &mut IndexTables,
        path: &Path,
        record: FileRecord,
        contribution: FileContribution,
        is_source: bool,
    ) -> MergeOutcome {
        let outcome = work.symbols.merge(path, contribution.symbols);
        work.calls.record_edges(path, contribution.call_edges);
        work.deps.set_edges(path, contribution.includes);
        work.files.insert(path.to_path_buf(), record);
        if is_source {
            work.sources.insert(path.to_path_buf());
        }
        outcome
    }

    /// Drops tracked headers nothing includes any more.
    fn sweep_orphan_headers(work: &mut IndexTables) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        loop {
            let orphans: Vec<PathBuf> = work
                .headers()
                .into_iter()
                .filter(|h| work.deps.includers_of(h).is_empty())
                .collect();
            if orphans.is_empty() {
                return outcome;
            }
            for header in orphans {
                tracing::debug!("Dropping unreferenced header {}", header.display());
                outcome.absorb(work.forget_file(&header));
                work.failed.remove(&header);
            }
        }
    }

    /// Deletes the snapshot and every in-memory table.
    pub fn clear(&self) -> Result<()> {
        let Some(_running) = self.inner.refresh_lock.try_lock() else {
            return Err(IndexerError::Busy);
        };
        self.inner.store.clear()?;
        self.inner.committed.write().clear();
        tracing::info!("Index cleared");
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        self.inner.committed.read().stats()
    }

    pub fn symbol(&self, id: &str) -> Option<SymbolRecord> {
        self.inner.committed.read().symbols.get(id).cloned()
    }

    pub fn symbols_by_name(&self, name: &str) -> Vec<SymbolRecord> {
        self.inner
            .committed
            .read()
            .symbols
            .by_name(name)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn file_symbols(&self, path: &Path) -> Vec<SymbolRecord> {
        let path = absolutize(path);
        self.inner
            .committed
            .read()
            .symbols
            .file_symbols(&path)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Records of the callers of `id`. Edges to symbols not in the store are skipped.
    pub fn callers(&self, id: &str) -> Vec<SymbolRecord> {
        let tables = self.inner.committed.read();
        tables
            .calls
            .caller_ids(id)
            .iter()
            .filter_map(|caller| tables.symbols.get(caller).cloned())
            .collect()
    }

    pub fn callees(&self, id: &str) -> Vec<SymbolRecord> {
        let tables = self.inner.committed.read();
        tables
            .calls
            .callee_ids(id)
            .iter()
            .filter_map(|callee| tables.symbols.get(callee).cloned())
            .collect()
    }

    /// Call paths from `from` to `to`, shortest first, at most `max_depth` edges long.
    pub fn paths(&self, from: &str, to: &str, max_depth: usize) -> Vec<Vec<SymbolRecord>> {
        let tables = self.inner.committed.read();
        tables
            .calls
            .paths(from, to, max_depth)
            .into_iter()
            .filter_map(|path| {
                path.iter()
                    .map(|id| tables.symbols.get(id).cloned())
                    .collect::<Option<Vec<_>>>()
            })
            .collect()
    }

    /// Tracked files and whether each is a translation unit, sorted.
    pub fn tracked_files(&self) -> Vec<(PathBuf, bool)> {
        let tables = self.inner.committed.read();
        tables
            .files
            .keys()
            .map(|path| (path.clone(), tables.is_source(path)))
            .collect()
    }

    pub fn failed_files(&self) -> Vec<FileFailure> {
        self.inner
            .committed
            .read()
            .failed
            .iter()
            .map(|(path, reason)| FileFailure {
                path: path.clone(),
                reason: reason.clone(),
            })
            .collect()
    }

    pub fn includes_of(&self, path: &Path) -> Vec<PathBuf> {
        self.inner.committed.read().deps.includes_of(&absolutize(path))
    }

    /// Files that must be re-parsed when `path` changes, `path` included.
    pub fn dependents_of(&self, path: &Path) -> BTreeSet<PathBuf> {
        self.inner
            .committed
            .read()
            .deps
            .invalidated_by(&absolutize(path))
    }
}

fn unreadable(path: PathBuf) -> FileFailure {
    FileFailure::new(path, &IndexerError::TransientFile("unreadable".to_string()))
}

/// A refresh running on the blocking pool.
pub struct RefreshHandle {
    task: JoinHandle<Result<ChangeReport>>,
    token: CancellationToken,
}

impl RefreshHandle {
    /// Stops dispatching parse work. In-flight parses finish and the whole
    /// refresh is discarded; the handle then resolves to [`IndexerError::Cancelled`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for RefreshHandle {
    type Output = Result<ChangeReport>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(Err(IndexerError::Cancelled)),
        }
    }
}
