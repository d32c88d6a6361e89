use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use cpp_indexer::config::CONFIG_FILENAME;
use cpp_indexer::error::{IndexerError, Result};
use cpp_indexer::indexer::{FileEvent, FileWatcher};
use cpp_indexer::{ChangeReport, IndexContext, IndexOptions, RefreshMode, SymbolRecord};

#[derive(Parser)]
#[command(name = "cpp-indexer")]
#[command(about = "Incremental C/C++ symbol and call-graph indexer")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Index the current project (incremental after the first run)
    cpp-indexer index

    # Rebuild from scratch using four workers
    cpp-indexer index ./engine --full --jobs 4

    # Keep the index fresh while editing
    cpp-indexer index --watch

    # Who calls this function?
    cpp-indexer callers "ns::process"

    # Call chains between two functions
    cpp-indexer paths main "ns::helper" --depth 5

    # Show refresh state and the last progress record
    cpp-indexer status
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root
    #[arg(long, short = 'C', global = true, default_value = ".")]
    pub root: PathBuf,

    /// Analyzer config file (defaults to cpp-analyzer-config.json in the root)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the snapshot cache
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring the index up to date with the tree
    Index {
        /// Project root (overrides --root)
        path: Option<PathBuf>,

        /// Discard the cached index and re-parse everything
        #[arg(long)]
        full: bool,

        /// Watch for file changes and refresh after each batch
        #[arg(long)]
        watch: bool,

        /// Number of parser workers (defaults to the number of CPUs)
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
    },

    /// Show refresh state and the last progress record
    Status,

    /// Find symbols by short or qualified name
    Symbols {
        name: String,
    },

    /// List the symbols a file contributes
    Outline {
        file: PathBuf,
    },

    /// List the callers of a function (name or id)
    Callers {
        function: String,
    },

    /// List the callees of a function (name or id)
    Callees {
        function: String,
    },

    /// Find call chains from one function to another
    Paths {
        from: String,
        to: String,

        /// Maximum number of calls in a chain
        #[arg(long, default_value = "6")]
        depth: usize,
    },

    /// Show index statistics
    Stats,

    /// Delete the cached index
    Clear,
}

impl Cli {
    pub fn open(&self, root: Option<&Path>, jobs: Option<usize>) -> Result<IndexContext> {
        IndexContext::open(
            root.unwrap_or(self.root.as_path()),
            IndexOptions {
                config_path: self.config.clone(),
                max_workers: jobs,
                cache_dir: self.cache_dir.clone(),
            },
        )
    }
}

pub async fn index_project(context: &IndexContext, full: bool, watch: bool) -> Result<()> {
    let mode = if full {
        RefreshMode::Full
    } else {
        RefreshMode::Incremental
    };
    let report = refresh_with_progress(context, mode).await?;
    print_report(&report);

    if watch {
        watch_project(context).await?;
    }
    Ok(())
}

async fn refresh_with_progress(context: &IndexContext, mode: RefreshMode) -> Result<ChangeReport> {
    let pb = ProgressBar::new(0);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }

    let mut handle = context.spawn_refresh(mode);
    let token = handle.cancellation_token();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let result = loop {
        tokio::select! {
            result = &mut handle => break result,
            _ = tokio::signal::ctrl_c() => {
                pb.set_message("cancelling...");
                token.cancel();
            }
            _ = ticker.tick() => {
                let status = context.status();
                pb.set_length(status.progress.files_total as u64);
                pb.set_position(status.progress.files_processed as u64);
                if let Some(file) = status.current_file {
                    let name = file.file_name().map(|n| n.to_string_lossy().into_owned());
                    pb.set_message(name.unwrap_or_default());
                }
            }
        }
    };
    pb.finish_and_clear();
    result
}

async fn watch_project(context: &IndexContext) -> Result<()> {
    println!("Watching {} for changes...", context.root().display());

    let context = context.clone();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<FileEvent>>(16);
    let root = context.root().to_path_buf();
    let config = context.config().clone();
    let cache_dir = context.snapshot_path().and_then(Path::parent).map(Path::to_path_buf);

    std::thread::spawn(move || {
        let watcher = match FileWatcher::new(&root) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!("{}", e);
                return;
            }
        };
        let relevant = |path: &Path| {
            let in_cache = cache_dir.as_ref().map(|dir| path.starts_with(dir)).unwrap_or(false);
            !in_cache
                && (config.is_source(path)
                    || config.is_header(path)
                    || path.ends_with(CONFIG_FILENAME)
                    || path.ends_with("compile_commands.json"))
        };
        while let Some(events) = watcher.recv(&relevant) {
            if !events.is_empty() && tx.blocking_send(events).is_err() {
                break;
            }
        }
    });

    while let Some(events) = rx.recv().await {
        for event in &events {
            match event {
                FileEvent::Modified(path) => tracing::debug!("Changed {}", path.display()),
                FileEvent::Deleted(path) => tracing::debug!("Deleted {}", path.display()),
            }
        }
        match context.spawn_refresh(RefreshMode::Incremental).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => print_report(&report),
            Err(IndexerError::Busy) => tracing::debug!("Refresh already running"),
            Err(e) => eprintln!("Refresh failed: {}", e),
        }
    }
    Err(IndexerError::Watcher("watcher stopped".to_string()))
}

fn print_report(report: &ChangeReport) {
    if report.reset {
        println!("Rebuilt index from scratch");
    }
    println!(
        "Analyzed {} files ({} sources, {} headers), removed {} in {:.2?}",
        report.files_analyzed,
        report.sources_parsed,
        report.headers_extracted,
        report.files_removed,
        report.elapsed
    );
    println!(
        "Symbols: +{} ~{} -{}",
        report.symbols_added, report.symbols_updated, report.symbols_removed
    );
    for failure in &report.failed_files {
        println!("  failed: {} ({})", failure.path.display(), failure.reason);
    }
    for failure in &report.transient_errors {
        println!("  skipped: {} ({})", failure.path.display(), failure.reason);
    }
}

pub fn show_status(context: &IndexContext) -> Result<()> {
    let status = context.status();
    println!("State: {}", status.state.as_str());
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error);
    }
    match context.last_progress()? {
        Some(progress) => println!(
            "Last refresh: {} ({}/{} indexed, {} failed, at {})",
            progress.status.as_str(),
            progress.indexed_files,
            progress.total_files,
            progress.failed_files,
            progress.timestamp
        ),
        None => println!("No refresh recorded"),
    }
    for failure in context.failed_files() {
        println!("  failed: {} ({})", failure.path.display(), failure.reason);
    }
    Ok(())
}

fn print_symbol(symbol: &SymbolRecord) {
    println!(
        "{:<24} {}  {}:{}",
        symbol.kind.as_str(),
        symbol.qualified_name,
        symbol.defining_file.display(),
        symbol.start_line
    );
    println!("    {}", symbol.id);
}

/// Symbols matching `query` as an id first, then as a name.
fn resolve_function(context: &IndexContext, query: &str) -> Vec<SymbolRecord> {
    if let Some(symbol) = context.symbol(query) {
        return vec![symbol];
    }
    context
        .symbols_by_name(query)
        .into_iter()
        .filter(|s| s.kind.is_callable())
        .collect()
}

pub fn find_symbols(context: &IndexContext, name: &str) -> Result<()> {
    context.require_snapshot()?;
    let symbols = context.symbols_by_name(name);
    if symbols.is_empty() {
        println!("No symbols named '{}'", name);
    }
    for symbol in &symbols {
        print_symbol(symbol);
    }
    Ok(())
}

pub fn show_outline(context: &IndexContext, file: &Path) -> Result<()> {
    context.require_snapshot()?;
    let mut symbols = context.file_symbols(file);
    symbols.sort_by_key(|s| s.start_line);
    for symbol in &symbols {
        print_symbol(symbol);
    }
    Ok(())
}

pub fn show_callers(context: &IndexContext, function: &str, callees: bool) -> Result<()> {
    context.require_snapshot()?;
    let targets = resolve_function(context, function);
    if targets.is_empty() {
        println!("No function '{}'", function);
        return Ok(());
    }
    for target in &targets {
        let related = if callees {
            context.callees(&target.id)
        } else {
            context.callers(&target.id)
        };
        println!(
            "{} of {} ({}):",
            if callees { "Callees" } else { "Callers" },
            target.qualified_name,
            related.len()
        );
        for symbol in &related {
            print_symbol(symbol);
        }
    }
    Ok(())
}

pub fn show_paths(context: &IndexContext, from: &str, to: &str, depth: usize) -> Result<()> {
    context.require_snapshot()?;
    let mut found = 0;
    for source in resolve_function(context, from) {
        for target in resolve_function(context, to) {
            for path in context.paths(&source.id, &target.id, depth) {
                found += 1;
                let chain: Vec<&str> = path.iter().map(|s| s.qualified_name.as_str()).collect();
                println!("{}", chain.join(" -> "));
            }
        }
    }
    if found == 0 {
        println!("No call path from '{}' to '{}' within {} calls", from, to, depth);
    }
    Ok(())
}

pub fn show_stats(context: &IndexContext) -> Result<()> {
    context.require_snapshot()?;
    let stats = context.stats();

    println!("Index Statistics:");
    println!("  Files: {}", stats.files);
    println!("  Symbols: {}", stats.symbols);
    println!("  Headers tracked: {}", stats.headers_tracked);
    println!("  Call edges: {}", stats.call_edges);
    println!("  Include edges: {}", stats.dependency_edges);
    println!("  Failed files: {}", stats.failed_files);
    if let Some(path) = context.snapshot_path() {
        println!("  Snapshot: {}", path.display());
    }
    Ok(())
}

pub fn clear_index(context: &IndexContext) -> Result<()> {
    context.clear()?;
    println!("Index cleared");
    Ok(())
}
