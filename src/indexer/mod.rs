pub mod compile_commands;
pub mod config_guard;
pub mod extractor;
pub mod fingerprint;
pub mod header_claims;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod walker;
pub mod watcher;

pub use compile_commands::{CompileDatabase, CompileEntry};
pub use config_guard::{ConfigDecision, ConfigVersionGuard};
pub use extractor::CppParser;
pub use fingerprint::{fingerprint, Fingerprint};
pub use header_claims::{ClaimGuard, ClaimOutcome, ClaimState, HeaderClaimTracker};
pub use orchestrator::{IndexContext, IndexOptions, RefreshHandle};
pub use parser::{
    CallSite, Diagnostic, ExtractAll, FileContribution, HeaderGate, Inclusion, ParseOutput,
    ParsedSymbol, SourceParser,
};
pub use progress::{AnalyzerState, IndexingProgress, ProgressSnapshot, StatusSnapshot, StatusTracker};
pub use walker::SourceWalker;
pub use watcher::{FileEvent, FileWatcher};
