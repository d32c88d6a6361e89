pub mod config;
pub mod error;
pub mod index;
pub mod indexer;

pub use config::{AnalyzerConfig, ProjectIdentity};
pub use error::{IndexerError, Result};
pub use index::{
    CallEdge, ChangeReport, ConfigFingerprint, FileFailure, FileRecord, IndexStats, ProgressRecord,
    ProgressStatus, RefreshMode, SymbolKind, SymbolRecord,
};
pub use indexer::{
    AnalyzerState, CppParser, IndexContext, IndexOptions, RefreshHandle, SourceParser,
    StatusSnapshot,
};
