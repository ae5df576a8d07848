//! Grove: an incrementally maintained semantic graph of a codebase
//!
//! The graph model and configuration live in `grove-core`, parsing and
//! fact extraction in `grove-indexer`, and resolution, sync, transactions
//! and queries in `grove-engine`. This crate re-exports the public surface.

use anyhow::Context;
use std::path::Path;

pub use grove_core::{
    ByteRange, ConfigError, EdgeKind, EdgeSource, EngineConfig, GraphDelta, GraphEdge, GraphError,
    GraphNode, ImportBinding, Language, LanguageConfig, NodeDetail, NodeId, NodeKind,
    ResolutionStep,
};
pub use grove_engine::{
    CommitInfo, EditTransaction, Engine, FileAddTransaction, FileRemoveTransaction,
    FileRenameTransaction, GraphStats, ImportInfo, Reached, RejectReason, Rejection, SearchHit,
    SearchScope, Snapshot, SourceFile, SyncError, Transaction, TransactionHandle, TransactionId,
    TransactionResult, TransactionState, Usage, WatchBridge,
};
pub use grove_indexer::SyntaxError;

/// Per-project configuration file looked up by [`open_project`].
pub const CONFIG_FILE: &str = "grove.toml";

/// Index the project at `root`, using `root/grove.toml` when present.
pub fn open_project(root: impl AsRef<Path>) -> anyhow::Result<Engine> {
    let root = root.as_ref();
    let config_path = root.join(CONFIG_FILE);
    let config = if config_path.is_file() {
        tracing::info!("Using configuration from {}", config_path.display());
        EngineConfig::load(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        EngineConfig::for_root(root)
    };
    Engine::open(config)
}
