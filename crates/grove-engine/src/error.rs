use grove_core::{ConfigError, GraphError};
use grove_indexer::SyntaxError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures inside the sync engine. Any of these aborts the transaction
/// being applied; the previously committed workspace stays in place.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("post-condition violated: {0}")]
    Inconsistent(String),

    #[error("{} is not part of the workspace", .0.display())]
    UnknownFile(PathBuf),
}
