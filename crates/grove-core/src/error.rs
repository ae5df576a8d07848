//! Error types for the graph model and configuration

use crate::diff::EdgeKey;
use crate::model::NodeId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),

    #[error("edge {0:?} references a missing node")]
    DanglingEdge(EdgeKey),

    #[error("index out of sync: {0}")]
    IndexMismatch(String),

    #[error("invalid graph operation: {0}")]
    InvalidOperation(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid exclude pattern `{pattern}`: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
