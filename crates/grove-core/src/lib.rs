//! Grove Core: graph data model, name index, mutation journal and configuration

pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod model;
pub mod symbols;

#[cfg(test)]
pub mod tests;

#[cfg(test)]
pub mod test_utils;

pub use config::{EngineConfig, LanguageConfig, ResolutionStep};
pub use diff::{EdgeKey, GraphDelta};
pub use error::{ConfigError, GraphError};
pub use graph::Graph;
pub use model::{
    display_path, normalize_path, ByteRange, EdgeKind, EdgeSource, GraphEdge, GraphNode,
    ImportBinding, Language, NodeDetail, NodeId, NodeKind, Point, SourceRange,
};
pub use symbols::SymbolTable;
