use grove_core::Language;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("no grammar for {} files", .0.name())]
    UnsupportedLanguage(Language),

    #[error("failed to load grammar: {0}")]
    Grammar(String),

    #[error("parser pool is shut down")]
    PoolClosed,

    #[error("parser gave up on {0}")]
    Cancelled(String),

    #[error("parse task failed: {0}")]
    Join(String),
}
