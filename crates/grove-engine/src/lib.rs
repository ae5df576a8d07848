//! Grove engine: resolution, sync, transactions and queries over the code graph

pub mod engine;
pub mod error;
pub mod query;
pub mod resolve;
pub mod sync;
pub mod transaction;
pub mod watcher;
pub mod workspace;

#[cfg(test)]
mod tests;

pub use engine::Engine;
pub use error::SyncError;
pub use query::{GraphStats, ImportInfo, Reached, SearchHit, SearchScope, Snapshot, Usage};
pub use sync::DiskOp;
pub use transaction::{
    CommitInfo, EditTransaction, FileAddTransaction, FileRemoveTransaction,
    FileRenameTransaction, RejectReason, Rejection, Transaction, TransactionHandle,
    TransactionId, TransactionResult, TransactionState,
};
pub use watcher::{FileWatcher, WatchBridge, WatchEvent, plan_transaction};
pub use workspace::{AppliedEdit, SourceFile, Workspace};
