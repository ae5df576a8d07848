//! Engine facade: owns the committed workspace and the transaction path
//!
//! Readers take a [`Snapshot`] (a clone of the committed `Arc<Workspace>`),
//! so queries run concurrently with each other and with queued work, and
//! never see a batch that is still applying.

use crate::error::SyncError;
use crate::query::Snapshot;
use crate::sync::Syncer;
use crate::transaction::{
    RejectReason, Rejection, Transaction, TransactionHandle, TransactionId, TransactionManager,
    TransactionResult, TransactionState, project_path,
};
use crate::workspace::Workspace;
use anyhow::Context;
use grove_core::{ConfigError, EngineConfig, Language};
use grove_indexer::{Cst, FileFacts, ParserPool, SyntaxError, extract};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Handle to a running engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    manager: Arc<TransactionManager>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.config.root)
            .field("sequence", &self.manager.current().sequence())
            .finish()
    }
}

impl Engine {
    /// Empty engine; files arrive through transactions.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = ParserPool::new(config.parser_workers());
        Ok(Self::with_workspace(Arc::new(config), pool, Workspace::new()))
    }

    fn with_workspace(config: Arc<EngineConfig>, pool: ParserPool, workspace: Workspace) -> Self {
        let committed = Arc::new(RwLock::new(Arc::new(workspace)));
        let manager = Arc::new(TransactionManager::new(config.clone(), pool, committed));
        Engine { config, manager }
    }

    /// Build the graph for an in-memory set of sources. Paths are project
    /// relative; files of unsupported languages are skipped.
    pub fn from_sources<P, S, I>(config: EngineConfig, sources: I) -> Result<Self, SyncError>
    where
        P: Into<PathBuf>,
        S: Into<String>,
        I: IntoIterator<Item = (P, S)>,
    {
        config.validate()?;
        let pool = ParserPool::new(config.parser_workers());

        let mut sources: Vec<(PathBuf, Arc<str>)> = sources
            .into_iter()
            .filter_map(|(path, text)| {
                let path: PathBuf = path.into();
                let project = project_path(&config.root, &path)?;
                Some((project, Arc::from(text.into())))
            })
            .filter(|(path, _)| {
                let supported = Language::from_path(path).is_supported();
                if !supported {
                    debug!("Skipping {}: unsupported language", path.display());
                }
                supported
            })
            .collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        sources.dedup_by(|a, b| a.0 == b.0);

        let parsed: Vec<(PathBuf, Result<(Cst, FileFacts), SyntaxError>)> = sources
            .into_par_iter()
            .map(|(path, text)| {
                let result = pool
                    .parse_file(&path, Language::from_path(&path), text)
                    .map(|cst| {
                        let facts = extract(&cst);
                        (cst, facts)
                    });
                (path, result)
            })
            .collect();

        let mut workspace = Workspace::new();
        {
            let mut syncer = Syncer::new(&mut workspace, &pool, &config);
            for (path, result) in parsed {
                let (cst, facts) = result?;
                syncer.install(&path, cst, facts, &[])?;
            }
            syncer.converge()?;
        }
        info!(
            "Indexed {} files: {} nodes, {} edges",
            workspace.files().count(),
            workspace.graph().node_count(),
            workspace.graph().edge_count()
        );
        Ok(Self::with_workspace(Arc::new(config), pool, workspace))
    }

    /// Walk `config.root` (respecting `.gitignore` and `exclude`) and index
    /// every supported source file.
    pub fn open(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid engine configuration")?;
        let root = config.root.clone();
        let sources = discover(&config)
            .with_context(|| format!("failed to scan {}", root.display()))?;
        info!("Loading {} source files from {}", sources.len(), root.display());
        Self::from_sources(config, sources)
            .with_context(|| format!("failed to index {}", root.display()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last committed state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.manager.current(), self.config.default_dependency_depth)
    }

    /// Queue a transaction without applying it.
    pub fn enqueue(&self, transaction: impl Into<Transaction>) -> TransactionHandle {
        self.manager.enqueue(transaction.into())
    }

    /// Submit and block until the transaction is committed or rejected.
    pub fn submit(&self, transaction: impl Into<Transaction>) -> TransactionResult {
        self.enqueue(transaction).wait()
    }

    /// Queue several transactions and apply them as one batch, in priority
    /// order. Results come back in submission order.
    pub fn submit_batch<I>(&self, transactions: I) -> Vec<TransactionResult>
    where
        I: IntoIterator,
        I::Item: Into<Transaction>,
    {
        let handles: Vec<TransactionHandle> =
            transactions.into_iter().map(|t| self.enqueue(t)).collect();
        self.manager.drain();
        handles.into_iter().map(TransactionHandle::wait).collect()
    }

    /// Submit from async code; parsing and resolution run on the blocking pool.
    pub async fn submit_async(&self, transaction: impl Into<Transaction>) -> TransactionResult {
        let handle = self.enqueue(transaction);
        let id = handle.id();
        match tokio::task::spawn_blocking(move || handle.wait()).await {
            Ok(result) => result,
            Err(error) => {
                warn!("Submission task for {} failed: {}", id, error);
                TransactionResult::Rejected(Rejection {
                    id,
                    reason: RejectReason::Cancelled,
                    message: format!(
                        "submission task failed in state {:?}",
                        self.manager.status(id)
                    ),
                })
            }
        }
    }

    /// Apply everything queued. Returns the number of transactions handled.
    pub fn process_pending(&self) -> usize {
        self.manager.drain()
    }

    /// Cancel a transaction that has not started validating.
    pub fn cancel(&self, id: TransactionId) -> bool {
        self.manager.cancel(id)
    }

    pub fn status(&self, id: TransactionId) -> Option<TransactionState> {
        self.manager.status(id)
    }

    /// Re-run the sync engine on a file's current content and return the
    /// number of graph mutations that caused. A converged graph yields zero.
    pub fn resync(&self, path: impl AsRef<Path>) -> Result<usize, SyncError> {
        let path = project_path(&self.config.root, path.as_ref())
            .ok_or_else(|| SyncError::UnknownFile(path.as_ref().to_path_buf()))?;
        self.manager.resync(&path)
    }
}

/// Supported source files under the configured root, as project-relative
/// paths with their content.
fn discover(config: &EngineConfig) -> anyhow::Result<Vec<(PathBuf, String)>> {
    let exclude = config.exclude_set()?;
    let mut sources = Vec::new();
    for entry in ignore::WalkBuilder::new(&config.root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .build()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("Walk error: {}", error);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&config.root) else {
            continue;
        };
        if exclude.is_match(relative) || !Language::from_path(relative).is_supported() {
            continue;
        }
        match std::fs::read_to_string(entry.path()) {
            Ok(text) => sources.push((relative.to_path_buf(), text)),
            Err(error) => warn!("Skipping {}: {}", entry.path().display(), error),
        }
    }
    Ok(sources)
}
