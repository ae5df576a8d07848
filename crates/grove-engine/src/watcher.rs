//! Filesystem watcher bridge
//!
//! Turns `notify` events into transactions and submits them through the
//! public transaction API. The bridge only ever sees snapshots; it never
//! holds on to engine state.

use crate::engine::Engine;
use crate::query::Snapshot;
use crate::transaction::{
    EditTransaction, FileAddTransaction, FileRemoveTransaction, Transaction, TransactionResult,
    project_path,
};
use anyhow::{Context, Result};
use globset::GlobSet;
use grove_core::{ByteRange, Language};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File or directory created
    Created(PathBuf),
    /// File or directory modified
    Modified(PathBuf),
    /// File or directory removed
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// File system watcher for monitoring source changes
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
}

impl FileWatcher {
    pub fn new() -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    Self::handle_notify_event(event, &event_tx);
                }
                Err(e) => {
                    error!("File system watch error: {}", e);
                }
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
        })
    }

    /// Handle a notify event and convert to our watch events
    fn handle_notify_event(event: notify::Event, event_tx: &mpsc::UnboundedSender<WatchEvent>) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            if should_ignore_path(&path) {
                continue;
            }
            if let Err(e) = event_tx.send(make(path)) {
                warn!("Failed to forward watch event: {}", e);
            }
        }
    }

    /// Watch a directory recursively
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {:?}", path);

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    /// Stop watching a path
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Stopping watch for: {:?}", path);

        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }
}

/// Feeds filesystem changes under the engine's root into its transaction
/// queue.
pub struct WatchBridge {
    engine: Engine,
    watcher: FileWatcher,
    exclude: GlobSet,
}

impl WatchBridge {
    /// Start watching `engine.config().root`.
    pub fn new(engine: Engine) -> Result<Self> {
        let exclude = engine
            .config()
            .exclude_set()
            .context("invalid exclude patterns")?;
        let mut watcher = FileWatcher::new()?;
        let root = engine.config().root.clone();
        watcher
            .watch_directory(&root)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        Ok(WatchBridge {
            engine,
            watcher,
            exclude,
        })
    }

    /// Process events until the watcher shuts down.
    pub async fn run(self) -> Result<()> {
        let WatchBridge {
            engine,
            mut watcher,
            exclude,
        } = self;
        info!("Watch bridge running for {:?}", engine.config().root);
        loop {
            let Some(event) = watcher.event_receiver().recv().await else {
                break;
            };
            if let Some(TransactionResult::Rejected(rejection)) =
                handle_event(&engine, &exclude, event).await
            {
                warn!(
                    "Watcher transaction {} rejected: {} ({})",
                    rejection.id, rejection.message, rejection.reason
                );
            }
        }
        info!("Watch bridge stopped");
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn handle_event(
    engine: &Engine,
    exclude: &GlobSet,
    event: WatchEvent,
) -> Option<TransactionResult> {
    let relative = project_path(&engine.config().root, event.path())?;
    if exclude.is_match(&relative) || !Language::from_path(&relative).is_supported() {
        return None;
    }
    let content = match &event {
        WatchEvent::Removed(_) => None,
        WatchEvent::Created(path) | WatchEvent::Modified(path) => {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => Some(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    return None;
                }
            }
        }
    };
    let transaction = plan_transaction(&relative, content, &engine.snapshot())?;
    debug!("Watcher submitting {} for {}", transaction.kind(), relative.display());
    Some(engine.submit_async(transaction).await)
}

/// The transaction that brings the engine in line with the file's content
/// on disk (`None` when the file is gone). Returns `None` when nothing
/// needs to change, e.g. for writes the engine made itself.
pub fn plan_transaction(
    path: &Path,
    content: Option<String>,
    snapshot: &Snapshot,
) -> Option<Transaction> {
    let current = snapshot.source(path);
    match (current, content) {
        (Some(_), None) => Some(FileRemoveTransaction::new(path).into()),
        (None, None) => None,
        (None, Some(content)) => Some(FileAddTransaction::new(path, content).into()),
        (Some(file), Some(content)) => {
            let text = file.text();
            if **text == *content {
                return None;
            }
            let whole = ByteRange::new(0, text.len());
            Some(
                EditTransaction::new(path, whole, content)
                    .based_on(snapshot.sequence())
                    .into(),
            )
        }
    }
}

/// Check if a path should be ignored (e.g., target/, .git/, etc.)
fn should_ignore_path(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some("target" | ".git" | "node_modules")
        )
    })
}
