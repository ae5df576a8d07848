//! Transactions: prioritized requests to change files, applied atomically
//!
//! Lifecycle: `Queued → Validating → Applying → Committed`, or
//! `Queued → Validating → Rejected`. A queued transaction can also be
//! cancelled, which rejects it without validating.

use crate::error::SyncError;
use crate::sync::{DiskOp, Syncer};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use grove_core::{ByteRange, EngineConfig, Language, NodeId, normalize_path};
use grove_indexer::{ParserPool, SyntaxError, TextEdit};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Replace `range` of `file` with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTransaction {
    pub file: PathBuf,
    pub range: ByteRange,
    pub new_text: String,
    pub priority: i32,
    /// Sequence of the snapshot `range` was computed against. Without one,
    /// the range is checked against the content committed when it was queued.
    pub base_sequence: Option<u64>,
}

impl EditTransaction {
    pub fn new(file: impl Into<PathBuf>, range: ByteRange, new_text: impl Into<String>) -> Self {
        EditTransaction {
            file: file.into(),
            range,
            new_text: new_text.into(),
            priority: 0,
            base_sequence: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn based_on(mut self, sequence: u64) -> Self {
        self.base_sequence = Some(sequence);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAddTransaction {
    pub path: PathBuf,
    pub content: String,
    pub priority: i32,
}

impl FileAddTransaction {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        FileAddTransaction {
            path: path.into(),
            content: content.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRemoveTransaction {
    pub path: PathBuf,
    pub priority: i32,
}

impl FileRemoveTransaction {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileRemoveTransaction {
            path: path.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRenameTransaction {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub priority: i32,
}

impl FileRenameTransaction {
    pub fn new(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        FileRenameTransaction {
            old_path: old_path.into(),
            new_path: new_path.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Edit(EditTransaction),
    Add(FileAddTransaction),
    Remove(FileRemoveTransaction),
    Rename(FileRenameTransaction),
}

impl Transaction {
    pub fn priority(&self) -> i32 {
        match self {
            Transaction::Edit(t) => t.priority,
            Transaction::Add(t) => t.priority,
            Transaction::Remove(t) => t.priority,
            Transaction::Rename(t) => t.priority,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Edit(_) => "edit",
            Transaction::Add(_) => "add",
            Transaction::Remove(_) => "remove",
            Transaction::Rename(_) => "rename",
        }
    }

    /// Primary path the transaction is about.
    pub fn path(&self) -> &Path {
        match self {
            Transaction::Edit(t) => &t.file,
            Transaction::Add(t) => &t.path,
            Transaction::Remove(t) => &t.path,
            Transaction::Rename(t) => &t.old_path,
        }
    }
}

impl From<EditTransaction> for Transaction {
    fn from(t: EditTransaction) -> Self {
        Transaction::Edit(t)
    }
}

impl From<FileAddTransaction> for Transaction {
    fn from(t: FileAddTransaction) -> Self {
        Transaction::Add(t)
    }
}

impl From<FileRemoveTransaction> for Transaction {
    fn from(t: FileRemoveTransaction) -> Self {
        Transaction::Remove(t)
    }
}

impl From<FileRenameTransaction> for Transaction {
    fn from(t: FileRenameTransaction) -> Self {
        Transaction::Rename(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransactionState {
    Queued,
    Validating,
    Applying,
    Committed,
    Rejected,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Rejected)
    }
}

/// Machine-readable rejection cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RejectReason {
    FileNotFound,
    FileExists,
    InvalidPath,
    InvalidRange,
    StaleRange,
    UnsupportedLanguage,
    Cancelled,
    Inconsistent,
    Io,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::FileNotFound => "file_not_found",
            RejectReason::FileExists => "file_exists",
            RejectReason::InvalidPath => "invalid_path",
            RejectReason::InvalidRange => "invalid_range",
            RejectReason::StaleRange => "stale_range",
            RejectReason::UnsupportedLanguage => "unsupported_language",
            RejectReason::Cancelled => "cancelled",
            RejectReason::Inconsistent => "inconsistent",
            RejectReason::Io => "io",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitInfo {
    pub id: TransactionId,
    /// Workspace sequence number after this commit.
    pub sequence: u64,
    /// Nodes added, removed or modified, including both ends of changed edges.
    pub changed: BTreeSet<NodeId>,
    pub mutations: usize,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub id: TransactionId,
    pub reason: RejectReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TransactionResult {
    Committed(CommitInfo),
    Rejected(Rejection),
}

impl TransactionResult {
    pub fn id(&self) -> TransactionId {
        match self {
            TransactionResult::Committed(c) => c.id,
            TransactionResult::Rejected(r) => r.id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionResult::Committed(_))
    }

    pub fn commit(&self) -> Option<&CommitInfo> {
        match self {
            TransactionResult::Committed(c) => Some(c),
            TransactionResult::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            TransactionResult::Rejected(r) => Some(r),
            TransactionResult::Committed(_) => None,
        }
    }

    fn rejected(id: TransactionId, reason: RejectReason, message: impl Into<String>) -> Self {
        TransactionResult::Rejected(Rejection {
            id,
            reason,
            message: message.into(),
        })
    }
}

/// A queued transaction's ticket. `wait` drives the queue if nobody else
/// is, then blocks until the transaction reaches a terminal state.
pub struct TransactionHandle {
    id: TransactionId,
    receiver: Receiver<TransactionResult>,
    manager: Arc<TransactionManager>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle").field("id", &self.id).finish()
    }
}

impl TransactionHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn wait(self) -> TransactionResult {
        self.manager.drain();
        self.receiver.recv().unwrap_or_else(|_| {
            TransactionResult::rejected(self.id, RejectReason::Cancelled, "transaction was dropped")
        })
    }
}

struct Pending {
    id: TransactionId,
    priority: i32,
    /// Committed sequence when queued: the content an edit's range was
    /// computed against unless it names its own base.
    queued_at: u64,
    transaction: Transaction,
    reply: Sender<TransactionResult>,
}

// Max-heap order: higher priority first, then lower (earlier) id.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pending {}

/// Queue, state registry and the single-writer commit path.
pub(crate) struct TransactionManager {
    config: Arc<EngineConfig>,
    pool: ParserPool,
    committed: Arc<std::sync::RwLock<Arc<Workspace>>>,
    queue: Mutex<BinaryHeap<Pending>>,
    states: DashMap<TransactionId, TransactionState>,
    next_id: AtomicU64,
    /// Held for a whole batch: only one batch is ever applying.
    commit: Mutex<()>,
}

impl TransactionManager {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        pool: ParserPool,
        committed: Arc<std::sync::RwLock<Arc<Workspace>>>,
    ) -> Self {
        TransactionManager {
            config,
            pool,
            committed,
            queue: Mutex::new(BinaryHeap::new()),
            states: DashMap::new(),
            next_id: AtomicU64::new(1),
            commit: Mutex::new(()),
        }
    }

    pub(crate) fn current(&self) -> Arc<Workspace> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, workspace: Workspace) {
        *self.committed.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(workspace);
    }

    pub(crate) fn enqueue(self: &Arc<Self>, transaction: Transaction) -> TransactionHandle {
        let id = TransactionId(self.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        let (reply, receiver) = mpsc::channel();
        self.states.insert(id, TransactionState::Queued);
        let queued_at = self.current().sequence;
        debug!(
            "Queued {} {} for {} at #{}",
            transaction.kind(),
            id,
            transaction.path().display(),
            queued_at
        );
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Pending {
                id,
                priority: transaction.priority(),
                queued_at,
                transaction,
                reply,
            });
        TransactionHandle {
            id,
            receiver,
            manager: Arc::clone(self),
        }
    }

    pub(crate) fn status(&self, id: TransactionId) -> Option<TransactionState> {
        self.states.get(&id).map(|s| *s)
    }

    fn set_state(&self, id: TransactionId, state: TransactionState) {
        debug!("{} -> {:?}", id, state);
        self.states.insert(id, state);
    }

    /// Cancel a transaction that is still queued.
    pub(crate) fn cancel(&self, id: TransactionId) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cancelled = None;
        let remaining: Vec<Pending> = std::mem::take(&mut *queue)
            .into_vec()
            .into_iter()
            .filter_map(|pending| {
                if pending.id == id {
                    cancelled = Some(pending);
                    None
                } else {
                    Some(pending)
                }
            })
            .collect();
        *queue = BinaryHeap::from(remaining);
        drop(queue);

        let Some(pending) = cancelled else {
            return false;
        };
        self.set_state(id, TransactionState::Rejected);
        info!("Cancelled {}", id);
        let result = TransactionResult::rejected(id, RejectReason::Cancelled, "cancelled while queued");
        if pending.reply.send(result).is_err() {
            debug!("Submitter of {} went away before the result", id);
        }
        true
    }

    /// Apply everything queued, one transaction at a time in priority order.
    /// Returns how many transactions reached a terminal state.
    pub(crate) fn drain(&self) -> usize {
        let _batch = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let mut processed = 0;
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                let next = queue.pop();
                if let Some(pending) = &next {
                    // Leaving the queue under its lock: no longer cancellable.
                    self.set_state(pending.id, TransactionState::Validating);
                }
                next
            };
            let Some(pending) = next else {
                break;
            };
            let result = self.process(pending.queued_at, pending.id, pending.transaction);
            let state = if result.is_committed() {
                TransactionState::Committed
            } else {
                TransactionState::Rejected
            };
            self.set_state(pending.id, state);
            if pending.reply.send(result).is_err() {
                debug!("Submitter of {} went away before the result", pending.id);
            }
            processed += 1;
        }
        if processed > 0 {
            info!("Batch done: {} transaction(s)", processed);
        }
        processed
    }

    fn process(&self, queued_at: u64, id: TransactionId, transaction: Transaction) -> TransactionResult {
        let committed = self.current();
        let transaction = match validate(&committed, &self.config, queued_at, transaction) {
            Ok(transaction) => transaction,
            Err((reason, message)) => {
                warn!("Rejected {}: {} ({})", id, message, reason);
                return TransactionResult::rejected(id, reason, message);
            }
        };

        self.set_state(id, TransactionState::Applying);
        let mut working = (*committed).clone();
        let outcome = {
            let mut syncer = Syncer::new(&mut working, &self.pool, &self.config);
            apply(&mut syncer, &transaction).and_then(|()| syncer.converge())
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                let reason = match &error {
                    SyncError::Syntax(SyntaxError::UnsupportedLanguage(_)) => {
                        RejectReason::UnsupportedLanguage
                    }
                    SyncError::UnknownFile(_) => RejectReason::FileNotFound,
                    _ => RejectReason::Inconsistent,
                };
                warn!("Rolled back {}: {}", id, error);
                return TransactionResult::rejected(id, reason, error.to_string());
            }
        };

        if self.config.write_through {
            if let Err(error) = write_through(&self.config.root, &outcome.disk) {
                warn!("Rolled back {}: disk write failed: {}", id, error);
                return TransactionResult::rejected(id, RejectReason::Io, error.to_string());
            }
        }

        let info = CommitInfo {
            id,
            sequence: working.sequence,
            changed: outcome.delta.changed_nodes(),
            mutations: outcome.delta.mutation_count(),
            committed_at: Utc::now(),
        };
        self.publish(working);
        info!(
            "Committed {} {} as #{} ({} mutations)",
            transaction.kind(),
            id,
            info.sequence,
            info.mutations
        );
        TransactionResult::Committed(info)
    }

    /// Run the sync engine over unchanged content. Returns the number of
    /// graph mutations it caused; a non-zero count is published as a repair.
    pub(crate) fn resync(&self, path: &Path) -> Result<usize, SyncError> {
        let _batch = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let committed = self.current();
        let text = committed
            .file(path)
            .map(|f| f.text().clone())
            .ok_or_else(|| SyncError::UnknownFile(path.to_path_buf()))?;
        let mut working = (*committed).clone();
        let outcome = {
            let mut syncer = Syncer::new(&mut working, &self.pool, &self.config);
            syncer.apply_text(path, text, Vec::new())?;
            syncer.converge()?
        };
        let mutations = outcome.delta.mutation_count();
        if mutations > 0 {
            warn!("Resync of {} changed {} graph entries", path.display(), mutations);
            self.publish(working);
        }
        Ok(mutations)
    }
}

/// Map a caller-supplied path to a normalized project-relative path.
pub fn project_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let normalized = normalize_path(relative)?;
    (!normalized.as_os_str().is_empty()).then_some(normalized)
}

type Invalid = (RejectReason, String);

fn checked_path(config: &EngineConfig, path: &Path) -> Result<PathBuf, Invalid> {
    project_path(&config.root, path).ok_or_else(|| {
        (
            RejectReason::InvalidPath,
            format!("{} is not a path inside the project", path.display()),
        )
    })
}

fn supported(path: &Path) -> Result<(), Invalid> {
    if Language::from_path(path).is_supported() {
        Ok(())
    } else {
        Err((
            RejectReason::UnsupportedLanguage,
            format!("{} is not a supported source file", path.display()),
        ))
    }
}

/// Check a transaction against the committed workspace and return it with
/// normalized paths.
fn validate(
    ws: &Workspace,
    config: &EngineConfig,
    queued_at: u64,
    transaction: Transaction,
) -> Result<Transaction, Invalid> {
    let missing = |path: &Path| {
        (
            RejectReason::FileNotFound,
            format!("{} is not in the workspace", path.display()),
        )
    };
    let exists = |path: &Path| {
        (
            RejectReason::FileExists,
            format!("{} already exists", path.display()),
        )
    };

    match transaction {
        Transaction::Edit(mut edit) => {
            edit.file = checked_path(config, &edit.file)?;
            let file = ws.file(&edit.file).ok_or_else(|| missing(&edit.file))?;
            let text = file.text();
            let range = edit.range;
            if range.start > range.end
                || range.end > text.len()
                || !text.is_char_boundary(range.start)
                || !text.is_char_boundary(range.end)
            {
                return Err((
                    RejectReason::InvalidRange,
                    format!(
                        "{}..{} is not a valid range of {} ({} bytes)",
                        range.start,
                        range.end,
                        edit.file.display(),
                        text.len()
                    ),
                ));
            }
            let base = edit
                .base_sequence
                .unwrap_or_else(|| queued_at.max(file.created));
            if !file.range_is_current(base, range.start, range.end) {
                return Err((
                    RejectReason::StaleRange,
                    format!(
                        "{}..{} of {} was shifted by an edit applied after #{}",
                        range.start,
                        range.end,
                        edit.file.display(),
                        base
                    ),
                ));
            }
            Ok(Transaction::Edit(edit))
        }
        Transaction::Add(mut add) => {
            add.path = checked_path(config, &add.path)?;
            supported(&add.path)?;
            if ws.file(&add.path).is_some() {
                return Err(exists(&add.path));
            }
            Ok(Transaction::Add(add))
        }
        Transaction::Remove(mut remove) => {
            remove.path = checked_path(config, &remove.path)?;
            if ws.file(&remove.path).is_none() {
                return Err(missing(&remove.path));
            }
            Ok(Transaction::Remove(remove))
        }
        Transaction::Rename(mut rename) => {
            rename.old_path = checked_path(config, &rename.old_path)?;
            rename.new_path = checked_path(config, &rename.new_path)?;
            if ws.file(&rename.old_path).is_none() {
                return Err(missing(&rename.old_path));
            }
            if ws.file(&rename.new_path).is_some() {
                return Err(exists(&rename.new_path));
            }
            supported(&rename.new_path)?;
            Ok(Transaction::Rename(rename))
        }
    }
}

/// File-level part of a transaction; the caller converges afterwards.
fn apply(syncer: &mut Syncer<'_>, transaction: &Transaction) -> Result<(), SyncError> {
    match transaction {
        Transaction::Edit(edit) => {
            let current = syncer
                .file_text(&edit.file)
                .ok_or_else(|| SyncError::UnknownFile(edit.file.clone()))?;
            let mut text = String::with_capacity(current.len() + edit.new_text.len());
            text.push_str(&current[..edit.range.start]);
            text.push_str(&edit.new_text);
            text.push_str(&current[edit.range.end..]);
            let text: Arc<str> = Arc::from(text);
            let change = TextEdit::replace(edit.range, edit.new_text.len());
            syncer.apply_text(&edit.file, text.clone(), vec![change])?;
            syncer.write_back(DiskOp::Write(edit.file.clone(), text));
        }
        Transaction::Add(add) => {
            let text: Arc<str> = Arc::from(add.content.as_str());
            syncer.apply_text(&add.path, text.clone(), Vec::new())?;
            syncer.write_back(DiskOp::Write(add.path.clone(), text));
        }
        Transaction::Remove(remove) => {
            syncer.remove(&remove.path)?;
            syncer.write_back(DiskOp::Remove(remove.path.clone()));
        }
        Transaction::Rename(rename) => syncer.rename(&rename.old_path, &rename.new_path)?,
    }
    Ok(())
}

/// Mirror committed changes under `root`. On failure every file already
/// touched is restored before the error is returned.
pub(crate) fn write_through(root: &Path, ops: &[DiskOp]) -> std::io::Result<()> {
    let mut undo: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
    for op in ops {
        let path = root.join(op.path());
        let result = snapshot_file(&path).and_then(|before| {
            undo.push((path.clone(), before));
            match op {
                DiskOp::Write(_, text) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, text.as_bytes())
                }
                DiskOp::Remove(_) => match std::fs::remove_file(&path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            }
        });
        if let Err(error) = result {
            restore(&undo);
            return Err(error);
        }
    }
    Ok(())
}

fn snapshot_file(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn restore(undo: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, before) in undo.iter().rev() {
        let result = match before {
            Some(bytes) => std::fs::write(path, bytes),
            None => match std::fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(error) = result {
            warn!("Failed to restore {}: {}", path.display(), error);
        }
    }
}
