// Task store with staged changes and atomic commit

use crate::backend::{Backend, Change, MemoryBackend};
use crate::sqlite::SqliteBackend;
use crate::task::Task;
use eyre::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// A task was rejected before staging.
    Validation(String),
    /// A task with this id is already staged or committed.
    DuplicateId(Uuid),
    /// The backend could not persist the staged changes.
    Persistence(eyre::Report),
}

impl StoreError {
    /// True for failures worth retrying (storage faults)
    pub fn is_persistence(&self) -> bool {
        matches!(self, StoreError::Persistence(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Validation(msg) => write!(f, "validation error: {}", msg),
            StoreError::DuplicateId(id) => write!(f, "task already exists: {}", id),
            StoreError::Persistence(e) => write!(f, "failed to persist changes: {:#}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Persistence(e) => {
                let source: &(dyn std::error::Error + 'static) = e.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

/// Handle returned by [`Store::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&[Task])>;

/// The task store.
///
/// Mutations are staged and only become visible through
/// [`Store::fetch_all_ordered_by_timestamp`] after a successful [`Store::commit`].
pub struct Store {
    backend: Box<dyn Backend>,
    committed: Vec<Task>,
    pending: Vec<Change>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl Store {
    /// Build a store over a backend, loading its committed tasks
    pub fn new<B: Backend + 'static>(backend: B) -> Result<Self> {
        let mut backend: Box<dyn Backend> = Box::new(backend);
        let mut committed = backend.load().context("Failed to load tasks")?;
        committed.sort_by(Task::display_order);

        debug!(count = committed.len(), "Store loaded");

        Ok(Self::with_snapshot(backend, committed))
    }

    /// Volatile store
    pub fn in_memory() -> Self {
        Self::with_snapshot(Box::new(MemoryBackend::new()), Vec::new())
    }

    fn with_snapshot(backend: Box<dyn Backend>, committed: Vec<Task>) -> Self {
        Self {
            backend,
            committed,
            pending: Vec::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Open or create a durable store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let backend = SqliteBackend::open(path)?;
        Self::new(backend)
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Create a new task from `text` and stage it
    pub fn create(&mut self, text: &str) -> Result<Task> {
        if text.is_empty() {
            return Err(StoreError::Validation("task text cannot be empty".to_string()).into());
        }

        let task = Task::new(text);
        self.insert(task.clone())?;
        Ok(task)
    }

    /// Stage an already-built task
    pub fn insert(&mut self, task: Task) -> Result<()> {
        if self.get(&task.id).is_some() || self.pending.iter().any(|c| c.id() == task.id) {
            return Err(StoreError::DuplicateId(task.id).into());
        }

        debug!(id = %task.id, "insert: staged");
        self.pending.push(Change::Insert(task));
        Ok(())
    }

    /// Stage removal of the given tasks
    ///
    /// Ids that match nothing are ignored. Removing a task that is staged but
    /// not yet committed cancels its insert.
    pub fn delete<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        for id in ids {
            if let Some(pos) = self
                .pending
                .iter()
                .position(|c| matches!(c, Change::Insert(t) if t.id == *id))
            {
                debug!(%id, "delete: cancelled staged insert");
                self.pending.remove(pos);
                continue;
            }

            let staged = self.pending.iter().any(|c| matches!(c, Change::Delete(d) if d == id));
            if staged || self.get(id).is_none() {
                continue;
            }

            debug!(%id, "delete: staged");
            self.pending.push(Change::Delete(*id));
        }
    }

    /// Discard all staged changes
    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "rollback: discarding staged changes");
            self.pending.clear();
        }
    }

    /// True if there are staged changes
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Staged changes, in staging order
    pub fn pending(&self) -> &[Change] {
        &self.pending
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Persist all staged changes atomically
    ///
    /// On failure the staged changes stay pending and the committed view is
    /// unchanged.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.backend.apply(&self.pending) {
            warn!(error = %e, count = self.pending.len(), "commit: backend rejected changes");
            return Err(StoreError::Persistence(e).into());
        }

        let changes = std::mem::take(&mut self.pending);
        let deleted: HashSet<Uuid> = changes
            .iter()
            .filter_map(|c| match c {
                Change::Delete(id) => Some(*id),
                Change::Insert(_) => None,
            })
            .collect();

        self.committed.retain(|t| !deleted.contains(&t.id));
        self.committed.extend(changes.into_iter().filter_map(|c| match c {
            Change::Insert(task) => Some(task),
            Change::Delete(_) => None,
        }));
        self.committed.sort_by(Task::display_order);

        debug!(count = self.committed.len(), "commit: applied");
        self.notify();
        Ok(())
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Every committed task, oldest first
    pub fn fetch_all_ordered_by_timestamp(&self) -> &[Task] {
        &self.committed
    }

    /// Look up a committed task
    pub fn get(&self, id: &Uuid) -> Option<&Task> {
        self.committed.iter().find(|t| t.id == *id)
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Register a listener called with the new ordered list after each commit
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&[Task]) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    fn notify(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&self.committed);
        }
    }
}
