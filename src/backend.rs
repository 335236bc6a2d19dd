// Persistence backends for the task store

use crate::task::Task;
use eyre::{Result, eyre};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// A single staged mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Task),
    Delete(Uuid),
}

impl Change {
    /// Id of the task this change touches
    pub fn id(&self) -> Uuid {
        match self {
            Change::Insert(task) => task.id,
            Change::Delete(id) => *id,
        }
    }
}

/// Storage collaborator behind a [`crate::Store`]
///
/// `apply` must be all-or-nothing: if it returns an error, none of the
/// changes in the batch may be visible to a later `load`.
pub trait Backend {
    /// Load every persisted task
    fn load(&mut self) -> Result<Vec<Task>>;

    /// Durably apply a batch of changes
    fn apply(&mut self, changes: &[Change]) -> Result<()>;
}

/// Volatile backend, useful for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tasks: BTreeMap<Uuid, Task>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn load(&mut self) -> Result<Vec<Task>> {
        Ok(self.tasks.values().cloned().collect())
    }

    fn apply(&mut self, changes: &[Change]) -> Result<()> {
        // Validate the whole batch before touching anything
        let mut inserted = HashSet::new();
        for change in changes {
            if let Change::Insert(task) = change {
                if self.tasks.contains_key(&task.id) || !inserted.insert(task.id) {
                    return Err(eyre!("Task {} already exists", task.id));
                }
            }
        }

        for change in changes {
            match change {
                Change::Insert(task) => {
                    self.tasks.insert(task.id, task.clone());
                }
                Change::Delete(id) => {
                    self.tasks.remove(id);
                }
            }
        }

        Ok(())
    }
}
