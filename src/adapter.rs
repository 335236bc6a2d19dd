// Presentation glue between the draft text and the store

use crate::store::{Store, SubscriptionId};
use crate::task::Task;
use eyre::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Holds the in-progress draft and turns UI actions into store commits.
///
/// The presentation layer talks only to this type; the [`Store`] is injected
/// at construction.
pub struct Adapter {
    store: Store,
    draft: String,
}

impl Adapter {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            draft: String::new(),
        }
    }

    /// Current draft text
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the draft text. Never touches the store.
    pub fn update_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// True iff the draft is non-empty
    pub fn can_submit(&self) -> bool {
        !self.draft.is_empty()
    }

    /// Save the draft as a new task
    ///
    /// Returns `Ok(None)` without touching the store when the draft is empty.
    /// On a persistence failure the draft is kept and nothing is staged.
    pub fn submit(&mut self) -> Result<Option<Task>> {
        if !self.can_submit() {
            debug!("submit: empty draft, ignoring");
            return Ok(None);
        }

        let task = self.store.create(&self.draft)?;
        if let Err(e) = self.store.commit() {
            self.store.rollback();
            return Err(e);
        }

        info!(id = %task.id, "Task saved");
        self.draft.clear();
        Ok(Some(task))
    }

    /// Resolve offsets in the observed list to task ids
    ///
    /// Offsets past the end of the list are skipped.
    pub fn resolve<I>(&self, offsets: I) -> Vec<Uuid>
    where
        I: IntoIterator<Item = usize>,
    {
        let tasks = self.store.fetch_all_ordered_by_timestamp();
        let mut ids = Vec::new();
        for offset in offsets {
            match tasks.get(offset) {
                Some(task) if !ids.contains(&task.id) => ids.push(task.id),
                Some(_) => {}
                None => warn!(offset, len = tasks.len(), "Offset out of range, skipping"),
            }
        }
        ids
    }

    /// Delete tasks by id and commit
    ///
    /// Returns how many tasks were actually removed. On a persistence failure
    /// nothing stays staged and the observed list is unchanged.
    pub fn delete_ids(&mut self, ids: &[Uuid]) -> Result<usize> {
        let before = self.store.len();
        self.store.delete(ids);
        if let Err(e) = self.store.commit() {
            self.store.rollback();
            return Err(e);
        }

        let removed = before - self.store.len();
        if removed > 0 {
            info!(count = removed, "Tasks deleted");
        }
        Ok(removed)
    }

    /// Delete the tasks at the given offsets of the observed list
    pub fn delete_at<I>(&mut self, offsets: I) -> Result<usize>
    where
        I: IntoIterator<Item = usize>,
    {
        let ids = self.resolve(offsets);
        self.delete_ids(&ids)
    }

    /// The ordered list to render
    pub fn observed_tasks(&self) -> &[Task] {
        self.store.fetch_all_ordered_by_timestamp()
    }

    /// Task at an offset of the observed list
    pub fn task_at(&self, offset: usize) -> Option<&Task> {
        self.observed_tasks().get(offset)
    }

    /// Be told about every committed change to the list
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&[Task]) + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::store::tests::FaultyBackend;
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    fn adapter() -> Adapter {
        Adapter::new(Store::in_memory())
    }

    fn add(adapter: &mut Adapter, text: &str) -> Task {
        adapter.update_draft(text);
        adapter.submit().unwrap().unwrap()
    }

    #[test]
    fn test_add_then_delete_scenario() {
        let mut adapter = adapter();

        adapter.update_draft("write spec");
        assert!(adapter.can_submit());

        let task = adapter.submit().unwrap().unwrap();
        assert_eq!(adapter.draft(), "");
        assert_eq!(adapter.observed_tasks().len(), 1);
        assert_eq!(adapter.observed_tasks()[0].task, "write spec");
        assert_eq!(adapter.observed_tasks()[0].id, task.id);

        let removed = adapter.delete_at(BTreeSet::from([0])).unwrap();
        assert_eq!(removed, 1);
        assert!(adapter.observed_tasks().is_empty());
    }

    #[test]
    fn test_can_submit_tracks_empty_draft() {
        let mut adapter = adapter();
        assert!(!adapter.can_submit());

        adapter.update_draft(" ");
        assert!(adapter.can_submit());

        adapter.update_draft("");
        assert!(!adapter.can_submit());
    }

    #[test]
    fn test_submit_empty_draft_is_noop() {
        let mut adapter = adapter();
        add(&mut adapter, "existing");

        assert!(adapter.submit().unwrap().is_none());
        assert_eq!(adapter.observed_tasks().len(), 1);
        assert!(!adapter.store.is_dirty());
    }

    #[test]
    fn test_update_draft_does_not_touch_list() {
        let mut adapter = adapter();
        add(&mut adapter, "one");
        let before = adapter.observed_tasks().to_vec();

        adapter.update_draft("typing...");
        adapter.update_draft("typing more");
        assert_eq!(adapter.observed_tasks(), before.as_slice());
        assert!(!adapter.store.is_dirty());
    }

    #[test]
    fn test_submit_failure_keeps_draft_and_list() {
        let (backend, fail) = FaultyBackend::new();
        let mut adapter = Adapter::new(Store::new(backend).unwrap());
        add(&mut adapter, "first");

        fail.set(true);
        adapter.update_draft("second");
        let err = adapter.submit().unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some_and(StoreError::is_persistence));
        assert_eq!(adapter.draft(), "second");
        assert_eq!(adapter.observed_tasks().len(), 1);
        assert!(!adapter.store.is_dirty());

        // Retrying after recovery saves exactly one task
        fail.set(false);
        adapter.submit().unwrap();
        assert_eq!(adapter.observed_tasks().len(), 2);
        assert_eq!(adapter.draft(), "");
    }

    #[test]
    fn test_delete_failure_keeps_list() {
        let (backend, fail) = FaultyBackend::new();
        let mut adapter = Adapter::new(Store::new(backend).unwrap());
        add(&mut adapter, "a");
        add(&mut adapter, "b");

        fail.set(true);
        let err = adapter.delete_at([0, 1]).unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some_and(StoreError::is_persistence));
        assert_eq!(adapter.observed_tasks().len(), 2);
        assert!(!adapter.store.is_dirty());
    }

    #[test]
    fn test_delete_at_multiple_offsets() {
        let mut adapter = adapter();
        let a = add(&mut adapter, "a");
        add(&mut adapter, "b");
        let c = add(&mut adapter, "c");
        add(&mut adapter, "d");

        let ids: Vec<Uuid> = adapter.observed_tasks().iter().map(|t| t.id).collect();
        let removed = adapter.delete_at([1, 3]).unwrap();
        assert_eq!(removed, 2);

        let remaining: Vec<Uuid> = adapter.observed_tasks().iter().map(|t| t.id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);
        assert_eq!(remaining, vec![a.id, c.id]);
    }

    #[test]
    fn test_delete_at_out_of_range_is_ignored() {
        let mut adapter = adapter();
        add(&mut adapter, "only");

        assert_eq!(adapter.delete_at([5]).unwrap(), 0);
        assert_eq!(adapter.observed_tasks().len(), 1);
    }

    #[test]
    fn test_resolve_is_eager() {
        let mut adapter = adapter();
        add(&mut adapter, "a");
        let b = add(&mut adapter, "b");

        // Resolve against the list as the user saw it, then let it change
        let ids = adapter.resolve([1, 1]);
        assert_eq!(ids, vec![b.id]);
        adapter.delete_at([0]).unwrap();

        assert_eq!(adapter.delete_ids(&ids).unwrap(), 1);
        assert!(adapter.observed_tasks().is_empty());
    }

    #[test]
    fn test_delete_same_id_twice() {
        let mut adapter = adapter();
        let task = add(&mut adapter, "a");
        add(&mut adapter, "b");

        assert_eq!(adapter.delete_ids(&[task.id]).unwrap(), 1);
        assert_eq!(adapter.delete_ids(&[task.id]).unwrap(), 0);
        assert_eq!(adapter.observed_tasks().len(), 1);
    }

    #[test]
    fn test_subscribe_sees_submit_and_delete() {
        let mut adapter = adapter();
        let seen: Rc<RefCell<Vec<Vec<String>>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let sub = adapter.subscribe(move |tasks| {
            sink.borrow_mut().push(tasks.iter().map(|t| t.task.clone()).collect());
        });

        add(&mut adapter, "a");
        add(&mut adapter, "b");
        adapter.delete_at([0]).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![vec!["a".to_string()], vec!["a".to_string(), "b".to_string()], vec!["b".to_string()]]
        );
        assert!(adapter.unsubscribe(sub));
    }

    #[test]
    fn test_task_at() {
        let mut adapter = adapter();
        let task = add(&mut adapter, "a");
        assert_eq!(adapter.task_at(0), Some(&task));
        assert_eq!(adapter.task_at(1), None);
    }
}
