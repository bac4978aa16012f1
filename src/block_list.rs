// src/block_list.rs
//
// Mutex-guarded list shared between upload workers. Only four operations
// are exposed: push, pop, clear and snapshot.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct BlockList<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> BlockList<T> {
    pub fn new() -> Self {
        Self { items: Mutex::new(VecDeque::new()) }
    }

    pub fn from_items<I: IntoIterator<Item = T>>(items: I) -> Self {
        Self { items: Mutex::new(items.into_iter().collect()) }
    }

    // A panicking worker must not wedge the others, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Take the next item, or `None` once the list is empty.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Drop every remaining item. Workers that pop afterwards see an empty list.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T: Clone> BlockList<T> {
    /// Copy of the current contents, in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_pop_and_clear() {
        let list = BlockList::from_items(vec![1, 2, 3]);
        assert_eq!(list.pop(), Some(1));
        list.push(4);
        assert_eq!(list.snapshot(), vec![2, 3, 4]);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn test_concurrent_drain_hands_out_each_item_once() {
        let pending = Arc::new(BlockList::from_items(0..10_000u32));
        let taken = Arc::new(BlockList::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pending = Arc::clone(&pending);
                let taken = Arc::clone(&taken);
                thread::spawn(move || {
                    while let Some(n) = pending.pop() {
                        taken.push(n);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut all = taken.snapshot();
        all.sort();
        assert_eq!(all, (0..10_000).collect::<Vec<_>>());
    }
}
