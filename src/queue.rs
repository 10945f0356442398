//! Concurrent Ordered Queue (§4.1).
//!
//! A FIFO, de-duplicating, node-addressable queue. Every operation locks a
//! single internal mutex for the duration of the call; none of them
//! suspend, so lock hold times are always short and bounded.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// A stable handle to a queued entry, obtained from `snapshot()` or
/// `enqueue()`.
///
/// Handles are only valid for the queue that produced them. `try_remove`
/// treats a handle whose slot has since been reused (or removed) as
/// "already gone" rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    slot: usize,
    generation: u64,
}

struct Slot<T> {
    value: T,
    generation: u64,
}

struct Inner<T> {
    /// Slot storage in insertion order. A `None` marks a removed entry;
    /// slots are never reused, keeping `generation` checks trivial.
    slots: Vec<Option<Slot<T>>>,
    /// Value -> slot index, for O(1) expected `contains`.
    index: HashMap<T, usize>,
    next_generation: u64,
    len: usize,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Inner {
            slots: Vec::new(),
            index: HashMap::new(),
            next_generation: 0,
            len: 0,
        }
    }
}

/// A FIFO, de-duplicating, node-addressable queue of distinct values.
pub struct ConcurrentOrderedQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for ConcurrentOrderedQueue<T>
where
    T: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentOrderedQueue<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        ConcurrentOrderedQueue {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Append `value` to the back of the queue.
    ///
    /// Returns `false` (without enqueuing) if `value` is already present.
    pub fn enqueue(&self, value: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.index.contains_key(&value) {
            return false;
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let slot = inner.slots.len();

        inner.index.insert(value.clone(), slot);
        inner.slots.push(Some(Slot { value, generation }));
        inner.len += 1;
        true
    }

    /// Remove `value` from the queue by value, wherever it sits.
    ///
    /// Returns `true` if it was present and removed.
    pub fn try_remove(&self, value: &T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.index.remove(value) else {
            return false;
        };
        inner.slots[slot] = None;
        inner.len -= 1;
        true
    }

    /// Remove the entry identified by `node`, but only if it is still
    /// linked (i.e. hasn't already been removed by someone else).
    ///
    /// Returns `true` if removal happened.
    pub fn try_remove_node(&self, node: NodeHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.slots.get(node.slot) else {
            return false;
        };
        let Some(entry) = slot else {
            return false;
        };
        if entry.generation != node.generation {
            return false;
        }

        let value = entry.value.clone();
        inner.slots[node.slot] = None;
        inner.index.remove(&value);
        inner.len -= 1;
        true
    }

    /// `true` if `value` is currently queued.
    pub fn contains(&self, value: &T) -> bool {
        self.inner.lock().unwrap().index.contains_key(value)
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A stable point-in-time snapshot of queued entries, in insertion
    /// order, alongside the handle needed to remove each one later.
    pub fn snapshot(&self) -> Vec<(NodeHandle, T)> {
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry.as_ref().map(|entry| {
                    (
                        NodeHandle {
                            slot,
                            generation: entry.generation,
                        },
                        entry.value.clone(),
                    )
                })
            })
            .collect()
    }

    /// 1-indexed position of `value` in insertion order among currently
    /// queued entries, or `None` if it isn't queued.
    pub fn position_of(&self, value: &T) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        let target = *inner.index.get(value)?;
        let position = inner
            .slots
            .iter()
            .take(target + 1)
            .filter(|entry| entry.is_some())
            .count();
        Some(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_is_fifo_and_rejects_duplicates() {
        let queue: ConcurrentOrderedQueue<u32> = ConcurrentOrderedQueue::new();
        assert!(queue.enqueue(1));
        assert!(queue.enqueue(2));
        assert!(!queue.enqueue(1));

        let snapshot: Vec<u32> = queue.snapshot().into_iter().map(|(_, v)| v).collect();
        assert_eq!(snapshot, vec![1, 2]);
    }

    #[test]
    fn try_remove_by_value_updates_contains_and_len() {
        let queue: ConcurrentOrderedQueue<u32> = ConcurrentOrderedQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);

        assert!(queue.try_remove(&1));
        assert!(!queue.contains(&1));
        assert_eq!(queue.len(), 1);
        assert!(!queue.try_remove(&1));
    }

    #[test]
    fn try_remove_node_is_idempotent_under_concurrent_removal() {
        let queue: ConcurrentOrderedQueue<u32> = ConcurrentOrderedQueue::new();
        queue.enqueue(1);
        let snapshot = queue.snapshot();
        let (node, _) = snapshot[0];

        // Another caller removes the value directly first.
        assert!(queue.try_remove(&1));

        // The stale node handle must not remove anything new.
        assert!(!queue.try_remove_node(node));
    }

    #[test]
    fn position_of_reflects_insertion_order_after_removal() {
        let queue: ConcurrentOrderedQueue<u32> = ConcurrentOrderedQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.position_of(&1), Some(1));
        assert_eq!(queue.position_of(&2), Some(2));
        assert_eq!(queue.position_of(&3), Some(3));

        queue.try_remove(&1);
        assert_eq!(queue.position_of(&2), Some(1));
        assert_eq!(queue.position_of(&3), Some(2));
    }

    #[test]
    fn slots_are_never_reused_so_node_handles_stay_unique() {
        let queue: ConcurrentOrderedQueue<u32> = ConcurrentOrderedQueue::new();
        queue.enqueue(1);
        let (first_node, _) = queue.snapshot()[0];
        queue.try_remove(&1);
        queue.enqueue(1);
        let (second_node, _) = queue.snapshot()[0];

        assert_ne!(first_node, second_node);
    }
}
