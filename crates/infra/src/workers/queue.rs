//! Priority queue of waiting tasks.
//!
//! Highest priority first; equal priorities leave in submission order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

impl<T> Entry<T> {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug)]
pub struct TaskQueue<T> {
    heap: BinaryHeap<Entry<T>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `seq` must be unique and increase with submission order.
    pub fn push(&mut self, priority: i32, seq: u64, item: T) {
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.item)
    }

    pub fn peek_priority(&self) -> Option<i32> {
        self.heap.peek().map(|e| e.priority)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove everything, in dispatch order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn higher_priority_leaves_first_ties_in_submission_order() {
        let mut q = TaskQueue::new();
        for (seq, (priority, name)) in [(1, "a"), (5, "b"), (1, "c"), (3, "d"), (1, "e")]
            .into_iter()
            .enumerate()
        {
            q.push(priority, seq as u64, name);
        }
        assert_eq!(q.peek_priority(), Some(5));
        assert_eq!(q.drain(), vec!["b", "d", "a", "c", "e"]);
        assert!(q.is_empty());
    }

    proptest! {
        #[test]
        fn pop_order_is_priority_desc_then_seq_asc(priorities in proptest::collection::vec(-5i32..5, 0..64)) {
            let mut q = TaskQueue::new();
            for (seq, p) in priorities.iter().enumerate() {
                q.push(*p, seq as u64, (*p, seq));
            }
            let popped = q.drain();
            let mut expected: Vec<(i32, usize)> =
                priorities.iter().copied().enumerate().map(|(s, p)| (p, s)).collect();
            expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            prop_assert_eq!(popped, expected);
        }
    }
}
