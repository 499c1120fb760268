//  Copyright 2025 Larder Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use parking_lot::Mutex;

use crate::element::Element;

/// Time-ordered queue of blocked placeholders awaiting delete.
///
/// A min-heap on `blocked_until`, ties broken lexicographically on the key
/// bytes. [`DelayQueue::poll_expired`] hands back at most one placeholder
/// per call; the scavenger drains one entry per tick.
pub struct DelayQueue {
    heap: Mutex<BinaryHeap<Entry>>,
}

struct Entry {
    element: Arc<Element>,
}

impl Entry {
    fn deadline(&self) -> i64 {
        self.element.blocked_until
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the earliest deadline sits on top of the max-heap.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline()
            .cmp(&self.deadline())
            .then_with(|| other.element.key.as_bytes().cmp(self.element.key.as_bytes()))
    }
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub fn add(&self, element: Arc<Element>) {
        self.heap.lock().push(Entry { element });
    }

    /// Pops the earliest placeholder iff its deadline has passed.
    pub fn poll_expired(&self, now_ms: i64) -> Option<Arc<Element>> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(entry) if entry.deadline() <= now_ms => heap.pop().map(|entry| entry.element),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn placeholder(key: &str, blocked_until: i64) -> Arc<Element> {
        Arc::new(Element::blocked_placeholder(Key::from(key), blocked_until))
    }

    #[test]
    fn test_poll_gates_on_deadline() {
        let queue = DelayQueue::new();
        queue.add(placeholder("a", 100));

        assert!(queue.poll_expired(99).is_none());
        assert_eq!(queue.len(), 1);

        let popped = queue.poll_expired(100).unwrap();
        assert_eq!(popped.key, Key::from("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_earliest_deadline_first() {
        let queue = DelayQueue::new();
        queue.add(placeholder("late", 300));
        queue.add(placeholder("early", 100));
        queue.add(placeholder("middle", 200));

        assert_eq!(queue.poll_expired(1_000).unwrap().key, Key::from("early"));
        assert_eq!(queue.poll_expired(1_000).unwrap().key, Key::from("middle"));
        assert_eq!(queue.poll_expired(1_000).unwrap().key, Key::from("late"));
    }

    #[test]
    fn test_tie_break_on_key() {
        let queue = DelayQueue::new();
        queue.add(placeholder("b", 100));
        queue.add(placeholder("a", 100));

        assert_eq!(queue.poll_expired(100).unwrap().key, Key::from("a"));
        assert_eq!(queue.poll_expired(100).unwrap().key, Key::from("b"));
    }

    #[test]
    fn test_one_entry_per_poll() {
        let queue = DelayQueue::new();
        queue.add(placeholder("a", 10));
        queue.add(placeholder("b", 10));

        assert!(queue.poll_expired(50).is_some());
        assert_eq!(queue.len(), 1);
    }
}
