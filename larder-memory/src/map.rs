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

use std::sync::{
    atomic::{AtomicIsize, AtomicU64, Ordering},
    Arc,
};

use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard};

use larder_common::{element::Element, key::Key};

use crate::{
    chain::Chain,
    eviction::EvictionPolicy,
    listener::{EvictionListener, NoopListener},
    node::Node,
};

type Shard = HashMap<Key, Arc<Node>, ahash::RandomState>;

/// Concurrent hash map with an intrusive ordering chain and a pluggable
/// eviction policy.
///
/// The hash index is sharded with per-shard mutexes; the chain is one global
/// list under its own mutex. The two locks are never held together: index
/// mutation finishes before any chain splice begins, and the chain's
/// `linked` state bridges the gap in between (see [`Chain::remove`]).
///
/// Element slots are only written under the owning shard lock while the node
/// is present in the index, which makes the size counters exact per
/// operation; `len` and `memory_used` are still eventually consistent while
/// an insert or removal is in flight, and are clamped to zero for readers.
pub struct LinkedMap {
    shards: Vec<Mutex<Shard>>,
    shard_mask: usize,
    chain: Chain,
    policy: EvictionPolicy,
    capacity: usize,
    memory_capacity: usize,
    len: AtomicIsize,
    memory_used: AtomicIsize,
    serial: AtomicU64,
    listener: Box<dyn EvictionListener>,
}

impl LinkedMap {
    /// A map bounded by `capacity` entries and `memory_capacity` payload
    /// bytes. `shards` is normalized to a power of two.
    pub fn new(
        capacity: usize,
        memory_capacity: usize,
        shards: usize,
        policy: EvictionPolicy,
    ) -> Self {
        Self::with_listener(capacity, memory_capacity, shards, policy, Box::new(NoopListener))
    }

    pub fn with_listener(
        capacity: usize,
        memory_capacity: usize,
        shards: usize,
        policy: EvictionPolicy,
        listener: Box<dyn EvictionListener>,
    ) -> Self {
        let shard_count = shards.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| Mutex::new(Shard::with_hasher(ahash::RandomState::new())))
            .collect_vec();
        Self {
            shards,
            shard_mask: shard_count - 1,
            chain: Chain::new(),
            policy,
            capacity,
            memory_capacity,
            len: AtomicIsize::new(0),
            memory_used: AtomicIsize::new(0),
            serial: AtomicU64::new(1),
            listener,
        }
    }

    fn shard(&self, key: &Key) -> MutexGuard<'_, Shard> {
        self.shards[key.hash() as usize & self.shard_mask].lock()
    }

    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory_capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Looks up a key and runs the policy's access hook on a hit.
    pub fn get(&self, key: &Key) -> Option<Arc<Element>> {
        let node = self.shard(key).get(key).cloned()?;
        let element = node.element();
        self.policy.on_access(&self.chain, &node);
        Some(element)
    }

    /// Lookup that leaves the eviction order untouched.
    pub fn peek(&self, key: &Key) -> Option<Arc<Element>> {
        self.shard(key).get(key).map(|node| node.element())
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.shard(key).contains_key(key)
    }

    /// Unconditional insert-or-replace, returning the previous element.
    ///
    /// Replacement swaps the element in place and keeps the node's chain
    /// position; insertion appends at the tail and then sheds entries until
    /// the map is back under its bounds.
    pub fn put(&self, element: Arc<Element>) -> Option<Arc<Element>> {
        let key = element.key.clone();
        let size = element.size() as isize;
        let mut previous = None;
        let inserted = {
            let mut shard = self.shard(&key);
            match shard.get(&key) {
                Some(node) => {
                    let old = node.swap_element(element);
                    self.memory_used
                        .fetch_add(size - old.size() as isize, Ordering::Relaxed);
                    previous = Some(old);
                    None
                }
                None => {
                    let node = Arc::new(Node::new(self.next_serial(), key.clone(), element));
                    shard.insert(key, node.clone());
                    self.len.fetch_add(1, Ordering::Relaxed);
                    self.memory_used.fetch_add(size, Ordering::Relaxed);
                    Some(node)
                }
            }
        };
        if let Some(node) = inserted {
            self.chain.push_back(&node);
        }
        self.evict();
        previous
    }

    /// Inserts only if the key is absent; otherwise returns the current
    /// element unchanged.
    pub fn put_if_absent(&self, element: Arc<Element>) -> Option<Arc<Element>> {
        let key = element.key.clone();
        let size = element.size() as isize;
        let node = {
            let mut shard = self.shard(&key);
            if let Some(node) = shard.get(&key) {
                return Some(node.element());
            }
            let node = Arc::new(Node::new(self.next_serial(), key.clone(), element));
            shard.insert(key, node.clone());
            self.len.fetch_add(1, Ordering::Relaxed);
            self.memory_used.fetch_add(size, Ordering::Relaxed);
            node
        };
        self.chain.push_back(&node);
        self.evict();
        None
    }

    /// Removes a key unconditionally, returning the previous element.
    pub fn remove(&self, key: &Key) -> Option<Arc<Element>> {
        let (node, element) = {
            let mut shard = self.shard(key);
            let node = shard.remove(key)?;
            let element = node.element();
            self.len.fetch_sub(1, Ordering::Relaxed);
            self.memory_used
                .fetch_sub(element.size() as isize, Ordering::Relaxed);
            (node, element)
        };
        self.chain.remove(&node);
        Some(element)
    }

    /// Conditional removal: succeeds only while the entry's current element
    /// is `expected` itself (reference identity, not value equality).
    pub fn remove_if(&self, key: &Key, expected: &Arc<Element>) -> Option<Arc<Element>> {
        let (node, element) = {
            let mut shard = self.shard(key);
            let node = shard.get(key)?.clone();
            let element = node.element();
            if !Arc::ptr_eq(&element, expected) {
                return None;
            }
            shard.remove(key);
            self.len.fetch_sub(1, Ordering::Relaxed);
            self.memory_used
                .fetch_sub(element.size() as isize, Ordering::Relaxed);
            (node, element)
        };
        self.chain.remove(&node);
        Some(element)
    }

    /// Conditional removal keyed on the node serial; the eviction path uses
    /// it so a key that was removed and reinserted cannot alias the evicted
    /// node.
    fn remove_serial(&self, key: &Key, serial: u64) -> Option<Arc<Element>> {
        let (node, element) = {
            let mut shard = self.shard(key);
            let node = shard.get(key)?.clone();
            if node.serial() != serial {
                return None;
            }
            let element = node.element();
            shard.remove(key);
            self.len.fetch_sub(1, Ordering::Relaxed);
            self.memory_used
                .fetch_sub(element.size() as isize, Ordering::Relaxed);
            (node, element)
        };
        self.chain.remove(&node);
        Some(element)
    }

    /// Swaps the value for an existing key and returns the old element;
    /// absent keys are left absent. The node keeps its chain position, but a
    /// growing swap may still shed other entries to hold the memory bound.
    pub fn replace(&self, element: Arc<Element>) -> Option<Arc<Element>> {
        let key = element.key.clone();
        let size = element.size() as isize;
        let old = {
            let shard = self.shard(&key);
            let node = shard.get(&key)?;
            let old = node.swap_element(element);
            self.memory_used
                .fetch_add(size - old.size() as isize, Ordering::Relaxed);
            old
        };
        self.evict();
        Some(old)
    }

    /// Value-slot CAS: swaps only while the current element is `expected`
    /// itself. The size counter moves only on success.
    pub fn replace_if(&self, key: &Key, expected: &Arc<Element>, element: Arc<Element>) -> bool {
        let size = element.size() as isize;
        {
            let shard = self.shard(key);
            let Some(node) = shard.get(key) else {
                return false;
            };
            if !node.swap_element_if(expected, element) {
                return false;
            }
            self.memory_used
                .fetch_add(size - expected.size() as isize, Ordering::Relaxed);
        }
        self.evict();
        true
    }

    /// Sheds entries from the head of the chain until both bounds hold.
    /// Returns whether anything was evicted.
    ///
    /// A candidate can be lost to a concurrent removal; the counters have
    /// already moved in that case and the loop simply re-checks the bounds.
    pub fn evict(&self) -> bool {
        let mut evicted = false;
        while self.len() > self.capacity || self.memory_used() > self.memory_capacity {
            let Some((key, serial)) = self.chain.evict_candidate(self.policy) else {
                break;
            };
            match self.remove_serial(&key, serial) {
                Some(element) => {
                    tracing::trace!(key = %key, size = element.size(), "evicted");
                    self.listener.on_evict(&key, &element);
                    evicted = true;
                }
                None => std::thread::yield_now(),
            }
        }
        evicted
    }

    /// Removes every entry. The eviction listener is not notified.
    pub fn clear(&self) {
        for shard in &self.shards {
            let nodes = {
                let mut shard = shard.lock();
                shard.drain().map(|(_, node)| node).collect_vec()
            };
            for node in nodes {
                let element = node.element();
                self.len.fetch_sub(1, Ordering::Relaxed);
                self.memory_used
                    .fetch_sub(element.size() as isize, Ordering::Relaxed);
                self.chain.remove(&node);
            }
        }
    }

    /// Clears the map; what remains afterwards is an empty, reusable map.
    pub fn close(&self) {
        self.clear();
    }

    /// Snapshot of the current keys, in no particular order.
    pub fn keys(&self) -> Vec<Key> {
        self.shards
            .iter()
            .flat_map(|shard| shard.lock().keys().cloned().collect_vec())
            .collect()
    }

    /// Snapshot of the current entries, in no particular order.
    pub fn entries(&self) -> Vec<(Key, Arc<Element>)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .iter()
                    .map(|(key, node)| (key.clone(), node.element()))
                    .collect_vec()
            })
            .collect()
    }

    /// Keys in eviction order, candidate first.
    #[cfg(test)]
    pub(crate) fn chain_keys(&self) -> Vec<Key> {
        self.chain.keys()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bytes::Bytes;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    fn element(key: &str, data: &str) -> Arc<Element> {
        Arc::new(Element::new(
            Key::from(key),
            Bytes::copy_from_slice(data.as_bytes()),
            0,
            0,
        ))
    }

    fn unbounded(policy: EvictionPolicy) -> LinkedMap {
        LinkedMap::new(usize::MAX, usize::MAX, 4, policy)
    }

    #[test]
    fn test_put_get_remove() {
        let map = unbounded(EvictionPolicy::Fifo);
        let key = Key::from("a");

        assert!(map.get(&key).is_none());
        assert!(map.put(element("a", "one")).is_none());
        assert_eq!(map.len(), 1);
        assert_eq!(map.memory_used(), 3);
        assert!(map.contains(&key));

        let hit = map.get(&key).unwrap();
        assert_eq!(&hit.data[..], b"one");

        let old = map.put(element("a", "second")).unwrap();
        assert_eq!(&old.data[..], b"one");
        assert_eq!(map.len(), 1);
        assert_eq!(map.memory_used(), 6);

        let removed = map.remove(&key).unwrap();
        assert_eq!(&removed.data[..], b"second");
        assert_eq!(map.len(), 0);
        assert_eq!(map.memory_used(), 0);
        assert!(map.remove(&key).is_none());
    }

    #[test]
    fn test_put_if_absent() {
        let map = unbounded(EvictionPolicy::Fifo);

        assert!(map.put_if_absent(element("a", "first")).is_none());
        let current = map.put_if_absent(element("a", "second")).unwrap();
        assert_eq!(&current.data[..], b"first");
        assert_eq!(map.len(), 1);
        assert_eq!(map.memory_used(), 5);
    }

    #[test]
    fn test_replace_semantics() {
        let map = unbounded(EvictionPolicy::Fifo);
        let key = Key::from("a");

        // replace on an absent key does not insert
        assert!(map.replace(element("a", "x")).is_none());
        assert!(!map.contains(&key));

        map.put(element("a", "x"));
        let old = map.replace(element("a", "three")).unwrap();
        assert_eq!(&old.data[..], b"x");
        assert_eq!(map.memory_used(), 5);
    }

    #[test]
    fn test_replace_if_is_identity_based() {
        let map = unbounded(EvictionPolicy::Fifo);
        let key = Key::from("a");

        map.put(element("a", "x"));
        let current = map.get(&key).unwrap();

        // a value-equal but distinct element must not pass the CAS
        let impostor = element("a", "x");
        assert!(!map.replace_if(&key, &impostor, element("a", "y")));

        assert!(map.replace_if(&key, &current, element("a", "yy")));
        assert_eq!(map.memory_used(), 2);

        // the expected element is stale now
        assert!(!map.replace_if(&key, &current, element("a", "z")));
    }

    #[test]
    fn test_remove_if_is_identity_based() {
        let map = unbounded(EvictionPolicy::Fifo);
        let key = Key::from("a");

        map.put(element("a", "x"));
        let current = map.get(&key).unwrap();

        assert!(map.remove_if(&key, &element("a", "x")).is_none());
        assert!(map.contains(&key));

        assert!(map.remove_if(&key, &current).is_some());
        assert!(!map.contains(&key));
        assert_eq!(map.len(), 0);
        assert_eq!(map.memory_used(), 0);
    }

    #[test]
    fn test_fifo_eviction_order() {
        let map = LinkedMap::new(2, usize::MAX, 1, EvictionPolicy::Fifo);

        map.put(element("k1", "a"));
        map.put(element("k2", "b"));
        // FIFO ignores access
        map.get(&Key::from("k1"));
        map.put(element("k3", "c"));

        assert_eq!(map.len(), 2);
        assert!(!map.contains(&Key::from("k1")));
        assert!(map.contains(&Key::from("k2")));
        assert!(map.contains(&Key::from("k3")));
    }

    #[test]
    fn test_lru_eviction_order() {
        let map = LinkedMap::new(2, usize::MAX, 1, EvictionPolicy::Lru);

        map.put(element("k1", "a"));
        map.put(element("k2", "b"));
        map.get(&Key::from("k1"));
        assert_eq!(map.chain_keys(), [Key::from("k2"), Key::from("k1")]);

        map.put(element("k3", "c"));
        assert!(!map.contains(&Key::from("k2")));
        assert!(map.contains(&Key::from("k1")));
        assert!(map.contains(&Key::from("k3")));
    }

    #[test]
    fn test_second_chance_saves_hot_entries() {
        let map = LinkedMap::new(2, usize::MAX, 1, EvictionPolicy::SecondChance);

        map.put(element("k1", "a"));
        map.put(element("k2", "b"));
        // mark k1 without moving it
        map.get(&Key::from("k1"));
        assert_eq!(map.chain_keys(), [Key::from("k1"), Key::from("k2")]);

        map.put(element("k3", "c"));
        assert!(map.contains(&Key::from("k1")));
        assert!(!map.contains(&Key::from("k2")));
        assert!(map.contains(&Key::from("k3")));
    }

    #[test_log::test]
    fn test_memory_bound_eviction() {
        let map = LinkedMap::new(usize::MAX, 10, 1, EvictionPolicy::Fifo);

        map.put(element("a", "1234"));
        map.put(element("b", "1234"));
        assert_eq!(map.memory_used(), 8);

        map.put(element("c", "1234"));
        assert_eq!(map.memory_used(), 8);
        assert!(!map.contains(&Key::from("a")));

        // replacement grows past the bound and sheds from the head
        map.replace(element("b", "123456789"));
        assert!(map.memory_used() <= 10);
    }

    #[test]
    fn test_oversized_element_stays_alone() {
        let map = LinkedMap::new(usize::MAX, 4, 1, EvictionPolicy::Fifo);

        map.put(element("big", "way too large"));
        // nothing else to shed; the lone entry stays
        assert_eq!(map.len(), 1);
        assert!(map.contains(&Key::from("big")));
    }

    #[test]
    fn test_eviction_listener() {
        struct Counter(Arc<AtomicUsize>);
        impl EvictionListener for Counter {
            fn on_evict(&self, _: &Key, _: &Element) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let evictions = Arc::new(AtomicUsize::new(0));
        let map = LinkedMap::with_listener(
            1,
            usize::MAX,
            1,
            EvictionPolicy::Fifo,
            Box::new(Counter(evictions.clone())),
        );
        map.put(element("a", "x"));
        map.put(element("b", "y"));
        assert_eq!(map.len(), 1);
        assert_eq!(evictions.load(Ordering::Relaxed), 1);

        // direct removal must not notify
        map.remove(&Key::from("b"));
        assert_eq!(evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_clear() {
        let map = unbounded(EvictionPolicy::Lru);
        for i in 0..32 {
            map.put(element(&format!("k{i}"), "xx"));
        }
        assert_eq!(map.len(), 32);
        assert_eq!(map.memory_used(), 64);

        map.clear();
        assert_eq!(map.len(), 0);
        assert_eq!(map.memory_used(), 0);
        assert!(map.keys().is_empty());
        assert!(map.chain_keys().is_empty());

        // reusable after clear
        map.put(element("again", "x"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_snapshots() {
        let map = unbounded(EvictionPolicy::Fifo);
        map.put(element("a", "1"));
        map.put(element("b", "22"));

        let mut keys = map.keys().iter().map(|k| k.to_string()).collect_vec();
        keys.sort();
        assert_eq!(keys, ["a", "b"]);

        let entries = map.entries();
        assert_eq!(entries.len(), 2);
        let total: usize = entries.iter().map(|(_, e)| e.size()).sum();
        assert_eq!(total, 3);
    }

    #[test_log::test]
    fn test_accounting_fuzz() {
        let map = LinkedMap::new(64, 1024, 4, EvictionPolicy::Lru);
        let mut rng = SmallRng::seed_from_u64(0x1a4de4);

        for _ in 0..10_000 {
            let key = format!("k{}", rng.gen_range(0..256));
            match rng.gen_range(0..4) {
                0 => {
                    let len = rng.gen_range(0..32);
                    map.put(element(&key, &"v".repeat(len)));
                }
                1 => {
                    map.get(&Key::from(key.as_str()));
                }
                2 => {
                    map.remove(&Key::from(key.as_str()));
                }
                _ => {
                    map.replace(element(&key, "replacement"));
                }
            }
            assert!(map.len() <= 64);
        }

        // the counters must agree with a full snapshot
        let entries = map.entries();
        assert_eq!(map.len(), entries.len());
        let total: usize = entries.iter().map(|(_, e)| e.size()).sum();
        assert_eq!(map.memory_used(), total);
    }
}
