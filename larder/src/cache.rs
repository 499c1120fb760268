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

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

use itertools::Itertools;
use parking_lot::Mutex;

use larder_common::{
    clock::now_ms,
    delay_queue::DelayQueue,
    element::{apply_delta, Delta, Element},
    error::Result,
    key::Key,
};
use larder_memory::LinkedMap;

use crate::{config::CacheConfig, scavenger::Scavenger, stats};

/// Result of a store-class command, surfaced verbatim on the wire by the
/// protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    NotStored,
    Exists,
    NotFound,
}

/// Result of a delete command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// The memcached command façade.
///
/// Cheap to clone; all clones share one store. Every operation is safe from
/// any thread and none blocks on I/O. A background scavenger drains the
/// delayed-delete queue; [`Cache::close`] shuts it down, and dropping the
/// last clone stops it as well.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    pub(crate) map: LinkedMap,
    blocked: DelayQueue,
    cas_counter: AtomicU64,
    pub(crate) cmd_gets: AtomicU64,
    pub(crate) cmd_sets: AtomicU64,
    pub(crate) get_hits: AtomicU64,
    pub(crate) get_misses: AtomicU64,
    pub(crate) started_at: i64,
    /// Deadline of a pending delayed flush; `0` when none is armed.
    flush_at: AtomicI64,
    scavenger: Mutex<Option<Scavenger>>,
}

impl Cache {
    pub(crate) fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(CacheInner {
            map: LinkedMap::new(
                config.max_items,
                config.max_bytes,
                config.shards,
                config.policy,
            ),
            blocked: DelayQueue::new(),
            cas_counter: AtomicU64::new(1),
            cmd_gets: AtomicU64::new(0),
            cmd_sets: AtomicU64::new(0),
            get_hits: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            started_at: now_ms(),
            flush_at: AtomicI64::new(0),
            scavenger: Mutex::new(None),
        });
        *inner.scavenger.lock() = Some(Scavenger::spawn(Arc::downgrade(&inner)));
        tracing::debug!(
            policy = ?config.policy,
            max_items = config.max_items,
            max_bytes = config.max_bytes,
            shards = config.shards,
            "cache built"
        );
        Ok(Self { inner })
    }

    fn next_cas(&self) -> u64 {
        self.inner.cas_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn count_miss(&self) {
        self.inner.get_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Positional multi-get: one `Option` per requested key, a hit only when
    /// the entry is neither expired nor blocked. Counts a single `cmd_gets`
    /// per call and batches the hit/miss tallies.
    pub fn get(&self, keys: &[Key]) -> Vec<Option<Arc<Element>>> {
        self.inner.cmd_gets.fetch_add(1, Ordering::Relaxed);
        let now = now_ms();
        let mut hits = 0u64;
        let mut misses = 0u64;
        let found = keys
            .iter()
            .map(|key| match self.inner.map.get(key) {
                Some(element) if !element.is_expired(now) && !element.is_blocked(now) => {
                    hits += 1;
                    Some(element)
                }
                _ => {
                    misses += 1;
                    None
                }
            })
            .collect_vec();
        if hits > 0 {
            self.inner.get_hits.fetch_add(hits, Ordering::Relaxed);
        }
        if misses > 0 {
            self.inner.get_misses.fetch_add(misses, Ordering::Relaxed);
        }
        found
    }

    /// Single-key convenience over [`Cache::get`].
    pub fn get_one(&self, key: &Key) -> Option<Arc<Element>> {
        self.get(std::slice::from_ref(key)).pop().flatten()
    }

    /// Unconditional store. Refused only while the key is blocked by a
    /// delayed delete.
    pub fn set(&self, mut element: Element) -> StoreOutcome {
        self.inner.cmd_sets.fetch_add(1, Ordering::Relaxed);
        if self.is_write_blocked(&element.key) {
            return StoreOutcome::NotStored;
        }
        element.cas = self.next_cas();
        self.inner.map.put(Arc::new(element));
        StoreOutcome::Stored
    }

    /// Store only if the key is absent.
    pub fn add(&self, mut element: Element) -> StoreOutcome {
        element.cas = self.next_cas();
        match self.inner.map.put_if_absent(Arc::new(element)) {
            Some(_) => StoreOutcome::NotStored,
            None => StoreOutcome::Stored,
        }
    }

    /// Store only if the key is present (and not blocked).
    pub fn replace(&self, mut element: Element) -> StoreOutcome {
        if self.is_write_blocked(&element.key) {
            return StoreOutcome::NotStored;
        }
        element.cas = self.next_cas();
        match self.inner.map.replace(Arc::new(element)) {
            Some(_) => StoreOutcome::Stored,
            None => StoreOutcome::NotStored,
        }
    }

    /// Concatenates the payload after the stored value.
    pub fn append(&self, element: Element) -> StoreOutcome {
        self.concat(element, false)
    }

    /// Concatenates the payload before the stored value.
    pub fn prepend(&self, element: Element) -> StoreOutcome {
        self.concat(element, true)
    }

    fn concat(&self, element: Element, front: bool) -> StoreOutcome {
        let now = now_ms();
        let Some(current) = self.inner.map.get(&element.key) else {
            self.count_miss();
            return StoreOutcome::NotFound;
        };
        if current.is_blocked(now) || current.is_expired(now) {
            self.count_miss();
            return StoreOutcome::NotFound;
        }
        let mut next = if front {
            current.prepend(&element)
        } else {
            current.append(&element)
        };
        next.cas = self.next_cas();
        if self.inner.map.replace_if(&element.key, &current, Arc::new(next)) {
            StoreOutcome::Stored
        } else {
            // a concurrent writer swapped the value first
            StoreOutcome::NotStored
        }
    }

    /// Optimistic replace keyed on the CAS token handed out with the last
    /// read: `Stored` on success, `Exists` when the token is stale,
    /// `NotFound` when the key is missing, blocked, or lost a race.
    pub fn cas(&self, expected_cas: u64, mut element: Element) -> StoreOutcome {
        let now = now_ms();
        let key = element.key.clone();
        let Some(current) = self.inner.map.get(&key) else {
            self.count_miss();
            return StoreOutcome::NotFound;
        };
        if current.is_blocked(now) {
            self.count_miss();
            return StoreOutcome::NotFound;
        }
        if current.cas != expected_cas {
            return StoreOutcome::Exists;
        }
        element.cas = self.next_cas();
        if self.inner.map.replace_if(&key, &current, Arc::new(element)) {
            StoreOutcome::Stored
        } else {
            StoreOutcome::NotFound
        }
    }

    /// Adds `delta` to a decimal payload, returning the new value.
    pub fn incr(&self, key: &Key, delta: u64) -> Result<Option<u64>> {
        self.arith(key, Delta::Incr(delta))
    }

    /// Subtracts `delta` from a decimal payload, clamping at zero.
    pub fn decr(&self, key: &Key, delta: u64) -> Result<Option<u64>> {
        self.arith(key, Delta::Decr(delta))
    }

    /// `Ok(None)` on a miss, a blocked or expired entry, or a lost race;
    /// [`Error::NotNumeric`](larder_common::error::Error::NotNumeric) when
    /// the payload does not parse. Races are never retried internally.
    fn arith(&self, key: &Key, delta: Delta) -> Result<Option<u64>> {
        let now = now_ms();
        let Some(current) = self.inner.map.get(key) else {
            self.count_miss();
            return Ok(None);
        };
        if current.is_blocked(now) || current.is_expired(now) {
            self.count_miss();
            return Ok(None);
        }
        let (old, mut next) = current.incr_decr(delta)?;
        next.cas = self.next_cas();
        if self.inner.map.replace_if(key, &current, Arc::new(next)) {
            Ok(Some(apply_delta(old, delta)))
        } else {
            Ok(None)
        }
    }

    /// Removes a key immediately, or, with `delay_ms > 0`, installs a
    /// blocked placeholder that rejects writes until the deadline and is
    /// swept out by the scavenger afterwards.
    ///
    /// The delayed branch answers `Deleted` iff the placeholder replaced a
    /// live entry; a placeholder is never installed for an absent key.
    pub fn delete(&self, key: &Key, delay_ms: i64) -> DeleteOutcome {
        if delay_ms <= 0 {
            return match self.inner.map.remove(key) {
                Some(_) => DeleteOutcome::Deleted,
                None => DeleteOutcome::NotFound,
            };
        }

        let mut placeholder = Element::blocked_placeholder(key.clone(), now_ms() + delay_ms);
        placeholder.cas = self.next_cas();
        let placeholder = Arc::new(placeholder);
        match self.inner.map.replace(placeholder.clone()) {
            Some(_) => {
                self.inner.blocked.add(placeholder);
                DeleteOutcome::Deleted
            }
            None => DeleteOutcome::NotFound,
        }
    }

    /// Clears every entry, immediately or once `delay_ms` has elapsed (the
    /// scavenger fires the pending flush). Always answers `true`.
    pub fn flush_all(&self, delay_ms: i64) -> bool {
        if delay_ms <= 0 {
            tracing::debug!("flushing all entries");
            self.inner.map.clear();
        } else {
            self.inner
                .flush_at
                .store(now_ms() + delay_ms, Ordering::Relaxed);
        }
        true
    }

    /// One scavenger tick: fires a due delayed flush and unblocks at most
    /// one elapsed placeholder. Public so embedders and tests can drive
    /// time explicitly.
    pub fn sweep(&self) {
        self.inner.sweep();
    }

    /// Stats for the memcached `stats` command; `arg` narrows the answer to
    /// a single metric.
    pub fn stat(&self, arg: Option<&str>) -> BTreeMap<String, BTreeSet<String>> {
        stats::collect(&self.inner, arg)
    }

    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    pub fn memory_used(&self) -> usize {
        self.inner.map.memory_used()
    }

    /// Shuts down the scavenger and clears the store. The network layer is
    /// expected to stop accepting requests first; operations after `close`
    /// see an empty cache.
    pub fn close(&self) {
        if let Some(scavenger) = self.inner.scavenger.lock().take() {
            scavenger.stop();
        }
        self.inner.blocked.clear();
        self.inner.map.clear();
    }

    /// A key is write-blocked while it holds a delayed-delete placeholder
    /// whose deadline has not passed.
    fn is_write_blocked(&self, key: &Key) -> bool {
        match self.inner.map.peek(key) {
            Some(current) => current.is_blocked(now_ms()),
            None => false,
        }
    }
}

impl CacheInner {
    pub(crate) fn sweep(&self) {
        let now = now_ms();

        let flush_at = self.flush_at.load(Ordering::Relaxed);
        if flush_at != 0
            && flush_at <= now
            && self
                .flush_at
                .compare_exchange(flush_at, 0, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            tracing::debug!("delayed flush fired");
            self.map.clear();
        }

        if let Some(placeholder) = self.blocked.poll_expired(now) {
            // only remove while the placeholder is still the current value;
            // a value stored after the deadline stays
            if self.map.remove_if(&placeholder.key, &placeholder).is_some() {
                tracing::trace!(key = %placeholder.key, "blocked key swept");
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        // signal without joining: the final drop may run on the scavenger
        // thread itself via its upgraded reference
        if let Some(scavenger) = self.scavenger.get_mut().take() {
            scavenger.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use bytes::Bytes;

    use crate::config::CacheBuilder;
    use larder_memory::EvictionPolicy;

    use super::*;

    fn cache() -> Cache {
        CacheBuilder::new(EvictionPolicy::Lru)
            .with_max_items(1024)
            .with_max_bytes(1 << 20)
            .build()
            .unwrap()
    }

    fn element(key: &str, data: &str) -> Element {
        Element::new(
            Key::from(key),
            Bytes::copy_from_slice(data.as_bytes()),
            0,
            0,
        )
    }

    #[test]
    fn test_blocked_key_rejects_writes() {
        let cache = cache();
        let key = Key::from("a");

        cache.set(element("a", "1"));
        assert_eq!(cache.delete(&key, 60_000), DeleteOutcome::Deleted);

        assert_eq!(cache.set(element("a", "2")), StoreOutcome::NotStored);
        assert_eq!(cache.replace(element("a", "2")), StoreOutcome::NotStored);
        assert_eq!(cache.add(element("a", "2")), StoreOutcome::NotStored);
        assert_eq!(cache.append(element("a", "2")), StoreOutcome::NotFound);
        assert_eq!(cache.prepend(element("a", "2")), StoreOutcome::NotFound);
        assert_eq!(cache.cas(1, element("a", "2")), StoreOutcome::NotFound);
        assert_eq!(cache.incr(&key, 1).unwrap(), None);

        // blocked entries are read misses as well
        assert!(cache.get_one(&key).is_none());
        cache.close();
    }

    #[test]
    fn test_delayed_delete_of_missing_key() {
        let cache = cache();
        assert_eq!(
            cache.delete(&Key::from("ghost"), 1_000),
            DeleteOutcome::NotFound
        );
        // no placeholder was installed
        assert!(cache.is_empty());
        cache.close();
    }

    #[test]
    fn test_sweep_removes_elapsed_placeholder() {
        let cache = cache();
        cache.set(element("a", "1"));
        cache.delete(&Key::from("a"), 30);

        thread::sleep(Duration::from_millis(60));
        cache.sweep();
        assert!(!cache.inner.map.contains(&Key::from("a")));
        cache.close();
    }

    #[test]
    fn test_sweep_spares_value_stored_after_deadline() {
        let cache = cache();
        cache.set(element("a", "1"));
        cache.delete(&Key::from("a"), 30);

        thread::sleep(Duration::from_millis(60));
        // the block elapsed, so the write is accepted again
        assert_eq!(cache.set(element("a", "fresh")), StoreOutcome::Stored);

        cache.sweep();
        assert_eq!(&cache.get_one(&Key::from("a")).unwrap().data[..], b"fresh");
        cache.close();
    }

    #[test]
    fn test_delayed_flush() {
        let cache = cache();
        cache.set(element("a", "1"));

        assert!(cache.flush_all(30));
        cache.sweep();
        assert_eq!(cache.len(), 1);

        thread::sleep(Duration::from_millis(60));
        cache.sweep();
        assert_eq!(cache.len(), 0);
        cache.close();
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = cache();
        let mut e = element("a", "1");
        e.expire = now_ms() - 1;
        cache.set(e);

        assert!(cache.get_one(&Key::from("a")).is_none());
        let misses: u64 = cache.stat(Some("get_misses"))["get_misses"]
            .iter()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(misses, 1);
        cache.close();
    }

    #[test]
    fn test_close_clears() {
        let cache = cache();
        cache.set(element("a", "1"));
        cache.close();
        assert!(cache.is_empty());
    }
}
