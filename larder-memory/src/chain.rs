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

//! The intrusive ordering chain that cross-cuts the sharded hash index.
//!
//! One mutex serializes structural mutation; every critical section is a
//! constant-time pointer splice. The head is the eviction candidate, the
//! tail the most recently appended (or, under LRU, most recently used).
//!
//! Safety invariant: a linked node is kept alive by the hash index, or by
//! the single in-flight operation that has just removed it from the index
//! and will unlink it next. Chain-derived pointers are only dereferenced
//! under the chain mutex, and unlinking requires that mutex, so a node
//! observed linked inside the critical section cannot be freed under us.

use std::{ptr, sync::Arc, thread};

use parking_lot::Mutex;

use larder_common::key::Key;

use crate::{
    eviction::EvictionPolicy,
    node::{Link, Node},
};

pub(crate) struct Chain {
    inner: Mutex<ChainInner>,
}

struct ChainInner {
    head: *const Node,
    tail: *const Node,
}

// Raw pointers into nodes owned by the hash index; see the module invariant.
unsafe impl Send for ChainInner {}

impl Chain {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(ChainInner {
                head: ptr::null(),
                tail: ptr::null(),
            }),
        }
    }

    /// Appends a node at the tail.
    ///
    /// The node must already be published in the hash index; the index
    /// reference is what keeps the link pointers valid.
    pub(crate) fn push_back(&self, node: &Arc<Node>) {
        let mut chain = self.inner.lock();
        unsafe {
            let link = &mut *node.link.get();
            debug_assert!(!link.linked);
            append(&mut chain, Arc::as_ptr(node), link);
        }
    }

    /// Unlinks a node.
    ///
    /// A concurrent insert may have published the node in the index without
    /// having appended it yet; in that case spin (lock, yield, retry) until
    /// the append lands. The wait is bounded by that append's critical
    /// section, and exactly one caller ever unlinks a given node.
    pub(crate) fn remove(&self, node: &Arc<Node>) {
        loop {
            let mut chain = self.inner.lock();
            unsafe {
                let link = &mut *node.link.get();
                if link.linked {
                    unlink(&mut chain, link);
                    return;
                }
            }
            drop(chain);
            thread::yield_now();
        }
    }

    /// Moves a node to the tail. No-op when it is already there, or when it
    /// is currently unlinked (a not-yet-appended insert or a concurrent
    /// removal); idempotent under concurrent move requests.
    pub(crate) fn move_to_tail(&self, node: &Arc<Node>) {
        let mut chain = self.inner.lock();
        let ptr = Arc::as_ptr(node);
        if chain.tail == ptr {
            return;
        }
        unsafe {
            let link = &mut *node.link.get();
            if !link.linked {
                return;
            }
            unlink(&mut chain, link);
            append(&mut chain, ptr, link);
        }
    }

    /// Picks the eviction candidate from the head under the chain mutex,
    /// returning its key and serial.
    ///
    /// SECOND-CHANCE gives marked heads a reprieve: the mark is cleared, the
    /// node rotates to the tail, and the scan continues. The scan visits a
    /// distinct node each iteration, so it ends once it meets a head that
    /// has not been re-marked since the last pass.
    pub(crate) fn evict_candidate(&self, policy: EvictionPolicy) -> Option<(Key, u64)> {
        let mut chain = self.inner.lock();
        loop {
            let head = chain.head;
            if head.is_null() {
                return None;
            }
            let node = unsafe { &*head };
            if policy == EvictionPolicy::SecondChance && node.take_marked() {
                unsafe {
                    let link = &mut *node.link.get();
                    unlink(&mut chain, link);
                    append(&mut chain, head, link);
                }
                continue;
            }
            return Some((node.key().clone(), node.serial()));
        }
    }

    /// Keys in chain order, head first.
    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<Key> {
        let chain = self.inner.lock();
        let mut keys = Vec::new();
        let mut cursor = chain.head;
        while !cursor.is_null() {
            let node = unsafe { &*cursor };
            keys.push(node.key().clone());
            cursor = unsafe { (*node.link.get()).next };
        }
        keys
    }
}

/// Splices a node in at the tail. Caller holds the chain mutex.
unsafe fn append(chain: &mut ChainInner, ptr: *const Node, link: &mut Link) {
    link.next = ptr::null();
    link.prev = chain.tail;
    if chain.tail.is_null() {
        chain.head = ptr;
    } else {
        (*(*chain.tail).link.get()).next = ptr;
    }
    chain.tail = ptr;
    link.linked = true;
}

/// Splices a node out. Caller holds the chain mutex and the node is linked.
unsafe fn unlink(chain: &mut ChainInner, link: &mut Link) {
    debug_assert!(link.linked);
    if link.prev.is_null() {
        chain.head = link.next;
    } else {
        (*(*link.prev).link.get()).next = link.next;
    }
    if link.next.is_null() {
        chain.tail = link.prev;
    } else {
        (*(*link.next).link.get()).prev = link.prev;
    }
    link.prev = ptr::null();
    link.next = ptr::null();
    link.linked = false;
}
