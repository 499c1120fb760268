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
    cell::UnsafeCell,
    ptr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;

use larder_common::{element::Element, key::Key};

/// Chain linkage of a node. Only touched under the chain mutex; `linked`
/// doubles as the "not yet appended / already unlinked" marker.
pub(crate) struct Link {
    pub(crate) prev: *const Node,
    pub(crate) next: *const Node,
    pub(crate) linked: bool,
}

/// One entry of the map: the current element plus its chain position.
///
/// The element slot is swapped whole on every semantic update, always under
/// the owning shard lock; readers hold `Arc<Element>` snapshots and never
/// observe a torn value. `serial` is a process-unique identity: conditional
/// removal keyed on it cannot alias an older node for the same key after a
/// remove/reinsert, and the node keeps it across element replacement.
pub(crate) struct Node {
    serial: u64,
    key: Key,
    element: RwLock<Arc<Element>>,
    marked: AtomicBool,
    pub(crate) link: UnsafeCell<Link>,
}

// The raw link pointers are only dereferenced under the chain mutex; the
// element slot and the mark have their own synchronization.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub(crate) fn new(serial: u64, key: Key, element: Arc<Element>) -> Self {
        Self {
            serial,
            key,
            element: RwLock::new(element),
            marked: AtomicBool::new(false),
            link: UnsafeCell::new(Link {
                prev: ptr::null(),
                next: ptr::null(),
                linked: false,
            }),
        }
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    /// Snapshot of the current element.
    pub(crate) fn element(&self) -> Arc<Element> {
        self.element.read().clone()
    }

    /// Swaps the element slot, returning the previous value.
    pub(crate) fn swap_element(&self, element: Arc<Element>) -> Arc<Element> {
        std::mem::replace(&mut *self.element.write(), element)
    }

    /// Conditional swap keyed on reference identity of the current element.
    pub(crate) fn swap_element_if(&self, expected: &Arc<Element>, element: Arc<Element>) -> bool {
        let mut slot = self.element.write();
        if !Arc::ptr_eq(&slot, expected) {
            return false;
        }
        *slot = element;
        true
    }

    pub(crate) fn set_marked(&self) {
        self.marked.store(true, Ordering::Relaxed);
    }

    /// Clears the mark, reporting whether it was set.
    pub(crate) fn take_marked(&self) -> bool {
        self.marked.swap(false, Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Relaxed)
    }
}
