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

//! The in-memory cache core of a memcached-compatible daemon.
//!
//! [`Cache`] speaks memcached command semantics (`set`/`add`/`replace`/
//! `cas`/`append`/`prepend`/`incr`/`decr`/`get`/`delete`/`flush_all`) over
//! a concurrent map with bounded capacity and pluggable eviction. Protocol
//! codecs and the network acceptor are clients of this crate.
//!
//! ```
//! use larder::{CacheBuilder, Element, EvictionPolicy, Key, StoreOutcome};
//!
//! let cache = CacheBuilder::new(EvictionPolicy::Lru)
//!     .with_max_items(1024)
//!     .with_max_bytes(64 * 1024 * 1024)
//!     .build()
//!     .unwrap();
//!
//! let key = Key::from("answer");
//! let outcome = cache.set(Element::new(key.clone(), "42".into(), 0, 0));
//! assert_eq!(outcome, StoreOutcome::Stored);
//!
//! let hits = cache.get(&[key]);
//! assert_eq!(&hits[0].as_ref().unwrap().data[..], b"42");
//! ```

pub mod cache;
pub mod config;

mod scavenger;
mod stats;

pub use cache::{Cache, DeleteOutcome, StoreOutcome};
pub use config::{CacheBuilder, CacheConfig};
pub use larder_common::{
    element::{Delta, Element},
    error::{Error, Result},
    key::Key,
};
pub use larder_memory::{EvictionListener, EvictionPolicy, NoopListener};
