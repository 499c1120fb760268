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

//! The ordered concurrent map backing the larder cache: a sharded hash index
//! cross-cut by one intrusive ordering chain, with pluggable eviction.

mod chain;
mod node;

pub mod eviction;
pub mod listener;
pub mod map;

pub use eviction::EvictionPolicy;
pub use listener::{EvictionListener, NoopListener};
pub use map::LinkedMap;
