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

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{chain::Chain, node::Node};

/// Eviction strategy over the ordering chain.
///
/// A tagged variant rather than a trait object: the policies carry no state
/// of their own and dispatch stays a branch on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionPolicy {
    /// Evict in insertion order; access has no effect.
    Fifo,
    /// Insertion order, but an access since the last eviction scan earns the
    /// entry one reprieve.
    SecondChance,
    /// Evict the least recently used entry.
    Lru,
}

impl EvictionPolicy {
    /// Hook invoked on every successful lookup.
    pub(crate) fn on_access(self, chain: &Chain, node: &Arc<Node>) {
        match self {
            EvictionPolicy::Fifo => {}
            EvictionPolicy::SecondChance => node.set_marked(),
            EvictionPolicy::Lru => chain.move_to_tail(node),
        }
    }
}
