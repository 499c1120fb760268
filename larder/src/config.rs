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

use serde::{Deserialize, Serialize};

use larder_common::error::{Error, Result};
use larder_memory::EvictionPolicy;

use crate::cache::Cache;

const DEFAULT_SHARDS: usize = 8;

/// Cache construction parameters.
///
/// Policies serialize under their wire names (`FIFO`, `SECOND_CHANCE`,
/// `LRU`), so a daemon can read this straight from its config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entry count before eviction.
    pub max_items: usize,
    /// Maximum payload bytes before eviction.
    pub max_bytes: usize,
    /// Hash index shard count; normalized to a power of two.
    #[serde(default = "default_shards")]
    pub shards: usize,
    pub policy: EvictionPolicy,
}

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

impl CacheConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::InvalidConfig(
                "shard count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(self) -> Result<Cache> {
        Cache::with_config(self)
    }
}

/// Builder for [`Cache`].
///
/// The eviction policy is chosen up front and both capacity bounds must be
/// set before `build`; only the shard count carries a default.
pub struct CacheBuilder {
    policy: EvictionPolicy,
    max_items: Option<usize>,
    max_bytes: Option<usize>,
    shards: usize,
}

impl CacheBuilder {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            max_items: None,
            max_bytes: None,
            shards: DEFAULT_SHARDS,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn build(self) -> Result<Cache> {
        let Some(max_items) = self.max_items else {
            return Err(Error::InvalidConfig("max_items must be set".to_string()));
        };
        let Some(max_bytes) = self.max_bytes else {
            return Err(Error::InvalidConfig("max_bytes must be set".to_string()));
        };
        Cache::with_config(CacheConfig {
            max_items,
            max_bytes,
            shards: self.shards,
            policy: self.policy,
        })
    }
}
