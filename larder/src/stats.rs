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

//! Assembly of the memcached `stats` response.
//!
//! Values travel as strings, the form the text protocol emits. `rusage_*`
//! and the connection counters are stubs owned by the network layer.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::Ordering,
};

use larder_common::clock::now_ms;

use crate::cache::CacheInner;

pub(crate) fn collect(
    inner: &CacheInner,
    arg: Option<&str>,
) -> BTreeMap<String, BTreeSet<String>> {
    let now = now_ms();
    let mut stats = BTreeMap::new();
    {
        let mut put = |name: &str, value: String| {
            if arg.is_none() || arg == Some(name) {
                stats
                    .entry(name.to_string())
                    .or_insert_with(BTreeSet::new)
                    .insert(value);
            }
        };

        put("cmd_gets", inner.cmd_gets.load(Ordering::Relaxed).to_string());
        put("cmd_sets", inner.cmd_sets.load(Ordering::Relaxed).to_string());
        put("get_hits", inner.get_hits.load(Ordering::Relaxed).to_string());
        put(
            "get_misses",
            inner.get_misses.load(Ordering::Relaxed).to_string(),
        );
        put("time", now.to_string());
        put("uptime", (now - inner.started_at).to_string());
        put("cur_items", inner.map.len().to_string());
        put("limit_maxbytes", inner.map.memory_capacity().to_string());
        put("current_bytes", inner.map.memory_used().to_string());
        put(
            "free_bytes",
            inner
                .map
                .memory_capacity()
                .saturating_sub(inner.map.memory_used())
                .to_string(),
        );
        put("pid", std::process::id().to_string());
        put("rusage_user", "0:0".to_string());
        put("rusage_system", "0:0".to_string());
        put("connection_structures", "0".to_string());
        put("bytes_read", "0".to_string());
        put("bytes_written", "0".to_string());
    }
    stats
}
