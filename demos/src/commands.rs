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

//! Walks the memcached command surface against a small LRU-bounded cache.
//!
//! ```bash
//! RUST_LOG=trace cargo run --bin commands
//! ```

use bytes::Bytes;
use larder::{CacheBuilder, Element, EvictionPolicy, Key, Result};

fn element(key: &str, data: &str) -> Element {
    Element::new(
        Key::from(key),
        Bytes::copy_from_slice(data.as_bytes()),
        0,
        0,
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cache = CacheBuilder::new(EvictionPolicy::Lru)
        .with_max_items(4)
        .with_max_bytes(1024)
        .build()?;

    println!("set a=1            -> {:?}", cache.set(element("a", "1")));
    println!("add a=2            -> {:?}", cache.add(element("a", "2")));
    println!("append a+=23       -> {:?}", cache.append(element("a", "23")));

    let hit = cache.get(&[Key::from("a")]).pop().flatten();
    let current = hit.expect("a was just stored");
    println!(
        "get a              -> {:?} (cas {})",
        String::from_utf8_lossy(&current.data),
        current.cas
    );

    println!(
        "cas a=9 (token {}) -> {:?}",
        current.cas,
        cache.cas(current.cas, element("a", "9"))
    );
    println!(
        "cas a=8 (stale)    -> {:?}",
        cache.cas(current.cas, element("a", "8"))
    );

    cache.set(element("n", "10"));
    println!("incr n by 5        -> {:?}", cache.incr(&Key::from("n"), 5)?);
    println!("decr n by 100      -> {:?}", cache.decr(&Key::from("n"), 100)?);

    println!("delete n (delayed) -> {:?}", cache.delete(&Key::from("n"), 2_000));
    println!("set n during block -> {:?}", cache.set(element("n", "0")));

    // overflow the item bound and watch LRU shed the cold keys
    for name in ["b", "c", "d", "e"] {
        cache.set(element(name, "filler"));
    }
    println!("items after churn  -> {}", cache.len());

    for (name, values) in cache.stat(None) {
        println!("stat {name:>22} = {values:?}");
    }

    cache.close();
    Ok(())
}
