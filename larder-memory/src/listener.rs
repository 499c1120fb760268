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

use larder_common::{element::Element, key::Key};

/// Hook invoked when the map sheds an entry to get back under capacity.
///
/// Explicit removals and clears do not notify.
pub trait EvictionListener: Send + Sync + 'static {
    #[allow(unused_variables)]
    fn on_evict(&self, key: &Key, element: &Element) {}
}

/// Listener that ignores evictions.
#[derive(Debug, Default)]
pub struct NoopListener;

impl EvictionListener for NoopListener {}
