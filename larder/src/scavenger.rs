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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::cache::CacheInner;

const START_DELAY: Duration = Duration::from_secs(10);
const PERIOD: Duration = Duration::from_secs(2);
/// Stop-flag poll interval; keeps `close` prompt despite the long cadence.
const POLL: Duration = Duration::from_millis(100);

/// The periodic task that drains the delayed-delete queue.
///
/// One tick every two seconds after a ten second start delay. Holds only a
/// [`Weak`] reference, so an abandoned cache lets the thread wind down on
/// its own.
pub(crate) struct Scavenger {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Scavenger {
    pub(crate) fn spawn(inner: Weak<CacheInner>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let join = thread::spawn(move || run(inner, flag));
        Self {
            stop,
            join: Some(join),
        }
    }

    /// Requests shutdown without waiting for it.
    pub(crate) fn signal(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Requests shutdown and waits for the thread to exit.
    pub(crate) fn stop(mut self) {
        self.signal();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run(inner: Weak<CacheInner>, stop: Arc<AtomicBool>) {
    let mut next_tick = Instant::now() + START_DELAY;
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if Instant::now() >= next_tick {
            match inner.upgrade() {
                Some(cache) => cache.sweep(),
                None => break,
            }
            next_tick += PERIOD;
        }
        thread::sleep(POLL);
    }
    tracing::debug!("scavenger stopped");
}
