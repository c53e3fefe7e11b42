/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard},
};

use mixbuild_interface::RequestKey;

/// Requests waiting for the next cycle.
///
/// Enqueueing may happen from many threads at once. Everything else happens between cycles.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: Mutex<BTreeSet<RequestKey>>,
}

impl RequestRegistry {
    pub fn new() -> RequestRegistry {
        RequestRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<RequestKey>> {
        // The set is valid after any panic while the lock was held, since insert is atomic.
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns false if the request was already pending.
    pub fn enqueue(&self, key: RequestKey) -> bool {
        self.lock().insert(key)
    }

    /// Sorted copy of the pending requests.
    pub fn snapshot(&self) -> Vec<RequestKey> {
        self.lock().iter().cloned().collect()
    }

    /// Removes and returns every pending request.
    pub fn take(&self) -> Vec<RequestKey> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
