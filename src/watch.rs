/*
 *   Copyright (c) 2024 xenstore-client contributors
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! The watch subsystem: [`Watcher`] mailboxes keyed by [`Token`] (spec.md
//! §4.3), and the registry the Dispatcher consults to route `WatchEvent`
//! packets (spec.md §3's `watchers` map).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::wire::Token;
use crate::StdMutex;

/// An in-memory mailbox of modified paths bound to one watch token.
///
/// `paths` collapses any sequence of `put` calls into an unordered set —
/// callers that need ordering must not use this primitive (spec.md §5).
/// `cancelling` is monotonic: once set, it is never cleared.
#[derive(Debug, Default)]
pub struct Watcher {
    paths: StdMutex<HashSet<String>>,
    cancelling: StdMutex<bool>,
    notify: Notify,
}

impl Watcher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paths: StdMutex::new(HashSet::new()),
            cancelling: StdMutex::new(false),
            notify: Notify::new(),
        })
    }

    /// Deliver a modified path to this watcher. Never blocks beyond the
    /// mutex itself.
    pub fn put(&self, path: String) {
        self.paths.lock().unwrap().insert(path);
        self.notify.notify_one();
    }

    /// Block until at least one path has been delivered, or the watcher
    /// has been cancelled, then atomically drain and return the set.
    ///
    /// A cancelled watcher returns the empty set without waiting.
    pub async fn get(&self) -> HashSet<String> {
        loop {
            // Capture the notification point *before* checking state: a
            // `put`/`cancel` that lands after this call but before the
            // `.await` below still wakes us, per `Notify`'s documented
            // "notified() then check then await" pattern.
            let notified = self.notify.notified();

            {
                let mut paths = self.paths.lock().unwrap();
                if !paths.is_empty() {
                    return std::mem::take(&mut *paths);
                }
            }
            if *self.cancelling.lock().unwrap() {
                return HashSet::new();
            }

            notified.await;
        }
    }

    /// Mark this watcher as cancelling. Fire-and-forget: cleanup of any
    /// server-side subscriptions remains the `wait` caller's
    /// responsibility (spec.md §4.6 step 5).
    pub fn cancel(&self) {
        *self.cancelling.lock().unwrap() = true;
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        *self.cancelling.lock().unwrap()
    }
}

/// The Client's `token -> Watcher` map (spec.md §3). Writers: `wait`
/// (insert at start, remove at end). Readers: the Dispatcher, routing
/// `WatchEvent` packets by token.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    inner: StdMutex<HashMap<Token, Arc<Watcher>>>,
}

impl WatcherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, token: Token, watcher: Arc<Watcher>) {
        self.inner.lock().unwrap().insert(token, watcher);
    }

    pub fn remove(&self, token: &Token) {
        self.inner.lock().unwrap().remove(token);
    }

    /// Deliver `path` to the watcher registered under `token`, if any.
    /// A stale token (no registered watcher) is silently dropped —
    /// spec.md §4.2.
    pub fn deliver(&self, token: &str, path: String) {
        if let Some(watcher) = self.inner.lock().unwrap().get(&Token(token.to_string())) {
            watcher.put(path);
        } else {
            tracing::warn!(token, "dropping watch event for unknown/stale token");
        }
    }
}
