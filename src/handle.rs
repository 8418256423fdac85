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

//! [`Handle`]: a cheap value carrying the caller-visible state a sequence
//! of operations accumulates — transaction id, accessed paths, watched
//! paths (spec.md §4.5). Cloning the underlying [`crate::client::Client`]
//! reference is an `Arc` bump; the path bookkeeping is owned directly so
//! operations can mutate it in place rather than threading a fresh value
//! through every call.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::Client;
use crate::error::Result;
use crate::wire::codec;

/// A transaction id, accessed/watched path bookkeeping, and a reference
/// to the `Client` that operations are dispatched through.
#[derive(Debug)]
pub struct Handle<T> {
    client: Arc<Client<T>>,
    tid: u32,
    accessed_paths: Option<HashSet<String>>,
    watched_paths: HashSet<String>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            tid: self.tid,
            accessed_paths: self.accessed_paths.clone(),
            watched_paths: self.watched_paths.clone(),
        }
    }
}

impl<T> Handle<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// A handle outside any transaction (`tid == 0`), not tracking paths.
    #[must_use]
    pub fn no_transaction(client: Arc<Client<T>>) -> Self {
        Self {
            client,
            tid: 0,
            accessed_paths: None,
            watched_paths: HashSet::new(),
        }
    }

    /// A handle bound to an open transaction.
    #[must_use]
    pub fn transaction(client: Arc<Client<T>>, tid: u32) -> Self {
        Self {
            client,
            tid,
            accessed_paths: None,
            watched_paths: HashSet::new(),
        }
    }

    /// A handle that records every path it touches, for [`crate::wait`].
    #[must_use]
    pub fn watching(client: Arc<Client<T>>) -> Self {
        Self {
            client,
            tid: 0,
            accessed_paths: Some(HashSet::new()),
            watched_paths: HashSet::new(),
        }
    }

    #[must_use]
    pub fn tid(&self) -> u32 {
        self.tid
    }

    #[must_use]
    pub fn accessed_paths(&self) -> Option<&HashSet<String>> {
        self.accessed_paths.as_ref()
    }

    #[must_use]
    pub fn watched_paths(&self) -> &HashSet<String> {
        &self.watched_paths
    }

    /// Clear the accessed-paths set, keeping recording enabled if it was.
    /// `wait` calls this at the top of every iteration of its predicate
    /// loop (spec.md §4.6 step 2).
    pub fn reset_accessed(&mut self) {
        if let Some(set) = self.accessed_paths.as_mut() {
            set.clear();
        }
    }

    fn record_accessed(&mut self, path: &str) {
        if let Some(set) = self.accessed_paths.as_mut() {
            set.insert(path.to_string());
        }
    }

    /// Read the set of children at `path`.
    pub async fn directory(&mut self, path: &str) -> Result<Vec<String>> {
        self.record_accessed(path);
        let tid = self.tid;
        self.client
            .rpc(|rid| codec::directory(rid, tid, path))
            .await?
            .parse_list()
    }

    /// Read the value stored at `path`.
    pub async fn read(&mut self, path: &str) -> Result<String> {
        self.record_accessed(path);
        let tid = self.tid;
        self.client
            .rpc(|rid| codec::read(rid, tid, path))
            .await?
            .parse_string()
    }

    /// Write `data` at `path`.
    pub async fn write(&mut self, path: &str, data: &str) -> Result<()> {
        self.record_accessed(path);
        let tid = self.tid;
        self.client
            .rpc(|rid| codec::write(rid, tid, path, data))
            .await
            .map(|_| ())
    }

    /// Subscribe `token` to changes under `path`. On success, `path` is
    /// added to `watched_paths`.
    pub async fn watch(&mut self, path: &str, token: &str) -> Result<()> {
        let tid = self.tid;
        self.client
            .rpc(|rid| codec::watch(rid, tid, path, token))
            .await?;
        self.watched_paths.insert(path.to_string());
        Ok(())
    }

    /// Unsubscribe `token` from `path`. `path` is removed from
    /// `watched_paths` regardless of the server's reply, since a failed
    /// unwatch of a path the server no longer tracks is not recoverable
    /// by retrying.
    pub async fn unwatch(&mut self, path: &str, token: &str) -> Result<()> {
        let tid = self.tid;
        let outcome = self
            .client
            .rpc(|rid| codec::unwatch(rid, tid, path, token))
            .await
            .map(|_| ());
        self.watched_paths.remove(path);
        outcome
    }

    /// Open a new transaction via an anonymous, non-transactional rpc.
    /// Returns the fresh transaction id the server assigned.
    pub async fn transaction_start(&self) -> Result<u32> {
        let packet = self.client.rpc(codec::transaction_start).await?;
        let body = packet.parse_string()?;
        body.trim()
            .parse::<u32>()
            .map_err(|_| crate::error::XsError::ResponseParserFailed)
    }

    /// Close this handle's transaction, committing or aborting it.
    pub async fn transaction_end(&self, commit: bool) -> Result<()> {
        let tid = self.tid;
        self.client
            .rpc(move |rid| codec::transaction_end(rid, tid, commit))
            .await?
            .parse_ok()
    }
}
