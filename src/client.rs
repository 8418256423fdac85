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

//! [`Client`]: the shared state one Dispatcher task and any number of
//! [`crate::handle::Handle`]s cooperate over (spec.md §3, §4.4).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::dispatcher::spawn_dispatcher;
use crate::error::{Result, XsError};
use crate::wire::{Packet, Token};
use crate::watch::WatcherRegistry;
use crate::StdMutex;

/// The `pending` map (spec.md §3) and the shutdown flag it must be
/// checked-and-inserted against atomically. The value is `None` once the
/// Dispatcher has taken the sender to fulfil it — the key stays present
/// until `rpc`'s own cleanup removes it, so a reply for an
/// already-fulfilled rid is still distinguishable from one for an rid
/// that was never registered (spec.md §4.4's "removed only after the
/// reply has been delivered to the caller").
#[derive(Debug, Default)]
struct PendingInner {
    map: std::collections::HashMap<u32, Option<oneshot::Sender<Result<Packet>>>>,
    shutting_down: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PendingMap {
    inner: StdMutex<PendingInner>,
}

impl PendingMap {
    fn new() -> Self {
        Self {
            inner: StdMutex::new(PendingInner::default()),
        }
    }

    #[must_use]
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }

    /// Check `shutting_down` and register `rid` under one lock acquisition
    /// (spec.md §4.4 step 1–2), so the Dispatcher's fan-out-and-shutdown
    /// can never land in the window between an `rpc` caller's shutdown
    /// check and its own insert and leave a slot nothing will ever
    /// complete.
    fn try_register(&self, rid: u32, tx: oneshot::Sender<Result<Packet>>) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.shutting_down {
            return Err(XsError::DispatcherFailed);
        }
        if guard.map.contains_key(&rid) {
            return Err(XsError::DuplicateRid(rid));
        }
        guard.map.insert(rid, Some(tx));
        Ok(())
    }

    fn remove(&self, rid: u32) {
        self.inner.lock().unwrap().map.remove(&rid);
    }

    /// Fulfil the pending slot for `rid`, if one is registered and not
    /// already fulfilled. Returns `false` when `rid` is unknown, which
    /// the Dispatcher treats as a fatal protocol violation.
    pub(crate) fn complete(&self, rid: u32, result: Result<Packet>) -> bool {
        let mut guard = self.inner.lock().unwrap();
        match guard.map.get_mut(&rid) {
            Some(slot @ Some(_)) => {
                let tx = slot.take().expect("just matched Some");
                let _ = tx.send(result);
                true
            }
            _ => false,
        }
    }

    /// Atomically set `shutting_down` and fail every still-pending caller
    /// with `err`. Called once, when the Dispatcher terminates (spec.md
    /// §4.2) or the `Client` is dropped. Folding the flag flip and the
    /// fan-out into the same lock acquisition as [`Self::try_register`]
    /// is what rules out the TOCTOU window described above.
    pub(crate) fn fail_all(&self, err: &XsError) {
        let mut guard = self.inner.lock().unwrap();
        guard.shutting_down = true;
        for slot in guard.map.values_mut() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }
}

/// The multiplexed client core: one transport, one background Dispatcher
/// task, shared maps for in-flight requests and active watches.
///
/// `T` is the transport and is never inspected beyond
/// `AsyncRead + AsyncWrite`; [`crate::unix`] supplies a convenience
/// constructor over `UnixStream`, but `Client` itself is transport-agnostic
/// so tests can drive it over `tokio::io::duplex`.
pub struct Client<T> {
    write_half: tokio::sync::Mutex<WriteHalf<T>>,
    pending: Arc<PendingMap>,
    watchers: Arc<WatcherRegistry>,
    next_rid: AtomicU32,
    next_watch_generation: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Take ownership of `transport`, split it, and spawn the Dispatcher.
    #[must_use]
    pub fn new(transport: T) -> Arc<Self> {
        let (read_half, write_half) = split(transport);
        let pending = Arc::new(PendingMap::new());
        let watchers = Arc::new(WatcherRegistry::new());

        let dispatcher = spawn_dispatcher(read_half, pending.clone(), watchers.clone());

        Arc::new(Self {
            write_half: tokio::sync::Mutex::new(write_half),
            pending,
            watchers,
            next_rid: AtomicU32::new(1),
            next_watch_generation: AtomicU64::new(0),
            dispatcher,
        })
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.pending.is_shutting_down()
    }

    pub(crate) fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    pub(crate) fn next_watch_token(&self, label: &str) -> Token {
        let generation = self.next_watch_generation.fetch_add(1, Ordering::Relaxed);
        Token::new(label, generation)
    }

    /// The request/response correlator (spec.md §4.4): allocate an rid,
    /// register it before writing, write the request through the
    /// serializing write lock, then wait for the Dispatcher to deliver a
    /// reply. `pending[rid]` is always removed before returning, on every
    /// path.
    pub(crate) async fn rpc(&self, build: impl FnOnce(u32) -> Vec<u8>) -> Result<Packet> {
        let rid = self.next_rid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.try_register(rid, tx)?;

        let bytes = build(rid);
        tracing::trace!(rid, len = bytes.len(), "sending request");
        let write_outcome = {
            let mut write_half = self.write_half.lock().await;
            write_half.write_all(&bytes).await
        };

        if let Err(io_err) = write_outcome {
            self.pending.remove(rid);
            return Err(io_err.into());
        }

        let outcome = match rx.await {
            Ok(result) => result,
            Err(_) => Err(XsError::DispatcherFailed),
        };
        self.pending.remove(rid);
        tracing::debug!(rid, ok = outcome.is_ok(), "received reply");
        outcome
    }
}

impl<T> Drop for Client<T> {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.pending.fail_all(&XsError::DispatcherFailed);
    }
}
