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

//! `wait`: re-run a predicate against the store until it stops returning
//! `EAGAIN`, keeping the server's watch subscriptions in sync with the
//! set of paths the predicate actually reads (spec.md §4.6).

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::error::{Result, XsError};
use crate::handle::Handle;
use crate::wire::Token;
use crate::watch::Watcher;

/// A running `wait` invocation. Dropping this without calling
/// [`Self::cancel`] leaves the wait running in the background; cancel it
/// explicitly to stop it early.
#[derive(Debug)]
pub struct WaitTask<R> {
    watcher: Arc<Watcher>,
    join: JoinHandle<Result<R>>,
}

impl<R> WaitTask<R> {
    /// Ask the wait to stop. It will unblock (if currently blocked on a
    /// watch event), run its cleanup (unwatching every remaining path and
    /// removing its token), and complete with
    /// [`XsError::Cancelled`].
    pub fn cancel(&self) {
        self.watcher.cancel();
    }

    /// Wait for the task to complete and return its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`XsError::DispatcherFailed`] if the task panicked.
    pub async fn join(self) -> Result<R> {
        match self.join.await {
            Ok(result) => result,
            Err(_) => Err(XsError::DispatcherFailed),
        }
    }
}

/// Spawn a `wait`: mint a watch token, run `f` repeatedly against a
/// path-recording `Handle`, and keep the server's watch subscriptions
/// synchronized with the paths `f` actually read each iteration.
///
/// `f` should return `Err(XsError::Eagain)` to mean "no answer yet" and
/// any other `Err` to abort the wait outright.
pub fn wait<T, F, Fut, R>(client: Arc<Client<T>>, label: &str, f: F) -> WaitTask<R>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(&mut Handle<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R>> + Send,
    R: Send + 'static,
{
    let token = client.next_watch_token(label);
    let watcher = Watcher::new();
    client.watchers().insert(token.clone(), watcher.clone());

    let task_watcher = watcher.clone();
    let join = tokio::spawn(async move {
        let mut handle = Handle::watching(client.clone());
        let result = run(&token, &task_watcher, &mut handle, f).await;
        cleanup(&client, &token, &mut handle).await;
        result
    });

    WaitTask { watcher, join }
}

async fn run<T, F, Fut, R>(
    token: &Token,
    watcher: &Arc<Watcher>,
    handle: &mut Handle<T>,
    f: F,
) -> Result<R>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(&mut Handle<T>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    loop {
        handle.reset_accessed();
        match f(handle).await {
            Ok(value) => return Ok(value),
            Err(XsError::Eagain) => {
                let accessed = handle.accessed_paths().cloned().unwrap_or_default();
                let watched = handle.watched_paths().clone();

                let to_unwatch: Vec<String> = watched.difference(&accessed).cloned().collect();
                let to_watch: Vec<String> = accessed.difference(&watched).cloned().collect();

                for path in &to_unwatch {
                    handle.unwatch(path, token.as_str()).await?;
                }
                for path in &to_watch {
                    handle.watch(path, token.as_str()).await?;
                }

                if to_unwatch.is_empty() && to_watch.is_empty() {
                    let delivered = watcher.get().await;
                    if delivered.is_empty() {
                        return Err(XsError::Cancelled);
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}

async fn cleanup<T>(client: &Arc<Client<T>>, token: &Token, handle: &mut Handle<T>)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let watched: Vec<String> = handle.watched_paths().iter().cloned().collect();
    for path in watched {
        if let Err(e) = handle.unwatch(&path, token.as_str()).await {
            tracing::warn!(path, error = %e, "best-effort unwatch during wait cleanup failed");
        }
    }
    client.watchers().remove(token);
}
