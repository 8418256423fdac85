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

//! Transactional helpers (spec.md §4.7): `with_xs` for a bare,
//! non-transactional `Handle`, and `with_xst` for automatic `EAGAIN`
//! retry around a transactional body.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::Client;
use crate::error::{Result, XsError};
use crate::handle::Handle;

/// Run `f` against a non-transactional `Handle`. A thin convenience: no
/// retry, no transaction bracket.
pub async fn with_xs<T, F, Fut, R>(client: Arc<Client<T>>, f: F) -> Result<R>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnOnce(Handle<T>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    f(Handle::no_transaction(client)).await
}

/// Run `f` inside a fresh transaction, retrying the entire body from
/// scratch whenever the server (or `f` itself) signals `EAGAIN`
/// (spec.md §4.7):
///
/// 1. Start a transaction via an anonymous handle.
/// 2. Run `f` against a `Handle` bound to that transaction's id.
/// 3. On success, attempt to commit (`transaction_end(true)`).
/// 4. On failure, best-effort abort (`transaction_end(false)`), ignoring
///    its outcome, then propagate the original failure — unless the
///    failure was `EAGAIN`, in which case restart from step 1.
/// 5. A commit that itself reports `EAGAIN` also restarts from step 1.
pub async fn with_xst<T, F, Fut, R>(client: Arc<Client<T>>, mut f: F) -> Result<R>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnMut(Handle<T>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    loop {
        let anon = Handle::no_transaction(client.clone());
        let tid = match anon.transaction_start().await {
            Ok(tid) => tid,
            Err(XsError::Eagain) => continue,
            Err(e) => return Err(e),
        };

        let body_handle = Handle::transaction(client.clone(), tid);
        let body_result = f(body_handle).await;
        let end_handle = Handle::transaction(client.clone(), tid);

        match body_result {
            Ok(value) => match end_handle.transaction_end(true).await {
                Ok(()) => return Ok(value),
                Err(XsError::Eagain) => continue,
                Err(e) => return Err(e),
            },
            Err(XsError::Eagain) => {
                let _ = end_handle.transaction_end(false).await;
                continue;
            }
            Err(e) => {
                let _ = end_handle.transaction_end(false).await;
                return Err(e);
            }
        }
    }
}
