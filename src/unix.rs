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

//! The one place this crate knows what a real xenstored looks like: a
//! Unix domain socket, located by `$XENSTORED_PATH` or a conventional
//! default. Everything else in the crate is generic over any
//! `AsyncRead + AsyncWrite` transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixStream;

use crate::client::Client;
use crate::error::Result;

/// Default path xenstored listens on when `$XENSTORED_PATH` is unset.
pub const DEFAULT_SOCKET_PATH: &str = "/run/xenstored/socket";

/// Resolve the socket path: `$XENSTORED_PATH` if set, else
/// [`DEFAULT_SOCKET_PATH`].
#[must_use]
pub fn socket_path() -> PathBuf {
    std::env::var_os("XENSTORED_PATH").map_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH), PathBuf::from)
}

/// Connect to xenstored at [`socket_path`] and spawn a [`Client`] over
/// the resulting stream.
///
/// # Errors
///
/// Returns an error if the Unix domain socket connection fails.
pub async fn connect() -> Result<Arc<Client<UnixStream>>> {
    connect_to(&socket_path()).await
}

/// Connect to xenstored at an explicit path.
///
/// # Errors
///
/// Returns an error if the Unix domain socket connection fails.
pub async fn connect_to(path: &Path) -> Result<Arc<Client<UnixStream>>> {
    let stream = UnixStream::connect(path).await?;
    Ok(Client::new(stream))
}
