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

use std::io;

use thiserror::Error;

/// Errors surfaced by the xenstore multiplexer core.
///
/// This is the single error type threaded through the crate: the
/// Dispatcher's fatal failures, the correlator's per-call failures, and
/// the server-side protocol signals a caller's body can see.
#[derive(Debug, Error, Clone)]
pub enum XsError {
    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The streaming parser observed a frame with an operation tag it
    /// doesn't recognize. Fatal to the Dispatcher.
    #[error("unknown operation code {0}")]
    UnknownOperation(u32),

    /// Framing or payload structure was invalid. Fatal to the Dispatcher.
    #[error("response parser failed")]
    ResponseParserFailed,

    /// A `WatchEvent` payload did not decode as exactly `[path, token]`.
    /// Fatal to the Dispatcher.
    #[error("malformed watch event payload")]
    MalformedWatchEvent,

    /// A reply arrived carrying a request id with no registered caller.
    /// Fatal to the Dispatcher.
    #[error("reply arrived for unregistered request id {0}")]
    UnexpectedRid(u32),

    /// The Dispatcher has terminated; no further requests can be served.
    #[error("dispatcher has terminated")]
    DispatcherFailed,

    /// The server signalled a transaction conflict (`EAGAIN`). Not fatal:
    /// `with_xst` retries, `wait` treats it as "no answer yet".
    #[error("transaction conflict (EAGAIN)")]
    Eagain,

    /// The server returned an error code other than `EAGAIN`.
    #[error("server error: {0}")]
    Protocol(String),

    /// Two in-flight requests were assigned the same request id. This is
    /// a programming error in rid allocation, not a server or transport
    /// fault.
    #[error("duplicate request id {0} (programming error)")]
    DuplicateRid(u32),

    /// A [`crate::wait::WaitTask`] was cancelled before its predicate
    /// produced a value.
    #[error("wait task was cancelled")]
    Cancelled,
}

impl From<io::Error> for XsError {
    fn from(err: io::Error) -> Self {
        XsError::Io(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, XsError>;

/// The same alias spelled with `miette::Result`, for callers (CLIs,
/// daemons) that thread `miette::Result` through their own `main` and
/// want this crate's error type to participate directly, the way
/// `terminal_async::ReadlineError` plugs into `miette::Result<ReadlineEvent,
/// ReadlineError>` without implementing `miette::Diagnostic`.
pub type DiagnosticResult<T> = miette::Result<T, XsError>;
