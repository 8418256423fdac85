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

//! An async, transport-agnostic multiplexing core for the xenstore wire
//! protocol.
//!
//! A single [`Client`] owns one transport and runs one background
//! Dispatcher task that demultiplexes the inbound byte stream into either
//! `WatchEvent` notifications (routed to the watcher registered under
//! their token) or replies (routed to the caller that sent the matching
//! request id). Any number of [`Handle`] values can issue requests
//! concurrently; [`with_xs`] and [`with_xst`] wrap that in non-transactional
//! and transactional (EAGAIN-retrying) convenience scopes, and [`wait`]
//! re-runs a predicate until it stops signalling "no answer yet",
//! keeping the store's watch subscriptions synchronized with the paths
//! the predicate actually reads.
//!
//! ```no_run
//! use std::sync::Arc;
//! use xenstore_client::{unix, with_xs};
//!
//! # async fn go() -> xenstore_client::Result<()> {
//! let client = unix::connect().await?;
//! let value = with_xs(client, |mut h| async move { h.read("/local/domain/0/name").await }).await?;
//! # Ok(()) }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod transaction;
pub mod unix;
pub mod wait;
pub mod watch;
pub mod wire;

/// A plain blocking mutex, used only for state protected across brief,
/// non-`await`-ing critical sections (spec.md §5): the pending-request
/// map, the watcher registry, and a watcher's own path/cancellation
/// state. Never held across an `.await`.
pub type StdMutex<T> = std::sync::Mutex<T>;

pub use client::Client;
pub use error::{DiagnosticResult, Result, XsError};
pub use handle::Handle;
pub use transaction::{with_xs, with_xst};
pub use wait::{wait, WaitTask};
pub use wire::{OperationType, Packet, Token};
