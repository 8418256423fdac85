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

//! The wire format: packet framing, operation tags, and payload codecs.
//!
//! This module is the concrete instance of the "packet parser" and
//! "per-operation marshalling" capabilities that the core multiplexer
//! consumes but does not itself specify. Everything in [`crate::client`],
//! [`crate::dispatcher`], [`crate::watch`], [`crate::handle`],
//! [`crate::transaction`] and [`crate::wait`] only depends on the small
//! surface re-exported here ([`Packet`], [`OperationType`], [`Token`],
//! request builders) and never reaches into the byte layout directly.

pub mod codec;
pub mod parser;

use std::fmt;

/// Header size: 4 little-endian `u32` fields (operation, req id, tx id, length).
pub const HEADER_LEN: usize = 16;

/// Refuse to buffer a payload larger than this. Guards against a
/// corrupt or hostile length field turning a parse into an unbounded
/// allocation.
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// The closed set of xenstore operation tags. [`OperationType::WatchEvent`]
/// is the sole demultiplex trigger (spec.md §3); every other tag is a
/// reply to be routed by request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OperationType {
    Debug,
    Directory,
    Read,
    GetPerms,
    Watch,
    Unwatch,
    TransactionStart,
    TransactionEnd,
    Introduce,
    Release,
    GetDomainPath,
    Write,
    Mkdir,
    Rm,
    SetPerms,
    WatchEvent,
    Error,
    IsDomainIntroduced,
    Resume,
    SetTarget,
    ResetWatches,
    DirectoryPart,
}

impl OperationType {
    /// `true` for the single tag that triggers watch demultiplexing
    /// rather than reply correlation.
    #[must_use]
    pub fn is_watch_event(self) -> bool {
        matches!(self, OperationType::WatchEvent)
    }

    fn from_wire(code: u32) -> Option<Self> {
        use OperationType::{
            Debug, Directory, DirectoryPart, Error, GetDomainPath, GetPerms, Introduce,
            IsDomainIntroduced, Mkdir, Read, Release, ResetWatches, Resume, Rm, SetPerms,
            SetTarget, TransactionEnd, TransactionStart, Unwatch, Watch, WatchEvent, Write,
        };
        Some(match code {
            0 => Debug,
            1 => Directory,
            2 => Read,
            3 => GetPerms,
            4 => Watch,
            5 => Unwatch,
            6 => TransactionStart,
            7 => TransactionEnd,
            8 => Introduce,
            9 => Release,
            10 => GetDomainPath,
            11 => Write,
            12 => Mkdir,
            13 => Rm,
            14 => SetPerms,
            15 => WatchEvent,
            16 => Error,
            17 => IsDomainIntroduced,
            18 => Resume,
            19 => SetTarget,
            20 => ResetWatches,
            21 => DirectoryPart,
            _ => return None,
        })
    }

    fn to_wire(self) -> u32 {
        use OperationType::{
            Debug, Directory, DirectoryPart, Error, GetDomainPath, GetPerms, Introduce,
            IsDomainIntroduced, Mkdir, Read, Release, ResetWatches, Resume, Rm, SetPerms,
            SetTarget, TransactionEnd, TransactionStart, Unwatch, Watch, WatchEvent, Write,
        };
        match self {
            Debug => 0,
            Directory => 1,
            Read => 2,
            GetPerms => 3,
            Watch => 4,
            Unwatch => 5,
            TransactionStart => 6,
            TransactionEnd => 7,
            Introduce => 8,
            Release => 9,
            GetDomainPath => 10,
            Write => 11,
            Mkdir => 12,
            Rm => 13,
            SetPerms => 14,
            WatchEvent => 15,
            Error => 16,
            IsDomainIntroduced => 17,
            Resume => 18,
            SetTarget => 19,
            ResetWatches => 20,
            DirectoryPart => 21,
        }
    }
}

/// Opaque string identifying a watch subscription. The core treats
/// tokens as equality-comparable opaque values (spec.md §3); this crate's
/// tokens embed a caller-supplied label and a monotonic generation
/// counter so that repeated `wait` calls never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(pub(crate) String);

impl Token {
    pub(crate) fn new(label: &str, generation: u64) -> Self {
        Token(format!("{label}:{generation}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single framed packet: either a request, a reply, or a `WatchEvent`.
#[derive(Debug, Clone)]
pub struct Packet {
    ty: OperationType,
    rid: u32,
    tid: u32,
    payload: Vec<u8>,
}

impl Packet {
    #[must_use]
    pub fn ty(&self) -> OperationType {
        self.ty
    }

    #[must_use]
    pub fn rid(&self) -> u32 {
        self.rid
    }

    #[must_use]
    pub fn tid(&self) -> u32 {
        self.tid
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
