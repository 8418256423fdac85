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

//! The streaming parser: the exact contract spec.md §6 describes —
//! `start()` / `input()` / `observe()` — implemented against the wire
//! format of [`super`].

use super::{OperationType, Packet, HEADER_LEN, MAX_PAYLOAD_LEN};

/// What the parser can report for its current state, per spec.md §4.1.
#[derive(Debug)]
pub enum ParserObservation {
    /// A complete packet is available.
    Packet(Packet),
    /// At least `n` more bytes are required before another observation
    /// is possible. `n` is an upper-bound hint on how much to read.
    NeedMoreData(usize),
    /// The frame carries an operation tag outside the closed set.
    UnknownOperation(u32),
    /// Framing or payload structure is invalid and unrecoverable.
    ParserFailed,
}

/// Accumulates bytes fed via [`Self::input`] and reports progress via
/// [`Self::observe`]. One instance lives for the lifetime of the
/// Dispatcher; [`Self::reset`] plays the role of spec.md's `start()`,
/// returning the parser to a fresh state after a packet has been
/// consumed.
#[derive(Debug, Default)]
pub struct StreamingParser {
    buf: Vec<u8>,
}

impl StreamingParser {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed newly read bytes into the parser.
    pub fn input(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Reset to a fresh state, discarding any buffered bytes. Called
    /// after a packet has been fully consumed.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Observe the current parser state without consuming input.
    pub fn observe(&self) -> ParserObservation {
        if self.buf.len() < HEADER_LEN {
            return ParserObservation::NeedMoreData(HEADER_LEN - self.buf.len());
        }

        let ty_raw = read_u32(&self.buf, 0);
        let rid = read_u32(&self.buf, 4);
        let tid = read_u32(&self.buf, 8);
        let len = read_u32(&self.buf, 12) as usize;

        if len > MAX_PAYLOAD_LEN {
            return ParserObservation::ParserFailed;
        }

        let total = HEADER_LEN + len;
        if self.buf.len() < total {
            return ParserObservation::NeedMoreData(total - self.buf.len());
        }

        let Some(ty) = OperationType::from_wire(ty_raw) else {
            return ParserObservation::UnknownOperation(ty_raw);
        };

        let payload = self.buf[HEADER_LEN..total].to_vec();
        ParserObservation::Packet(Packet {
            ty,
            rid,
            tid,
            payload,
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::wire::codec;

    #[test]
    fn needs_header_first() {
        let parser = StreamingParser::new();
        assert!(matches!(
            parser.observe(),
            ParserObservation::NeedMoreData(HEADER_LEN)
        ));
    }

    #[test]
    fn assembles_packet_across_partial_reads() {
        let bytes = codec::build_request(OperationType::Read, 7, 0, &["/a"]);
        let mut parser = StreamingParser::new();

        // Feed one byte at a time; only the last byte should complete it.
        for (i, b) in bytes.iter().enumerate() {
            parser.input(std::slice::from_ref(b));
            match parser.observe() {
                ParserObservation::Packet(p) if i == bytes.len() - 1 => {
                    assert_eq!(p.rid(), 7);
                    assert_eq!(p.ty(), OperationType::Read);
                }
                ParserObservation::Packet(_) => panic!("completed early at byte {i}"),
                ParserObservation::NeedMoreData(_) => {}
                other => panic!("unexpected observation: {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_operation_reported() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&999u32.to_le_bytes());
        let mut parser = StreamingParser::new();
        parser.input(&header);
        assert!(matches!(
            parser.observe(),
            ParserObservation::UnknownOperation(999)
        ));
    }

    #[test]
    fn oversized_length_fails() {
        let mut header = [0u8; HEADER_LEN];
        header[12..16].copy_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_le_bytes());
        let mut parser = StreamingParser::new();
        parser.input(&header);
        assert!(matches!(parser.observe(), ParserObservation::ParserFailed));
    }

    #[test]
    fn reset_discards_buffered_bytes() {
        let bytes = codec::build_request(OperationType::Read, 1, 0, &["/a"]);
        let mut parser = StreamingParser::new();
        parser.input(&bytes);
        assert!(matches!(parser.observe(), ParserObservation::Packet(_)));
        parser.reset();
        assert!(matches!(
            parser.observe(),
            ParserObservation::NeedMoreData(HEADER_LEN)
        ));
    }
}
