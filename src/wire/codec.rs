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

//! Per-operation request factories and payload codecs (spec.md §6).
//!
//! Multi-string payloads (`directory` results, `watch`/`unwatch`
//! arguments, the `[path, token]` pair of a `WatchEvent`) are NUL
//! separated; a trailing NUL is tolerated but not required.

use super::{OperationType, Packet, HEADER_LEN};
use crate::error::{Result, XsError};

/// Build the wire bytes for a request: header + NUL-joined string
/// arguments. `rid` must have been freshly allocated by the caller
/// (the correlator); `tid` is 0 for no transaction.
#[must_use]
pub fn build_request(ty: OperationType, rid: u32, tid: u32, args: &[&str]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            payload.push(0);
        }
        payload.extend_from_slice(arg.as_bytes());
    }
    if !args.is_empty() {
        payload.push(0);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&ty.to_wire().to_le_bytes());
    out.extend_from_slice(&rid.to_le_bytes());
    out.extend_from_slice(&tid.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

pub fn directory(rid: u32, tid: u32, path: &str) -> Vec<u8> {
    build_request(OperationType::Directory, rid, tid, &[path])
}

pub fn read(rid: u32, tid: u32, path: &str) -> Vec<u8> {
    build_request(OperationType::Read, rid, tid, &[path])
}

pub fn write(rid: u32, tid: u32, path: &str, data: &str) -> Vec<u8> {
    build_request(OperationType::Write, rid, tid, &[path, data])
}

pub fn watch(rid: u32, tid: u32, path: &str, token: &str) -> Vec<u8> {
    build_request(OperationType::Watch, rid, tid, &[path, token])
}

pub fn unwatch(rid: u32, tid: u32, path: &str, token: &str) -> Vec<u8> {
    build_request(OperationType::Unwatch, rid, tid, &[path, token])
}

pub fn transaction_start(rid: u32) -> Vec<u8> {
    build_request(OperationType::TransactionStart, rid, 0, &[])
}

pub fn transaction_end(rid: u32, tid: u32, commit: bool) -> Vec<u8> {
    let flag = if commit { "T" } else { "F" };
    build_request(OperationType::TransactionEnd, rid, tid, &[flag])
}

/// Serialize a `WatchEvent` packet. Only used by tests and mock
/// transports to script server behavior; the real server emits these,
/// the client never builds one to send.
#[must_use]
pub fn watch_event(path: &str, token: &str) -> Vec<u8> {
    build_request(OperationType::WatchEvent, 0, 0, &[path, token])
}

/// Serialize a reply packet carrying an arbitrary payload, for test
/// scripting of server responses.
#[must_use]
pub fn build_reply(ty: OperationType, rid: u32, tid: u32, payload: &[&str]) -> Vec<u8> {
    build_request(ty, rid, tid, payload)
}

fn split_nul_terminated(payload: &[u8]) -> Vec<String> {
    let trimmed = payload.strip_suffix(&[0]).unwrap_or(payload);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

impl Packet {
    /// Decode the payload as a list of NUL-separated strings (used for
    /// `directory` replies and `WatchEvent` payloads).
    pub fn parse_list(&self) -> Result<Vec<String>> {
        Ok(split_nul_terminated(self.payload()))
    }

    /// Decode the payload as a single string (used for `read` replies).
    pub fn parse_string(&self) -> Result<String> {
        let trimmed = self.payload().strip_suffix(&[0]).unwrap_or(self.payload());
        Ok(String::from_utf8_lossy(trimmed).into_owned())
    }

    /// Decode the payload as a base-10 signed integer.
    pub fn parse_int32(&self) -> Result<i32> {
        self.parse_string()?
            .trim()
            .parse::<i32>()
            .map_err(|_| XsError::ResponseParserFailed)
    }

    /// Decode the payload as the literal `"OK"` acknowledgement used by
    /// `transaction_end`. Any other payload is surfaced as a protocol
    /// error carrying the server's message.
    pub fn parse_ok(&self) -> Result<()> {
        let body = self.parse_string()?;
        if body == "OK" {
            Ok(())
        } else {
            Err(XsError::Protocol(body))
        }
    }

    /// Decode an `Error`-tagged reply into a typed [`XsError`].
    #[must_use]
    pub fn parse_error(&self) -> XsError {
        match self.parse_string() {
            Ok(code) if code == "EAGAIN" => XsError::Eagain,
            Ok(code) => XsError::Protocol(code),
            Err(_) => XsError::ResponseParserFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::wire::parser::{ParserObservation, StreamingParser};

    fn parse_one(bytes: &[u8]) -> Packet {
        let mut parser = StreamingParser::new();
        parser.input(bytes);
        match parser.observe() {
            ParserObservation::Packet(p) => p,
            other => panic!("expected a complete packet, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_a_read_request() {
        let bytes = read(7, 0, "/a");
        let packet = parse_one(&bytes);
        assert_eq!(packet.rid(), 7);
        assert_eq!(packet.tid(), 0);
        assert_eq!(packet.ty(), OperationType::Read);
        assert_eq!(packet.parse_list().unwrap(), vec!["/a".to_string()]);
    }

    #[test]
    fn parses_a_watch_event_payload() {
        let bytes = watch_event("/x", "mytoken:1");
        let packet = parse_one(&bytes);
        assert!(packet.ty().is_watch_event());
        let parts = packet.parse_list().unwrap();
        assert_eq!(parts, vec!["/x".to_string(), "mytoken:1".to_string()]);
    }

    #[test]
    fn parse_ok_accepts_only_ok() {
        let ok = parse_one(&build_reply(OperationType::TransactionEnd, 1, 5, &["OK"]));
        assert!(ok.parse_ok().is_ok());

        let bad = parse_one(&build_reply(
            OperationType::TransactionEnd,
            1,
            5,
            &["CONFLICT"],
        ));
        assert!(matches!(bad.parse_ok(), Err(XsError::Protocol(m)) if m == "CONFLICT"));
    }

    #[test]
    fn parse_error_maps_eagain() {
        let packet = parse_one(&build_reply(OperationType::Error, 1, 0, &["EAGAIN"]));
        assert!(matches!(packet.parse_error(), XsError::Eagain));
    }

    #[test]
    fn empty_directory_list_is_empty_vec() {
        let packet = parse_one(&build_request(OperationType::Directory, 1, 0, &[]));
        assert!(packet.parse_list().unwrap().is_empty());
    }
}
