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

//! The Dispatcher: a single task that owns the transport's read half and
//! the streaming parser exclusively, classifying each assembled packet as
//! a watch event or a reply and routing it accordingly (spec.md §4.1,
//! §4.2). Terminal on the first fatal error: every still-pending caller
//! is failed and no further packets are read.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, ReadHalf};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::client::PendingMap;
use crate::error::{Result, XsError};
use crate::wire::parser::{ParserObservation, StreamingParser};
use crate::wire::{OperationType, Packet};
use crate::watch::WatcherRegistry;

/// Read and assemble exactly one packet, driving the streaming parser's
/// `observe` / read / `input` loop until it reports a packet or a fatal
/// condition (spec.md §4.1's Framer contract).
async fn recv_one<R>(reader: &mut R, parser: &mut StreamingParser) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    loop {
        match parser.observe() {
            ParserObservation::Packet(packet) => {
                tracing::trace!(rid = packet.rid(), ty = ?packet.ty(), "assembled packet");
                parser.reset();
                return Ok(packet);
            }
            ParserObservation::NeedMoreData(hint) => {
                let mut buf = vec![0u8; hint.max(1)];
                let read = reader.read(&mut buf).await?;
                if read == 0 {
                    return Err(XsError::Io("transport closed (EOF)".to_string()));
                }
                parser.input(&buf[..read]);
            }
            ParserObservation::UnknownOperation(code) => {
                return Err(XsError::UnknownOperation(code));
            }
            ParserObservation::ParserFailed => return Err(XsError::ResponseParserFailed),
        }
    }
}

fn terminate(pending: &PendingMap, err: XsError) {
    tracing::error!(error = %err, "dispatcher terminating, failing all pending callers");
    pending.fail_all(&err);
}

/// Spawn the Dispatcher task. Owns `read_half` for its entire lifetime;
/// dropping the returned handle (or aborting it) closes the read side.
/// The whole loop runs inside one `tracing::info_span!`, so every event
/// emitted during the Dispatcher's lifetime (packet receive, watch
/// delivery, reply routing, termination) carries a shared `dispatcher`
/// span rather than reading as an unattributed stream of log lines.
pub(crate) fn spawn_dispatcher<T>(
    mut read_half: ReadHalf<T>,
    pending: Arc<PendingMap>,
    watchers: Arc<WatcherRegistry>,
) -> JoinHandle<()>
where
    T: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut parser = StreamingParser::new();
            loop {
                let packet = match recv_one(&mut read_half, &mut parser).await {
                    Ok(packet) => packet,
                    Err(err) => {
                        terminate(&pending, err);
                        return;
                    }
                };

                if packet.ty().is_watch_event() {
                    match packet.parse_list() {
                        Ok(parts) if parts.len() == 2 => {
                            let mut iter = parts.into_iter();
                            let path = iter.next().expect("len == 2");
                            let token = iter.next().expect("len == 2");
                            tracing::debug!(token = %token, path = %path, "routing watch event");
                            watchers.deliver(&token, path);
                        }
                        _ => {
                            terminate(&pending, XsError::MalformedWatchEvent);
                            return;
                        }
                    }
                    continue;
                }

                let rid = packet.rid();
                let reply = if packet.ty() == OperationType::Error {
                    Err(packet.parse_error())
                } else {
                    Ok(packet)
                };
                tracing::debug!(rid, ok = reply.is_ok(), "routing reply");

                if !pending.complete(rid, reply) {
                    terminate(&pending, XsError::UnexpectedRid(rid));
                    return;
                }
            }
        }
        .instrument(tracing::info_span!("dispatcher")),
    )
}
