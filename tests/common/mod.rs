use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use xenstore_client::wire::parser::{ParserObservation, StreamingParser};
use xenstore_client::wire::Packet;

/// Big enough that a handful of small scripted requests/replies never
/// block on buffer capacity within a test.
const DUPLEX_BUF: usize = 64 * 1024;

/// A connected pair: `(client_side, server_side)`. Hand `client_side` to
/// `Client::new`; drive `server_side` by hand to script server behavior.
pub fn transport_pair() -> (DuplexStream, DuplexStream) {
    duplex(DUPLEX_BUF)
}

/// Read and assemble exactly one packet off the "server" end, using the
/// same streaming parser contract the Dispatcher itself relies on.
pub async fn read_request(server: &mut DuplexStream) -> Packet {
    let mut parser = StreamingParser::new();
    loop {
        match parser.observe() {
            ParserObservation::Packet(packet) => return packet,
            ParserObservation::NeedMoreData(hint) => {
                let mut buf = vec![0u8; hint.max(1)];
                let n = server.read(&mut buf).await.expect("server-side read failed");
                assert!(n > 0, "client closed the transport unexpectedly");
                parser.input(&buf[..n]);
            }
            other => panic!("unexpected parser observation: {other:?}"),
        }
    }
}

/// Write pre-built wire bytes out the "server" end.
pub async fn send(server: &mut DuplexStream, bytes: Vec<u8>) {
    server.write_all(&bytes).await.expect("server-side write failed");
}
