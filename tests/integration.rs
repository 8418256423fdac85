mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::timeout;

use common::{read_request, send, transport_pair};
use xenstore_client::wire::{codec, OperationType};
use xenstore_client::{wait, with_xs, with_xst, Client, XsError};

fn at_most(duration_ms: u64) -> Duration {
    Duration::from_millis(duration_ms)
}

/// Install a `tracing` subscriber once per test binary so the Dispatcher's
/// spans/events (src/dispatcher.rs) are visible under `--nocapture`;
/// `try_init` is used since every `#[tokio::test]` in this file calls this
/// and only the first call may succeed.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// S1: a single request/reply round trip.
#[tokio::test]
async fn simple_read_round_trips() {
    init_tracing();
    let (client_side, mut server_side) = transport_pair();
    let client = Client::new(client_side);

    let server = tokio::spawn(async move {
        let req = read_request(&mut server_side).await;
        assert_eq!(req.ty(), OperationType::Read);
        assert_eq!(req.parse_list().unwrap(), vec!["/a".to_string()]);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Read, req.rid(), req.tid(), &["hello"]),
        )
        .await;
    });

    let value = timeout(
        at_most(1000),
        with_xs(client, |mut h| async move { h.read("/a").await }),
    )
    .await
    .expect("timed out")
    .unwrap();

    assert_eq!(value, "hello");
    server.await.unwrap();
}

/// S2: two concurrent requests, server answers out of order. Replies
/// must be routed back to the caller that sent the matching rid, not by
/// arrival order.
#[tokio::test]
async fn concurrent_requests_correlate_by_rid_not_order() {
    init_tracing();
    let (client_side, mut server_side) = transport_pair();
    let client = Client::new(client_side);

    let server = tokio::spawn(async move {
        let first = read_request(&mut server_side).await;
        let second = read_request(&mut server_side).await;

        // Answer the *second* request first.
        send(
            &mut server_side,
            codec::build_reply(OperationType::Read, second.rid(), second.tid(), &["second-value"]),
        )
        .await;
        send(
            &mut server_side,
            codec::build_reply(OperationType::Read, first.rid(), first.tid(), &["first-value"]),
        )
        .await;
    });

    let client_a = client.clone();
    let client_b = client.clone();
    let (a, b) = timeout(at_most(1000), async move {
        tokio::join!(
            with_xs(client_a, |mut h| async move { h.read("/first").await }),
            with_xs(client_b, |mut h| async move { h.read("/second").await }),
        )
    })
    .await
    .expect("timed out");

    assert_eq!(a.unwrap(), "first-value");
    assert_eq!(b.unwrap(), "second-value");
    server.await.unwrap();
}

/// S4 (subsumes S3): `wait` re-runs its predicate, issuing watch/unwatch
/// as the accessed path set changes, and converges once a later
/// `WatchEvent` makes the predicate succeed.
#[tokio::test]
async fn wait_converges_after_a_watch_event() {
    init_tracing();
    let (client_side, mut server_side) = transport_pair();
    let client = Client::new(client_side);

    let server = tokio::spawn(async move {
        // First pass: predicate reads /counter, gets EAGAIN, wait issues
        // a watch on /counter.
        let read1 = read_request(&mut server_side).await;
        assert_eq!(read1.ty(), OperationType::Read);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Error, read1.rid(), read1.tid(), &["EAGAIN"]),
        )
        .await;

        let watch_req = read_request(&mut server_side).await;
        assert_eq!(watch_req.ty(), OperationType::Watch);
        let args = watch_req.parse_list().unwrap();
        assert_eq!(args[0], "/counter");
        let token = args[1].clone();
        send(
            &mut server_side,
            codec::build_reply(OperationType::Watch, watch_req.rid(), watch_req.tid(), &["OK"]),
        )
        .await;

        // Nudge the wait out of its blocking `get()`.
        send(&mut server_side, codec::watch_event("/counter", &token)).await;

        // Second pass: predicate reads /counter again and this time
        // succeeds, so wait unwatches and returns.
        let read2 = read_request(&mut server_side).await;
        assert_eq!(read2.ty(), OperationType::Read);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Read, read2.rid(), read2.tid(), &["42"]),
        )
        .await;

        let unwatch_req = read_request(&mut server_side).await;
        assert_eq!(unwatch_req.ty(), OperationType::Unwatch);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Unwatch, unwatch_req.rid(), unwatch_req.tid(), &["OK"]),
        )
        .await;
    });

    let task = wait(client, "counter-watch", |h| async move {
        let value = h.read("/counter").await?;
        if value == "42" {
            Ok(value)
        } else {
            Err(XsError::Eagain)
        }
    });

    let result = timeout(at_most(1000), task.join())
        .await
        .expect("wait did not converge in time")
        .unwrap();
    assert_eq!(result, "42");
    server.await.unwrap();
}

/// S5: a transactional body retries from scratch when the commit
/// reports `EAGAIN`, and only returns once a commit actually succeeds.
#[tokio::test]
async fn with_xst_retries_on_commit_eagain() {
    init_tracing();
    let (client_side, mut server_side) = transport_pair();
    let client = Client::new(client_side);

    let server = tokio::spawn(async move {
        // Attempt 1.
        let start1 = read_request(&mut server_side).await;
        assert_eq!(start1.ty(), OperationType::TransactionStart);
        send(
            &mut server_side,
            codec::build_reply(OperationType::TransactionStart, start1.rid(), 0, &["7"]),
        )
        .await;

        let write1 = read_request(&mut server_side).await;
        assert_eq!(write1.ty(), OperationType::Write);
        assert_eq!(write1.tid(), 7);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Write, write1.rid(), write1.tid(), &["OK"]),
        )
        .await;

        let end1 = read_request(&mut server_side).await;
        assert_eq!(end1.ty(), OperationType::TransactionEnd);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Error, end1.rid(), end1.tid(), &["EAGAIN"]),
        )
        .await;

        // Attempt 2: succeeds.
        let start2 = read_request(&mut server_side).await;
        assert_eq!(start2.ty(), OperationType::TransactionStart);
        send(
            &mut server_side,
            codec::build_reply(OperationType::TransactionStart, start2.rid(), 0, &["8"]),
        )
        .await;

        let write2 = read_request(&mut server_side).await;
        assert_eq!(write2.tid(), 8);
        send(
            &mut server_side,
            codec::build_reply(OperationType::Write, write2.rid(), write2.tid(), &["OK"]),
        )
        .await;

        let end2 = read_request(&mut server_side).await;
        send(
            &mut server_side,
            codec::build_reply(OperationType::TransactionEnd, end2.rid(), end2.tid(), &["OK"]),
        )
        .await;
    });

    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let attempts_in_body = attempts.clone();
    let result = timeout(
        at_most(1000),
        with_xst(client, move |mut h| {
            let attempts = attempts_in_body.clone();
            async move {
                attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                h.write("/x", "v").await
            }
        }),
    )
    .await
    .expect("timed out")
    .unwrap();

    assert_eq!(result, ());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::Relaxed), 2);
    server.await.unwrap();
}

/// S6: once the Dispatcher hits a fatal condition (here, an unparsable
/// frame), every still-pending call fails and every subsequent call
/// fails immediately without touching the transport.
#[tokio::test]
async fn dispatcher_death_fails_pending_and_future_calls() {
    init_tracing();
    let (client_side, mut server_side) = transport_pair();
    let client = Client::new(client_side);

    let pending_client = client.clone();
    let pending_call = tokio::spawn(async move {
        with_xs(pending_client, |mut h| async move { h.read("/never-answered").await }).await
    });

    // Let the request land, then corrupt the stream: an oversized length
    // field the parser cannot recover from.
    let _req = read_request(&mut server_side).await;
    let mut garbage = vec![0u8; 16];
    garbage[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
    send(&mut server_side, garbage).await;

    let pending_result = timeout(at_most(1000), pending_call)
        .await
        .expect("pending call never resolved")
        .unwrap();
    assert!(pending_result.is_err());

    // Give the Dispatcher a moment to flip `shutting_down`.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let later_result = timeout(
        at_most(1000),
        with_xs(client.clone(), |mut h| async move { h.read("/anything").await }),
    )
    .await
    .expect("timed out")
    .unwrap_err();
    assert!(matches!(later_result, XsError::DispatcherFailed));
}
