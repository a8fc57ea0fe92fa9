use std::collections::BTreeMap;
use std::time::Duration;

use weft_client::{Endpoint, RecvError, SendError};
use weft_core::wire::RejectReason;
use weft_core::{RouteError, RouterEntry, RouterTable, ValidationError};
use weft_router::{Router, RouterConfig, RouterTuning};

use crate::*;

/// Topology mistakes surface when the table is built, before any socket
/// exists — never at first send.
#[test]
fn disconnected_table_fails_at_load() {
    let map = BTreeMap::from([
        (
            "rs_01".to_string(),
            RouterEntry {
                adjacent: vec![],
                served: vec!["rc_01".to_string()],
            },
        ),
        (
            "rs_02".to_string(),
            RouterEntry {
                adjacent: vec![],
                served: vec!["rc_02".to_string()],
            },
        ),
    ]);
    let err = RouterTable::new(map).unwrap_err();
    assert!(matches!(err, RouteError::Disconnected(..)), "{err}");
}

/// A pack naming an unregistered node is refused at construction and
/// never reaches the wire.
#[test]
fn pack_with_unknown_target_fails_validation() {
    let nodes = registry(vec![node("rs_1", "RS", 1), node("rc_a", "RC", 2)]);
    let table = topology(&[("rs_1", &[], &["rc_a"])]);

    let err = weft_core::Pack {
        target_id: "rc_ghost".to_string(),
        ..pack("rc_a", "rc_a", "u1", vec![1], &table, &nodes)
    }
    .validated(&nodes)
    .unwrap_err();
    assert_eq!(err, ValidationError::UnknownTarget("rc_ghost".to_string()));
}

/// Once the pending buffer for a down endpoint is full, the newest pack
/// is refused with backpressure and the earlier ones survive.
#[tokio::test]
async fn full_buffer_rejects_newest_and_keeps_earlier() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42160),
        node("rc_a", "RC", 42161),
        node("rc_b", "RC", 42162),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a", "rc_b"])]);

    let _router = Router::spawn_with(
        RouterConfig {
            app: app("rs_1", &nodes),
            table: table.clone(),
        },
        RouterTuning {
            pending_capacity: 2,
            flush_interval: Duration::from_millis(50),
            ..Default::default()
        },
    )
    .await
    .expect("router");
    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");

    let p1 = pack("rc_a", "rc_b", "u1", vec![1], &table, &nodes);
    let p2 = pack("rc_a", "rc_b", "u2", vec![2], &table, &nodes);
    let p3 = pack("rc_a", "rc_b", "u3", vec![3], &table, &nodes);

    rc_a.send(&p1).await.expect("first fits");
    rc_a.send(&p2).await.expect("second fits");
    match rc_a.send(&p3).await.unwrap_err() {
        SendError::Rejected { reason, .. } => assert_eq!(reason, RejectReason::Backpressure),
        other => panic!("expected backpressure, got {other}"),
    }

    // The refused pack is the newest one; u1 and u2 still arrive in order.
    let mut rc_b = Endpoint::spawn(app("rc_b", &nodes)).await.expect("rc_b");
    assert_eq!(recv_within(&mut rc_b).await[0].uid, "u1");
    assert_eq!(recv_within(&mut rc_b).await[0].uid, "u2");
}

/// A send whose first-hop router is down fails at the caller; nothing is
/// silently queued.
#[tokio::test]
async fn send_fails_when_first_hop_is_down() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42170),
        node("rc_a", "RC", 42171),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a"])]);

    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");
    let p = pack("rc_a", "rc_a", "u1", vec![1], &table, &nodes);
    match rc_a.send(&p).await.unwrap_err() {
        SendError::Transport { router, .. } => assert_eq!(router, "rs_1"),
        other => panic!("expected a transport error, got {other}"),
    }
}

/// Closing the endpoint's scope unblocks a pending recv with the defined
/// cancellation signal instead of hanging.
#[tokio::test]
async fn shutdown_cancels_a_pending_recv() {
    let nodes = registry(vec![node("rc_a", "RC", 42180)]);
    let mut endpoint = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");
    let handle = endpoint.shutdown_handle();

    let waiting = tokio::spawn(async move { endpoint.recv().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown();

    let result = tokio::time::timeout(RECV_TIMEOUT, waiting)
        .await
        .expect("recv did not unblock")
        .expect("recv task panicked");
    assert_eq!(result.unwrap_err(), RecvError::Canceled);
}

/// A pack whose source does not match the sending endpoint is refused
/// locally.
#[tokio::test]
async fn send_refuses_a_foreign_source_id() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42185),
        node("rc_a", "RC", 42186),
        node("rc_b", "RC", 42187),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a", "rc_b"])]);

    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");
    let p = pack("rc_b", "rc_a", "u1", vec![1], &table, &nodes);
    match rc_a.send(&p).await.unwrap_err() {
        SendError::WrongSource { source, node } => {
            assert_eq!(source, "rc_b");
            assert_eq!(node, "rc_a");
        }
        other => panic!("expected a source mismatch, got {other}"),
    }
}
