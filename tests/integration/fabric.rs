use std::time::Duration;

use weft_client::Endpoint;
use weft_core::Pack;
use weft_router::{Router, RouterConfig, RouterTuning};

use crate::*;

/// One router serving two endpoints: the smallest possible fabric.
#[tokio::test]
async fn single_router_delivery() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42110),
        node("rc_a", "RC", 42111),
        node("rc_b", "RC", 42112),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a", "rc_b"])]);

    let _router = Router::spawn(RouterConfig {
        app: app("rs_1", &nodes),
        table: table.clone(),
    })
    .await
    .expect("router");
    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");
    let mut rc_b = Endpoint::spawn(app("rc_b", &nodes)).await.expect("rc_b");

    let sent = pack("rc_a", "rc_b", "u1", vec![1, 2, 3], &table, &nodes);
    rc_a.send(&sent).await.expect("send");

    let got = recv_within(&mut rc_b).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].data, vec![1, 2, 3]);
    // Round-trip fidelity: every field survives the fabric unchanged.
    assert_eq!(got[0], sent);
}

/// Two routers, one relay hop, with a dual-homed endpoint in the table.
#[tokio::test]
async fn two_router_relay() {
    let nodes = registry(vec![
        node("rs_01", "RS", 42120),
        node("rs_02", "RS", 42121),
        node("rc_01", "RC01", 42122),
        node("rc_02", "RC02", 42123),
        node("rc_03", "RC03", 42124),
    ]);
    let table = topology(&[
        ("rs_01", &["rs_02"], &["rc_01", "rc_03"]),
        ("rs_02", &["rs_01"], &["rc_02", "rc_03"]),
    ]);

    let _rs_01 = Router::spawn(RouterConfig {
        app: app("rs_01", &nodes),
        table: table.clone(),
    })
    .await
    .expect("rs_01");
    let _rs_02 = Router::spawn(RouterConfig {
        app: app("rs_02", &nodes),
        table: table.clone(),
    })
    .await
    .expect("rs_02");

    let rc_01 = Endpoint::spawn(app("rc_01", &nodes)).await.expect("rc_01");
    let mut rc_02 = Endpoint::spawn(app("rc_02", &nodes)).await.expect("rc_02");

    let sent = Pack {
        key: Some(vec![0x42; 16]),
        shape: vec![1, 3],
        ..pack(
            "rc_01",
            "rc_02",
            "u1",
            vec![1649267441664, 2748779069440, 3848290697216],
            &table,
            &nodes,
        )
    };
    rc_01.send(&sent).await.expect("send");

    let got = recv_within(&mut rc_02).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], sent);
}

/// Two packs from the same source to the same destination arrive in send
/// order.
#[tokio::test]
async fn delivery_is_fifo_per_source_destination() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42130),
        node("rc_a", "RC", 42131),
        node("rc_b", "RC", 42132),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a", "rc_b"])]);

    let _router = Router::spawn(RouterConfig {
        app: app("rs_1", &nodes),
        table: table.clone(),
    })
    .await
    .expect("router");
    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");
    let mut rc_b = Endpoint::spawn(app("rc_b", &nodes)).await.expect("rc_b");

    for i in 0..5i64 {
        let p = pack("rc_a", "rc_b", &format!("u{i}"), vec![i], &table, &nodes);
        rc_a.send(&p).await.expect("send");
    }

    let mut uids = Vec::new();
    for _ in 0..5 {
        let group = recv_within(&mut rc_b).await;
        assert_eq!(group.len(), 1);
        uids.push(group[0].uid.clone());
    }
    assert_eq!(uids, vec!["u0", "u1", "u2", "u3", "u4"]);
}

/// A two-batch transfer is returned whole, and only once both siblings
/// have arrived.
#[tokio::test]
async fn batched_transfer_completes_on_last_sibling() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42140),
        node("rc_a", "RC", 42141),
        node("rc_b", "RC", 42142),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a", "rc_b"])]);

    let _router = Router::spawn(RouterConfig {
        app: app("rs_1", &nodes),
        table: table.clone(),
    })
    .await
    .expect("router");
    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");
    let mut rc_b = Endpoint::spawn(app("rc_b", &nodes)).await.expect("rc_b");

    let first = Pack {
        data_id: "x".to_string(),
        n_batches: 2,
        ..pack("rc_a", "rc_b", "x1", vec![1, 2], &table, &nodes)
    };
    let second = Pack {
        data_id: "x".to_string(),
        n_batches: 2,
        ..pack("rc_a", "rc_b", "x2", vec![3, 4, 5], &table, &nodes)
    };

    rc_a.send(&first).await.expect("send first");
    // Half a transfer is not a transfer: recv must still be waiting.
    let pending = tokio::time::timeout(Duration::from_millis(300), rc_b.recv()).await;
    assert!(pending.is_err(), "recv returned on an incomplete batch");

    rc_a.send(&second).await.expect("send second");
    let group = recv_within(&mut rc_b).await;
    assert_eq!(group.len(), 2);
    assert_eq!(group[0].uid, "x1");
    assert_eq!(group[1].uid, "x2");
    let total: usize = group.iter().map(|p| p.data.len()).sum();
    assert_eq!(total, 5);
}

/// Packs for an endpoint that has not connected yet are buffered by its
/// serving router and flushed once it comes up.
#[tokio::test]
async fn late_endpoint_receives_buffered_packs() {
    let nodes = registry(vec![
        node("rs_1", "RS", 42150),
        node("rc_a", "RC", 42151),
        node("rc_b", "RC", 42152),
    ]);
    let table = topology(&[("rs_1", &[], &["rc_a", "rc_b"])]);

    let _router = Router::spawn_with(
        RouterConfig {
            app: app("rs_1", &nodes),
            table: table.clone(),
        },
        RouterTuning {
            flush_interval: Duration::from_millis(50),
            ..Default::default()
        },
    )
    .await
    .expect("router");
    let rc_a = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rc_a");

    let sent = pack("rc_a", "rc_b", "u1", vec![9, 8, 7], &table, &nodes);
    rc_a.send(&sent).await.expect("send accepted while target is down");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut rc_b = Endpoint::spawn(app("rc_b", &nodes)).await.expect("rc_b");

    let got = recv_within(&mut rc_b).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], sent);
}

/// Shutting an endpoint down releases its socket; the address can be
/// bound again immediately.
#[tokio::test]
async fn shutdown_releases_the_listening_socket() {
    let nodes = registry(vec![node("rc_a", "RC", 42190)]);

    let endpoint = Endpoint::spawn(app("rc_a", &nodes)).await.expect("first bind");
    endpoint.shutdown().await;

    let again = Endpoint::spawn(app("rc_a", &nodes)).await.expect("rebind");
    again.shutdown().await;
}
