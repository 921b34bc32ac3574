//! Integration tests for the keepalive monitor.

use std::sync::Arc;

use plasmaplace::bencode::Value;
use plasmaplace::config::GlobalConfig;
use plasmaplace::nrepl::keepalive::keepalive_id;
use plasmaplace::nrepl::message::KEEPALIVE_PREFIX;
use plasmaplace::nrepl::{Confirmation, EvalOptions};

use super::test_helpers::{bootstrapped, field};

fn fast_keepalive() -> GlobalConfig {
    GlobalConfig {
        keepalive_interval_ms: 20,
        ..GlobalConfig::default()
    }
}

#[test]
fn probe_ids_are_unique_and_prefixed() {
    let a = keepalive_id();
    let b = keepalive_id();
    assert!(a.starts_with(KEEPALIVE_PREFIX));
    assert_ne!(a, b);
}

/// Probes are `ls-sessions` requests with a keepalive id, sent periodically.
#[tokio::test]
async fn probes_are_sent_periodically() {
    let (connection, mut peer) = bootstrapped(fast_keepalive(), &[], "root").await;
    connection.start_keepalive().await;

    for _ in 0..3 {
        let probe = peer.recv_any().await;
        assert_eq!(field(&probe, "op"), "ls-sessions");
        assert!(field(&probe, "id").starts_with(KEEPALIVE_PREFIX));
    }
}

/// Keepalive replies arriving mid-evaluation never reach the correlator.
#[tokio::test]
async fn keepalive_replies_are_transparent() {
    let (connection, mut peer) = bootstrapped(fast_keepalive(), &[], "root").await;
    connection.start_keepalive().await;

    let task = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move { connection.eval("root", "(+ 1 2)", EvalOptions::default()).await })
    };

    // Answer whatever probes show up before the eval, then interleave one
    // more reply with the eval's own.
    let eval = loop {
        let frame = peer.recv_any().await;
        if field(&frame, "op") == "eval" {
            break frame;
        }
        peer.reply(&frame, &[("sessions", Value::from(vec!["root"]))]).await;
    };
    peer.reply(&eval, &[("value", Value::from("3"))]).await;
    let stray: Value = [
        ("id", Value::from(keepalive_id())),
        ("sessions", Value::from(vec!["root"])),
        ("status", Value::from(vec!["done"])),
    ]
    .into_iter()
    .collect();
    peer.send(stray).await;
    peer.done(&eval, &[]).await;

    let outcome = task.await.expect("join").expect("eval");
    assert!(outcome.success);
    assert!(!outcome.has_unknown(), "keepalive traffic must not leak into results");
    assert_eq!(outcome.to_popup().popup, vec![";; VALUE:", "3"]);
}

/// Probes interleaved with the root close do not disturb the handshake.
#[tokio::test]
async fn graceful_shutdown_with_keepalive_running() {
    let (connection, mut peer) = bootstrapped(fast_keepalive(), &[], "root").await;
    connection.start_keepalive().await;
    peer.recv_any().await;

    let task = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move {
            connection.shutdown().confirm(Confirmation::Driver);
            connection.shutdown_gracefully().await
        })
    };
    let close = loop {
        let frame = peer.recv_any().await;
        if field(&frame, "op") == "close" {
            break frame;
        }
    };
    peer.done(&close, &["session-closed"]).await;
    task.await.expect("join").expect("graceful shutdown");

    assert!(connection.shutdown().token().is_cancelled());
    assert!(connection.shutdown().is_graceful());
}
