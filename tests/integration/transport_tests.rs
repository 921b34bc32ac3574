//! Integration tests for the port-file rendezvous and the TCP transport.

use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use plasmaplace::bencode::Value;
use plasmaplace::config::GlobalConfig;
use plasmaplace::nrepl::codec::BencodeCodec;
use plasmaplace::nrepl::transport::read_port_file;
use plasmaplace::nrepl::{Connection, Shutdown};
use plasmaplace::AppError;

fn write_port_file(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join(".nrepl-port");
    std::fs::write(&path, contents).expect("write port file");
    path
}

#[test]
fn port_file_with_trailing_newline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_port_file(dir.path(), "7888\n");
    assert_eq!(read_port_file(&path).expect("port"), 7888);
}

#[test]
fn port_file_must_hold_a_port() {
    let dir = tempfile::tempdir().expect("tempdir");
    for contents in ["", "abc", "70000", "0"] {
        let path = write_port_file(dir.path(), contents);
        let err = read_port_file(&path).expect_err(contents);
        assert!(matches!(err, AppError::Config(_)), "{contents:?}: {err:?}");
    }
}

#[test]
fn missing_port_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = read_port_file(&dir.path().join("absent")).expect_err("missing file");
    assert!(matches!(err, AppError::Io(msg) if msg.contains("absent")));
}

/// End to end over a real socket: read the port, connect, bootstrap.
#[tokio::test]
async fn open_connects_and_bootstraps_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_port_file(dir.path(), &format!("{port}\n"));

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let mut framed = Framed::new(socket, BencodeCodec::new());

        let ls = framed.next().await.expect("ls frame").expect("decode");
        assert_eq!(ls.get("op").and_then(Value::as_str), Some("ls-sessions"));
        let reply: Value = [
            ("sessions", Value::from(vec!["s0"])),
            ("status", Value::from(vec!["done"])),
        ]
        .into_iter()
        .collect();
        framed.send(reply).await.expect("send sessions");

        let clone = framed.next().await.expect("clone frame").expect("decode");
        assert_eq!(clone.get("op").and_then(Value::as_str), Some("clone"));
        let reply: Value = [("new-session", "tcp-root")].into_iter().collect();
        framed.send(reply).await.expect("send new-session");
        let done: Value = [("status", Value::from(vec!["done"]))].into_iter().collect();
        framed.send(done).await.expect("send done");
        framed
    });

    let config = GlobalConfig {
        host: "127.0.0.1".into(),
        keepalive_interval_ms: 60_000,
        ..GlobalConfig::default()
    };
    let connection = Connection::open(&path, config, Shutdown::new())
        .await
        .expect("open");
    connection.bootstrap().await.expect("bootstrap");

    assert_eq!(connection.root_session(), Some("tcp-root"));
    assert_eq!(connection.existing_sessions(), ["s0"]);
    drop(server.await.expect("server task"));
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_port_file(dir.path(), &port.to_string());
    let config = GlobalConfig {
        host: "127.0.0.1".into(),
        ..GlobalConfig::default()
    };
    let err = Connection::open(&path, config, Shutdown::new())
        .await
        .expect_err("nothing listens there");
    assert!(matches!(err, AppError::Transport(_)));
}
