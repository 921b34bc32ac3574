//! Shared helpers for connection-level integration tests.
//!
//! Provides a scripted fake nREPL peer on the far side of an in-memory
//! duplex pipe, speaking bencode through the crate's own codec, plus
//! shortcuts for starting and bootstrapping a `Connection` against it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use plasmaplace::bencode::Value;
use plasmaplace::config::GlobalConfig;
use plasmaplace::nrepl::codec::BencodeCodec;
use plasmaplace::nrepl::message::KEEPALIVE_PREFIX;
use plasmaplace::nrepl::{Connection, Shutdown};

/// How long the peer waits for the client before failing the test.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Server side of the pipe.
pub struct FakePeer {
    frames: FramedRead<ReadHalf<DuplexStream>, BencodeCodec>,
    sink: FramedWrite<WriteHalf<DuplexStream>, BencodeCodec>,
}

impl FakePeer {
    /// Next frame from the client, keepalive probes included.
    pub async fn recv_any(&mut self) -> Value {
        tokio::time::timeout(PEER_TIMEOUT, self.frames.next())
            .await
            .expect("peer timed out waiting for the client")
            .expect("client closed the connection")
            .expect("client sent a malformed frame")
    }

    /// Next frame from the client, skipping keepalive probes.
    pub async fn recv(&mut self) -> Value {
        loop {
            let frame = self.recv_any().await;
            if !field(&frame, "id").starts_with(KEEPALIVE_PREFIX) {
                return frame;
            }
        }
    }

    /// Next non-keepalive frame, which must be an `op` request.
    pub async fn expect_op(&mut self, op: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(field(&frame, "op"), op, "unexpected request {frame}");
        frame
    }

    /// Assert that nothing but keepalive probes arrives for `quiet`. The
    /// client hanging up counts as silence.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        let deadline = tokio::time::Instant::now() + quiet;
        loop {
            match tokio::time::timeout_at(deadline, self.frames.next()).await {
                Err(_) | Ok(None) => return,
                Ok(Some(Ok(frame))) if field(&frame, "id").starts_with(KEEPALIVE_PREFIX) => {}
                Ok(Some(other)) => panic!("expected silence, got {other:?}"),
            }
        }
    }

    /// Send a raw message.
    pub async fn send(&mut self, value: Value) {
        self.sink.send(value).await.expect("peer send failed");
    }

    /// Answer `request`, echoing its id when it has one.
    pub async fn reply(&mut self, request: &Value, pairs: &[(&str, Value)]) {
        let mut message: Vec<(String, Value)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect();
        if let Some(id) = request.get("id") {
            message.push(("id".to_owned(), id.clone()));
        }
        self.send(message.into_iter().collect()).await;
    }

    /// Send a terminal status for `request`.
    pub async fn done(&mut self, request: &Value, extra_flags: &[&str]) {
        let mut flags = vec!["done"];
        flags.extend_from_slice(extra_flags);
        self.reply(request, &[("status", Value::from(flags))]).await;
    }

    /// Write bytes that bypass the codec.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        let inner = self.sink.get_mut();
        inner.write_all(bytes).await.expect("raw write failed");
        inner.flush().await.expect("raw flush failed");
    }

    /// Serve one `clone` from `parent`, answering with `session`.
    pub async fn serve_clone(&mut self, parent: &str, session: &str) {
        let clone = self.expect_op("clone").await;
        assert_eq!(field(&clone, "session"), parent, "clone must name its parent");
        self.reply(&clone, &[("new-session", Value::from(session))]).await;
        self.done(&clone, &[]).await;
    }

    /// Serve one `close` of `session`, confirming it.
    pub async fn serve_close(&mut self, session: &str) {
        let close = self.expect_op("close").await;
        assert_eq!(field(&close, "session"), session);
        self.done(&close, &["session-closed"]).await;
    }

    /// Serve one `eval` answering with `value`; returns the request.
    pub async fn serve_eval_value(&mut self, value: &str) -> Value {
        let eval = self.expect_op("eval").await;
        self.reply(&eval, &[("value", Value::from(value))]).await;
        self.done(&eval, &[]).await;
        eval
    }
}

/// String field of a message, `""` when absent.
pub fn field<'a>(message: &'a Value, key: &str) -> &'a str {
    message.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Default configuration with a keepalive period long enough to stay out of
/// the way.
pub fn test_config() -> GlobalConfig {
    GlobalConfig {
        keepalive_interval_ms: 60_000,
        ..GlobalConfig::default()
    }
}

/// Start a connection over an in-memory pipe.
pub fn start(config: GlobalConfig) -> (Arc<Connection>, FakePeer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);

    let connection = Connection::start(client_read, client_write, config, Shutdown::new());
    let peer = FakePeer {
        frames: FramedRead::new(server_read, BencodeCodec::new()),
        sink: FramedWrite::new(server_write, BencodeCodec::new()),
    };
    (connection, peer)
}

/// Start a connection and walk it through bootstrap.
pub async fn bootstrapped(
    config: GlobalConfig,
    existing: &[&str],
    root: &str,
) -> (Arc<Connection>, FakePeer) {
    let (connection, mut peer) = start(config);
    let boot = {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move { connection.bootstrap().await })
    };

    let ls = peer.expect_op("ls-sessions").await;
    assert!(ls.get("id").is_none(), "startup requests carry no id");
    peer.reply(
        &ls,
        &[
            ("sessions", Value::from(existing.to_vec())),
            ("status", Value::from(vec!["done"])),
        ],
    )
    .await;

    let clone = peer.expect_op("clone").await;
    assert!(clone.get("id").is_none(), "startup requests carry no id");
    assert!(clone.get("session").is_none(), "root clone has no parent");
    peer.reply(&clone, &[("new-session", Value::from(root))]).await;
    peer.done(&clone, &[]).await;

    boot.await
        .expect("bootstrap task panicked")
        .expect("bootstrap failed");
    (connection, peer)
}
