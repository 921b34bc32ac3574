//! Writer loop: drains the outbound queue onto the socket.
//!
//! Receives [`Outbound`] items from an unbounded [`mpsc`] channel in FIFO
//! order, encodes each message with [`BencodeCodec`], and writes it through a
//! [`FramedWrite`]. Egress order equals enqueue order; that is the only
//! ordering guarantee between distinct requests.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::bencode::Value;
use crate::nrepl::codec::BencodeCodec;
use crate::nrepl::router::Router;
use crate::nrepl::shutdown::{Confirmation, Shutdown};

/// Item on the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Message to encode and send.
    Message(Value),
    /// Stop sentinel: never encoded, ends the loop and confirms shutdown.
    Stop,
}

/// Sending side of the outbound queue.
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// Writer loop; encodes outbound messages and writes them to `sink`.
///
/// The task exits when:
/// - [`Outbound::Stop`] is received: sends [`Confirmation::Writer`];
/// - the queue is closed (all senders dropped);
/// - a write fails: every pending correlator is failed and the coordinator
///   is told to exit non-zero.
pub async fn run_writer<W>(
    sink: W,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    router: Router,
    shutdown: Shutdown,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(sink, BencodeCodec::new());

    while let Some(item) = outbound_rx.recv().await {
        match item {
            Outbound::Stop => {
                debug!("nrepl writer: stop sentinel received");
                shutdown.confirm(Confirmation::Writer);
                return;
            }
            Outbound::Message(value) => {
                debug!(message = %value, "nrepl writer: sending");
                if let Err(err) = framed.send(value).await {
                    warn!(error = %err, "nrepl writer: write failed");
                    let reason = format!("write to nREPL failed: {err}");
                    router.fail_all(&reason);
                    shutdown.fatal(&reason);
                    return;
                }
            }
        }
    }

    debug!("nrepl writer: outbound queue closed, stopping");
}
