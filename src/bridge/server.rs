//! Editor bridge loop.
//!
//! Reads instruction lines from the editor (normally stdin), runs each one in
//! its own task, and writes replies through a single ordered writer task
//! (normally to stdout). Returns when the editor sends `exit` or closes its
//! end of the channel; the caller then runs the graceful shutdown.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::commands::{execute, EXIT_VERB};
use crate::bridge::protocol::{Instruction, Reply};
use crate::nrepl::Connection;
use crate::{AppError, Result};

/// Longest instruction line accepted from the editor.
const MAX_INSTRUCTION_BYTES: usize = 16 * 1024 * 1024;

/// Why the bridge loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The editor sent `exit`.
    Exit,
    /// The editor closed its end of the channel.
    Eof,
}

/// Run the bridge until `exit` or end of input.
///
/// In-flight commands are abandoned when the loop ends; replies already
/// produced are flushed before returning.
///
/// # Errors
///
/// Returns `AppError::Io` if reading instructions fails.
pub async fn run_bridge<R, W>(input: R, output: W, connection: Arc<Connection>) -> Result<BridgeExit>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Reply>();
    let writer = tokio::spawn(
        write_replies(output, reply_rx).instrument(info_span!("bridge_writer")),
    );
    let threshold = connection.config().async_threshold();
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_INSTRUCTION_BYTES));
    let mut inflight = JoinSet::new();

    let outcome = loop {
        let line = match lines.next().await {
            None => break Ok(BridgeExit::Eof),
            Some(Ok(line)) => line,
            Some(Err(err)) => break Err(AppError::Io(format!("editor input failed: {err}"))),
        };
        if line.trim().is_empty() {
            continue;
        }

        let instruction = match Instruction::parse(&line) {
            Ok(instruction) => instruction,
            Err(err) => {
                warn!(error = %err, "malformed instruction skipped");
                continue;
            }
        };

        if instruction.verb == EXIT_VERB {
            if reply_tx.send(Reply::lines(instruction.id, Vec::new())).is_err() {
                warn!(id = instruction.id, "reply writer gone, exit reply dropped");
            }
            break Ok(BridgeExit::Exit);
        }

        // Reap finished tasks so the set stays small.
        while inflight.try_join_next().is_some() {}

        let connection = Arc::clone(&connection);
        let reply_tx = reply_tx.clone();
        let span = info_span!("instruction", id = instruction.id, verb = %instruction.verb);
        inflight.spawn(
            async move {
                let started = Instant::now();
                let payload = execute(&connection, &instruction).await;
                let mut reply = Reply::new(instruction.id, payload);
                if threshold.is_some_and(|limit| started.elapsed() > limit) {
                    debug!("reply promoted to async");
                    reply = reply.into_async();
                }
                if reply_tx.send(reply).is_err() {
                    warn!("reply writer gone, reply dropped");
                }
            }
            .instrument(span),
        );
    };

    match &outcome {
        Ok(exit) => info!(reason = ?exit, "editor bridge stopping"),
        Err(err) => warn!(error = %err, "editor bridge stopping"),
    }
    inflight.shutdown().await;
    drop(reply_tx);
    if let Err(err) = writer.await {
        warn!(error = %err, "reply writer task failed");
    }
    outcome
}

async fn write_replies<W>(mut output: W, mut reply_rx: mpsc::UnboundedReceiver<Reply>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = reply_rx.recv().await {
        let mut line = match reply.to_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(id = reply.id, error = %err, "reply serialisation failed");
                continue;
            }
        };
        line.push('\n');
        if let Err(err) = output.write_all(line.as_bytes()).await {
            warn!(error = %err, "write to editor failed");
            break;
        }
        if let Err(err) = output.flush().await {
            warn!(error = %err, "flush to editor failed");
            break;
        }
    }
}
