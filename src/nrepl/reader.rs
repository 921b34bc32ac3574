//! Reader loop: decodes frames and demultiplexes them.
//!
//! Driven by a [`FramedRead`] over the socket's read half using
//! [`BencodeCodec`], so the codec never touches the socket directly and a
//! frame is only produced once all of its bytes have arrived.
//!
//! | Frame                               | Goes to                        |
//! |-------------------------------------|--------------------------------|
//! | dict, `id` registered               | that correlator's inbox        |
//! | dict, `id` starts with `keepalive-` | dropped                        |
//! | dict, any other `id` or none        | default queue                  |
//! | not a dict                          | skipped; logged at `WARN`      |
//! | decode error / EOF                  | fatal: every inbox + shutdown  |

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::nrepl::codec::BencodeCodec;
use crate::nrepl::message::Response;
use crate::nrepl::router::{Route, Router};
use crate::nrepl::shutdown::Shutdown;

/// Reader loop; runs until the stream ends, fails, or shutdown completes.
///
/// A decode failure or end of stream fails every pending correlator with the
/// fatal sentinel and asks the coordinator for a non-zero exit. When the
/// graceful handshake is already underway the peer hanging up is expected and
/// the loop simply stops.
pub async fn run_reader<R>(source: R, codec: BencodeCodec, router: Router, shutdown: Shutdown)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(source, codec);
    let token = shutdown.token();

    let reason = loop {
        let item = tokio::select! {
            biased;

            () = token.cancelled() => {
                debug!("nrepl reader: shutdown in progress, stopping");
                return;
            }

            item = framed.next() => item,
        };

        match item {
            None => break "nREPL connection closed".to_owned(),
            Some(Err(err)) => break format!("nREPL stream error: {err}"),
            Some(Ok(frame)) => match Response::from_value(frame) {
                Ok(response) => {
                    let id = response.id.clone();
                    match router.dispatch(response) {
                        Route::Correlator => {
                            debug!(request_id = ?id, "nrepl reader: routed to correlator");
                        }
                        Route::Keepalive => {}
                        Route::Unsolicited => {
                            debug!(request_id = ?id, "nrepl reader: unsolicited message");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "nrepl reader: skipping non-dictionary frame");
                }
            },
        }
    };

    if shutdown.is_graceful() {
        debug!(reason, "nrepl reader: stream ended during graceful shutdown");
        router.fail_all(&reason);
        return;
    }

    warn!(reason, "nrepl reader: connection lost");
    router.fail_all(&reason);
    shutdown.fatal(&reason);
}
