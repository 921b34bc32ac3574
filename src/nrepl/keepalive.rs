//! Keepalive monitor.
//!
//! Periodically enqueues a zero-cost `ls-sessions` request tagged with a
//! `keepalive-<uuid>` id. The reader drops the replies; the probes exist so
//! that a dead peer surfaces quickly through the reader's fatal path even when
//! the editor is idle.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::nrepl::message::{Request, KEEPALIVE_PREFIX};
use crate::nrepl::shutdown::Shutdown;
use crate::nrepl::writer::{Outbound, OutboundTx};

/// Build one keepalive probe id.
#[must_use]
pub fn keepalive_id() -> String {
    format!("{KEEPALIVE_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Spawn the keepalive task.
///
/// Stops once shutdown begins, by either path, or the outbound queue is
/// closed.
#[must_use]
pub fn spawn_keepalive(outbound: OutboundTx, period: Duration, shutdown: Shutdown) -> JoinHandle<()> {
    let cancel = shutdown.token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("keepalive: cancellation received, stopping");
                    break;
                }

                _ = ticker.tick() => {
                    if shutdown.is_graceful() {
                        debug!("keepalive: graceful shutdown started, stopping");
                        break;
                    }
                    let probe = Request::LsSessions.to_value(Some(&keepalive_id()));
                    if outbound.send(Outbound::Message(probe)).is_err() {
                        debug!("keepalive: outbound queue closed, stopping");
                        break;
                    }
                }
            }
        }
    })
}
