//! nREPL session protocol engine.
//!
//! This module manages the single bencode connection to the nREPL server and
//! multiplexes every conversation over it:
//!
//! - `codec`: [`BencodeCodec`](codec::BencodeCodec) framing for
//!   [`tokio_util::codec::FramedRead`] / [`tokio_util::codec::FramedWrite`].
//! - `message`: typed requests and responses.
//! - `transport`: port-file rendezvous and the TCP connection.
//! - `writer` / `reader`: the two perpetual socket loops.
//! - `router`: the demultiplex table.
//! - `connection`: the shared context object tying it all together.
//! - `session`: root and ephemeral session lifecycle.
//! - `eval`, `stream`, `literal`: the request correlator and its buffers.
//! - `keepalive`: periodic liveness probes.
//! - `shutdown`: graceful and fatal shutdown coordination.

pub mod codec;
pub mod connection;
pub mod eval;
pub mod keepalive;
pub mod literal;
pub mod message;
pub mod reader;
pub mod router;
pub mod session;
pub mod shutdown;
pub mod stream;
pub mod transport;
pub mod writer;

pub use connection::{Connection, Correlator};
pub use eval::{EvalOptions, EvalOutcome};
pub use shutdown::{Confirmation, Shutdown};
