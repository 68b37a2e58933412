//! The contract both concrete protocol adapters implement (spec §6).
//!
//! Each adapter owns the read/write loop for its wire format and drives a
//! shared [`Controller`] underneath; [`Controller::run_dispatch_loop`] is
//! spawned as its own task so command handling and asynchronous callback
//! events (`Stopped`, `Output`, `Module`, …) can interleave on one output
//! stream.

use std::sync::Arc;

use dbg_engine::Controller;
use tokio::io::{AsyncBufRead, AsyncWrite};

/// A concrete protocol's request/response/event translator.
///
/// Not object-safe (the generic `run` needs monomorphized IO types), which
/// is fine: `dbg-cli` picks a protocol at startup and calls the concrete
/// adapter directly rather than boxing one.
pub trait ProtocolAdapter {
    /// Drive the adapter's stdio loop until the client disconnects or asks
    /// to quit. Never returns an error for a malformed single request; those
    /// are reported back to the client as a failed response instead.
    fn run<R, W>(
        &self,
        controller: Arc<Controller>,
        input: R,
        output: W,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send;
}
