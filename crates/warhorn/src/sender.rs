//! The sender loop: drains the outbound queue onto the connection, one
//! write at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::value::RawValue;
use tokio::sync::{OwnedMutexGuard, mpsc, watch};
use warhorn_protocol::WireKey;
use warhorn_transport::Connection;

use crate::supervisor::{LoopExit, stopped};

/// A message waiting to be written. The payload was serialized when the
/// application called `send`, so the loop only wraps it in its envelope.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) wire_key: WireKey,
    pub(crate) payload: Box<RawValue>,
}

/// Runs until stopped or a write fails.
///
/// The stop signal is checked between writes only; the supervisor bounds
/// how long it waits for a write that is already under way.
///
/// Holds the queue's receiving half for its whole lifetime, so only one
/// sender loop can drain it at a time. On a failed write every message
/// still queued is discarded.
pub(crate) async fn run_sender<C: Connection>(
    conn: Arc<C>,
    mut queue: OwnedMutexGuard<mpsc::UnboundedReceiver<Outbound>>,
    pending: Arc<AtomicUsize>,
    mut stop: watch::Receiver<bool>,
) -> LoopExit {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "sender loop started");

    loop {
        let outbound = tokio::select! {
            biased;
            () = stopped(&mut stop) => return LoopExit::Stopped,
            next = queue.recv() => match next {
                Some(outbound) => outbound,
                // Every sender handle is gone: the client was dropped.
                None => return LoopExit::Stopped,
            },
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        let frame = match warhorn_protocol::encode(
            outbound.wire_key,
            &*outbound.payload,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    %conn_id,
                    wire_key = outbound.wire_key,
                    error = %e,
                    "dropping outbound message that failed to encode"
                );
                continue;
            }
        };
        let bytes = frame.len();

        // A write in progress is finished even if the stop signal fires.
        match conn.send_text(frame).await {
            Ok(()) => {
                tracing::debug!(
                    %conn_id,
                    wire_key = outbound.wire_key,
                    bytes,
                    "message sent"
                );
            }
            Err(e) => {
                let discarded = discard_queued(&mut queue, &pending);
                tracing::error!(
                    %conn_id,
                    wire_key = outbound.wire_key,
                    error = %e,
                    discarded,
                    "write failed, outbound queue discarded"
                );
                return LoopExit::Failed(e);
            }
        }
    }
}

/// Empties the queue without writing anything. Returns how many messages
/// were dropped.
fn discard_queued(
    queue: &mut mpsc::UnboundedReceiver<Outbound>,
    pending: &AtomicUsize,
) -> usize {
    let mut discarded = 0;
    while queue.try_recv().is_ok() {
        pending.fetch_sub(1, Ordering::SeqCst);
        discarded += 1;
    }
    discarded
}
