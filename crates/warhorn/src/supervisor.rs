//! Owns one open connection: starts its sender and receiver loops, and
//! tears everything down when either loop ends.

use std::sync::Arc;

use tokio::sync::{OwnedMutexGuard, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use warhorn_transport::{Connection, ConnectionId, TransportError};

use crate::client::Shared;
use crate::receiver::run_receiver;
use crate::sender::{Outbound, run_sender};
use crate::{ConnectionEvent, ConnectionState};

/// Why a loop returned.
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// The stop signal fired.
    Stopped,
    /// The server closed the connection.
    Closed,
    /// A read or write failed.
    Failed(TransportError),
}

impl LoopExit {
    fn from_join(result: Result<LoopExit, JoinError>) -> Self {
        result.unwrap_or_else(|e| {
            LoopExit::Failed(TransportError::ConnectionClosed(format!(
                "connection task failed: {e}"
            )))
        })
    }
}

/// Resolves once the stop flag is set, or once the sending side is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Handle to a running connection.
pub(crate) struct Link {
    id: ConnectionId,
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl Link {
    /// Starts both loops on `conn` and a supervisor task watching them.
    pub(crate) fn start<C: Connection>(
        conn: C,
        queue: OwnedMutexGuard<mpsc::UnboundedReceiver<Outbound>>,
        shared: Arc<Shared>,
    ) -> Self {
        let id = conn.id();
        let conn = Arc::new(conn);
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = Arc::new(stop_tx);

        let sender = tokio::spawn(run_sender(
            Arc::clone(&conn),
            queue,
            Arc::clone(&shared.pending),
            stop_rx.clone(),
        ));
        let receiver = tokio::spawn(run_receiver(
            Arc::clone(&conn),
            Arc::clone(&shared.registry),
            Arc::clone(&shared.dispatcher),
            stop_rx,
        ));
        let task = tokio::spawn(supervise(
            conn,
            sender,
            receiver,
            Arc::clone(&stop),
            shared,
        ));

        Self { id, stop, task }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// Signals both loops to stop and waits until the connection is closed
    /// and the state is back to `Disconnected`.
    pub(crate) async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(conn_id = %self.id, error = %e, "supervisor task failed");
        }
    }
}

async fn supervise<C: Connection>(
    conn: Arc<C>,
    mut sender: JoinHandle<LoopExit>,
    mut receiver: JoinHandle<LoopExit>,
    stop: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
) {
    let conn_id = conn.id();

    let (first, sender_finished) = tokio::select! {
        exit = &mut sender => (LoopExit::from_join(exit), true),
        exit = &mut receiver => (LoopExit::from_join(exit), false),
    };

    // Whichever loop ended first, the other one goes too.
    let _ = stop.send(true);
    let mut other = if sender_finished { receiver } else { sender };
    let second =
        match tokio::time::timeout(shared.close_timeout, &mut other).await {
            Ok(exit) => LoopExit::from_join(exit),
            Err(_) => {
                tracing::warn!(%conn_id, "connection loop did not stop in time, aborting");
                other.abort();
                LoopExit::Stopped
            }
        };
    tracing::debug!(%conn_id, ?first, ?second, "connection loops finished");

    match tokio::time::timeout(shared.close_timeout, conn.close()).await {
        Ok(Ok(())) => tracing::debug!(%conn_id, "connection closed"),
        Ok(Err(e)) => {
            tracing::debug!(%conn_id, error = %e, "close after shutdown failed");
        }
        Err(_) => {
            tracing::warn!(
                %conn_id,
                timeout = ?shared.close_timeout,
                "close handshake timed out"
            );
        }
    }

    let event = match first {
        LoopExit::Stopped => {
            tracing::info!(%conn_id, "disconnected");
            ConnectionEvent::Disconnected(conn_id)
        }
        LoopExit::Closed => {
            tracing::warn!(%conn_id, "connection lost: closed by server");
            ConnectionEvent::Lost(
                conn_id,
                TransportError::ConnectionClosed("closed by server".into()),
            )
        }
        LoopExit::Failed(e) => {
            tracing::warn!(%conn_id, error = %e, "connection lost");
            ConnectionEvent::Lost(conn_id, e)
        }
    };
    let _ = shared.events.send(event);

    // Last, so a new `connect` can't start before this link is gone.
    shared.state.set(ConnectionState::Disconnected);
}
