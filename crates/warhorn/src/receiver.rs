//! The receiver loop: reads frames, decodes them, and parks each value in
//! the delivery queue of its kind.

use std::sync::Arc;

use tokio::sync::watch;
use warhorn_dispatch::Dispatcher;
use warhorn_protocol::{ProtocolError, Registry, WireKey};
use warhorn_transport::{Connection, ConnectionId, Frame};

use crate::WarhornError;
use crate::supervisor::{LoopExit, stopped};

/// Runs until stopped, the server closes the connection, or a read fails.
///
/// A frame that can't be decoded is logged and skipped; it never ends the
/// loop.
pub(crate) async fn run_receiver<C: Connection>(
    conn: Arc<C>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    mut stop: watch::Receiver<bool>,
) -> LoopExit {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "receiver loop started");

    loop {
        let frame = tokio::select! {
            biased;
            () = stopped(&mut stop) => return LoopExit::Stopped,
            frame = conn.recv() => frame,
        };

        match frame {
            Ok(Some(Frame::Text(text))) => {
                route_logged(&registry, &dispatcher, conn_id, text.as_bytes());
            }
            Ok(Some(Frame::Binary(data))) => {
                tracing::warn!(
                    %conn_id,
                    bytes = data.len(),
                    "dropping binary frame"
                );
            }
            Ok(None) => {
                tracing::info!(%conn_id, "server closed the connection");
                return LoopExit::Closed;
            }
            Err(e) => {
                tracing::error!(%conn_id, error = %e, "read failed");
                return LoopExit::Failed(e);
            }
        }
    }
}

/// Decodes one frame and pushes the value onto its delivery queue.
pub(crate) fn route(
    registry: &Registry,
    dispatcher: &Dispatcher,
    data: &[u8],
) -> Result<WireKey, WarhornError> {
    let (entry, value) = registry.decode(data)?;
    dispatcher.push_erased(entry.type_id(), value)?;
    Ok(entry.wire_key())
}

fn route_logged(
    registry: &Registry,
    dispatcher: &Dispatcher,
    conn_id: ConnectionId,
    data: &[u8],
) {
    match route(registry, dispatcher, data) {
        Ok(wire_key) => {
            tracing::debug!(%conn_id, wire_key, "message queued for delivery");
        }
        // A key we don't know means client and server disagree on the
        // protocol, which is worse than a garbled frame.
        Err(WarhornError::Protocol(ProtocolError::UnknownWireKey(key))) => {
            tracing::error!(%conn_id, wire_key = %key, "unknown wire key");
        }
        Err(WarhornError::Protocol(e)) => {
            tracing::warn!(%conn_id, error = %e, "dropping malformed frame");
        }
        Err(e) => {
            tracing::error!(%conn_id, error = %e, "failed to queue message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use warhorn_protocol::RegistryBuilder;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Winner {
        winner: String,
    }

    fn setup() -> (Registry, Dispatcher) {
        let mut builder = RegistryBuilder::new();
        builder.register_receivable::<Winner>("winner");
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_kind::<Winner>().unwrap();
        (builder.build(), dispatcher)
    }

    #[test]
    fn test_route_queues_decoded_value() {
        let (registry, dispatcher) = setup();
        let key =
            route(&registry, &dispatcher, br#"{"winner":{"winner":"red"}}"#)
                .unwrap();
        assert_eq!(key, "winner");

        let queue = dispatcher.queue::<Winner>().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_route_unknown_key() {
        let (registry, dispatcher) = setup();
        let err = route(&registry, &dispatcher, br#"{"fooBar":{}}"#).unwrap_err();
        assert!(matches!(
            err,
            WarhornError::Protocol(ProtocolError::UnknownWireKey(ref k)) if k == "fooBar"
        ));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_route_bad_payload_queues_nothing() {
        let (registry, dispatcher) = setup();
        for frame in [
            &br#"{"winner":{"winner":7}}"#[..],
            &b"not json"[..],
            &br#"{}"#[..],
        ] {
            assert!(route(&registry, &dispatcher, frame).is_err());
        }
        assert_eq!(dispatcher.pending(), 0);
    }
}
