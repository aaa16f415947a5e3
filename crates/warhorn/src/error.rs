//! Unified error type for the Warhorn client.

use warhorn_dispatch::DispatchError;
use warhorn_protocol::ProtocolError;
use warhorn_transport::TransportError;

use crate::ConnectionState;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each wrapping variant generates a `From`
/// impl, so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WarhornError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, unregistered kind, registry).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A dispatch-level error (no queue for a kind).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// `connect` was called while a connection exists or is in progress.
    #[error("cannot connect: client is {0}")]
    AlreadyConnected(ConnectionState),

    /// `disconnect` was called with no open connection.
    #[error("not connected")]
    NotConnected,

    /// The configuration can't be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
