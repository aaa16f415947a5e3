//! Connection state machine and the events it reports to the application.

use std::sync::{Mutex, PoisonError};

use warhorn_transport::{ConnectionId, TransportError};

use crate::WarhornError;

/// The lifecycle state of the client's connection.
///
/// ```text
///                 connect()            socket open
/// Disconnected ─────────────► Connecting ──────────► Connected
///      ▲                          │                     │
///      │  open failed / cancelled │                     │ disconnect()
///      ├──────────────────────────┘                     ▼
///      │                                          Disconnecting
///      │          loops stopped, socket closed          │
///      ├────────────────────────────────────────────────┘
///      │
///      └──── transport error in sender or receiver (from Connected)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Something the application should know about the connection. Collected
/// with [`Client::drain_events`](crate::Client::drain_events).
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The socket opened and both loops are running.
    Connected(ConnectionId),
    /// `disconnect()` finished.
    Disconnected(ConnectionId),
    /// The connection dropped on its own: a write or read failed, or the
    /// server closed it.
    Lost(ConnectionId, TransportError),
}

/// The shared, lock-protected current state. Every transition is a
/// check-and-set under one lock, so two racing `connect` calls can't both
/// get through.
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<ConnectionState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(ConnectionState::Disconnected))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Moves `from` → `to`, or reports the actual state.
    pub(crate) fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(*state);
        }
        tracing::trace!(%from, %to, "connection state transition");
        *state = to;
        Ok(())
    }

    /// Disconnected → Connecting.
    ///
    /// The returned guard puts the state back to `Disconnected` when it is
    /// dropped, unless [`ConnectAttempt::succeed`] was called. A `connect`
    /// future that fails or is cancelled at any await point therefore
    /// never leaves the client stuck in `Connecting`.
    pub(crate) fn begin_connect(&self) -> Result<ConnectAttempt<'_>, WarhornError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            .map_err(WarhornError::AlreadyConnected)?;
        Ok(ConnectAttempt {
            cell: self,
            finished: false,
        })
    }
}

/// An in-progress `connect`; see [`StateCell::begin_connect`].
#[must_use = "dropping the attempt resets the state to Disconnected"]
#[derive(Debug)]
pub(crate) struct ConnectAttempt<'a> {
    cell: &'a StateCell,
    finished: bool,
}

impl ConnectAttempt<'_> {
    /// Connecting → Connected.
    pub(crate) fn succeed(mut self) {
        self.cell.set(ConnectionState::Connected);
        self.finished = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cell.transition(
                ConnectionState::Connecting,
                ConnectionState::Disconnected,
            );
        }
    }
}
