//! `Client` builder and the connection manager façade.
//!
//! This is the entry point for talking to a game server. It ties together
//! all the layers: transport → protocol → dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use warhorn_dispatch::{Dispatcher, HandlerResult, PumpReport, Subscription};
use warhorn_protocol::{Registrar, Registry, RegistryBuilder, WireKey};
use warhorn_transport::{ConnectionId, Connector, WebSocketConnector};

use crate::sender::Outbound;
use crate::state::StateCell;
use crate::supervisor::Link;
use crate::{ClientConfig, ConnectionEvent, ConnectionState, WarhornError};

/// State shared between the client and the tasks of its open connection.
pub(crate) struct Shared {
    pub(crate) registry: Arc<Registry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) state: StateCell,
    pub(crate) pending: Arc<AtomicUsize>,
    pub(crate) events: crossbeam_channel::Sender<ConnectionEvent>,
    pub(crate) close_timeout: Duration,
}

/// Builder for configuring a [`Client`].
///
/// Message kinds are registered here, before the client exists: the set of
/// kinds is fixed for the client's lifetime.
///
/// # Example
///
/// ```rust,ignore
/// use warhorn::prelude::*;
///
/// let client = Client::builder()
///     .server_uri("ws://game.example:8080")
///     .with_game_messages()
///     .build(WebSocketConnector::new())?;
/// client.connect().await?;
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    registry: RegistryBuilder,
    dispatcher: Dispatcher,
}

impl ClientBuilder {
    /// Creates a new builder with default settings and no message kinds.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            registry: RegistryBuilder::new(),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the server to connect to.
    pub fn server_uri(mut self, uri: &str) -> Self {
        self.config.server_uri = uri.to_string();
        self
    }

    /// Sets how long `disconnect` waits for the close handshake.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Registers `T` as sendable under `wire_key`.
    ///
    /// # Panics
    /// If `T` or `wire_key` is already registered as sendable, or
    /// `wire_key` is receivable as a different type.
    #[track_caller]
    pub fn register_sendable<T: Serialize + Send + 'static>(
        mut self,
        wire_key: WireKey,
    ) -> Self {
        self.sendable::<T>(wire_key);
        self
    }

    /// Registers `T` as receivable under `wire_key` and creates its
    /// delivery queue.
    ///
    /// # Panics
    /// If `T` or `wire_key` is already registered as receivable, or
    /// `wire_key` is sendable as a different type.
    #[track_caller]
    pub fn register_receivable<T: DeserializeOwned + Send + 'static>(
        mut self,
        wire_key: WireKey,
    ) -> Self {
        self.receivable::<T>(wire_key);
        self
    }

    /// Registers the game's whole message catalog.
    pub fn with_game_messages(mut self) -> Self {
        warhorn_protocol::messages::register_game_messages(&mut self);
        self
    }

    /// Validates the configuration and freezes the registry.
    ///
    /// # Errors
    /// [`WarhornError::InvalidConfig`] if the configuration is unusable.
    pub fn build<C: Connector>(
        self,
        connector: C,
    ) -> Result<Client<C>, WarhornError> {
        self.config.validate()?;

        let registry = self.registry.build();
        tracing::debug!(
            sendable = ?registry.sendable_keys(),
            receivable = ?registry.receivable_keys(),
            "message registry built"
        );

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            registry: Arc::new(registry),
            dispatcher: Arc::new(self.dispatcher),
            state: StateCell::new(),
            pending: Arc::new(AtomicUsize::new(0)),
            events: events_tx,
            close_timeout: self.config.close_timeout,
        });

        Ok(Client {
            config: self.config,
            connector,
            shared,
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            events: events_rx,
            link: Mutex::new(None),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Registrar for ClientBuilder {
    #[track_caller]
    fn sendable<T: Serialize + Send + 'static>(&mut self, wire_key: WireKey) {
        self.registry.register_sendable::<T>(wire_key);
    }

    #[track_caller]
    fn receivable<T: DeserializeOwned + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    ) {
        self.registry.register_receivable::<T>(wire_key);
        // The registry already rejected a second registration of `T`.
        if let Err(e) = self.dispatcher.add_kind::<T>() {
            panic!("{e}");
        }
    }
}

/// The connection manager: one per game client.
///
/// Sending works in any state: messages queue up and go out, in order, as
/// soon as a connection is open. Received messages wait in per-kind
/// delivery queues until the application calls [`pump`](Self::pump).
///
/// All methods take `&self`; share the client behind an `Arc` to call
/// `send` or `pump` from threads other than the one driving `connect`.
pub struct Client<C: Connector = WebSocketConnector> {
    config: ClientConfig,
    connector: C,
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Outbound>>>,
    events: crossbeam_channel::Receiver<ConnectionEvent>,
    /// The open connection. Also serializes `connect` and `disconnect`.
    link: Mutex<Option<Link>>,
}

impl Client {
    /// Creates a new builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C: Connector> Client<C> {
    /// Opens a connection to the configured server and starts the sender
    /// and receiver loops.
    ///
    /// # Errors
    /// [`WarhornError::AlreadyConnected`] unless the client is
    /// `Disconnected`, or the transport error if the socket can't be
    /// opened (the client is `Disconnected` again afterwards).
    ///
    /// There is no built-in timeout. Dropping the future before it
    /// completes, for example from `tokio::time::timeout`, leaves the
    /// client `Disconnected`.
    pub async fn connect(&self) -> Result<(), WarhornError> {
        let attempt = self.shared.state.begin_connect()?;

        let mut link = self.link.lock().await;
        if let Some(stale) = link.take() {
            // A previous connection that was lost on its own.
            stale.shutdown().await;
        }

        let uri = self.config.server_uri.as_str();
        tracing::info!(uri, "connecting");
        let conn = match self.connector.connect(uri).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(uri, error = %e, "connect failed");
                return Err(e.into());
            }
        };

        let queue = Arc::clone(&self.outbound_rx).lock_owned().await;
        attempt.succeed();
        let started = Link::start(conn, queue, Arc::clone(&self.shared));
        let conn_id = started.id();
        let _ = self.shared.events.send(ConnectionEvent::Connected(conn_id));
        tracing::info!(%conn_id, uri, "connected");

        *link = Some(started);
        Ok(())
    }

    /// Stops both loops and closes the connection. Returns once the client
    /// is `Disconnected`.
    ///
    /// Messages still queued for sending stay queued for the next
    /// connection.
    ///
    /// # Errors
    /// [`WarhornError::NotConnected`] if there is no open connection,
    /// including one that was already lost.
    pub async fn disconnect(&self) -> Result<(), WarhornError> {
        let mut link = self.link.lock().await;
        let Some(open) = link.take() else {
            return Err(WarhornError::NotConnected);
        };

        let conn_id = open.id();
        let result = self
            .shared
            .state
            .transition(ConnectionState::Connected, ConnectionState::Disconnecting);
        tracing::info!(%conn_id, "disconnecting");
        open.shutdown().await;

        match result {
            Ok(()) => Ok(()),
            // Lost before we got here; the link was only being cleaned up.
            Err(_) => Err(WarhornError::NotConnected),
        }
    }

    /// Queues `msg` for sending under its registered wire key.
    ///
    /// Never blocks and never waits for the network. The payload is
    /// serialized now, so a later change to `msg` can't affect what is
    /// sent.
    ///
    /// # Errors
    /// [`ProtocolError::NotSendable`](warhorn_protocol::ProtocolError) if
    /// `T` was never registered as sendable, or
    /// [`ProtocolError::Encode`](warhorn_protocol::ProtocolError) if it
    /// fails to serialize.
    pub fn send<T: Serialize + 'static>(&self, msg: &T) -> Result<(), WarhornError> {
        let (wire_key, payload) = self.shared.registry.serialize(msg)?;

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.outbound_tx.send(Outbound { wire_key, payload }).is_err() {
            // The receiving half lives as long as the client.
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(WarhornError::NotConnected);
        }
        tracing::trace!(wire_key, "message queued for sending");
        Ok(())
    }

    /// Adds a handler for received messages of type `T`.
    ///
    /// Handlers run on the thread that calls [`pump`](Self::pump), in
    /// registration order.
    ///
    /// # Errors
    /// [`DispatchError::UnknownKind`](warhorn_dispatch::DispatchError) if
    /// `T` isn't registered as receivable.
    pub fn on_receive<T, F>(&self, handler: F) -> Result<Subscription, WarhornError>
    where
        T: Send + 'static,
        F: FnMut(&T) -> HandlerResult + Send + 'static,
    {
        Ok(self.shared.dispatcher.subscribe(handler)?)
    }

    /// Removes a handler. Returns `false` if it was already removed.
    pub fn remove_handler(&self, subscription: &Subscription) -> bool {
        self.shared.dispatcher.unsubscribe(subscription)
    }

    /// Delivers every message received so far, kind by kind, to its
    /// handlers.
    pub fn pump(&self) -> PumpReport {
        self.shared.dispatcher.pump()
    }

    /// Delivers the received messages of one kind only.
    ///
    /// # Errors
    /// [`DispatchError::UnknownKind`](warhorn_dispatch::DispatchError) if
    /// `T` isn't registered as receivable.
    pub fn pump_kind<T: Send + 'static>(&self) -> Result<PumpReport, WarhornError> {
        Ok(self.shared.dispatcher.pump_kind::<T>()?)
    }

    /// Takes every connection event that happened since the last call.
    pub fn drain_events(&self) -> Vec<ConnectionEvent> {
        self.events.try_iter().collect()
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Returns `true` while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Messages queued but not yet taken by the sender loop.
    pub fn pending_outbound(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Received messages waiting for the next pump.
    pub fn pending_inbound(&self) -> usize {
        self.shared.dispatcher.pending()
    }

    /// The frozen message registry.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The ID of the open connection, if any.
    pub async fn connection_id(&self) -> Option<ConnectionId> {
        self.link.lock().await.as_ref().map(Link::id)
    }
}
