//! # Warhorn
//!
//! Typed WebSocket messaging client for turn-based strategy games.
//!
//! Warhorn keeps one WebSocket connection to a game server. Messages are
//! plain Rust types registered under a wire key; the client encodes them
//! as `{"<wireKey>": <payload>}` text frames on the way out, and routes
//! incoming frames to per-kind delivery queues that the game drains from
//! its own loop with [`Client::pump`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warhorn::prelude::*;
//!
//! # async fn run() -> Result<(), WarhornError> {
//! warhorn::init_logging();
//!
//! let client = Client::builder()
//!     .server_uri("ws://127.0.0.1:8080")
//!     .with_game_messages()
//!     .build(WebSocketConnector::new())?;
//!
//! client.on_receive(|w: &Winner| -> HandlerResult {
//!     println!("{} won", w.winner);
//!     Ok(())
//! })?;
//!
//! client.send(&SelectGameId { game_id: GameId::from("abc") })?;
//! client.connect().await?;
//!
//! loop {
//!     client.pump();
//!     // render a frame...
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Threads
//!
//! The sender and receiver loops run as Tokio tasks. Handlers never run on
//! them: they run on whichever thread calls [`Client::pump`].

mod client;
mod config;
mod error;
mod receiver;
mod sender;
mod state;
mod supervisor;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::WarhornError;
pub use state::{ConnectionEvent, ConnectionState};

pub use warhorn_dispatch as dispatch;
pub use warhorn_protocol as protocol;
pub use warhorn_transport as transport;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that prints to stderr.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Does nothing
/// if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, ClientConfig, ConnectionEvent, ConnectionState,
        WarhornError,
    };
    pub use warhorn_dispatch::{HandlerResult, PumpReport, Subscription};
    pub use warhorn_protocol::Registrar;
    pub use warhorn_protocol::messages::*;
    pub use warhorn_transport::{
        ConnectionId, Connector, MemoryConnector, WebSocketConnector,
    };
}
