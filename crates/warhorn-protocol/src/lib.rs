//! Wire protocol for Warhorn.
//!
//! This crate defines the "language" the client and the game server speak:
//!
//! - **Envelope codec** ([`encode`], [`decode_envelope`]): the
//!   `{"<wireKey>": <payload>}` wrapper every message travels in.
//! - **Registry** ([`Registry`], [`RegistryBuilder`]): which Rust type
//!   goes with which wire key, in which direction.
//! - **Messages** ([`messages`]): the game's message kinds and their keys.
//! - **Errors** ([`ProtocolError`]): what can go wrong along the way.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (text frames) and dispatch
//! (typed messages handed to application handlers). It doesn't know about
//! sockets or threads.
//!
//! ```text
//! Transport (text) → Protocol (wire key + typed value) → Dispatch (handlers)
//! ```

mod envelope;
mod error;
pub mod messages;
mod registry;

pub use envelope::{Envelope, decode_envelope, encode};
pub use error::ProtocolError;
pub use registry::{
    AnyMessage, Registrar, ReceivableEntry, Registry, RegistryBuilder, WireKey,
};
