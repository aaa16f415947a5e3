//! Error types for the protocol layer.
//!
//! Each crate in Warhorn defines its own error enum. A `ProtocolError`
//! always means the problem is in the wire format or the registry, never
//! in the socket underneath.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing an outbound payload failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not a JSON object (bad JSON, array, scalar...).
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The envelope object has no keys.
    #[error("envelope has no wire key")]
    EmptyEnvelope,

    /// The envelope object has more than one key.
    #[error("envelope has {0} keys, expected exactly one")]
    MultipleKeys(usize),

    /// No receivable message kind is registered under this key.
    #[error("unknown wire key {0:?}")]
    UnknownWireKey(String),

    /// The key is known but the payload does not match its shape.
    #[error("payload for {wire_key:?} failed to decode: {source}")]
    Decode {
        wire_key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The message type was never registered as sendable.
    #[error("message type {0} is not registered as sendable")]
    NotSendable(&'static str),

    /// A type or wire key was registered twice in the same direction, or a
    /// key was reused for a different type across directions.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// A wire key that cannot appear on the wire (e.g. empty).
    #[error("invalid wire key {0:?}")]
    InvalidWireKey(String),
}
