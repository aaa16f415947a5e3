//! The message registry: which Rust type travels under which wire key.
//!
//! Two independent directions are kept:
//!
//! - **sendable**: type → wire key, used when encoding outbound messages
//! - **receivable**: wire key → [`ReceivableEntry`], used when routing an
//!   inbound envelope to its concrete type
//!
//! A registry is assembled on a [`RegistryBuilder`] during startup and then
//! frozen into a [`Registry`], which has no mutating methods. Registering
//! the same type or key twice in one direction is a programming error and
//! panics at the call site, long before any traffic flows.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::ProtocolError;

/// A wire key. Keys are compile-time constants of the protocol.
pub type WireKey = &'static str;

/// A decoded inbound message with its concrete type erased.
pub type AnyMessage = Box<dyn Any + Send>;

type DecodeFn = fn(&RawValue) -> Result<AnyMessage, serde_json::Error>;

/// Monomorphized per receivable type at registration time, so routing a
/// frame never needs to know `T`.
fn decode_as<T: DeserializeOwned + Send + 'static>(
    raw: &RawValue,
) -> Result<AnyMessage, serde_json::Error> {
    let value: T = serde_json::from_str(raw.get())?;
    Ok(Box::new(value))
}

/// Something message kinds can be registered on.
///
/// Implemented by [`RegistryBuilder`] and by higher layers that wrap one
/// (the client builder also creates a delivery queue per receivable kind),
/// so a message catalog can be written once against this trait.
pub trait Registrar {
    /// Registers `T` as sendable under `wire_key`.
    fn sendable<T: Serialize + Send + 'static>(&mut self, wire_key: WireKey);

    /// Registers `T` as receivable under `wire_key`.
    fn receivable<T: DeserializeOwned + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    );
}

/// How to turn the payload of one wire key into its Rust type.
#[derive(Debug, Clone, Copy)]
pub struct ReceivableEntry {
    wire_key: WireKey,
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

impl ReceivableEntry {
    /// The wire key this entry answers to.
    pub fn wire_key(&self) -> WireKey {
        self.wire_key
    }

    /// The `TypeId` of the concrete message type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The Rust name of the concrete message type, for logs.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Decodes a raw payload into the concrete type, boxed.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the payload doesn't match.
    pub fn decode(&self, raw: &RawValue) -> Result<AnyMessage, ProtocolError> {
        (self.decode)(raw).map_err(|source| ProtocolError::Decode {
            wire_key: self.wire_key.to_string(),
            source,
        })
    }
}

/// Collects registrations before the client is built.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    sendable: HashMap<TypeId, WireKey>,
    sendable_keys: HashMap<WireKey, TypeId>,
    receivable: HashMap<WireKey, ReceivableEntry>,
    receivable_types: HashMap<TypeId, WireKey>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as sendable under `wire_key`.
    ///
    /// # Panics
    /// If `T` or `wire_key` is already sendable, or `wire_key` is
    /// receivable as a different type.
    #[track_caller]
    pub fn register_sendable<T: Serialize + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    ) -> &mut Self {
        if let Err(e) = self.try_register_sendable::<T>(wire_key) {
            panic!("{e}");
        }
        self
    }

    /// Registers `T` as receivable under `wire_key`.
    ///
    /// # Panics
    /// If `T` or `wire_key` is already receivable, or `wire_key` is
    /// sendable as a different type.
    #[track_caller]
    pub fn register_receivable<T: DeserializeOwned + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    ) -> &mut Self {
        if let Err(e) = self.try_register_receivable::<T>(wire_key) {
            panic!("{e}");
        }
        self
    }

    /// Fallible form of [`register_sendable`](Self::register_sendable).
    ///
    /// # Errors
    /// [`ProtocolError::InvalidWireKey`] or
    /// [`ProtocolError::DuplicateRegistration`]. The builder is unchanged
    /// on error.
    pub fn try_register_sendable<T: Serialize + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    ) -> Result<(), ProtocolError> {
        validate_key(wire_key)?;
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        if let Some(existing) = self.sendable.get(&type_id) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "{type_name} is already sendable as {existing:?}"
            )));
        }
        if self.sendable_keys.contains_key(wire_key) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "wire key {wire_key:?} is already sendable"
            )));
        }
        self.check_cross_direction(wire_key, type_id, type_name)?;

        self.sendable.insert(type_id, wire_key);
        self.sendable_keys.insert(wire_key, type_id);
        tracing::trace!(wire_key, type_name, "registered sendable");
        Ok(())
    }

    /// Fallible form of [`register_receivable`](Self::register_receivable).
    ///
    /// # Errors
    /// [`ProtocolError::InvalidWireKey`] or
    /// [`ProtocolError::DuplicateRegistration`]. The builder is unchanged
    /// on error.
    pub fn try_register_receivable<T: DeserializeOwned + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    ) -> Result<(), ProtocolError> {
        validate_key(wire_key)?;
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        if let Some(existing) = self.receivable_types.get(&type_id) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "{type_name} is already receivable as {existing:?}"
            )));
        }
        if self.receivable.contains_key(wire_key) {
            return Err(ProtocolError::DuplicateRegistration(format!(
                "wire key {wire_key:?} is already receivable"
            )));
        }
        self.check_cross_direction(wire_key, type_id, type_name)?;

        self.receivable.insert(
            wire_key,
            ReceivableEntry {
                wire_key,
                type_id,
                type_name,
                decode: decode_as::<T>,
            },
        );
        self.receivable_types.insert(type_id, wire_key);
        tracing::trace!(wire_key, type_name, "registered receivable");
        Ok(())
    }

    /// A key used in both directions must name the same type both ways.
    fn check_cross_direction(
        &self,
        wire_key: WireKey,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<(), ProtocolError> {
        let other = self
            .sendable_keys
            .get(wire_key)
            .copied()
            .or_else(|| self.receivable.get(wire_key).map(|e| e.type_id));
        match other {
            Some(other) if other != type_id => {
                Err(ProtocolError::DuplicateRegistration(format!(
                    "wire key {wire_key:?} is bound to another type, cannot reuse it for {type_name}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Freezes the registrations.
    pub fn build(self) -> Registry {
        Registry {
            sendable: self.sendable,
            receivable: self.receivable,
            receivable_types: self.receivable_types,
        }
    }
}

impl Registrar for RegistryBuilder {
    #[track_caller]
    fn sendable<T: Serialize + Send + 'static>(&mut self, wire_key: WireKey) {
        self.register_sendable::<T>(wire_key);
    }

    #[track_caller]
    fn receivable<T: DeserializeOwned + Send + 'static>(
        &mut self,
        wire_key: WireKey,
    ) {
        self.register_receivable::<T>(wire_key);
    }
}

fn validate_key(wire_key: WireKey) -> Result<(), ProtocolError> {
    if wire_key.is_empty() || wire_key.chars().any(|c| c.is_control()) {
        return Err(ProtocolError::InvalidWireKey(wire_key.to_string()));
    }
    Ok(())
}

/// The frozen set of registrations. Shared read-only by the sender and
/// receiver once the client is built.
#[derive(Debug)]
pub struct Registry {
    sendable: HashMap<TypeId, WireKey>,
    receivable: HashMap<WireKey, ReceivableEntry>,
    receivable_types: HashMap<TypeId, WireKey>,
}

impl Registry {
    /// Creates a builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The wire key `T` is sent under, if it is sendable.
    pub fn wire_key_of<T: 'static>(&self) -> Option<WireKey> {
        self.sendable.get(&TypeId::of::<T>()).copied()
    }

    /// Looks up the receivable entry for an inbound wire key.
    pub fn lookup(&self, wire_key: &str) -> Option<&ReceivableEntry> {
        self.receivable.get(wire_key)
    }

    /// Returns `true` if `T` is registered as receivable.
    pub fn is_receivable<T: 'static>(&self) -> bool {
        self.receivable_types.contains_key(&TypeId::of::<T>())
    }

    /// Serializes `msg` and pairs it with its registered key, without
    /// wrapping it in an envelope yet.
    ///
    /// The client calls this when a message is queued; the envelope is
    /// added with [`encode`](crate::encode) when it is written.
    ///
    /// # Errors
    /// [`ProtocolError::NotSendable`] if `T` was never registered, or
    /// [`ProtocolError::Encode`] if serialization fails.
    pub fn serialize<T: Serialize + 'static>(
        &self,
        msg: &T,
    ) -> Result<(WireKey, Box<RawValue>), ProtocolError> {
        let wire_key = self
            .wire_key_of::<T>()
            .ok_or(ProtocolError::NotSendable(std::any::type_name::<T>()))?;
        let payload = serde_json::value::to_raw_value(msg)
            .map_err(ProtocolError::Encode)?;
        Ok((wire_key, payload))
    }

    /// Encodes `msg` as a complete envelope under its registered key.
    ///
    /// # Errors
    /// Same as [`serialize`](Self::serialize).
    pub fn encode<T: Serialize + 'static>(
        &self,
        msg: &T,
    ) -> Result<String, ProtocolError> {
        let (wire_key, payload) = self.serialize(msg)?;
        crate::encode(wire_key, &*payload)
    }

    /// Decodes a complete frame into its wire key and concrete value.
    ///
    /// # Errors
    /// Any envelope format error, [`ProtocolError::UnknownWireKey`], or
    /// [`ProtocolError::Decode`].
    pub fn decode(
        &self,
        data: &[u8],
    ) -> Result<(&ReceivableEntry, AnyMessage), ProtocolError> {
        let envelope = crate::decode_envelope(data)?;
        let entry = self
            .lookup(&envelope.wire_key)
            .ok_or(ProtocolError::UnknownWireKey(envelope.wire_key))?;
        let value = entry.decode(&envelope.payload)?;
        Ok((entry, value))
    }

    /// All sendable wire keys, sorted.
    pub fn sendable_keys(&self) -> Vec<WireKey> {
        let mut keys: Vec<_> =
            self.sendable.values().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// All receivable wire keys, sorted.
    pub fn receivable_keys(&self) -> Vec<WireKey> {
        let mut keys: Vec<_> = self.receivable.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}
