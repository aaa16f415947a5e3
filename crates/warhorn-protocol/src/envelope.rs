//! The envelope codec.
//!
//! Every message on the wire is a JSON object with exactly one property.
//! The property name is the *wire key* and its value is the payload:
//!
//! ```text
//! {"selectGameId": {"gameId": "abc"}}
//!  └─ wire key ─┘  └─── payload ───┘
//! ```
//!
//! Decoding stops at the outer object. The payload is kept as a
//! [`RawValue`] so the registry can hand it to the right concrete type
//! without parsing it twice.

use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::ProtocolError;

/// A decoded envelope whose payload has not been interpreted yet.
#[derive(Debug)]
pub struct Envelope {
    /// The single top-level key.
    pub wire_key: String,
    /// The still-serialized payload.
    pub payload: Box<RawValue>,
}

impl Envelope {
    /// Parses the payload as `T`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the payload doesn't have the
    /// shape `T` expects.
    pub fn payload_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<T, ProtocolError> {
        serde_json::from_str(self.payload.get()).map_err(|source| {
            ProtocolError::Decode {
                wire_key: self.wire_key.clone(),
                source,
            }
        })
    }
}

/// Serializes as a one-entry map: `{ key: value }`.
struct SingleEntry<'a, T: ?Sized> {
    key: &'a str,
    value: &'a T,
}

impl<T: Serialize + ?Sized> Serialize for SingleEntry<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.key, self.value)?;
        map.end()
    }
}

/// Encodes `payload` under `wire_key` as the text of one WebSocket frame.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if the payload can't be represented
/// as JSON (e.g. a map with non-string keys).
pub fn encode<T: Serialize + ?Sized>(
    wire_key: &str,
    payload: &T,
) -> Result<String, ProtocolError> {
    serde_json::to_string(&SingleEntry {
        key: wire_key,
        value: payload,
    })
    .map_err(ProtocolError::Encode)
}

/// Every top-level entry of an object, duplicates included, in wire order.
struct RawEntries(Vec<(String, Box<RawValue>)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object with one key")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(1);
                while let Some(entry) =
                    map.next_entry::<String, Box<RawValue>>()?
                {
                    entries.push(entry);
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Splits a frame into its wire key and raw payload.
///
/// # Errors
/// - [`ProtocolError::MalformedEnvelope`]: not JSON, or not an object
/// - [`ProtocolError::EmptyEnvelope`]: `{}`
/// - [`ProtocolError::MultipleKeys`]: more than one property (a repeated
///   key counts twice)
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, ProtocolError> {
    let RawEntries(mut entries) =
        serde_json::from_slice(data).map_err(ProtocolError::MalformedEnvelope)?;

    match entries.len() {
        0 => Err(ProtocolError::EmptyEnvelope),
        1 => {
            let (wire_key, payload) = entries.remove(0);
            Ok(Envelope { wire_key, payload })
        }
        n => Err(ProtocolError::MultipleKeys(n)),
    }
}
