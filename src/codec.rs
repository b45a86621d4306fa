//! Canonical serialization.
//!
//! A hash of a structured value is SHA-256 over its canonical JSON form.
//! Canonical JSON uses the struct declaration field order, encodes
//! fixed-width byte arrays ([`crate::types::Hash`], [`crate::types::Address`])
//! as integer arrays, and variable-length byte slices as base64 strings.
//! Hash stability across nodes depends on both rules.

use serde::Serialize;

use crate::crypto::sha256;
use crate::types::Hash;

/// Serde helper for variable-length byte fields: base64 in JSON.
pub mod b64 {
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&B64.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s: String = Deserialize::deserialize(d)?;
        B64.decode(&s).map_err(serde::de::Error::custom)
    }
}

pub fn canonical_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// SHA-256 over the canonical JSON encoding of `value`.
pub fn canonical_hash<T: Serialize>(value: &T) -> serde_json::Result<Hash> {
    Ok(Hash(sha256(&canonical_json(value)?)))
}
