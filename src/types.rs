use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const HASH_LEN: usize = 32;
pub const ADDRESS_LEN: usize = 20;

/// Upper bound on an ASN.1-DER encoded P-256 ECDSA signature.
pub const MAX_SIG_LEN: usize = 72;

/// 32-byte identifier (block hash, transaction id, merkle root).
///
/// Canonical JSON encodes fixed-width identifiers as integer arrays; the
/// derived serde impl does exactly that.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_LEN {
            return None;
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(arr: [u8; HASH_LEN]) -> Self {
        Self(arr)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

/// 20-byte account address, derived from the Keccak-256 digest of the
/// compressed public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn zero() -> Self {
        Self([0u8; ADDRESS_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ADDRESS_LEN {
            return None;
        }
        let mut arr = [0u8; ADDRESS_LEN];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(arr: [u8; ADDRESS_LEN]) -> Self {
        Self(arr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

/// Variable-length ASN.1-DER ECDSA signature.
///
/// The original wire format padded signatures into a fixed 72-byte buffer;
/// here the bytes are kept at their significant length (the DER header
/// `0x30 <len>` always recovers it) and padding is applied only where the
/// bit-compatible form is required.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wraps raw DER bytes. Returns `None` when the buffer exceeds the
    /// 72-byte bound.
    pub fn from_der(bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() > MAX_SIG_LEN {
            return None;
        }
        Some(Self(bytes))
    }

    /// Recovers the significant prefix of a zero-padded 72-byte buffer using
    /// the DER length header.
    pub fn from_padded(buf: &[u8; MAX_SIG_LEN]) -> Option<Self> {
        if buf[0] != 0x30 {
            return None;
        }
        let len = 2 + buf[1] as usize;
        if len > MAX_SIG_LEN {
            return None;
        }
        Some(Self(buf[..len].to_vec()))
    }

    pub fn to_padded(&self) -> [u8; MAX_SIG_LEN] {
        let mut buf = [0u8; MAX_SIG_LEN];
        buf[..self.0.len()].copy_from_slice(&self.0);
        buf
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

// Variable-length byte fields encode as base64 strings in canonical JSON.
impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        crate::codec::b64::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes = crate::codec::b64::deserialize(d)?;
        Signature::from_der(bytes)
            .ok_or_else(|| serde::de::Error::custom("signature exceeds 72 bytes"))
    }
}
