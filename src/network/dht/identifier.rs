use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::BitXor;

use crate::utils::{DhtError, Result};

/// Width of the key space in bits.
pub const LENGTH: usize = 160;

/// Width of the key space in bytes.
pub const ID_BYTES: usize = LENGTH / 8;

/// 160-bit identifier in the DHT key space.
///
/// The bytes are a big-endian unsigned integer, so the derived ordering is the
/// natural integer order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; ID_BYTES]);

impl Identifier {
    /// Create an Identifier from raw bytes
    pub fn new(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; ID_BYTES])
    }

    /// Generate a random Identifier
    pub fn random() -> Self {
        let random_bytes: [u8; ID_BYTES] = rand::random();
        Self(random_bytes)
    }

    /// Hash an arbitrary key into the identifier space
    /// (first 160 bits of SHA-256)
    pub fn from_key(key: &str) -> Self {
        let hash = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&hash[..ID_BYTES]);
        Self(bytes)
    }

    /// Build an Identifier from a big-endian byte slice of at most
    /// `ID_BYTES` bytes. Shorter slices are zero-extended on the left.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > ID_BYTES {
            return Err(DhtError::InvalidIdentifier(format!(
                "expected at most {} bytes, got {}",
                ID_BYTES,
                bytes.len()
            )));
        }
        let mut array = [0u8; ID_BYTES];
        array[ID_BYTES - bytes.len()..].copy_from_slice(bytes);
        Ok(Self(array))
    }

    /// The identifier whose only set bit is `bit` (counted from the least
    /// significant end), i.e. `2^bit`.
    pub fn with_bit(bit: usize) -> Self {
        assert!(bit < LENGTH, "bit {} outside of a {}-bit identifier", bit, LENGTH);
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1 - bit / 8] = 1 << (bit % 8);
        Self(bytes)
    }

    /// XOR distance between two identifiers
    pub fn distance(&self, other: &Identifier) -> Identifier {
        *self ^ *other
    }

    /// Position of the highest set bit, 1-based. Zero for the zero value.
    pub fn bit_length(&self) -> usize {
        for (byte_idx, &byte) in self.0.iter().enumerate() {
            if byte != 0 {
                let remaining_bytes = ID_BYTES - byte_idx - 1;
                return remaining_bytes * 8 + (8 - byte.leading_zeros() as usize);
            }
        }
        0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| DhtError::InvalidIdentifier(format!("{}: {}", s, e)))?;
        if bytes.len() != ID_BYTES {
            return Err(DhtError::InvalidIdentifier(format!(
                "expected {} hex characters, got {}",
                ID_BYTES * 2,
                s.len()
            )));
        }
        let mut array = [0u8; ID_BYTES];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Self::from(value as u128)
    }
}

impl From<u128> for Identifier {
    fn from(value: u128) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl BitXor for Identifier {
    type Output = Identifier;

    fn bitxor(self, rhs: Identifier) -> Identifier {
        let mut result = [0u8; ID_BYTES];
        for (i, r) in result.iter_mut().enumerate() {
            *r = self.0[i] ^ rhs.0[i];
        }
        Identifier(result)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identifier::from_hex(&s).map_err(de::Error::custom)
    }
}
