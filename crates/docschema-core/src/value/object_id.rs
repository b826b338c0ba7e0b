//! 12-byte document identifiers.
//!
//! Layout: 4-byte big-endian creation time in seconds, 5 bytes unique to
//! the process, 3-byte big-endian counter. Byte order equals creation order,
//! so ids sort the same way as text, as raw bytes, and as sled keys.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

static COUNTER: AtomicU32 = AtomicU32::new(0);
static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();

/// A totally ordered document identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; ObjectId::LEN]);

impl ObjectId {
    /// Encoded length in bytes.
    pub const LEN: usize = 12;

    /// Generate a new id for the current time.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Self::with_timestamp(secs)
    }

    /// Generate a new id carrying the given creation time.
    pub fn with_timestamp(secs: u32) -> Self {
        let process = PROCESS_UNIQUE.get_or_init(rand::random::<[u8; 5]>);
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; Self::LEN];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Build an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Decode an id from a byte slice (e.g. a sled key).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; Self::LEN] = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        Ok(Self(arr))
    }

    /// Raw bytes.
    pub const fn bytes(&self) -> [u8; Self::LEN] {
        self.0
    }

    /// Creation time in seconds since the Unix epoch.
    pub fn timestamp_secs(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Lowercase hex text form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(|_| Error::InvalidObjectId(s.to_string()))?;
        let arr: [u8; Self::LEN] = decoded
            .try_into()
            .map_err(|_| Error::InvalidObjectId(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_ordered_by_creation() {
        let a = ObjectId::with_timestamp(100);
        let b = ObjectId::with_timestamp(100);
        let c = ObjectId::with_timestamp(101);

        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.timestamp_secs(), 100);
    }

    #[test]
    fn test_hex_text_form() {
        let id = ObjectId::from_bytes([0x65, 0, 0, 1, 2, 3, 4, 5, 6, 0, 0, 9]);
        let text = id.to_string();
        assert_eq!(text, "650000010203040506000009");
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_invalid_text_rejected() {
        assert!("xyz".parse::<ObjectId>().is_err());
        assert!("0102".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = ObjectId::with_timestamp(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
