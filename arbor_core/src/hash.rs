//! Checksums over canonical object encodings, using BLAKE3.

use crate::error::{Error, Result};
use crate::object::ObjectType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Checksum size in bytes (BLAKE3 produces 256-bit digests).
pub const CHECKSUM_SIZE: usize = 32;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    Blake3,
}

impl Algorithm {
    /// Returns the string representation of the algorithm (for config files).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blake3-256" => Ok(Algorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Returns the algorithm ID byte (for object headers).
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::Blake3 => 1,
        }
    }

    /// Parse algorithm from ID byte.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Algorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(format!("ID {}", id))),
        }
    }
}

/// A 32-byte BLAKE3 checksum identifying an object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum([u8; CHECKSUM_SIZE]);

impl Checksum {
    /// Create a Checksum from raw bytes.
    pub fn from_bytes(bytes: [u8; CHECKSUM_SIZE]) -> Self {
        Checksum(bytes)
    }

    /// Create a Checksum from a hex string (64 hex characters).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != CHECKSUM_SIZE * 2 {
            return Err(Error::invalid_checksum(format!(
                "Expected {} hex characters, got {}",
                CHECKSUM_SIZE * 2,
                hex_str.len()
            )));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::invalid_checksum(format!("Invalid hex: {}", e)))?;

        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&bytes);
        Ok(Checksum(checksum))
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for log lines and listings.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Get the first 2 hex characters (for directory sharding).
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Get the remaining 62 hex characters (for filename).
    pub fn suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_SIZE] {
        &self.0
    }

    /// Hash raw bytes using BLAKE3, without an object-type prefix.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Checksum(*hash.as_bytes())
    }

    /// Checksum of an object's canonical encoding: type byte, then payload.
    pub fn of_object(object_type: ObjectType, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[object_type.to_u8()]);
        hasher.update(payload);
        Checksum(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Checksum::from_hex(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Checksum::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hello_world() {
        let checksum = Checksum::hash_bytes(b"hello world");
        let hex = checksum.to_hex();
        assert_eq!(hex.len(), 64);

        // BLAKE3 of "hello world"
        assert_eq!(
            hex,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_object_checksum_is_type_separated() {
        let blob = Checksum::of_object(ObjectType::Blob, b"");
        let tree = Checksum::of_object(ObjectType::Tree, b"");
        assert_ne!(blob, tree);
        assert_ne!(blob, Checksum::hash_bytes(b""));
    }

    #[test]
    fn test_from_hex_invalid() {
        assert!(Checksum::from_hex("abcd").is_err());
        assert!(Checksum::from_hex("").is_err());
        assert!(Checksum::from_hex(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_from_str_and_display() {
        let checksum = Checksum::hash_bytes(b"parse me");
        let parsed: Checksum = checksum.to_string().parse().unwrap();
        assert_eq!(parsed, checksum);
        assert_eq!(checksum.short().len(), 12);
        assert!(checksum.to_hex().starts_with(&checksum.short()));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let checksum = Checksum::hash_bytes(b"json");
        let json = serde_json::to_string(&checksum).unwrap();
        assert_eq!(json, format!("\"{}\"", checksum.to_hex()));

        let back: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checksum);
    }

    #[test]
    fn test_algorithm_conversions() {
        let algo = Algorithm::Blake3;
        assert_eq!(algo.as_str(), "blake3-256");
        assert_eq!(algo.id(), 1);

        assert_eq!(Algorithm::parse("blake3-256").unwrap(), Algorithm::Blake3);
        assert_eq!(Algorithm::from_id(1).unwrap(), Algorithm::Blake3);

        assert!(Algorithm::parse("sha256").is_err());
        assert!(Algorithm::from_id(99).is_err());
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Equal content always yields an equal object checksum
        #[test]
        fn prop_object_checksum_deterministic(data: Vec<u8>) {
            let a = Checksum::of_object(ObjectType::Blob, &data);
            let b = Checksum::of_object(ObjectType::Blob, &data);
            prop_assert_eq!(a, b);
        }

        /// Hex parsing accepts exactly what to_hex produces
        #[test]
        fn prop_hex_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let checksum = Checksum::from_bytes(bytes);
            let parsed = Checksum::from_hex(&checksum.to_hex())?;
            prop_assert_eq!(checksum, parsed);
            prop_assert_eq!(
                format!("{}{}", checksum.prefix(), checksum.suffix()),
                checksum.to_hex()
            );
        }

        /// Invalid hex length always fails
        #[test]
        fn prop_invalid_hex_length_fails(
            s in "[0-9a-f]{0,63}|[0-9a-f]{65,128}"
        ) {
            prop_assert!(Checksum::from_hex(&s).is_err());
        }
    }
}
