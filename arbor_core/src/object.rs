//! Binary object format and encoding.
//!
//! Objects are stored with a 16-byte header followed by the payload:
//!
//! ```text
//! 0x00  4   "ARBR" magic
//! 0x04  1   version (u8) = 1
//! 0x05  1   type: 1=blob, 2=tree, 3=commit
//! 0x06  1   algo: 1=blake3-256
//! 0x07  1   compression: 0=none, 1=zstd
//! 0x08  8   payload_len (u64 LE) - stored (possibly compressed) size
//! 0x10  ... payload
//! ```
//!
//! The header is storage framing only. An object's identity is the checksum
//! of its type byte followed by the uncompressed payload.

use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::hash::{Algorithm, Checksum};
use crate::tree::{self, TreeEntry};

/// Magic bytes at the start of every object file.
pub const MAGIC: &[u8; 4] = b"ARBR";

/// Current object format version.
pub const VERSION: u8 = 1;

/// Size of the object header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// A blob (file content, symlink target or device number).
    Blob = 1,
    /// A tree (directory structure).
    Tree = 2,
    /// A commit (root tree, parent and metadata).
    Commit = 3,
}

impl ObjectType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ObjectType::Blob),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Commit),
            _ => Err(Error::invalid_object_type(
                "blob, tree or commit",
                format!("type byte {}", value),
            )),
        }
    }

    /// Get the string name of this object type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
        }
    }
}

/// Compression types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// No compression.
    None = 0,
    /// Zstandard compression.
    Zstd = 1,
}

impl CompressionType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zstd),
            _ => Err(Error::compression_error(format!(
                "Invalid compression type: {}",
                value
            ))),
        }
    }
}

/// A 16-byte object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Object format version.
    pub version: u8,
    /// Object type (blob, tree or commit).
    pub object_type: ObjectType,
    /// Hash algorithm used.
    pub algorithm: Algorithm,
    /// Compression applied to the stored payload.
    pub compression: CompressionType,
    /// Length of the stored payload in bytes.
    pub payload_len: u64,
}

impl ObjectHeader {
    /// Create a new object header.
    pub fn new(
        object_type: ObjectType,
        algorithm: Algorithm,
        compression: CompressionType,
        payload_len: u64,
    ) -> Self {
        Self {
            version: VERSION,
            object_type,
            algorithm,
            compression,
            payload_len,
        }
    }

    /// Encode the header to a 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[5] = self.object_type.to_u8();
        buf[6] = self.algorithm.id();
        buf[7] = self.compression.to_u8();
        buf[8..16].copy_from_slice(&self.payload_len.to_le_bytes());

        buf
    }

    /// Decode a header from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::invalid_object_type(
                "object header",
                format!("{} bytes (expected {})", buf.len(), HEADER_SIZE),
            ));
        }

        if &buf[0..4] != MAGIC {
            return Err(Error::invalid_object_type(
                "object header",
                format!("magic {:?}", &buf[0..4]),
            ));
        }

        let version = buf[4];
        if version != VERSION {
            return Err(Error::invalid_object_type(
                "object header",
                format!("version {} (expected {})", version, VERSION),
            ));
        }

        let object_type = ObjectType::from_u8(buf[5])?;
        let algorithm = Algorithm::from_id(buf[6])?;
        let compression = CompressionType::from_u8(buf[7])?;

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes);

        Ok(Self {
            version,
            object_type,
            algorithm,
            compression,
            payload_len,
        })
    }
}

/// A decoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// Raw content.
    Blob(Vec<u8>),
    /// Directory entries, in canonical order once encoded.
    Tree(Vec<TreeEntry>),
    /// A commit.
    Commit(Commit),
}

impl Object {
    /// The type tag of this object.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Blob(_) => ObjectType::Blob,
            Object::Tree(_) => ObjectType::Tree,
            Object::Commit(_) => ObjectType::Commit,
        }
    }

    /// Canonical (uncompressed) payload bytes.
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Object::Blob(data) => data.clone(),
            Object::Tree(entries) => tree::encode_tree(entries.clone()),
            Object::Commit(commit) => commit.encode(),
        }
    }

    /// Decode a payload of the given type.
    pub fn decode_payload(object_type: ObjectType, payload: Vec<u8>) -> Result<Self> {
        match object_type {
            ObjectType::Blob => Ok(Object::Blob(payload)),
            ObjectType::Tree => Ok(Object::Tree(tree::decode_tree(&payload)?)),
            ObjectType::Commit => Ok(Object::Commit(Commit::decode(&payload)?)),
        }
    }

    /// The object's checksum.
    pub fn checksum(&self) -> Checksum {
        Checksum::of_object(self.object_type(), &self.encode_payload())
    }
}
