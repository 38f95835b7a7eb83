//! Tree encoding and directory structure.

use crate::error::{Error, Result};
use crate::hash::{CHECKSUM_SIZE, Checksum};
use std::collections::BTreeMap;
use std::io::Read;

/// Longest entry or xattr name, in bytes.
const MAX_NAME_LEN: usize = 255;

/// Extended attributes of an entry, sorted by name.
pub type Xattrs = BTreeMap<String, Vec<u8>>;

/// Entry type in a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryType {
    /// A blob (regular file).
    Blob = 1,
    /// A subtree (directory).
    Tree = 2,
    /// A symbolic link; its blob holds the link target.
    Symlink = 3,
    /// A FIFO or device node; its blob holds the device number.
    Special = 4,
}

impl EntryType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryType::Blob),
            2 => Ok(EntryType::Tree),
            3 => Ok(EntryType::Symlink),
            4 => Ok(EntryType::Special),
            _ => Err(Error::encoding(
                "<tree>",
                format!("Invalid entry type: {}", value),
            )),
        }
    }

    /// Short name used in listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Blob => "blob",
            EntryType::Tree => "tree",
            EntryType::Symlink => "symlink",
            EntryType::Special => "special",
        }
    }
}

/// File mode (POSIX `st_mode`, file type bits included).
pub type FileMode = u32;

/// Common file modes.
pub mod file_modes {
    use super::FileMode;

    /// Mask for the file type bits.
    pub const TYPE_MASK: FileMode = 0o170000;

    /// Mask for permission bits (including setuid/setgid/sticky).
    pub const PERM_MASK: FileMode = 0o7777;

    /// Regular file type bits.
    pub const S_IFREG: FileMode = 0o100000;

    /// Directory type bits.
    pub const S_IFDIR: FileMode = 0o040000;

    /// Symlink type bits.
    pub const S_IFLNK: FileMode = 0o120000;

    /// FIFO type bits.
    pub const S_IFIFO: FileMode = 0o010000;

    /// Character device type bits.
    pub const S_IFCHR: FileMode = 0o020000;

    /// Block device type bits.
    pub const S_IFBLK: FileMode = 0o060000;

    /// Regular file (non-executable).
    pub const REGULAR: FileMode = 0o100644;

    /// Executable file.
    pub const EXECUTABLE: FileMode = 0o100755;

    /// Directory.
    pub const DIRECTORY: FileMode = 0o040755;

    /// Symlink.
    pub const SYMLINK: FileMode = 0o120777;

    /// Combine type bits with the permission bits of `mode`.
    pub fn with_type(type_bits: FileMode, mode: FileMode) -> FileMode {
        type_bits | (mode & PERM_MASK)
    }
}

/// An entry in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Kind of entry.
    pub entry_type: EntryType,
    /// POSIX file mode.
    pub mode: FileMode,
    /// Checksum of the referenced object.
    pub checksum: Checksum,
    /// Name of the entry (UTF-8).
    pub name: String,
    /// Extended attributes, part of the entry's identity.
    pub xattrs: Xattrs,
}

impl TreeEntry {
    /// Create a new tree entry without extended attributes, validating the
    /// name.
    pub fn new(
        entry_type: EntryType,
        mode: FileMode,
        checksum: Checksum,
        name: String,
    ) -> Result<Self> {
        let entry = Self {
            entry_type,
            mode,
            checksum,
            name,
            xattrs: Xattrs::new(),
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Replace the extended attributes.
    pub fn with_xattrs(mut self, xattrs: Xattrs) -> Result<Self> {
        self.xattrs = xattrs;
        self.validate()?;
        Ok(self)
    }

    /// Check that the entry can be encoded canonically.
    ///
    /// Fields are public, so entries built by hand are checked again
    /// before they are stored.
    pub fn validate(&self) -> Result<()> {
        let name = &self.name;

        if name.is_empty() {
            return Err(Error::encoding(name.clone(), "Name cannot be empty"));
        }

        if name.len() > MAX_NAME_LEN {
            return Err(Error::encoding(
                name.clone(),
                format!("Name too long: {} bytes (max {})", name.len(), MAX_NAME_LEN),
            ));
        }

        if name.contains('\0') {
            return Err(Error::encoding(name.clone(), "Name cannot contain null bytes"));
        }

        if name.contains('/') || name == "." || name == ".." {
            return Err(Error::encoding(
                name.clone(),
                "Name must be a single path component",
            ));
        }

        if self.xattrs.len() > u16::MAX as usize {
            return Err(Error::encoding(
                name.clone(),
                format!("Too many extended attributes: {}", self.xattrs.len()),
            ));
        }

        for (key, value) in &self.xattrs {
            if key.is_empty() || key.len() > MAX_NAME_LEN || key.contains('\0') {
                return Err(Error::encoding(
                    name.clone(),
                    format!("Invalid extended attribute name: {:?}", key),
                ));
            }
            if value.len() > u32::MAX as usize {
                return Err(Error::encoding(
                    name.clone(),
                    format!("Extended attribute {} is too large", key),
                ));
            }
        }

        Ok(())
    }

    /// Whether this entry is a subtree.
    pub fn is_tree(&self) -> bool {
        self.entry_type == EntryType::Tree
    }

    /// Encode the entry to bytes.
    ///
    /// Format:
    /// - 1 byte: type (1=blob, 2=tree, 3=symlink, 4=special)
    /// - 4 bytes: mode (u32 LE)
    /// - 32 bytes: checksum
    /// - 1 byte: name_len
    /// - N bytes: name (UTF-8)
    /// - 2 bytes: xattr count (u16 LE), then per xattr in name order:
    ///   1 byte name_len, name, 4 bytes value_len (u32 LE), value
    ///
    /// The entry must pass [`TreeEntry::validate`].
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 4 + CHECKSUM_SIZE + 1 + self.name.len() + 2);

        buf.push(self.entry_type.to_u8());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(self.checksum.as_bytes());
        buf.push(self.name.len() as u8);
        buf.extend_from_slice(self.name.as_bytes());

        buf.extend_from_slice(&(self.xattrs.len() as u16).to_le_bytes());
        for (key, value) in &self.xattrs {
            buf.push(key.len() as u8);
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }

        buf
    }

    /// Decode an entry from a reader.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut type_buf = [0u8; 1];
        reader.read_exact(&mut type_buf)?;
        let entry_type = EntryType::from_u8(type_buf[0])?;

        let mut mode_buf = [0u8; 4];
        reader.read_exact(&mut mode_buf)?;
        let mode = u32::from_le_bytes(mode_buf);

        let mut checksum_buf = [0u8; CHECKSUM_SIZE];
        reader.read_exact(&mut checksum_buf)?;
        let checksum = Checksum::from_bytes(checksum_buf);

        let mut name_len_buf = [0u8; 1];
        reader.read_exact(&mut name_len_buf)?;
        let name_len = name_len_buf[0] as usize;

        if name_len == 0 {
            return Err(Error::encoding("<tree>", "Name length is zero"));
        }

        let mut name_buf = vec![0u8; name_len];
        reader.read_exact(&mut name_buf)?;
        let name = String::from_utf8(name_buf)
            .map_err(|e| Error::encoding("<tree>", format!("Invalid UTF-8 in name: {}", e)))?;

        let mut count_buf = [0u8; 2];
        reader.read_exact(&mut count_buf)?;
        let count = u16::from_le_bytes(count_buf);

        let mut xattrs = Xattrs::new();
        let mut previous: Option<String> = None;
        for _ in 0..count {
            let mut key_len_buf = [0u8; 1];
            reader.read_exact(&mut key_len_buf)?;
            let mut key_buf = vec![0u8; key_len_buf[0] as usize];
            reader.read_exact(&mut key_buf)?;
            let key = String::from_utf8(key_buf).map_err(|e| {
                Error::encoding(name.clone(), format!("Invalid UTF-8 in xattr name: {}", e))
            })?;

            // Strictly increasing names keep the encoding canonical
            if previous.as_ref().is_some_and(|p| p.as_bytes() >= key.as_bytes()) {
                return Err(Error::encoding(name, "Extended attributes out of order"));
            }

            let mut value_len_buf = [0u8; 4];
            reader.read_exact(&mut value_len_buf)?;
            let value_len = u32::from_le_bytes(value_len_buf) as u64;

            // Bounded read: a corrupt length must not drive the allocation
            let mut value = Vec::new();
            reader.by_ref().take(value_len).read_to_end(&mut value)?;
            if value.len() as u64 != value_len {
                return Err(Error::encoding(name, "Truncated extended attribute value"));
            }

            previous = Some(key.clone());
            xattrs.insert(key, value);
        }

        Self::new(entry_type, mode, checksum, name)?.with_xattrs(xattrs)
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    /// Compare by name (bytewise UTF-8) for canonical ordering, then by the
    /// remaining fields so that ordering agrees with equality.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .as_bytes()
            .cmp(other.name.as_bytes())
            .then_with(|| self.entry_type.cmp(&other.entry_type))
            .then_with(|| self.mode.cmp(&other.mode))
            .then_with(|| self.checksum.cmp(&other.checksum))
            .then_with(|| self.xattrs.cmp(&other.xattrs))
    }
}

/// Encode a list of tree entries (sorted by name).
pub fn encode_tree(mut entries: Vec<TreeEntry>) -> Vec<u8> {
    entries.sort();

    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&entry.encode());
    }
    buf
}

/// Decode a list of tree entries from bytes.
pub fn decode_tree(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut reader = std::io::Cursor::new(data);
    let mut entries = Vec::new();

    while reader.position() < data.len() as u64 {
        let entry = TreeEntry::decode(&mut reader)?;
        entries.push(entry);
    }

    Ok(entries)
}
