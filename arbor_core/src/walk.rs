//! Directory ingestion.

use crate::cancel::Cancellable;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::store::Store;
use crate::tree::{EntryType, FileMode, TreeEntry, Xattrs, file_modes};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

impl Store {
    /// Ingest a live directory as a tree and return the root tree checksum.
    ///
    /// Entries are visited in bytewise name order. Symlinks are recorded,
    /// never followed. Hidden files are included and ignore files are not
    /// consulted. Extended attributes are captured with each entry.
    pub(crate) fn ingest_directory(&self, root: &Path, cancel: &Cancellable) -> Result<Checksum> {
        let spec = root.display().to_string();

        let metadata =
            fs::metadata(root).map_err(|e| Error::source_unreadable(spec.clone(), e))?;
        if !metadata.is_dir() {
            return Err(Error::source_unreadable(spec, "not a directory"));
        }

        self.add_directory(root, &spec, cancel)
    }

    /// Add a directory recursively as a tree.
    fn add_directory(&self, path: &Path, spec: &str, cancel: &Cancellable) -> Result<Checksum> {
        let mut entries = Vec::new();

        let walker = ignore::WalkBuilder::new(path)
            .max_depth(Some(1)) // Only immediate children
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.as_encoded_bytes().cmp(b.as_encoded_bytes()))
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| Error::source_unreadable(spec, e))?;
            let entry_path = entry.path();

            // Skip the directory itself
            if entry.depth() == 0 {
                continue;
            }

            self.check_cancelled(cancel)?;

            let file_name = entry_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    Error::encoding(entry_path.display().to_string(), "Name is not valid UTF-8")
                })?
                .to_string();

            let metadata = fs::symlink_metadata(entry_path)
                .map_err(|e| Error::source_unreadable(spec, e))?;
            let file_type = metadata.file_type();
            let mode = get_file_mode(&metadata);

            let tree_entry = if file_type.is_symlink() {
                let target = fs::read_link(entry_path)
                    .map_err(|e| Error::source_unreadable(spec, e))?;
                let checksum = self.put_blob(target.as_os_str().as_encoded_bytes())?;
                TreeEntry::new(EntryType::Symlink, file_modes::SYMLINK, checksum, file_name)?
            } else if file_type.is_file() {
                let file =
                    fs::File::open(entry_path).map_err(|e| Error::source_unreadable(spec, e))?;
                let checksum = self.put_blob(file)?;
                TreeEntry::new(
                    EntryType::Blob,
                    file_modes::with_type(file_modes::S_IFREG, mode),
                    checksum,
                    file_name,
                )?
            } else if file_type.is_dir() {
                let checksum = self.add_directory(entry_path, spec, cancel)?;
                TreeEntry::new(
                    EntryType::Tree,
                    file_modes::with_type(file_modes::S_IFDIR, mode),
                    checksum,
                    file_name,
                )?
            } else {
                let (type_bits, device) = special_file(&metadata).ok_or_else(|| {
                    Error::encoding(
                        entry_path.display().to_string(),
                        "Unsupported file type (socket or unknown)",
                    )
                })?;
                let checksum = self.put_blob(&device.to_le_bytes()[..])?;
                TreeEntry::new(
                    EntryType::Special,
                    file_modes::with_type(type_bits, mode),
                    checksum,
                    file_name,
                )?
            };

            let xattrs = read_xattrs(entry_path, spec)?;
            let tree_entry = tree_entry.with_xattrs(xattrs)?;

            debug!(
                path = %entry_path.display(),
                kind = tree_entry.entry_type.as_str(),
                xattrs = tree_entry.xattrs.len(),
                "ingested entry"
            );
            entries.push(tree_entry);
        }

        self.put_tree(entries)
    }
}

/// Linux `EOPNOTSUPP`: the filesystem has no extended attribute support.
const EOPNOTSUPP: i32 = 95;

/// Read the extended attributes of `path` without following symlinks.
///
/// Platforms and filesystems without xattr support yield an empty set.
fn read_xattrs(path: &Path, spec: &str) -> Result<Xattrs> {
    let mut xattrs = Xattrs::new();
    if !xattr::SUPPORTED_PLATFORM {
        return Ok(xattrs);
    }

    let unsupported = |e: &io::Error| {
        e.kind() == io::ErrorKind::Unsupported || e.raw_os_error() == Some(EOPNOTSUPP)
    };

    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(e) if unsupported(&e) => return Ok(xattrs),
        Err(e) => return Err(Error::source_unreadable(spec, e)),
    };

    for name in names {
        let key = name.to_str().ok_or_else(|| {
            Error::encoding(
                path.display().to_string(),
                "Extended attribute name is not valid UTF-8",
            )
        })?;

        // None when removed between list and get
        let value = xattr::get(path, &name).map_err(|e| Error::source_unreadable(spec, e))?;
        if let Some(value) = value {
            xattrs.insert(key.to_string(), value);
        }
    }

    Ok(xattrs)
}

/// Get the file mode (permissions) from metadata.
#[cfg(unix)]
fn get_file_mode(metadata: &fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & file_modes::PERM_MASK
}

/// Get the file mode (permissions) from metadata (Windows fallback).
#[cfg(not(unix))]
fn get_file_mode(metadata: &fs::Metadata) -> FileMode {
    if metadata.is_dir() {
        file_modes::DIRECTORY & file_modes::PERM_MASK
    } else {
        file_modes::REGULAR & file_modes::PERM_MASK
    }
}

/// Type bits and device number of a FIFO or device node.
#[cfg(unix)]
fn special_file(metadata: &fs::Metadata) -> Option<(FileMode, u64)> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let file_type = metadata.file_type();
    if file_type.is_fifo() {
        Some((file_modes::S_IFIFO, 0))
    } else if file_type.is_char_device() {
        Some((file_modes::S_IFCHR, metadata.rdev()))
    } else if file_type.is_block_device() {
        Some((file_modes::S_IFBLK, metadata.rdev()))
    } else {
        None
    }
}

#[cfg(not(unix))]
fn special_file(_metadata: &fs::Metadata) -> Option<(FileMode, u64)> {
    None
}
