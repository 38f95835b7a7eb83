//! Tar archive ingestion.

use crate::cancel::Cancellable;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::mtree::{MutableTree, Node};
use crate::store::Store;
use crate::tree::{EntryType, FileMode, Xattrs, file_modes};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path};
use tracing::debug;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

/// Compression wrapped around a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCompression {
    None,
    Gzip,
    Zstd,
}

impl ArchiveCompression {
    /// Detect compression from the first bytes of a file.
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(ZSTD_MAGIC) {
            ArchiveCompression::Zstd
        } else if head.starts_with(GZIP_MAGIC) {
            ArchiveCompression::Gzip
        } else {
            ArchiveCompression::None
        }
    }
}

impl Store {
    /// Ingest a tar archive and return the root tree checksum.
    pub(crate) fn ingest_archive(
        &self,
        path: &Path,
        auto_create_parents: bool,
        cancel: &Cancellable,
    ) -> Result<Checksum> {
        let spec = format!("tar={}", path.display());
        let unreadable = |e: std::io::Error| Error::source_unreadable(spec.clone(), e);

        let file = File::open(path).map_err(unreadable)?;
        let mut reader = BufReader::new(file);
        let compression = ArchiveCompression::detect(reader.fill_buf().map_err(unreadable)?);

        let stream: Box<dyn Read> = match compression {
            ArchiveCompression::None => Box::new(reader),
            ArchiveCompression::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(reader)),
            ArchiveCompression::Zstd => Box::new(
                zstd::stream::read::Decoder::with_buffer(reader).map_err(unreadable)?,
            ),
        };

        debug!(archive = %path.display(), ?compression, "reading archive");

        let mut archive = tar::Archive::new(stream);
        let mut tree = MutableTree::new();

        for entry in archive.entries().map_err(unreadable)? {
            self.check_cancelled(cancel)?;

            let mut entry = entry.map_err(unreadable)?;
            let raw_path = entry.path().map_err(unreadable)?.into_owned();
            let Some(entry_path) = normalize_path(&raw_path)? else {
                // The archive root itself
                continue;
            };

            let xattrs = pax_xattrs(&mut entry, &entry_path).map_err(|e| match e {
                Error::Io { source } => unreadable(source),
                other => other,
            })?;

            let header = entry.header();
            let mode = header.mode().map_err(unreadable)?;
            let entry_type = header.entry_type();

            let node = match entry_type {
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    let mut data = Vec::new();
                    entry.read_to_end(&mut data).map_err(unreadable)?;
                    Node::leaf(
                        EntryType::Blob,
                        file_modes::with_type(file_modes::S_IFREG, mode),
                        self.put_blob(&data[..])?,
                    )
                }
                tar::EntryType::Directory => {
                    Node::dir(file_modes::with_type(file_modes::S_IFDIR, mode))
                }
                tar::EntryType::Symlink => {
                    let target = entry
                        .link_name_bytes()
                        .ok_or_else(|| Error::encoding(&entry_path, "Symlink without target"))?
                        .into_owned();
                    Node::leaf(EntryType::Symlink, file_modes::SYMLINK, self.put_blob(&target[..])?)
                }
                tar::EntryType::Link => {
                    let target = entry
                        .link_name()
                        .map_err(unreadable)?
                        .ok_or_else(|| Error::encoding(&entry_path, "Hard link without target"))?;
                    let target = normalize_path(&target)?
                        .ok_or_else(|| Error::encoding(&entry_path, "Hard link to archive root"))?;

                    match tree.get(&target) {
                        Some(node @ Node::Leaf { .. }) => node.clone(),
                        Some(Node::Dir { .. }) => {
                            return Err(Error::encoding(
                                &entry_path,
                                format!("Hard link to directory '{}'", target),
                            ));
                        }
                        None => {
                            return Err(Error::encoding(
                                &entry_path,
                                format!("Hard link to unknown entry '{}'", target),
                            ));
                        }
                    }
                }
                tar::EntryType::Fifo => self.special_node(file_modes::S_IFIFO, mode, 0)?,
                tar::EntryType::Char | tar::EntryType::Block => {
                    let major = header.device_major().map_err(unreadable)?.unwrap_or(0);
                    let minor = header.device_minor().map_err(unreadable)?.unwrap_or(0);
                    let type_bits = if entry_type == tar::EntryType::Char {
                        file_modes::S_IFCHR
                    } else {
                        file_modes::S_IFBLK
                    };
                    self.special_node(type_bits, mode, makedev(major, minor))?
                }
                tar::EntryType::XGlobalHeader => continue,
                other => {
                    return Err(Error::encoding(
                        &entry_path,
                        format!("Unsupported tar entry type: {:?}", other),
                    ));
                }
            };

            // Hard links share the target's inode and so its xattrs
            let node = if entry_type == tar::EntryType::Link && xattrs.is_empty() {
                node
            } else {
                node.with_xattrs(xattrs)
            };

            debug!(path = %entry_path, kind = ?entry_type, "archive entry");
            tree.insert(&entry_path, node, auto_create_parents)?;
        }

        tree.write(self)
    }

    fn special_node(&self, type_bits: FileMode, mode: FileMode, device: u64) -> Result<Node> {
        Ok(Node::leaf(
            EntryType::Special,
            file_modes::with_type(type_bits, mode),
            self.put_blob(&device.to_le_bytes()[..])?,
        ))
    }
}

/// Collect `SCHILY.xattr.*` records from an entry's PAX extended header.
fn pax_xattrs<R: Read>(entry: &mut tar::Entry<'_, R>, path: &str) -> Result<Xattrs> {
    let mut xattrs = Xattrs::new();
    let Some(extensions) = entry.pax_extensions()? else {
        return Ok(xattrs);
    };

    for extension in extensions {
        let extension = extension?;
        let key = extension
            .key()
            .map_err(|_| Error::encoding(path, "PAX key is not valid UTF-8"))?;
        if let Some(name) = key.strip_prefix(PAX_XATTR_PREFIX) {
            xattrs.insert(name.to_string(), extension.value_bytes().to_vec());
        }
    }

    Ok(xattrs)
}

/// Normalize an archive path to `/`-separated components.
///
/// Strips `./` and leading `/`. Returns `None` for the archive root.
fn normalize_path(path: &Path) -> Result<Option<String>> {
    let mut parts = Vec::new();

    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str().ok_or_else(|| {
                Error::encoding(path.display().to_string(), "Name is not valid UTF-8")
            })?),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                return Err(Error::encoding(
                    path.display().to_string(),
                    "Path escapes the archive root",
                ));
            }
            Component::Prefix(_) => {
                return Err(Error::encoding(
                    path.display().to_string(),
                    "Path has a drive prefix",
                ));
            }
        }
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// Combine device numbers the way Linux `makedev` does.
fn makedev(major: u32, minor: u32) -> u64 {
    let (major, minor) = (major as u64, minor as u64);
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use crate::object::ObjectType;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Builds tar archives with raw header names so invalid paths can be
    /// written too.
    struct TarFixture {
        builder: tar::Builder<Vec<u8>>,
    }

    impl TarFixture {
        fn new() -> Self {
            Self {
                builder: tar::Builder::new(Vec::new()),
            }
        }

        fn entry(mut self, name: &str, kind: tar::EntryType, mode: u32, data: &[u8]) -> Self {
            self.append(name, kind, mode, data, None);
            self
        }

        fn dir(self, name: &str) -> Self {
            self.entry(name, tar::EntryType::Directory, 0o755, b"")
        }

        fn file(self, name: &str, data: &[u8]) -> Self {
            self.entry(name, tar::EntryType::Regular, 0o644, data)
        }

        /// Attach PAX records to the next entry.
        fn pax(mut self, records: &[(&str, &[u8])]) -> Self {
            let mut data = Vec::new();
            for (key, value) in records {
                let body = key.len() + value.len() + 3;
                // The length prefix counts its own digits
                let mut len = body;
                while len != body + len.to_string().len() {
                    len = body + len.to_string().len();
                }
                data.extend_from_slice(format!("{} {}=", len, key).as_bytes());
                data.extend_from_slice(value);
                data.push(b'\n');
            }
            self.append("PaxHeader", tar::EntryType::XHeader, 0o644, &data, None);
            self
        }

        fn link(mut self, name: &str, kind: tar::EntryType, target: &str) -> Self {
            self.append(name, kind, 0o777, b"", Some(target));
            self
        }

        fn append(
            &mut self,
            name: &str,
            kind: tar::EntryType,
            mode: u32,
            data: &[u8],
            target: Option<&str>,
        ) {
            let mut header = tar::Header::new_gnu();
            header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
            header.set_entry_type(kind);
            header.set_mode(mode);
            header.set_size(data.len() as u64);
            if let Some(target) = target {
                header.set_link_name(target).unwrap();
            }
            header.set_cksum();
            self.builder.append(&header, data).unwrap();
        }

        fn write(self, dir: &Path, name: &str) -> PathBuf {
            let bytes = self.builder.into_inner().unwrap();
            let path = dir.join(name);
            fs::write(&path, bytes).unwrap();
            path
        }
    }

    fn setup() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path().join("store"), Algorithm::Blake3).unwrap();
        store.begin_transaction().unwrap();
        (temp_dir, store)
    }

    fn paths(store: &Store, root: &Checksum) -> Vec<String> {
        store
            .walk_tree(root)
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    }

    #[test]
    fn test_detect_compression() {
        assert_eq!(ArchiveCompression::detect(&[0x1f, 0x8b, 8, 0]), ArchiveCompression::Gzip);
        assert_eq!(
            ArchiveCompression::detect(&[0x28, 0xb5, 0x2f, 0xfd, 0]),
            ArchiveCompression::Zstd
        );
        assert_eq!(ArchiveCompression::detect(b"usr/"), ArchiveCompression::None);
        assert_eq!(ArchiveCompression::detect(&[]), ArchiveCompression::None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("./a/b")).unwrap(), Some("a/b".into()));
        assert_eq!(normalize_path(Path::new("/a/./b/")).unwrap(), Some("a/b".into()));
        assert_eq!(normalize_path(Path::new("./")).unwrap(), None);
        assert!(normalize_path(Path::new("a/../b")).is_err());
    }

    #[test]
    fn test_makedev() {
        assert_eq!(makedev(1, 3), 0x103);
        assert_eq!(makedev(8, 1), 0x801);
        assert_eq!(makedev(259, 0x1_0000), (0x1_0000 << 12) | (0x103 << 8));
    }

    #[test]
    fn test_ingest_plain_archive() {
        let (temp_dir, store) = setup();
        let archive = TarFixture::new()
            .dir("./")
            .dir("./etc/")
            .file("./etc/hostname", b"arbor\n")
            .entry("./etc/run.sh", tar::EntryType::Regular, 0o755, b"#!/bin/sh\n")
            .write(temp_dir.path(), "root.tar");

        let root = store
            .ingest_archive(&archive, false, &Cancellable::new())
            .unwrap();
        assert_eq!(paths(&store, &root), vec!["etc", "etc/hostname", "etc/run.sh"]);

        let listing = store.walk_tree(&root).unwrap();
        assert_eq!(listing[1].1.mode, 0o100644);
        assert_eq!(listing[2].1.mode, 0o100755);
        assert_eq!(
            listing[1].1.checksum,
            Checksum::of_object(ObjectType::Blob, b"arbor\n")
        );
    }

    #[test]
    fn test_missing_parent_directory() {
        let (temp_dir, store) = setup();
        let archive = TarFixture::new()
            .file("a/b/c", b"deep")
            .write(temp_dir.path(), "orphan.tar");

        let err = store
            .ingest_archive(&archive, false, &Cancellable::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingParentDirectory { ref path, ref parent } if path == "a/b/c" && parent == "a"
        ));

        let root = store
            .ingest_archive(&archive, true, &Cancellable::new())
            .unwrap();
        let listing = store.walk_tree(&root).unwrap();
        let entries: Vec<_> = listing
            .iter()
            .map(|(path, entry)| (path.as_str(), entry.entry_type, entry.mode))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("a", EntryType::Tree, file_modes::DIRECTORY),
                ("a/b", EntryType::Tree, file_modes::DIRECTORY),
                ("a/b/c", EntryType::Blob, 0o100644),
            ]
        );
    }

    #[test]
    fn test_links_and_specials() {
        let (temp_dir, store) = setup();
        let archive = TarFixture::new()
            .dir("bin")
            .file("bin/busybox", b"binary")
            .link("bin/sh", tar::EntryType::Link, "bin/busybox")
            .link("bin/ash", tar::EntryType::Symlink, "busybox")
            .entry("fifo", tar::EntryType::Fifo, 0o600, b"")
            .write(temp_dir.path(), "links.tar");

        let root = store
            .ingest_archive(&archive, false, &Cancellable::new())
            .unwrap();
        let listing = store.walk_tree(&root).unwrap();
        let find = |p: &str| listing.iter().find(|(path, _)| path == p).unwrap().1.clone();

        assert_eq!(find("bin/sh"), {
            let mut busybox = find("bin/busybox");
            busybox.name = "sh".to_string();
            busybox
        });

        let ash = find("bin/ash");
        assert_eq!(ash.entry_type, EntryType::Symlink);
        assert_eq!(store.get_blob(&ash.checksum).unwrap(), b"busybox");

        let fifo = find("fifo");
        assert_eq!(fifo.entry_type, EntryType::Special);
        assert_eq!(fifo.mode, 0o010600);
        assert_eq!(store.get_blob(&fifo.checksum).unwrap(), 0u64.to_le_bytes());
    }

    #[test]
    fn test_pax_xattrs_are_captured() {
        let (temp_dir, store) = setup();
        let plain = TarFixture::new()
            .file("f", b"x")
            .write(temp_dir.path(), "plain.tar");
        let labelled = TarFixture::new()
            .pax(&[
                ("SCHILY.xattr.user.selinux", &b"ctx"[..]),
                ("SCHILY.xattr.security.capability", &[1, 0, 0, 2][..]),
                ("mtime", &b"1700000000"[..]),
            ])
            .file("f", b"x")
            .link("g", tar::EntryType::Link, "f")
            .write(temp_dir.path(), "labelled.tar");

        let cancel = Cancellable::new();
        let plain_root = store.ingest_archive(&plain, false, &cancel).unwrap();
        let labelled_root = store.ingest_archive(&labelled, false, &cancel).unwrap();
        assert_ne!(plain_root, labelled_root);

        let tree = store.get_tree(&labelled_root).unwrap();
        let keys: Vec<_> = tree[0].xattrs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["security.capability", "user.selinux"]);
        assert_eq!(tree[0].xattrs["user.selinux"], b"ctx");
        // The hard link inherits the target's attributes
        assert_eq!(tree[1].xattrs, tree[0].xattrs);
        assert_eq!(tree[0].checksum, store.get_tree(&plain_root).unwrap()[0].checksum);
    }

    #[test]
    fn test_deeply_nested_archive() {
        let (temp_dir, store) = setup();
        let depth = 2047;

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(4);
        builder
            .append_data(&mut header, format!("{}f", "d/".repeat(depth)), &b"deep"[..])
            .unwrap();
        let archive = temp_dir.path().join("deep.tar");
        fs::write(&archive, builder.into_inner().unwrap()).unwrap();

        let listing = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let root = store
                    .ingest_archive(&archive, true, &Cancellable::new())
                    .unwrap();
                store.walk_tree(&root).unwrap()
            })
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(listing.len(), depth + 1);
        assert_eq!(listing[depth].0.len(), depth * 2 + 1);
    }

    #[test]
    fn test_hard_link_to_missing_entry() {
        let (temp_dir, store) = setup();
        let archive = TarFixture::new()
            .link("sh", tar::EntryType::Link, "busybox")
            .write(temp_dir.path(), "dangling.tar");

        let err = store
            .ingest_archive(&archive, false, &Cancellable::new())
            .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }

    #[test]
    fn test_parent_escape_is_rejected() {
        let (temp_dir, store) = setup();
        let archive = TarFixture::new()
            .file("../evil", b"x")
            .write(temp_dir.path(), "evil.tar");

        let err = store
            .ingest_archive(&archive, true, &Cancellable::new())
            .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }

    #[test]
    fn test_later_entries_override() {
        let (temp_dir, store) = setup();
        let archive = TarFixture::new()
            .file("f", b"first")
            .file("f", b"second")
            .write(temp_dir.path(), "dup.tar");

        let root = store
            .ingest_archive(&archive, false, &Cancellable::new())
            .unwrap();
        let tree = store.get_tree(&root).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(store.get_blob(&tree[0].checksum).unwrap(), b"second");
    }

    #[test]
    fn test_compressed_archives() {
        let (temp_dir, store) = setup();
        let plain = TarFixture::new()
            .file("file", b"payload")
            .write(temp_dir.path(), "plain.tar");
        let bytes = fs::read(&plain).unwrap();

        let gz_path = temp_dir.path().join("root.tar.gz");
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&bytes).unwrap();
        fs::write(&gz_path, gz.finish().unwrap()).unwrap();

        let zst_path = temp_dir.path().join("root.tar.zst");
        fs::write(&zst_path, zstd::encode_all(&bytes[..], 3).unwrap()).unwrap();

        let cancel = Cancellable::new();
        let expected = store.ingest_archive(&plain, false, &cancel).unwrap();
        assert_eq!(store.ingest_archive(&gz_path, false, &cancel).unwrap(), expected);
        assert_eq!(store.ingest_archive(&zst_path, false, &cancel).unwrap(), expected);
    }

    #[test]
    fn test_unreadable_archive() {
        let (temp_dir, store) = setup();

        let err = store
            .ingest_archive(&temp_dir.path().join("missing.tar"), false, &Cancellable::new())
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnreadable { .. }));
    }
}
