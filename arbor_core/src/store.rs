//! Store management and object I/O.

use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::hash::{Algorithm, Checksum};
use crate::journal::Journal;
use crate::object::{CompressionType, HEADER_SIZE, Object, ObjectHeader, ObjectType};
use crate::refs::RefManager;
use crate::transaction::TransactionState;
use crate::tree::{self, TreeEntry};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Default compression threshold: blobs >= 4KB are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

/// Settings read from the store's `config` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Hash algorithm for object identities.
    pub algorithm: Algorithm,
    /// Blobs at or above this size are zstd-compressed on disk.
    pub compression_threshold: usize,
}

impl StoreConfig {
    /// Parse `key=value` lines. Unknown keys are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut version = None;
        let mut algo = None;
        let mut threshold = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    "compression_threshold" => threshold = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::invalid_store(
                "config",
                format!("Unsupported config version: {:?}", version),
            ));
        }

        let algo_str = algo.ok_or_else(|| Error::invalid_store("config", "Missing algo"))?;
        let algorithm = Algorithm::parse(algo_str)?;

        let compression_threshold = match threshold {
            Some(value) => value.parse::<usize>().map_err(|_| {
                Error::invalid_store(
                    "config",
                    format!("Invalid compression_threshold: {}", value),
                )
            })?,
            None => DEFAULT_COMPRESSION_THRESHOLD,
        };

        Ok(Self {
            algorithm,
            compression_threshold,
        })
    }

    /// Render as config file content.
    pub fn render(&self) -> String {
        format!(
            "version=1\nalgo={}\ncompression_threshold={}\n",
            self.algorithm.as_str(),
            self.compression_threshold
        )
    }
}

/// A content-addressed commit store.
///
/// One handle carries at most one open transaction. Dropping the handle
/// drops any transaction state with it; no ref is touched.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    config: StoreConfig,
    journal: Journal,
    pub(crate) txn: Mutex<Option<TransactionState>>,
}

impl Store {
    /// Initialize a new store at the given path.
    ///
    /// Creates the directory structure:
    /// - `objects/blake3-256/` for storing objects
    /// - `refs/heads/` for branch references
    /// - `config` file with version and algorithm
    /// - `journal` file recording ref updates
    pub fn init<P: AsRef<Path>>(root: P, algorithm: Algorithm) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let config = StoreConfig {
            algorithm,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        };

        fs::create_dir_all(root.join("objects").join(algorithm.as_str()))?;
        fs::create_dir_all(root.join("refs").join("heads"))?;
        fs::write(root.join("config"), config.render())?;

        let journal = Journal::open(root.join("journal"))?;

        debug!(root = %root.display(), algo = algorithm.as_str(), "initialized store");

        Ok(Self {
            root,
            config,
            journal,
            txn: Mutex::new(None),
        })
    }

    /// Open an existing store at the given path.
    ///
    /// Validates the store structure and reads the configuration.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join("config");
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config = StoreConfig::parse(&fs::read_to_string(&config_path)?)?;

        let objects_dir = root.join("objects").join(config.algorithm.as_str());
        if !objects_dir.exists() {
            return Err(Error::invalid_store(
                &root,
                "objects directory structure missing",
            ));
        }

        if !root.join("refs").join("heads").exists() {
            return Err(Error::invalid_store(&root, "refs/heads directory missing"));
        }

        let journal = Journal::open(root.join("journal"))?;

        Ok(Self {
            root,
            config,
            journal,
            txn: Mutex::new(None),
        })
    }

    /// Get the path to an object file given its checksum.
    ///
    /// Returns: `objects/{algorithm}/{prefix}/{suffix}`
    pub fn object_path(&self, checksum: &Checksum) -> PathBuf {
        self.root
            .join("objects")
            .join(self.config.algorithm.as_str())
            .join(checksum.prefix())
            .join(checksum.suffix())
    }

    /// Get the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the algorithm used by this store.
    pub fn algorithm(&self) -> Algorithm {
        self.config.algorithm
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the reference manager for this store.
    pub fn refs(&self) -> RefManager<'_> {
        RefManager::new(self)
    }

    /// Get a reference to the journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Whether an object with this checksum is present.
    pub fn exists(&self, checksum: &Checksum) -> bool {
        self.object_path(checksum).exists()
    }

    /// Store an object. Idempotent: existing content is not rewritten.
    pub fn put(&self, object: &Object) -> Result<Checksum> {
        match object {
            Object::Blob(data) => self.put_payload(ObjectType::Blob, data),
            Object::Tree(entries) => self.put_tree(entries.clone()),
            Object::Commit(commit) => self.put_commit(commit),
        }
    }

    /// Store a blob from a reader.
    ///
    /// Blobs at or above the compression threshold are zstd-compressed.
    pub fn put_blob<R: Read>(&self, mut reader: R) -> Result<Checksum> {
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        self.put_payload(ObjectType::Blob, &payload)
    }

    /// Store a tree from a list of entries.
    ///
    /// Entries are sorted by name for canonical ordering. Entries are
    /// re-validated since their fields are public. Duplicate names are
    /// rejected.
    pub fn put_tree(&self, mut entries: Vec<TreeEntry>) -> Result<Checksum> {
        for entry in &entries {
            entry.validate()?;
        }
        entries.sort();
        if let Some(pair) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(Error::encoding(
                pair[0].name.clone(),
                "Duplicate name in tree",
            ));
        }

        let payload = tree::encode_tree(entries);
        self.put_payload(ObjectType::Tree, &payload)
    }

    /// Store a commit object without validating its references.
    ///
    /// Use [`Store::build_commit`] to verify the tree and parent first.
    pub fn put_commit(&self, commit: &Commit) -> Result<Checksum> {
        self.put_payload(ObjectType::Commit, &commit.encode())
    }

    /// Hash, deduplicate and persist one canonical payload.
    fn put_payload(&self, object_type: ObjectType, payload: &[u8]) -> Result<Checksum> {
        let checksum = Checksum::of_object(object_type, payload);

        let obj_path = self.object_path(&checksum);
        if obj_path.exists() {
            self.record_dedup();
            return Ok(checksum);
        }

        // Trees and commits are small metadata and stay uncompressed
        let (final_payload, compression) = if object_type == ObjectType::Blob
            && payload.len() >= self.config.compression_threshold
        {
            (compress_zstd(payload)?, CompressionType::Zstd)
        } else {
            (payload.to_vec(), CompressionType::None)
        };

        let header = ObjectHeader::new(
            object_type,
            self.config.algorithm,
            compression,
            final_payload.len() as u64,
        );

        self.write_object_atomic(&checksum, &header, &final_payload)?;
        self.record_write(checksum, (HEADER_SIZE + final_payload.len()) as u64);

        debug!(
            checksum = %checksum.short(),
            kind = object_type.as_str(),
            size = payload.len(),
            "wrote object"
        );

        Ok(checksum)
    }

    /// Write an object atomically using tempfile.
    fn write_object_atomic(
        &self,
        checksum: &Checksum,
        header: &ObjectHeader,
        payload: &[u8],
    ) -> Result<()> {
        let obj_path = self.object_path(checksum);
        let shard_dir = obj_path
            .parent()
            .ok_or_else(|| Error::invalid_store(&self.root, "object path has no parent"))?;

        fs::create_dir_all(shard_dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(shard_dir)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(payload)?;
        temp_file.flush()?;
        temp_file.as_file().sync_all()?;

        // A concurrent writer may have persisted identical content already;
        // the rename replaces it with the same bytes.
        temp_file.persist(&obj_path)?;

        Ok(())
    }

    /// Read an object file, check its framing and decompress the payload.
    fn read_object_file(&self, path: &Path) -> Result<(ObjectHeader, Vec<u8>)> {
        let bytes = fs::read(path).map_err(|e| Error::file_io(path, e))?;

        let header =
            ObjectHeader::decode(&bytes).map_err(|e| Error::corrupted_object(path, e.to_string()))?;

        let stored = &bytes[HEADER_SIZE..];
        if stored.len() as u64 != header.payload_len {
            return Err(Error::corrupted_object(
                path,
                format!(
                    "Payload length mismatch: expected {}, got {}",
                    header.payload_len,
                    stored.len()
                ),
            ));
        }

        let payload = match header.compression {
            CompressionType::None => stored.to_vec(),
            CompressionType::Zstd => decompress_zstd(stored)
                .map_err(|e| Error::corrupted_object(path, e.to_string()))?,
        };

        Ok((header, payload))
    }

    /// Load an object's payload and re-verify it against its checksum.
    fn read_verified(&self, checksum: &Checksum) -> Result<(ObjectType, Vec<u8>)> {
        let obj_path = self.object_path(checksum);
        if !obj_path.exists() {
            return Err(Error::object_not_found(checksum.to_hex()));
        }

        let (header, payload) = self.read_object_file(&obj_path)?;

        let computed = Checksum::of_object(header.object_type, &payload);
        if computed != *checksum {
            return Err(Error::corrupted_object(
                &obj_path,
                format!(
                    "Checksum mismatch: expected {}, got {}",
                    checksum.to_hex(),
                    computed.to_hex()
                ),
            ));
        }

        Ok((header.object_type, payload))
    }

    /// Retrieve and decode an object.
    pub fn get(&self, checksum: &Checksum) -> Result<Object> {
        let (object_type, payload) = self.read_verified(checksum)?;
        Object::decode_payload(object_type, payload)
            .map_err(|e| Error::corrupted_object(self.object_path(checksum), e.to_string()))
    }

    /// Re-hash a stored object and return its type.
    pub fn verify(&self, checksum: &Checksum) -> Result<ObjectType> {
        Ok(self.get(checksum)?.object_type())
    }

    /// Retrieve a blob by checksum.
    pub fn get_blob(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        match self.get(checksum)? {
            Object::Blob(data) => Ok(data),
            other => Err(Error::invalid_object_type(
                ObjectType::Blob.as_str(),
                other.object_type().as_str(),
            )),
        }
    }

    /// Retrieve a tree by checksum.
    pub fn get_tree(&self, checksum: &Checksum) -> Result<Vec<TreeEntry>> {
        match self.get(checksum)? {
            Object::Tree(entries) => Ok(entries),
            other => Err(Error::invalid_object_type(
                ObjectType::Tree.as_str(),
                other.object_type().as_str(),
            )),
        }
    }

    /// Retrieve a commit by checksum.
    pub fn get_commit(&self, checksum: &Checksum) -> Result<Commit> {
        match self.get(checksum)? {
            Object::Commit(commit) => Ok(commit),
            other => Err(Error::invalid_object_type(
                ObjectType::Commit.as_str(),
                other.object_type().as_str(),
            )),
        }
    }

    /// Write a blob to a writer (for cat command).
    pub fn cat_blob<W: Write>(&self, checksum: &Checksum, mut writer: W) -> Result<()> {
        let payload = self.get_blob(checksum)?;
        writer.write_all(&payload)?;
        Ok(())
    }

    /// Resolve a branch name or a full hex checksum.
    pub fn resolve_rev(&self, rev: &str) -> Result<Checksum> {
        if let Ok(checksum) = Checksum::from_hex(rev) {
            if self.exists(&checksum) {
                return Ok(checksum);
            }
            return Err(Error::object_not_found(rev));
        }

        self.refs().get(rev)?.ok_or_else(|| Error::ref_not_found(rev))
    }

    /// List every path below a tree, depth first, in canonical order.
    ///
    /// Paths are `/`-separated and relative to the tree root. Directories
    /// are listed before their contents.
    pub fn walk_tree(&self, checksum: &Checksum) -> Result<Vec<(String, TreeEntry)>> {
        let mut out = Vec::new();
        // Explicit stack of (directory path, remaining entries)
        let mut stack = vec![(String::new(), self.get_tree(checksum)?.into_iter())];

        while let Some((prefix, entries)) = stack.last_mut() {
            let Some(entry) = entries.next() else {
                stack.pop();
                continue;
            };

            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };

            let subtree = entry.is_tree().then_some(entry.checksum);
            out.push((path.clone(), entry));

            if let Some(subtree) = subtree {
                stack.push((path, self.get_tree(&subtree)?.into_iter()));
            }
        }

        Ok(out)
    }
}

/// Compress data using zstd.
fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 3) // Level 3 = fast compression
        .map_err(|e| Error::compression_error(format!("zstd compression failed: {}", e)))
}

/// Decompress data using zstd.
fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| Error::compression_error(format!("zstd decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{EntryType, file_modes};
    use tempfile::TempDir;

    fn new_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path().join("store"), Algorithm::Blake3).unwrap();
        (temp_dir, store)
    }

    fn count_objects(store: &Store) -> usize {
        let objects = store.root().join("objects").join("blake3-256");
        fs::read_dir(objects)
            .unwrap()
            .map(|shard| fs::read_dir(shard.unwrap().path()).unwrap().count())
            .sum()
    }

    #[test]
    fn test_store_init() {
        let (temp_dir, store) = new_store();
        let store_path = temp_dir.path().join("store");
        assert_eq!(store.root(), store_path);
        assert_eq!(store.algorithm(), Algorithm::Blake3);

        assert!(store_path.join("objects/blake3-256").exists());
        assert!(store_path.join("refs/heads").exists());
        assert!(store_path.join("journal").exists());

        let config = fs::read_to_string(store_path.join("config")).unwrap();
        assert!(config.contains("version=1"));
        assert!(config.contains("algo=blake3-256"));
    }

    #[test]
    fn test_store_open() {
        let (temp_dir, _store) = new_store();
        let store = Store::open(temp_dir.path().join("store")).unwrap();
        assert_eq!(store.algorithm(), Algorithm::Blake3);
        assert_eq!(
            store.config().compression_threshold,
            DEFAULT_COMPRESSION_THRESHOLD
        );
    }

    #[test]
    fn test_store_open_invalid() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Store::open(temp_dir.path().join("nonexistent")).is_err());

        let bare = temp_dir.path().join("bare");
        fs::create_dir_all(&bare).unwrap();
        let err = Store::open(&bare).unwrap_err();
        assert!(matches!(err, Error::InvalidStore { .. }));
    }

    #[test]
    fn test_parse_config() {
        let config = StoreConfig::parse("# Comment\nversion=1\nalgo=blake3-256\n").unwrap();
        assert_eq!(config.algorithm, Algorithm::Blake3);
        assert_eq!(config.compression_threshold, DEFAULT_COMPRESSION_THRESHOLD);

        let config =
            StoreConfig::parse("version=1\nalgo=blake3-256\ncompression_threshold=10\n").unwrap();
        assert_eq!(config.compression_threshold, 10);
        assert_eq!(StoreConfig::parse(&config.render()).unwrap(), config);

        assert!(StoreConfig::parse("version=99\nalgo=blake3-256\n").is_err());
        assert!(StoreConfig::parse("version=1\n").is_err());
        assert!(StoreConfig::parse("version=1\nalgo=blake3-256\ncompression_threshold=x\n").is_err());
    }

    #[test]
    fn test_object_path() {
        let (_temp_dir, store) = new_store();
        let checksum = Checksum::hash_bytes(b"test");
        let path = store.object_path(&checksum);

        assert!(path.ends_with(format!(
            "objects/blake3-256/{}/{}",
            checksum.prefix(),
            checksum.suffix()
        )));
    }

    #[test]
    fn test_put_get_blob() {
        let (_temp_dir, store) = new_store();

        let checksum = store.put_blob(&b"test data"[..]).unwrap();
        assert_eq!(checksum, Checksum::of_object(ObjectType::Blob, b"test data"));
        assert!(store.exists(&checksum));
        assert_eq!(store.get_blob(&checksum).unwrap(), b"test data");
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_temp_dir, store) = new_store();

        let first = store.put(&Object::Blob(b"same content".to_vec())).unwrap();
        let second = store.put(&Object::Blob(b"same content".to_vec())).unwrap();

        assert_eq!(first, second);
        assert_eq!(count_objects(&store), 1);
    }

    #[test]
    fn test_empty_blob_and_empty_tree_are_distinct() {
        let (_temp_dir, store) = new_store();

        let blob = store.put_blob(&b""[..]).unwrap();
        let tree = store.put_tree(Vec::new()).unwrap();

        assert_ne!(blob, tree);
        assert!(store.get_blob(&blob).unwrap().is_empty());
        assert!(store.get_tree(&tree).unwrap().is_empty());
    }

    #[test]
    fn test_get_not_found() {
        let (_temp_dir, store) = new_store();
        let checksum = Checksum::hash_bytes(b"nonexistent");

        assert!(!store.exists(&checksum));
        let err = store.get(&checksum).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { .. }));
    }

    #[test]
    fn test_large_blob_is_compressed() {
        let (_temp_dir, store) = new_store();

        let data = vec![0xAB; 64 * 1024];
        let checksum = store.put_blob(&data[..]).unwrap();

        let on_disk = fs::read(store.object_path(&checksum)).unwrap();
        let header = ObjectHeader::decode(&on_disk).unwrap();
        assert_eq!(header.compression, CompressionType::Zstd);
        assert!(on_disk.len() < data.len());

        assert_eq!(store.get_blob(&checksum).unwrap(), data);
    }

    #[test]
    fn test_corruption_detection() {
        let (_temp_dir, store) = new_store();

        let checksum = store.put_blob(&b"test"[..]).unwrap();

        let obj_path = store.object_path(&checksum);
        let mut file_data = fs::read(&obj_path).unwrap();
        file_data[HEADER_SIZE] ^= 0xFF;
        fs::write(&obj_path, file_data).unwrap();

        let err = store.get_blob(&checksum).unwrap_err();
        assert!(matches!(err, Error::CorruptedObject { .. }));
        assert!(store.verify(&checksum).is_err());
    }

    #[test]
    fn test_truncated_object_is_corrupt() {
        let (_temp_dir, store) = new_store();

        let checksum = store.put_blob(&b"truncate me"[..]).unwrap();
        let obj_path = store.object_path(&checksum);
        let file_data = fs::read(&obj_path).unwrap();
        fs::write(&obj_path, &file_data[..file_data.len() - 3]).unwrap();

        let err = store.get(&checksum).unwrap_err();
        assert!(matches!(err, Error::CorruptedObject { .. }));

        fs::write(&obj_path, b"short").unwrap();
        let err = store.get(&checksum).unwrap_err();
        assert!(matches!(err, Error::CorruptedObject { .. }));
    }

    #[test]
    fn test_typed_getters_reject_wrong_type() {
        let (_temp_dir, store) = new_store();

        let blob = store.put_blob(&b"file"[..]).unwrap();
        let err = store.get_tree(&blob).unwrap_err();
        assert!(matches!(err, Error::InvalidObjectType { .. }));
        assert!(store.get_commit(&blob).is_err());
        assert_eq!(store.verify(&blob).unwrap(), ObjectType::Blob);
    }

    #[test]
    fn test_tree_canonical_ordering() {
        let (_temp_dir, store) = new_store();
        let checksum = Checksum::hash_bytes(b"test");
        let entry = |name: &str| {
            TreeEntry::new(EntryType::Blob, file_modes::REGULAR, checksum, name.to_string())
                .unwrap()
        };

        let first = store
            .put_tree(vec![entry("z.txt"), entry("a.txt"), entry("m.txt")])
            .unwrap();
        let second = store
            .put_tree(vec![entry("a.txt"), entry("m.txt"), entry("z.txt")])
            .unwrap();
        assert_eq!(first, second);

        let names: Vec<_> = store
            .get_tree(&first)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "m.txt", "z.txt"]);
    }

    #[test]
    fn test_tree_rejects_duplicate_names() {
        let (_temp_dir, store) = new_store();
        let checksum = Checksum::hash_bytes(b"test");
        let entry =
            TreeEntry::new(EntryType::Blob, file_modes::REGULAR, checksum, "dup".to_string())
                .unwrap();

        let err = store.put_tree(vec![entry.clone(), entry]).unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }

    #[test]
    fn test_put_tree_validates_hand_built_entries() {
        let (_temp_dir, store) = new_store();
        let mut entry = TreeEntry::new(
            EntryType::Blob,
            file_modes::REGULAR,
            Checksum::hash_bytes(b"x"),
            "ok".to_string(),
        )
        .unwrap();

        entry.name = "a/b".to_string();
        assert!(matches!(store.put_tree(vec![entry.clone()]), Err(Error::Encoding { .. })));

        entry.name = "ok".to_string();
        entry.xattrs.insert(String::new(), b"v".to_vec());
        assert!(matches!(store.put_tree(vec![entry]), Err(Error::Encoding { .. })));
        assert_eq!(count_objects(&store), 0);
    }

    #[test]
    fn test_concurrent_identical_puts() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Store>();

        let (_temp_dir, store) = new_store();
        let data = vec![0x5au8; 64 * 1024];

        let checksums: Vec<Checksum> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.put_blob(&data[..]).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(checksums.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(count_objects(&store), 1);
        assert_eq!(store.get_blob(&checksums[0]).unwrap(), data);
    }

    #[test]
    fn test_walk_tree_deep_nesting() {
        let (_temp_dir, store) = new_store();
        let blob = store.put_blob(&b"leaf"[..]).unwrap();

        let mut tree = store
            .put_tree(vec![
                TreeEntry::new(EntryType::Blob, file_modes::REGULAR, blob, "f".into()).unwrap(),
            ])
            .unwrap();
        for _ in 0..4096 {
            tree = store
                .put_tree(vec![
                    TreeEntry::new(EntryType::Tree, file_modes::DIRECTORY, tree, "d".into())
                        .unwrap(),
                ])
                .unwrap();
        }

        let listing = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || store.walk_tree(&tree).unwrap())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(listing.len(), 4097);
        let (path, entry) = listing.last().unwrap();
        assert_eq!(entry.name, "f");
        assert_eq!(path.len(), 4096 * 2 + 1);
    }

    #[test]
    fn test_walk_tree() {
        let (_temp_dir, store) = new_store();

        let blob = store.put_blob(&b"x"[..]).unwrap();
        let inner = store
            .put_tree(vec![
                TreeEntry::new(EntryType::Blob, file_modes::REGULAR, blob, "b.txt".into())
                    .unwrap(),
            ])
            .unwrap();
        let root = store
            .put_tree(vec![
                TreeEntry::new(EntryType::Tree, file_modes::DIRECTORY, inner, "a".into()).unwrap(),
                TreeEntry::new(EntryType::Blob, file_modes::REGULAR, blob, "z".into()).unwrap(),
            ])
            .unwrap();

        let paths: Vec<_> = store
            .walk_tree(&root)
            .unwrap()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(paths, vec!["a", "a/b.txt", "z"]);
    }

    #[test]
    fn test_resolve_rev() {
        let (_temp_dir, store) = new_store();

        let blob = store.put_blob(&b"rev"[..]).unwrap();
        assert_eq!(store.resolve_rev(&blob.to_hex()).unwrap(), blob);

        store.refs().set("main", &blob).unwrap();
        assert_eq!(store.resolve_rev("main").unwrap(), blob);

        let err = store.resolve_rev("missing").unwrap_err();
        assert!(matches!(err, Error::RefNotFound { .. }));

        let absent = Checksum::hash_bytes(b"absent");
        let err = store.resolve_rev(&absent.to_hex()).unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound { .. }));
    }

    #[test]
    fn test_cat_blob() {
        let (_temp_dir, store) = new_store();

        let checksum = store.put_blob(&b"cat this content"[..]).unwrap();

        let mut output = Vec::new();
        store.cat_blob(&checksum, &mut output).unwrap();
        assert_eq!(output, b"cat this content");
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            max_shrink_iters: 1000,
            ..ProptestConfig::default()
        })]

        /// Put then get returns the same content, compressed or not
        #[test]
        fn prop_put_get_roundtrip(data in prop::collection::vec(any::<u8>(), 0..10_000)) {
            let temp_dir = TempDir::new().unwrap();
            let store = Store::init(temp_dir.path(), Algorithm::Blake3)?;

            let checksum = store.put_blob(&data[..])?;
            prop_assert_eq!(store.get_blob(&checksum)?, data);
        }

        /// Compression threshold is respected
        #[test]
        fn prop_compression_threshold(data in prop::collection::vec(any::<u8>(), 0..10_000)) {
            let temp_dir = TempDir::new().unwrap();
            let store = Store::init(temp_dir.path(), Algorithm::Blake3)?;

            let checksum = store.put_blob(&data[..])?;
            let file_data = fs::read(store.object_path(&checksum))?;
            let header = ObjectHeader::decode(&file_data)?;

            if data.len() < DEFAULT_COMPRESSION_THRESHOLD {
                prop_assert_eq!(header.compression, CompressionType::None);
            } else {
                prop_assert_eq!(header.compression, CompressionType::Zstd);
            }
        }
    }
}
