//! # Arbor Core
//!
//! A transactional, content-addressed commit store using BLAKE3 hashing.
//!
//! Filesystem trees are captured as immutable, checksum-addressed objects
//! (blobs, trees and commits). Commits are built inside a transaction and
//! published by pointing a named branch at them.
//!
//! ## Features
//!
//! - Content-addressed storage with deduplication
//! - Tree sources: local directories, tar archives (plain, gzip, zstd) and
//!   existing commits, merged in order
//! - Transactions with write-set tracking and cancellation
//! - Branches (refs) and an append-only journal of ref updates
//! - Remote option encoding into an ordered key/value map
//!
//! ## Example
//!
//! ```no_run
//! use arbor_core::{Algorithm, Cancellable, CommitOptions, Store, TreeSource};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize a new store
//! let store = Store::init("./my-store", Algorithm::Blake3)?;
//!
//! // Commit a directory overlaid with an archive onto the `main` branch
//! let options = CommitOptions::new("Import rootfs")
//!     .source(TreeSource::parse("dir=./rootfs")?)
//!     .source(TreeSource::parse("tar=./overlay.tar.gz")?);
//! let finalized = store.commit_to_branch("main", &options, &Cancellable::new())?;
//! println!("main -> {}", finalized.commit);
//!
//! // Materialize back to filesystem
//! store.checkout("main", Path::new("./restored"))?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod cancel;
mod checkout;
mod commit;
mod error;
mod hash;
mod ingest;
mod journal;
mod mtree;
mod object;
mod refs;
mod remote;
mod source;
mod store;
mod transaction;
mod tree;
mod walk;

pub use archive::ArchiveCompression;
pub use cancel::Cancellable;
pub use commit::{Commit, CommitOptions, parse_parent};
pub use error::{Error, Result};
pub use hash::{Algorithm, CHECKSUM_SIZE, Checksum};
pub use journal::{Journal, JournalEntry};
pub use object::{CompressionType, Object, ObjectHeader, ObjectType};
pub use refs::RefManager;
pub use remote::{RemoteOptions, WireMap, WireValue};
pub use source::TreeSource;
pub use store::{DEFAULT_COMPRESSION_THRESHOLD, Store, StoreConfig};
pub use transaction::{Finalized, Transaction, TransactionStats};
pub use tree::{EntryType, FileMode, TreeEntry, Xattrs, file_modes};
