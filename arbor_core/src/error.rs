//! Error types for arbor_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using arbor_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// I/O error tied to a specific filesystem path.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Object file is corrupted or fails checksum re-verification.
    #[error("Corrupted object at {path}: {reason}")]
    CorruptedObject { path: PathBuf, reason: String },

    /// Invalid checksum format or encoding.
    #[error("Invalid checksum: {reason}")]
    InvalidChecksum { reason: String },

    /// Object not found in store.
    #[error("Object not found: {checksum}")]
    ObjectNotFound { checksum: String },

    /// Store is invalid or not initialized.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Invalid reference name or format.
    #[error("Invalid reference: {reason}")]
    InvalidRef { reason: String },

    /// Reference not found.
    #[error("Reference not found: {name}")]
    RefNotFound { name: String },

    /// Invalid object type.
    #[error("Invalid object type: expected {expected}, got {got}")]
    InvalidObjectType { expected: String, got: String },

    /// Path already exists (for checkout).
    #[error("Path already exists: {path}")]
    PathExists { path: PathBuf },

    /// A tree source specifier could not be parsed.
    #[error("Invalid tree source '{spec}': {reason}")]
    InvalidSource { spec: String, reason: String },

    /// A tree source (directory or archive) could not be opened or read.
    #[error("Cannot read tree source '{spec}': {reason}")]
    SourceUnreadable { spec: String, reason: String },

    /// An entry cannot be represented canonically.
    #[error("Cannot encode '{path}': {reason}")]
    Encoding { path: String, reason: String },

    /// An archive entry appeared before its parent directory.
    #[error("Archive entry '{path}' has no parent directory '{parent}'")]
    MissingParentDirectory { path: String, parent: String },

    /// A commit references an object that is absent from the store.
    #[error("Dangling {role} reference: {checksum}")]
    DanglingReference { role: String, checksum: String },

    /// A transaction is already open on this store handle.
    #[error("A transaction is already active on this store")]
    AlreadyActive,

    /// The operation requires an open transaction.
    #[error("No active transaction")]
    NoActiveTransaction,

    /// Finalize was requested before any commit was built.
    #[error("No commit staged in the active transaction")]
    NoCommitStaged,

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Compression or decompression failed.
    #[error("Compression error: {reason}")]
    Compression { reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },
}

impl Error {
    /// Create a FileIo error.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Create a CorruptedObject error.
    pub fn corrupted_object(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedObject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidChecksum error.
    pub fn invalid_checksum(reason: impl Into<String>) -> Self {
        Error::InvalidChecksum {
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(checksum: impl Into<String>) -> Self {
        Error::ObjectNotFound {
            checksum: checksum.into(),
        }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidRef error.
    pub fn invalid_ref(reason: impl Into<String>) -> Self {
        Error::InvalidRef {
            reason: reason.into(),
        }
    }

    /// Create a RefNotFound error.
    pub fn ref_not_found(name: impl Into<String>) -> Self {
        Error::RefNotFound { name: name.into() }
    }

    /// Create an InvalidObjectType error.
    pub fn invalid_object_type(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::InvalidObjectType {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a PathExists error.
    pub fn path_exists(path: impl Into<PathBuf>) -> Self {
        Error::PathExists { path: path.into() }
    }

    /// Create an InvalidSource error.
    pub fn invalid_source(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidSource {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Create a SourceUnreadable error.
    pub fn source_unreadable(spec: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceUnreadable {
            spec: spec.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an Encoding error.
    pub fn encoding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Encoding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingParentDirectory error.
    pub fn missing_parent(path: impl Into<String>, parent: impl Into<String>) -> Self {
        Error::MissingParentDirectory {
            path: path.into(),
            parent: parent.into(),
        }
    }

    /// Create a DanglingReference error.
    pub fn dangling(role: impl Into<String>, checksum: impl Into<String>) -> Self {
        Error::DanglingReference {
            role: role.into(),
            checksum: checksum.into(),
        }
    }

    /// Create a Compression error.
    pub fn compression_error(reason: impl Into<String>) -> Self {
        Error::Compression {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}
