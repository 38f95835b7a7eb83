//! Commit objects and the commit builder.

use crate::cancel::Cancellable;
use crate::error::{Error, Result};
use crate::hash::{CHECKSUM_SIZE, Checksum};
use crate::object::ObjectType;
use crate::source::TreeSource;
use crate::store::Store;
use crate::transaction::Finalized;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::debug;

/// Encoding version of the commit payload.
const COMMIT_FORMAT: u8 = 1;

/// An immutable snapshot: a root tree, an optional parent and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: Checksum,
    /// Previous commit, if any.
    pub parent: Option<Checksum>,
    /// Commit time, whole seconds.
    pub timestamp: DateTime<Utc>,
    /// One-line summary.
    pub subject: String,
    /// Free-form description.
    pub body: String,
    /// Extra key/value metadata, kept sorted.
    pub metadata: BTreeMap<String, String>,
}

impl Commit {
    /// Create a commit. Sub-second precision is dropped.
    pub fn new(
        tree: Checksum,
        parent: Option<Checksum>,
        subject: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tree,
            parent,
            timestamp: timestamp.trunc_subsecs(0),
            subject: subject.into(),
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach extra metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Encode to the canonical payload.
    ///
    /// Format:
    /// - 1 byte: format version (1)
    /// - 32 bytes: tree checksum
    /// - 1 byte: parent flag, then 32 bytes of parent checksum if set
    /// - 8 bytes: timestamp (i64 LE, seconds since epoch)
    /// - subject, body: u64 LE length + UTF-8 bytes each
    /// - u64 LE metadata count, then key and value as length-prefixed strings
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            2 + 2 * CHECKSUM_SIZE + 8 + 16 + self.subject.len() + self.body.len(),
        );

        buf.push(COMMIT_FORMAT);
        buf.extend_from_slice(self.tree.as_bytes());
        match &self.parent {
            Some(parent) => {
                buf.push(1);
                buf.extend_from_slice(parent.as_bytes());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.timestamp.timestamp().to_le_bytes());
        put_str(&mut buf, &self.subject);
        put_str(&mut buf, &self.body);

        buf.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());
        for (key, value) in &self.metadata {
            put_str(&mut buf, key);
            put_str(&mut buf, value);
        }

        buf
    }

    /// Decode a canonical payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);

        let format = read_u8(&mut reader)?;
        if format != COMMIT_FORMAT {
            return Err(Error::encoding(
                "<commit>",
                format!("Unsupported commit format: {}", format),
            ));
        }

        let tree = read_checksum(&mut reader)?;
        let parent = match read_u8(&mut reader)? {
            0 => None,
            1 => Some(read_checksum(&mut reader)?),
            flag => {
                return Err(Error::encoding(
                    "<commit>",
                    format!("Invalid parent flag: {}", flag),
                ));
            }
        };

        let mut ts_buf = [0u8; 8];
        reader.read_exact(&mut ts_buf)?;
        let seconds = i64::from_le_bytes(ts_buf);
        let timestamp = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
            Error::encoding("<commit>", format!("Timestamp out of range: {}", seconds))
        })?;

        let subject = read_str(&mut reader, data.len())?;
        let body = read_str(&mut reader, data.len())?;

        let count = read_u64(&mut reader)?;
        let mut metadata = BTreeMap::new();
        for _ in 0..count {
            let key = read_str(&mut reader, data.len())?;
            let value = read_str(&mut reader, data.len())?;
            metadata.insert(key, value);
        }

        if reader.position() != data.len() as u64 {
            return Err(Error::encoding("<commit>", "Trailing bytes after commit"));
        }

        Ok(Self {
            tree,
            parent,
            timestamp,
            subject,
            body,
            metadata,
        })
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_u8(reader: &mut Cursor<&[u8]>) -> Result<u8> {
    let mut b = [0u8; 1];
    reader.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u64(reader: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut b = [0u8; 8];
    reader.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_checksum(reader: &mut Cursor<&[u8]>) -> Result<Checksum> {
    let mut b = [0u8; CHECKSUM_SIZE];
    reader.read_exact(&mut b)?;
    Ok(Checksum::from_bytes(b))
}

fn read_str(reader: &mut Cursor<&[u8]>, total: usize) -> Result<String> {
    let len = read_u64(reader)?;
    let remaining = total as u64 - reader.position();
    if len > remaining {
        return Err(Error::encoding(
            "<commit>",
            format!("String length {} exceeds remaining {} bytes", len, remaining),
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| Error::encoding("<commit>", format!("Invalid UTF-8: {}", e)))
}

/// Inputs for [`Store::commit`] and [`Store::commit_to_branch`].
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// One-line summary.
    pub subject: String,
    /// Free-form description.
    pub body: String,
    /// Parent commit.
    pub parent: Option<Checksum>,
    /// Start a new history: [`Store::commit_to_branch`] leaves the parent
    /// unset instead of using the branch tip.
    pub orphan: bool,
    /// Sources merged left to right into the root tree.
    pub tree: Vec<TreeSource>,
    /// Synthesize missing parent directories for every archive source.
    pub tar_auto_create_parents: bool,
    /// Commit time; now when unset.
    pub timestamp: Option<DateTime<Utc>>,
    /// Extra key/value metadata.
    pub metadata: BTreeMap<String, String>,
}

impl CommitOptions {
    /// Options with a subject and nothing else.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Set the message body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the parent commit. When unset, [`Store::commit_to_branch`] uses
    /// the branch tip.
    pub fn parent(mut self, parent: Option<Checksum>) -> Self {
        self.parent = parent;
        self
    }

    /// Keep [`Store::commit_to_branch`] from defaulting the parent.
    pub fn orphan(mut self, orphan: bool) -> Self {
        self.orphan = orphan;
        self
    }

    /// Append a tree source; later sources overlay earlier ones.
    pub fn source(mut self, source: TreeSource) -> Self {
        self.tree.push(source);
        self
    }

    /// Synthesize missing parent directories in archive sources.
    pub fn tar_auto_create_parents(mut self, enabled: bool) -> Self {
        self.tar_auto_create_parents = enabled;
        self
    }

    /// Fix the commit time.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Add one metadata entry, replacing any previous value for `key`.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Parse a parent argument: empty or `none` means no parent.
pub fn parse_parent(s: &str) -> Result<Option<Checksum>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    Checksum::from_hex(s).map(Some)
}

impl Store {
    /// Write a commit after verifying its tree and parent, and stage it.
    ///
    /// Requires an active transaction. A missing tree or parent fails with
    /// `DanglingReference`; a present object of the wrong type with
    /// `InvalidObjectType`.
    pub fn build_commit(&self, commit: &Commit) -> Result<Checksum> {
        self.require_transaction()?;

        self.verify_reference("tree", &commit.tree, ObjectType::Tree)?;
        if let Some(parent) = &commit.parent {
            self.verify_reference("parent", parent, ObjectType::Commit)?;
        }

        let checksum = self.put_commit(commit)?;
        self.stage_commit(checksum)?;

        debug!(
            commit = %checksum.short(),
            tree = %commit.tree.short(),
            parent = ?commit.parent.map(|p| p.short()),
            "staged commit"
        );

        Ok(checksum)
    }

    fn verify_reference(
        &self,
        role: &str,
        checksum: &Checksum,
        expected: ObjectType,
    ) -> Result<()> {
        match self.verify(checksum) {
            Ok(found) if found == expected => Ok(()),
            Ok(found) => Err(Error::invalid_object_type(expected.as_str(), found.as_str())),
            Err(Error::ObjectNotFound { .. }) => Err(Error::dangling(role, checksum.to_hex())),
            Err(e) => Err(e),
        }
    }

    /// Ingest `options.tree`, build the commit and stage it.
    pub fn commit(&self, options: &CommitOptions, cancel: &Cancellable) -> Result<Checksum> {
        self.require_transaction()?;

        let tree = self.ingest_sources(&options.tree, options.tar_auto_create_parents, cancel)?;
        self.check_cancelled(cancel)?;

        let timestamp = options.timestamp.unwrap_or_else(Utc::now);
        let commit = Commit::new(
            tree,
            options.parent,
            options.subject.clone(),
            options.body.clone(),
            timestamp,
        )
        .with_metadata(options.metadata.clone());

        self.build_commit(&commit)
    }

    /// Begin, commit and publish on `branch` in one call.
    ///
    /// When `options.parent` is unset and `options.orphan` is not set, the
    /// current branch tip becomes the parent. Any failure aborts the
    /// transaction.
    pub fn commit_to_branch(
        &self,
        branch: &str,
        options: &CommitOptions,
        cancel: &Cancellable,
    ) -> Result<Finalized> {
        let txn = self.transaction()?;

        if options.parent.is_none() && !options.orphan {
            let options = options.clone().parent(self.refs().get(branch)?);
            txn.commit(&options, cancel)?;
        } else {
            txn.commit(options, cancel)?;
        }

        let finalized = txn.finalize(branch, cancel)?;

        Ok(finalized)
    }

    /// Commits reachable from `rev` by parent links, newest first.
    pub fn log(&self, rev: &str) -> Result<Vec<(Checksum, Commit)>> {
        let mut next = Some(self.resolve_rev(rev)?);
        let mut history = Vec::new();

        while let Some(checksum) = next {
            let commit = self.get_commit(&checksum)?;
            next = commit.parent;
            history.push((checksum, commit));
        }

        Ok(history)
    }
}
