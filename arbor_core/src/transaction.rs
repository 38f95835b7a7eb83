//! Transactions: begin, stage, finalize or abort.
//!
//! A store handle is either idle or has exactly one active transaction.
//! Ingestion and commit building run inside it and every object they newly
//! write is tracked. Finalize publishes the staged commit by moving a branch
//! ref, the last and only externally visible step. Abort drops the tracking
//! state; objects already written stay behind as unreferenced content.

use crate::cancel::Cancellable;
use crate::commit::CommitOptions;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::journal::JournalEntry;
use crate::store::Store;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{MutexGuard, PoisonError};
use tracing::{info, warn};

/// Counters collected while a transaction is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    /// Objects newly written by this transaction.
    pub objects_written: usize,
    /// Puts that found the object already present.
    pub objects_deduplicated: usize,
    /// Bytes written to disk, headers included.
    pub bytes_written: u64,
}

/// Outcome of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finalized {
    /// The published commit.
    pub commit: Checksum,
    /// The branch that now points at `commit`.
    pub branch: String,
    /// The branch tip before this finalize, if the branch existed.
    pub previous: Option<Checksum>,
    /// Counters for the whole transaction.
    pub stats: TransactionStats,
}

/// Per-handle state of an open transaction.
#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    write_set: HashSet<Checksum>,
    staged_commit: Option<Checksum>,
    stats: TransactionStats,
}

impl Store {
    fn lock_txn(&self) -> MutexGuard<'_, Option<TransactionState>> {
        self.txn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a transaction on this handle.
    pub fn begin_transaction(&self) -> Result<()> {
        let mut txn = self.lock_txn();
        if txn.is_some() {
            return Err(Error::AlreadyActive);
        }

        *txn = Some(TransactionState::default());
        info!(root = %self.root().display(), "transaction started");
        Ok(())
    }

    /// Open a transaction and return a guard that aborts it when dropped
    /// unless it was finalized or aborted explicitly.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.begin_transaction()?;
        Ok(Transaction {
            store: self,
            done: false,
        })
    }

    /// Whether a transaction is open on this handle.
    pub fn is_transaction_active(&self) -> bool {
        self.lock_txn().is_some()
    }

    /// The commit that finalize would publish, if one was built.
    pub fn staged_commit(&self) -> Option<Checksum> {
        self.lock_txn().as_ref().and_then(|state| state.staged_commit)
    }

    /// Counters of the open transaction.
    pub fn transaction_stats(&self) -> Result<TransactionStats> {
        self.lock_txn()
            .as_ref()
            .map(|state| state.stats.clone())
            .ok_or(Error::NoActiveTransaction)
    }

    /// Checksums newly written by the open transaction, sorted.
    pub fn transaction_write_set(&self) -> Result<Vec<Checksum>> {
        let txn = self.lock_txn();
        let state = txn.as_ref().ok_or(Error::NoActiveTransaction)?;
        let mut written: Vec<_> = state.write_set.iter().copied().collect();
        written.sort();
        Ok(written)
    }

    /// Publish the staged commit on `branch` and close the transaction.
    ///
    /// Fails with `NoActiveTransaction` or `NoCommitStaged` without touching
    /// any ref; after `NoCommitStaged` the transaction stays open. If the ref
    /// write itself fails the transaction also stays open. Cancellation is
    /// checked first and aborts the transaction.
    pub fn finalize_transaction(&self, branch: &str, cancel: &Cancellable) -> Result<Finalized> {
        let mut txn = self.lock_txn();
        if txn.is_none() {
            return Err(Error::NoActiveTransaction);
        }

        if let Err(e) = cancel.check() {
            if let Some(state) = txn.take() {
                info!(
                    objects_written = state.stats.objects_written,
                    "transaction cancelled before finalize"
                );
            }
            return Err(e);
        }

        let commit = txn
            .as_ref()
            .and_then(|state| state.staged_commit)
            .ok_or(Error::NoCommitStaged)?;

        let refs = self.refs();
        refs.validate_name(branch)?;

        // Re-hash before publishing: the ref must never point at a damaged commit
        let staged = self.get_commit(&commit)?;
        let previous = refs.get(branch)?;
        refs.set(branch, &commit)?;

        let entry = JournalEntry::new(
            chrono::Utc::now().timestamp(),
            "commit".to_string(),
            commit,
            branch.to_string(),
            format!(
                "parent={},previous={}",
                staged
                    .parent
                    .map(|p| p.to_hex())
                    .unwrap_or_else(|| "none".to_string()),
                previous
                    .map(|p| p.to_hex())
                    .unwrap_or_else(|| "none".to_string())
            ),
        );
        if let Err(e) = self.journal().append(&entry) {
            warn!(branch, error = %e, "ref updated but journal append failed");
        }

        let stats = txn.take().map(|state| state.stats).unwrap_or_default();

        info!(
            branch,
            commit = %commit.short(),
            objects_written = stats.objects_written,
            objects_deduplicated = stats.objects_deduplicated,
            "transaction finalized"
        );

        Ok(Finalized {
            commit,
            branch: branch.to_string(),
            previous,
            stats,
        })
    }

    /// Close the transaction without touching any ref.
    pub fn abort_transaction(&self) -> Result<TransactionStats> {
        let state = self.lock_txn().take().ok_or(Error::NoActiveTransaction)?;

        info!(
            objects_written = state.stats.objects_written,
            "transaction aborted"
        );
        Ok(state.stats)
    }

    pub(crate) fn require_transaction(&self) -> Result<()> {
        if self.is_transaction_active() {
            Ok(())
        } else {
            Err(Error::NoActiveTransaction)
        }
    }

    /// Abort and fail with `Cancelled` once the token fires.
    pub(crate) fn check_cancelled(&self, cancel: &Cancellable) -> Result<()> {
        cancel.check().inspect_err(|_| {
            if self.abort_transaction().is_ok() {
                info!("transaction cancelled");
            }
        })
    }

    pub(crate) fn stage_commit(&self, checksum: Checksum) -> Result<()> {
        let mut txn = self.lock_txn();
        let state = txn.as_mut().ok_or(Error::NoActiveTransaction)?;
        state.staged_commit = Some(checksum);
        Ok(())
    }

    pub(crate) fn record_write(&self, checksum: Checksum, bytes: u64) {
        if let Some(state) = self.lock_txn().as_mut()
            && state.write_set.insert(checksum)
        {
            state.stats.objects_written += 1;
            state.stats.bytes_written += bytes;
        }
    }

    pub(crate) fn record_dedup(&self) {
        if let Some(state) = self.lock_txn().as_mut() {
            state.stats.objects_deduplicated += 1;
        }
    }
}

/// Scoped handle on an open transaction.
///
/// Dropping it without [`Transaction::finalize`] or [`Transaction::abort`]
/// aborts the transaction.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a Store,
    done: bool,
}

impl<'a> Transaction<'a> {
    /// The store this transaction writes to.
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Ingest the configured sources and stage a commit.
    pub fn commit(&self, options: &CommitOptions, cancel: &Cancellable) -> Result<Checksum> {
        self.store.commit(options, cancel)
    }

    /// Publish the staged commit on `branch`.
    ///
    /// On error the guard is dropped and the transaction aborted.
    pub fn finalize(mut self, branch: &str, cancel: &Cancellable) -> Result<Finalized> {
        let finalized = self.store.finalize_transaction(branch, cancel)?;
        self.done = true;
        Ok(finalized)
    }

    /// Abort explicitly.
    pub fn abort(mut self) -> Result<TransactionStats> {
        self.done = true;
        self.store.abort_transaction()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done && self.store.abort_transaction().is_ok() {
            warn!("transaction dropped without finalize; aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Commit;
    use crate::hash::Algorithm;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn new_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path().join("store"), Algorithm::Blake3).unwrap();
        (temp_dir, store)
    }

    fn stage_empty_commit(store: &Store, subject: &str) -> Checksum {
        let tree = store.put_tree(Vec::new()).unwrap();
        let commit = Commit::new(tree, None, subject, "", Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        store.build_commit(&commit).unwrap()
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        assert!(matches!(store.begin_transaction(), Err(Error::AlreadyActive)));
        assert!(store.is_transaction_active());
    }

    #[test]
    fn test_finalize_without_begin() {
        let (_temp_dir, store) = new_store();

        let err = store
            .finalize_transaction("main", &Cancellable::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveTransaction));
        assert_eq!(store.refs().get("main").unwrap(), None);
    }

    #[test]
    fn test_finalize_without_commit_keeps_transaction_open() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        let err = store
            .finalize_transaction("main", &Cancellable::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoCommitStaged));
        assert!(store.is_transaction_active());
        assert_eq!(store.refs().get("main").unwrap(), None);

        // The caller can still build and publish
        let commit = stage_empty_commit(&store, "late");
        let finalized = store
            .finalize_transaction("main", &Cancellable::new())
            .unwrap();
        assert_eq!(finalized.commit, commit);
    }

    #[test]
    fn test_abort_without_begin() {
        let (_temp_dir, store) = new_store();
        assert!(matches!(
            store.abort_transaction(),
            Err(Error::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_finalize_publishes_and_journals() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        let commit = stage_empty_commit(&store, "first");
        assert_eq!(store.staged_commit(), Some(commit));

        let finalized = store
            .finalize_transaction("main", &Cancellable::new())
            .unwrap();

        assert_eq!(finalized.commit, commit);
        assert_eq!(finalized.branch, "main");
        assert_eq!(finalized.previous, None);
        assert_eq!(finalized.stats.objects_written, 2);
        assert!(!store.is_transaction_active());
        assert_eq!(store.refs().get("main").unwrap(), Some(commit));

        let journal = store.journal().read_recent(10).unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].checksum, commit);
        assert_eq!(journal[0].target, "main");
    }

    #[test]
    fn test_write_set_and_dedup_counters() {
        let (_temp_dir, store) = new_store();

        let outside = store.put_blob(&b"before"[..]).unwrap();

        store.begin_transaction().unwrap();
        let fresh = store.put_blob(&b"fresh"[..]).unwrap();
        store.put_blob(&b"before"[..]).unwrap();
        store.put_blob(&b"fresh"[..]).unwrap();

        let stats = store.transaction_stats().unwrap();
        assert_eq!(stats.objects_written, 1);
        assert_eq!(stats.objects_deduplicated, 2);
        assert_eq!(store.transaction_write_set().unwrap(), vec![fresh]);
        assert!(!store.transaction_write_set().unwrap().contains(&outside));

        let aborted = store.abort_transaction().unwrap();
        assert_eq!(aborted, stats);
        assert!(store.transaction_stats().is_err());
    }

    #[test]
    fn test_abort_leaves_objects_and_refs() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        let commit = stage_empty_commit(&store, "discarded");
        store.abort_transaction().unwrap();

        assert!(store.exists(&commit));
        assert!(store.refs().list().unwrap().is_empty());
        assert!(store.journal().read_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_finalize_aborts() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        stage_empty_commit(&store, "cancel me");

        let cancel = Cancellable::new();
        cancel.cancel();
        let err = store.finalize_transaction("main", &cancel).unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(!store.is_transaction_active());
        assert_eq!(store.refs().get("main").unwrap(), None);
    }

    #[test]
    fn test_cancelled_finalize_without_commit_aborts() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        let cancel = Cancellable::new();
        cancel.cancel();

        let err = store.finalize_transaction("main", &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!store.is_transaction_active());
        assert_eq!(store.refs().get("main").unwrap(), None);
    }

    #[test]
    fn test_invalid_branch_keeps_transaction_open() {
        let (_temp_dir, store) = new_store();

        store.begin_transaction().unwrap();
        stage_empty_commit(&store, "bad branch");

        let err = store
            .finalize_transaction("../escape", &Cancellable::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRef { .. }));
        assert!(store.is_transaction_active());
    }

    #[test]
    fn test_guard_drop_aborts() {
        let (_temp_dir, store) = new_store();

        {
            let txn = store.transaction().unwrap();
            stage_empty_commit(txn.store(), "dropped");
            assert!(store.is_transaction_active());
        }

        assert!(!store.is_transaction_active());
        assert_eq!(store.refs().get("main").unwrap(), None);
        store.begin_transaction().unwrap();
    }

    #[test]
    fn test_guard_finalize() {
        let (_temp_dir, store) = new_store();

        let txn = store.transaction().unwrap();
        let commit = stage_empty_commit(txn.store(), "guarded");
        let finalized = txn.finalize("main", &Cancellable::new()).unwrap();

        assert_eq!(finalized.commit, commit);
        assert!(!store.is_transaction_active());
        assert_eq!(store.refs().get("main").unwrap(), Some(commit));
    }
}
