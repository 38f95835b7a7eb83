//! Source dispatch and overlay merging.

use crate::cancel::Cancellable;
use crate::error::Result;
use crate::hash::Checksum;
use crate::source::TreeSource;
use crate::store::Store;
use crate::tree::TreeEntry;
use std::collections::BTreeMap;
use tracing::debug;

impl Store {
    /// Ingest one source and return its root tree.
    ///
    /// Requires an active transaction. `tar_auto_create_parents` applies to
    /// every archive source in addition to its own flag.
    pub fn ingest(
        &self,
        source: &TreeSource,
        tar_auto_create_parents: bool,
        cancel: &Cancellable,
    ) -> Result<Checksum> {
        self.require_transaction()?;
        self.check_cancelled(cancel)?;

        let root = match source {
            TreeSource::Directory(path) => self.ingest_directory(path, cancel)?,
            TreeSource::Archive {
                path,
                auto_create_parents,
            } => self.ingest_archive(path, *auto_create_parents || tar_auto_create_parents, cancel)?,
            TreeSource::Commit(rev) => {
                let commit = self.resolve_rev(rev)?;
                self.get_commit(&commit)?.tree
            }
        };

        debug!(%source, tree = %root.short(), "ingested source");
        Ok(root)
    }

    /// Ingest sources in order and overlay them into one root tree.
    ///
    /// No sources gives the empty tree.
    pub fn ingest_sources(
        &self,
        sources: &[TreeSource],
        tar_auto_create_parents: bool,
        cancel: &Cancellable,
    ) -> Result<Checksum> {
        self.require_transaction()?;

        let mut merged: Option<Checksum> = None;
        for source in sources {
            let tree = self.ingest(source, tar_auto_create_parents, cancel)?;
            merged = Some(match merged {
                Some(base) => self.merge_trees(&base, &tree, cancel)?,
                None => tree,
            });
        }

        match merged {
            Some(root) => Ok(root),
            None => self.put_tree(Vec::new()),
        }
    }

    /// Overlay `upper` on `base`.
    ///
    /// Directories present on both sides merge recursively and take the
    /// upper mode. Every other collision replaces the base entry.
    pub fn merge_trees(
        &self,
        base: &Checksum,
        upper: &Checksum,
        cancel: &Cancellable,
    ) -> Result<Checksum> {
        if base == upper {
            return Ok(*base);
        }

        let mut merged: BTreeMap<String, TreeEntry> = self
            .get_tree(base)?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        for entry in self.get_tree(upper)? {
            self.check_cancelled(cancel)?;

            let replacement = match merged.get(&entry.name) {
                Some(existing) if existing.is_tree() && entry.is_tree() => TreeEntry {
                    checksum: self.merge_trees(&existing.checksum, &entry.checksum, cancel)?,
                    ..entry
                },
                _ => entry,
            };
            merged.insert(replacement.name.clone(), replacement);
        }

        self.put_tree(merged.into_values().collect())
    }
}
