//! Branch references under `refs/heads`.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::journal::JournalEntry;
use crate::store::Store;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manages branch references in the store.
///
/// Each branch is one file holding the hex checksum of its tip commit.
/// Names may contain `/`, which maps to subdirectories.
pub struct RefManager<'a> {
    store: &'a Store,
}

impl<'a> RefManager<'a> {
    /// Create a new RefManager for the given store.
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    fn heads_dir(&self) -> PathBuf {
        self.store.root().join("refs").join("heads")
    }

    /// Check a branch name without touching the filesystem.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_ref("Ref name cannot be empty"));
        }

        if let Some(c) = name
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || *c == '\\' || *c == '|')
        {
            return Err(Error::invalid_ref(format!(
                "Invalid ref name: {:?} (contains {:?})",
                name, c
            )));
        }

        if name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(Error::invalid_ref(format!(
                "Invalid ref name: {:?} (empty, '.' or '..' segment)",
                name
            )));
        }

        Ok(())
    }

    /// Get the path to a reference file.
    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        self.validate_name(name)?;
        Ok(self.heads_dir().join(name))
    }

    /// Point a branch at `checksum`, creating it if needed.
    ///
    /// The file is replaced atomically; readers see the old or the new tip.
    pub fn set(&self, name: &str, checksum: &Checksum) -> Result<()> {
        let path = self.ref_path(name)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::invalid_ref(format!("Invalid ref name: {:?}", name)))?;
        fs::create_dir_all(parent).map_err(|e| Error::file_io(parent, e))?;

        // Staged outside refs/heads so listings never see partial files
        let mut temp_file = tempfile::NamedTempFile::new_in(self.store.root().join("refs"))?;
        writeln!(temp_file, "{}", checksum.to_hex())?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&path)?;

        debug!(branch = name, commit = %checksum.short(), "updated ref");
        Ok(())
    }

    /// Get the current tip of a branch.
    pub fn get(&self, name: &str) -> Result<Option<Checksum>> {
        let path = self.ref_path(name)?;

        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| Error::file_io(&path, e))?;
        Checksum::from_hex(content.trim())
            .map(Some)
            .map_err(|e| Error::invalid_ref(format!("Ref {} is unreadable: {}", name, e)))
    }

    /// List all branches.
    ///
    /// Returns a vector of (name, checksum) pairs sorted by name.
    pub fn list(&self) -> Result<Vec<(String, Checksum)>> {
        let mut refs = Vec::new();
        let heads = self.heads_dir();

        if heads.exists() {
            self.collect(&heads, "", &mut refs)?;
        }

        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<(String, Checksum)>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = if prefix.is_empty() {
                file_name.to_string()
            } else {
                format!("{}/{}", prefix, file_name)
            };

            if path.is_dir() {
                self.collect(&path, &name, out)?;
            } else if let Some(checksum) = self.get(&name)? {
                out.push((name, checksum));
            }
        }

        Ok(())
    }

    /// Remove a branch and record the deletion in the journal.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.ref_path(name)?;
        let checksum = self.get(name)?.ok_or_else(|| Error::ref_not_found(name))?;

        fs::remove_file(&path).map_err(|e| Error::file_io(&path, e))?;

        // Prune directories left empty by nested names
        let heads = self.heads_dir();
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == heads || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }

        self.store.journal().append(&JournalEntry::new(
            chrono::Utc::now().timestamp(),
            "delete".to_string(),
            checksum,
            name.to_string(),
            String::new(),
        ))?;

        debug!(branch = name, "removed ref");
        Ok(())
    }
}
