//! Writing stored content back to the filesystem.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::object::Object;
use crate::store::Store;
use crate::tree::{EntryType, FileMode, Xattrs, file_modes};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

impl Store {
    /// Materialize a commit, tree or blob at `dest`.
    ///
    /// `rev` is a branch name or a checksum. A commit checks out its root
    /// tree. Fails with `PathExists` if `dest` exists.
    pub fn checkout(&self, rev: &str, dest: &Path) -> Result<Checksum> {
        if dest.symlink_metadata().is_ok() {
            return Err(Error::path_exists(dest));
        }

        let checksum = self.resolve_rev(rev)?;
        match self.get(&checksum)? {
            Object::Commit(commit) => self.checkout_tree(&commit.tree, dest)?,
            Object::Tree(_) => self.checkout_tree(&checksum, dest)?,
            Object::Blob(data) => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(dest, data).map_err(|e| Error::file_io(dest, e))?;
            }
        }

        debug!(rev, dest = %dest.display(), "checked out");
        Ok(checksum)
    }

    fn checkout_tree(&self, checksum: &Checksum, dest: &Path) -> Result<()> {
        let entries = self.get_tree(checksum)?;

        fs::create_dir_all(dest).map_err(|e| Error::file_io(dest, e))?;

        for entry in entries {
            let entry_path = dest.join(&entry.name);

            match entry.entry_type {
                EntryType::Blob => {
                    let payload = self.get_blob(&entry.checksum)?;
                    fs::write(&entry_path, payload).map_err(|e| Error::file_io(&entry_path, e))?;
                    restore_xattrs(&entry_path, &entry.xattrs);
                    set_file_mode(&entry_path, entry.mode)?;
                }
                EntryType::Tree => {
                    self.checkout_tree(&entry.checksum, &entry_path)?;
                    // Applied after the children so read-only directories can be filled
                    restore_xattrs(&entry_path, &entry.xattrs);
                    set_file_mode(&entry_path, entry.mode)?;
                }
                EntryType::Symlink => {
                    let target = self.get_blob(&entry.checksum)?;
                    create_symlink(&target, &entry_path)?;
                    restore_xattrs(&entry_path, &entry.xattrs);
                }
                EntryType::Special => {
                    warn!(
                        path = %entry_path.display(),
                        mode = format!("{:o}", entry.mode),
                        "skipping special file"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Best effort: `security.*` and `trusted.*` usually need privileges.
fn restore_xattrs(path: &Path, xattrs: &Xattrs) {
    for (name, value) in xattrs {
        if let Err(e) = xattr::set(path, name, value) {
            warn!(path = %path.display(), xattr = %name, error = %e, "could not restore xattr");
        }
    }
}

/// Set file mode (permissions) on a path.
#[cfg(unix)]
fn set_file_mode(path: &Path, mode: FileMode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(mode & file_modes::PERM_MASK);
    fs::set_permissions(path, perms).map_err(|e| Error::file_io(path, e))
}

/// Set file mode (Windows no-op).
#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: FileMode) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &[u8], path: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), path)
        .map_err(|e| Error::file_io(path, e))
}

#[cfg(not(unix))]
fn create_symlink(target: &[u8], path: &Path) -> Result<()> {
    // Without symlink support the target is written as a plain file
    fs::write(path, target).map_err(|e| Error::file_io(path, e))
}
