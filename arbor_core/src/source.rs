//! Tree source specifiers.

use crate::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where the content of a commit layer comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSource {
    /// A live directory.
    Directory(PathBuf),
    /// A tar archive, optionally gzip or zstd compressed.
    Archive {
        path: PathBuf,
        auto_create_parents: bool,
    },
    /// The root tree of an existing commit (branch name or checksum).
    Commit(String),
}

impl TreeSource {
    /// Parse `tar=<path>`, `dir=<path>`, `ref=<rev>` or a bare directory path.
    pub fn parse(spec: &str) -> Result<Self> {
        let Some((key, value)) = spec.split_once('=') else {
            if spec.is_empty() {
                return Err(Error::invalid_source(spec, "empty source"));
            }
            return Ok(TreeSource::Directory(PathBuf::from(spec)));
        };

        if value.is_empty() {
            return Err(Error::invalid_source(spec, "empty value"));
        }

        match key {
            "tar" => Ok(TreeSource::Archive {
                path: PathBuf::from(value),
                auto_create_parents: false,
            }),
            "dir" => Ok(TreeSource::Directory(PathBuf::from(value))),
            "ref" => Ok(TreeSource::Commit(value.to_string())),
            other => Err(Error::invalid_source(
                spec,
                format!("unknown source kind '{}'", other),
            )),
        }
    }
}

impl FromStr for TreeSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TreeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeSource::Directory(path) => write!(f, "dir={}", path.display()),
            TreeSource::Archive { path, .. } => write!(f, "tar={}", path.display()),
            TreeSource::Commit(rev) => write!(f, "ref={}", rev),
        }
    }
}
