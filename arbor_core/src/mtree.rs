//! In-memory mutable tree used to assemble archive contents.
//!
//! Archive entries arrive in arbitrary order and may name the same path
//! more than once, so they are collected here first and written to the
//! store bottom-up once the archive is exhausted.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::store::Store;
use crate::tree::{EntryType, FileMode, TreeEntry, Xattrs, file_modes};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::mem;
use tracing::debug;

/// A node of a [`MutableTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    /// Anything that is not a directory, already stored as a blob.
    Leaf {
        entry_type: EntryType,
        mode: FileMode,
        checksum: Checksum,
        xattrs: Xattrs,
    },
    /// A directory whose children are not yet written.
    Dir {
        mode: FileMode,
        xattrs: Xattrs,
        children: BTreeMap<String, Node>,
    },
}

impl Node {
    pub(crate) fn leaf(entry_type: EntryType, mode: FileMode, checksum: Checksum) -> Self {
        Node::Leaf {
            entry_type,
            mode,
            checksum,
            xattrs: Xattrs::new(),
        }
    }

    pub(crate) fn dir(mode: FileMode) -> Self {
        Node::Dir {
            mode,
            xattrs: Xattrs::new(),
            children: BTreeMap::new(),
        }
    }

    /// Replace the node's extended attributes.
    pub(crate) fn with_xattrs(mut self, new: Xattrs) -> Self {
        match &mut self {
            Node::Leaf { xattrs, .. } | Node::Dir { xattrs, .. } => *xattrs = new,
        }
        self
    }

    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Node::Dir { children, .. } => Some(children),
            Node::Leaf { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MutableTree {
    root: BTreeMap<String, Node>,
}

/// A directory queued for writing, with the entries collected for it so far.
struct PendingDir {
    /// Parent index, name, mode and xattrs; `None` for the root.
    slot: Option<(usize, String, FileMode, Xattrs)>,
    children: BTreeMap<String, Node>,
    entries: Vec<TreeEntry>,
}

impl MutableTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up a normalized `/`-separated path.
    pub(crate) fn get(&self, path: &str) -> Option<&Node> {
        let mut components = path.split('/');
        let first = components.next()?;
        let mut node = self.root.get(first)?;

        for name in components {
            match node {
                Node::Dir { children, .. } => node = children.get(name)?,
                Node::Leaf { .. } => return None,
            }
        }

        Some(node)
    }

    /// Insert `node` at a normalized `/`-separated path.
    ///
    /// Missing ancestors are an error unless `auto_create_parents` is set,
    /// in which case they are created with mode `040755`, shallowest first.
    pub(crate) fn insert(&mut self, path: &str, node: Node, auto_create_parents: bool) -> Result<()> {
        let components: Vec<&str> = path.split('/').collect();
        let Some((name, parents)) = components.split_last() else {
            return Err(Error::encoding(path, "Empty path"));
        };

        let mut children = &mut self.root;
        for (depth, component) in parents.iter().enumerate() {
            let parent = parents[..=depth].join("/");

            let next = match children.entry(component.to_string()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    if !auto_create_parents {
                        return Err(Error::missing_parent(path, parent));
                    }
                    debug!(path = %parent, "synthesized parent directory");
                    vacant.insert(Node::dir(file_modes::DIRECTORY))
                }
            };

            children = next
                .children_mut()
                .ok_or_else(|| Error::encoding(path, format!("Parent '{}' is not a directory", parent)))?;
        }

        match (children.entry(name.to_string()), node) {
            (
                Entry::Occupied(mut occupied),
                Node::Dir {
                    mode,
                    xattrs,
                    children: new_children,
                },
            ) => match occupied.get_mut() {
                // A repeated directory entry refreshes the metadata only
                Node::Dir {
                    mode: existing_mode,
                    xattrs: existing_xattrs,
                    ..
                } if new_children.is_empty() => {
                    *existing_mode = mode;
                    *existing_xattrs = xattrs;
                }
                existing => {
                    let replaced = mem::replace(
                        existing,
                        Node::Dir {
                            mode,
                            xattrs,
                            children: new_children,
                        },
                    );
                    drop_flat(replaced);
                }
            },
            (Entry::Occupied(mut occupied), node) => {
                drop_flat(occupied.insert(node));
            }
            (Entry::Vacant(vacant), node) => {
                vacant.insert(node);
            }
        }

        Ok(())
    }

    /// Write every directory to the store, deepest first, and return the
    /// root tree checksum.
    ///
    /// Directories are queued breadth first and written in reverse, so
    /// nesting depth never grows the call stack.
    pub(crate) fn write(mut self, store: &Store) -> Result<Checksum> {
        let mut dirs = vec![PendingDir {
            slot: None,
            children: mem::take(&mut self.root),
            entries: Vec::new(),
        }];

        let mut index = 0;
        while index < dirs.len() {
            let children = mem::take(&mut dirs[index].children);
            for (name, node) in children {
                match node {
                    Node::Leaf {
                        entry_type,
                        mode,
                        checksum,
                        xattrs,
                    } => {
                        let entry =
                            TreeEntry::new(entry_type, mode, checksum, name)?.with_xattrs(xattrs)?;
                        dirs[index].entries.push(entry);
                    }
                    Node::Dir {
                        mode,
                        xattrs,
                        children,
                    } => dirs.push(PendingDir {
                        slot: Some((index, name, mode, xattrs)),
                        children,
                        entries: Vec::new(),
                    }),
                }
            }
            index += 1;
        }

        // Parents always sit before their children
        for index in (1..dirs.len()).rev() {
            let entries = mem::take(&mut dirs[index].entries);
            let checksum = store.put_tree(entries)?;
            if let Some((parent, name, mode, xattrs)) = dirs[index].slot.take() {
                let entry =
                    TreeEntry::new(EntryType::Tree, mode, checksum, name)?.with_xattrs(xattrs)?;
                dirs[parent].entries.push(entry);
            }
        }

        let root = mem::take(&mut dirs[0].entries);
        store.put_tree(root)
    }
}

impl Drop for PendingDir {
    fn drop(&mut self) {
        for (_, node) in mem::take(&mut self.children) {
            drop_flat(node);
        }
    }
}

impl Drop for MutableTree {
    fn drop(&mut self) {
        for (_, node) in mem::take(&mut self.root) {
            drop_flat(node);
        }
    }
}

/// Drop a node without recursing once per directory level.
fn drop_flat(node: Node) {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if let Node::Dir { children, .. } = node {
            stack.extend(children.into_values());
        }
    }
}
