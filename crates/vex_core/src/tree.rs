//! Tree construction and surgery.
//!
//! Commits never rewrite trees in place: applying a changeset to a root
//! produces a new chain of tree objects, sharing every untouched subtree
//! with the old root.

use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::transaction::Transaction;
use crate::types::{ChangeOp, EntryKind, Manifest, Props, Tracked, TrackedKind, TrackedState, Tree, TreeEntry};
use std::collections::BTreeMap;

/// Read access shared by the store and an open transaction.
pub trait ReadTyped {
    /// Reads and decodes a typed object.
    fn read_typed<T: crate::codec::Persist>(&self, id: ObjectId) -> Result<T>;
}

impl ReadTyped for ObjectStore {
    fn read_typed<T: crate::codec::Persist>(&self, id: ObjectId) -> Result<T> {
        self.get_typed(id)
    }
}

impl ReadTyped for Transaction<'_> {
    fn read_typed<T: crate::codec::Persist>(&self, id: ObjectId) -> Result<T> {
        self.get_typed(id)
    }
}

/// Applies a changeset to a root tree, returning the new root id.
///
/// `root` of `None` starts from an empty tree (used by `init`).
pub fn apply_ops(
    txn: &mut Transaction<'_>,
    root: Option<ObjectId>,
    ops: &BTreeMap<String, Vec<ChangeOp>>,
) -> Result<ObjectId> {
    let mut tree = match root {
        Some(id) => txn.get_typed::<Tree>(id)?,
        None => Tree::default(),
    };

    // Shallow-to-deep so a parent directory exists before its children.
    let mut paths: Vec<&String> = ops.keys().collect();
    paths.sort_by_key(|p| (p.matches('/').count(), p.as_str().to_string()));

    for path in paths {
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        if parts.is_empty() || parts[0].is_empty() {
            // Ops addressed at "/" (the root itself) need no entry edits.
            continue;
        }
        for op in &ops[path] {
            tree = apply_one(txn, tree, &parts, op)?;
        }
    }

    txn.put_typed(&tree)
}

fn apply_one(
    txn: &mut Transaction<'_>,
    mut tree: Tree,
    parts: &[&str],
    op: &ChangeOp,
) -> Result<Tree> {
    let name = parts[0].to_string();

    if parts.len() == 1 {
        match op {
            ChangeOp::AddFile { id, properties } | ChangeOp::ModifyFile { id, properties } => {
                tree.entries.insert(
                    name,
                    TreeEntry {
                        kind: EntryKind::File,
                        id: Some(*id),
                        properties: properties.clone(),
                    },
                );
            }
            ChangeOp::DeleteFile | ChangeOp::DeleteDir => {
                tree.entries.remove(&name);
            }
            ChangeOp::AddDir { properties } => {
                tree.entries.entry(name).or_insert(TreeEntry {
                    kind: EntryKind::EmptyDir,
                    id: None,
                    properties: properties.clone(),
                });
            }
            ChangeOp::SetProperty { name: prop, value } => {
                if let Some(entry) = tree.entries.get_mut(&name) {
                    entry.properties.insert(prop.clone(), value.clone());
                } else {
                    return Err(VexError::domain(format!(
                        "no tree entry named '{}'",
                        name
                    )));
                }
            }
        }
        return Ok(tree);
    }

    // Descend, converting a tracked empty directory into a real subtree.
    let child = tree.entries.get(&name);
    let subtree = match child {
        Some(TreeEntry {
            kind: EntryKind::Dir,
            id: Some(id),
            ..
        }) => txn.get_typed::<Tree>(*id)?,
        Some(TreeEntry {
            kind: EntryKind::EmptyDir,
            ..
        })
        | None => Tree::default(),
        Some(other) => {
            return Err(VexError::domain(format!(
                "'{}' is a {:?}, not a directory",
                name, other.kind
            )))
        }
    };
    let properties = child.map(|e| e.properties.clone()).unwrap_or_default();

    let new_subtree = apply_one(txn, subtree, &parts[1..], op)?;
    if new_subtree.entries.is_empty() {
        // A subtree emptied by deletes collapses back to a first-class
        // empty directory.
        tree.entries.insert(
            name,
            TreeEntry {
                kind: EntryKind::EmptyDir,
                id: None,
                properties,
            },
        );
    } else {
        let subtree_id = txn.put_typed(&new_subtree)?;
        tree.entries.insert(
            name,
            TreeEntry {
                kind: EntryKind::Dir,
                id: Some(subtree_id),
                properties,
            },
        );
    }
    Ok(tree)
}

/// Looks up a repository path in a tree, returning its entry.
pub fn lookup<S: ReadTyped>(source: &S, root: ObjectId, path: &str) -> Result<Option<TreeEntry>> {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return Ok(Some(TreeEntry {
            kind: EntryKind::Dir,
            id: Some(root),
            properties: Props::new(),
        }));
    }

    let mut tree: Tree = source.read_typed(root)?;
    for (i, part) in parts.iter().enumerate() {
        let Some(entry) = tree.entries.get(*part) else {
            return Ok(None);
        };
        if i == parts.len() - 1 {
            return Ok(Some(entry.clone()));
        }
        match (entry.kind, entry.id) {
            (EntryKind::Dir, Some(id)) => tree = source.read_typed(id)?,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Flattens a tree into `repo path → entry`, directories included.
pub fn flatten<S: ReadTyped>(
    source: &S,
    root: ObjectId,
) -> Result<BTreeMap<String, TreeEntry>> {
    let mut out = BTreeMap::new();
    flatten_into(source, root, "", &mut out)?;
    Ok(out)
}

fn flatten_into<S: ReadTyped>(
    source: &S,
    tree_id: ObjectId,
    base: &str,
    out: &mut BTreeMap<String, TreeEntry>,
) -> Result<()> {
    let tree: Tree = source.read_typed(tree_id)?;
    for (name, entry) in tree.entries {
        let path = format!("{}/{}", base, name);
        match (entry.kind, entry.id) {
            (EntryKind::Dir, Some(id)) => {
                out.insert(path.clone(), entry);
                flatten_into(source, id, &path, out)?;
            }
            _ => {
                out.insert(path, entry);
            }
        }
    }
    Ok(())
}

/// Builds a fresh manifest from a commit's root tree: every entry
/// `tracked`, with `working` decided later by the prefix.
pub fn manifest_from_tree<S: ReadTyped>(source: &S, root: ObjectId) -> Result<Manifest> {
    let mut manifest = Manifest::default();
    manifest.entries.insert(
        "/".to_string(),
        Tracked {
            kind: TrackedKind::Dir,
            state: TrackedState::Tracked,
            id: None,
            properties: Props::new(),
            working: false,
            mtime: None,
            size: None,
            mode: None,
            stash: None,
        },
    );

    for (path, entry) in flatten(source, root)? {
        let tracked = match entry.kind {
            EntryKind::File | EntryKind::Link => Tracked {
                kind: TrackedKind::File,
                state: TrackedState::Tracked,
                id: entry.id,
                properties: entry.properties,
                working: false,
                mtime: None,
                size: None,
                mode: None,
                stash: None,
            },
            EntryKind::Dir | EntryKind::EmptyDir => Tracked {
                kind: TrackedKind::Dir,
                state: TrackedState::Tracked,
                id: None,
                properties: entry.properties,
                working: false,
                mtime: None,
                size: None,
                mode: None,
                stash: None,
            },
        };
        manifest.entries.insert(path, tracked);
    }

    Ok(manifest)
}
