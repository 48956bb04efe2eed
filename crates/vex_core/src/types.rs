//! Persistent object kinds.
//!
//! Everything here is immutable once stored: maps are `BTreeMap`s so the
//! canonical encoding is deterministic, and every numeric field is an
//! integer.

use crate::codec::{self, Decoded, Persist};
use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Property maps attached to files, directories and tree entries.
pub type Props = BTreeMap<String, PropValue>;

/// A property value: boolean, integer or text. Floats are not expressible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean flag, e.g. `vex:executable`.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Text value, e.g. `vex:mime`.
    Text(String),
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file; `id` points at a [`FileEntry`].
    File,
    /// Directory; `id` points at a [`Tree`].
    Dir,
    /// Tracked empty directory. No target object.
    EmptyDir,
    /// Symbolic link; the target lives in `properties["vex:target"]`.
    Link,
}

/// One entry in a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry kind.
    pub kind: EntryKind,
    /// Target object, absent for `empty_dir`.
    pub id: Option<ObjectId>,
    /// Entry properties.
    pub properties: Props,
}

/// Ordered name → entry mapping for one directory level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Tree {
    /// Entries keyed by NFC-normalized name.
    pub entries: BTreeMap<String, TreeEntry>,
}

impl Persist for Tree {
    const KIND: &'static str = "tree";
}

/// File object: blob reference plus properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Contents.
    pub blob: ObjectId,
    /// File properties (executable bit, mime hint, eol policy, user-defined).
    pub properties: Props,
}

impl Persist for FileEntry {
    const KIND: &'static str = "file";
}

/// How a commit entered the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// Ordinary commit.
    Normal,
    /// Replaced the previous head in place.
    Amend,
    /// Applied from another branch.
    Apply,
    /// Replayed from another branch.
    Replay,
    /// Appended from another branch.
    Append,
    /// The root commit written by `init`.
    Init,
}

/// A commit. Single parent: branch history is linear by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Previous commit on this chain, absent for the init commit.
    pub parent: Option<ObjectId>,
    /// Root tree of the repository at this commit.
    pub root_tree: ObjectId,
    /// Author identity.
    pub author: Uuid,
    /// When this commit entered the current branch's history (Unix seconds).
    /// Non-decreasing along the parent chain.
    pub timestamp_applied: i64,
    /// When the underlying changes were originally authored.
    pub timestamp_written: i64,
    /// Commit message.
    pub message: String,
    /// Changelog entry describing the structural delta.
    pub changelog: Option<ObjectId>,
    /// How the commit was created.
    pub kind: CommitKind,
}

impl Persist for Commit {
    const KIND: &'static str = "commit";
}

/// One structural mutation recorded in a changelog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    /// Path gained a file.
    AddFile {
        /// The file object.
        id: ObjectId,
        /// File properties at add time.
        properties: Props,
    },
    /// File contents or properties changed.
    ModifyFile {
        /// The new file object.
        id: ObjectId,
        /// File properties after the change.
        properties: Props,
    },
    /// File removed.
    DeleteFile,
    /// Path gained a directory.
    AddDir {
        /// Directory properties.
        properties: Props,
    },
    /// Directory removed.
    DeleteDir,
    /// A single property changed without touching contents.
    SetProperty {
        /// Property name.
        name: String,
        /// New value.
        value: PropValue,
    },
}

/// Structural delta of one commit, chained for fast log without tree walks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangelogEntry {
    /// Previous changelog entry in the chain.
    pub prev: Option<ObjectId>,
    /// Mutations keyed by repository path.
    pub ops: BTreeMap<String, Vec<ChangeOp>>,
}

impl Persist for ChangelogEntry {
    const KIND: &'static str = "changelog";
}

/// A branch. The uuid is stable across renames; the name is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Current display name. Unique among live branches.
    pub name: String,
    /// Head commit.
    pub head: ObjectId,
    /// Commit this branch was created from.
    pub base: ObjectId,
    /// Branch this one was forked from, if any.
    pub upstream: Option<Uuid>,
    /// Stable identity.
    pub uuid: Uuid,
    /// Sealed branches accept no further commits.
    pub sealed: bool,
}

impl Persist for Branch {
    const KIND: &'static str = "branch";
}

/// Whether a session follows its branch head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Session moves with the branch head.
    Attached,
    /// Session is pinned to a commit.
    Detached,
}

/// A working-copy binding to a branch.
///
/// Several sessions may share a branch; each carries its own uncommitted
/// prepared state, working manifest and stash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identity.
    pub uuid: Uuid,
    /// Owning branch.
    pub branch: Uuid,
    /// The commit this session's working copy is based on.
    pub head: ObjectId,
    /// Prepared-but-unpromoted commit, if any.
    pub prepared: Option<ObjectId>,
    /// Working manifest: the tracked state of the working copy.
    pub manifest: ObjectId,
    /// Stash captured at the last switch away from this session.
    pub stash: Option<ObjectId>,
    /// Subtree prefix materialized into the working directory.
    pub prefix: String,
    /// Attached or detached.
    pub mode: SessionMode,
    /// Pending commit message buffer.
    pub message: String,
}

impl Persist for Session {
    const KIND: &'static str = "session";
}

/// Tracked-entry kind in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Matched an ignore rule; remembered so status can say why.
    Ignored,
}

/// Tracking state of one manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedState {
    /// Unchanged since the base commit.
    Tracked,
    /// Added, not yet committed.
    Added,
    /// Contents or properties differ from the base commit.
    Modified,
    /// Deleted from the working copy.
    Deleted,
    /// Replaced by an entry of a different kind.
    Replaced,
}

impl TrackedState {
    /// True for states that a commit must record.
    pub fn is_changed(self) -> bool {
        !matches!(self, TrackedState::Tracked)
    }
}

/// Per-path tracking bookkeeping in the working manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracked {
    /// Entry kind.
    pub kind: TrackedKind,
    /// Tracking state.
    pub state: TrackedState,
    /// Last stored contents (file object for files), if any.
    pub id: Option<ObjectId>,
    /// Properties.
    pub properties: Props,
    /// Whether the path is materialized in the working copy.
    pub working: bool,
    /// Last observed mtime, used to skip re-hashing unchanged files.
    pub mtime: Option<i64>,
    /// Last observed size.
    pub size: Option<u64>,
    /// Last observed mode bits.
    pub mode: Option<u32>,
    /// Stashed uncommitted contents, present while switched away.
    pub stash: Option<ObjectId>,
}

impl Tracked {
    /// A freshly added file entry.
    pub fn added_file(id: ObjectId, properties: Props) -> Self {
        Self {
            kind: TrackedKind::File,
            state: TrackedState::Added,
            id: Some(id),
            properties,
            working: true,
            mtime: None,
            size: None,
            mode: None,
            stash: None,
        }
    }

    /// A freshly added directory entry.
    pub fn added_dir() -> Self {
        Self {
            kind: TrackedKind::Dir,
            state: TrackedState::Added,
            id: None,
            properties: Props::new(),
            working: true,
            mtime: None,
            size: None,
            mode: None,
            stash: None,
        }
    }
}

/// Snapshot of the working copy's tracked state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    /// Entries keyed by repository path.
    pub entries: BTreeMap<String, Tracked>,
}

impl Persist for Manifest {
    const KIND: &'static str = "manifest";
}

/// One branch switch's cached uncommitted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    /// The session this stash belongs to.
    pub session: Uuid,
    /// Manifest at stash time, with per-entry stash blob ids filled in.
    pub manifest: ObjectId,
    /// Blobs holding uncommitted contents.
    pub unsaved: Vec<ObjectId>,
}

impl Persist for StashEntry {
    const KIND: &'static str = "stash";
}

/// Repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Include patterns: paths that `add` picks up.
    pub include: Vec<String>,
    /// Ignore patterns: paths that are never tracked.
    pub ignore: Vec<String>,
    /// The repository author.
    pub author: Uuid,
    /// Authors table object, if populated.
    pub authors: Option<ObjectId>,
    /// Enabled feature flags.
    pub features: Vec<String>,
}

impl Persist for Settings {
    const KIND: &'static str = "settings";
}

/// One known author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name.
    pub name: String,
    /// Contact address.
    pub email: String,
}

/// Author identities keyed by uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthorsTable {
    /// Known authors.
    pub entries: BTreeMap<Uuid, Author>,
}

impl Persist for AuthorsTable {
    const KIND: &'static str = "authors";
}

/// The command (plus arguments) that semantically undoes an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalOp {
    /// Canonical command name, or `__physical__` for pointer restore.
    pub command: String,
    /// Canonical arguments for logical replay.
    pub args: Value,
}

impl LogicalOp {
    /// Marker command for actions undoable by pointer restore alone.
    pub const PHYSICAL: &'static str = "__physical__";

    /// The physical inverse marker.
    pub fn physical() -> Self {
        Self {
            command: Self::PHYSICAL.to_string(),
            args: Value::Null,
        }
    }

    /// True when undo restores pointers instead of running a command.
    pub fn is_physical(&self) -> bool {
        self.command == Self::PHYSICAL
    }
}

/// Before/after values of one scratch pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerChange {
    /// Value before the action; absent when the pointer did not exist.
    pub old: Option<String>,
    /// Value after the action; absent when the action removed the pointer.
    pub new: Option<String>,
}

/// One user command's persistent record in the action log.
///
/// The hash of a record covers its predecessor (via `prev`), so truncation
/// of the chain is detectable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Previous action, absent for the first.
    pub prev: Option<ObjectId>,
    /// Canonical command name.
    pub command: String,
    /// Canonical arguments, for logical replay.
    pub args: Value,
    /// Pointer snapshot: name → (old, new). The `action_log_head` and
    /// `redo_stack_head` swaps are structural and never appear here.
    pub physical: BTreeMap<String, PointerChange>,
    /// How to semantically undo this action.
    pub inverse: LogicalOp,
    /// When the action was taken (Unix seconds).
    pub timestamp: i64,
}

impl Persist for ActionRecord {
    const KIND: &'static str = "action";
}

/// A redo-stack node.
///
/// `anchor` is the action-log position the alternatives apply to; undoing
/// back into an anchored position merges alternatives instead of stacking
/// duplicates, and a mutating command issued with a non-empty redo stack
/// adds itself as a sibling alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedoRecord {
    /// Action-log head value at the position these alternatives apply to.
    pub anchor: Option<ObjectId>,
    /// Candidate actions, oldest line first.
    pub alternatives: Vec<ObjectId>,
    /// The rest of the redo stack.
    pub prev: Option<ObjectId>,
}

impl Persist for RedoRecord {
    const KIND: &'static str = "redo";
}

/// Any decoded store object, for traversal and inspection.
#[derive(Debug)]
pub enum AnyObject {
    /// Raw contents.
    Blob(Vec<u8>),
    /// Directory level.
    Tree(Tree),
    /// File object.
    File(FileEntry),
    /// Commit.
    Commit(Commit),
    /// Changelog entry.
    Changelog(ChangelogEntry),
    /// Branch.
    Branch(Branch),
    /// Session.
    Session(Session),
    /// Working manifest.
    Manifest(Manifest),
    /// Stash entry.
    Stash(StashEntry),
    /// Settings.
    Settings(Settings),
    /// Authors table.
    Authors(AuthorsTable),
    /// Action record.
    Action(ActionRecord),
    /// Redo-stack node.
    Redo(RedoRecord),
}

impl AnyObject {
    /// Decodes any known object kind; unknown tags are corruption.
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let decoded = codec::decode(bytes, path)?;
        Self::from_decoded(decoded, path)
    }

    /// Converts an already-decoded document.
    pub fn from_decoded(decoded: Decoded, path: &Path) -> Result<Self> {
        let kind = decoded.kind.clone();
        let obj = match kind.as_str() {
            codec::BLOB_KIND => AnyObject::Blob(decoded.into_blob()?),
            Tree::KIND => AnyObject::Tree(decoded.into_typed()?),
            FileEntry::KIND => AnyObject::File(decoded.into_typed()?),
            Commit::KIND => AnyObject::Commit(decoded.into_typed()?),
            ChangelogEntry::KIND => AnyObject::Changelog(decoded.into_typed()?),
            Branch::KIND => AnyObject::Branch(decoded.into_typed()?),
            Session::KIND => AnyObject::Session(decoded.into_typed()?),
            Manifest::KIND => AnyObject::Manifest(decoded.into_typed()?),
            StashEntry::KIND => AnyObject::Stash(decoded.into_typed()?),
            Settings::KIND => AnyObject::Settings(decoded.into_typed()?),
            AuthorsTable::KIND => AnyObject::Authors(decoded.into_typed()?),
            ActionRecord::KIND => AnyObject::Action(decoded.into_typed()?),
            RedoRecord::KIND => AnyObject::Redo(decoded.into_typed()?),
            other => {
                return Err(VexError::CorruptObject {
                    path: path.to_path_buf(),
                    reason: format!("unknown kind tag '{}'", other),
                })
            }
        };
        Ok(obj)
    }

    /// The object's kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AnyObject::Blob(_) => codec::BLOB_KIND,
            AnyObject::Tree(_) => Tree::KIND,
            AnyObject::File(_) => FileEntry::KIND,
            AnyObject::Commit(_) => Commit::KIND,
            AnyObject::Changelog(_) => ChangelogEntry::KIND,
            AnyObject::Branch(_) => Branch::KIND,
            AnyObject::Session(_) => Session::KIND,
            AnyObject::Manifest(_) => Manifest::KIND,
            AnyObject::Stash(_) => StashEntry::KIND,
            AnyObject::Settings(_) => Settings::KIND,
            AnyObject::Authors(_) => AuthorsTable::KIND,
            AnyObject::Action(_) => ActionRecord::KIND,
            AnyObject::Redo(_) => RedoRecord::KIND,
        }
    }

    /// Every object id this object references, for reachability walks.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        match self {
            AnyObject::Blob(_) => {}
            AnyObject::Tree(tree) => {
                out.extend(tree.entries.values().filter_map(|e| e.id));
            }
            AnyObject::File(file) => out.push(file.blob),
            AnyObject::Commit(commit) => {
                out.extend(commit.parent);
                out.push(commit.root_tree);
                out.extend(commit.changelog);
            }
            AnyObject::Changelog(entry) => {
                out.extend(entry.prev);
                for ops in entry.ops.values() {
                    for op in ops {
                        match op {
                            ChangeOp::AddFile { id, .. } | ChangeOp::ModifyFile { id, .. } => {
                                out.push(*id)
                            }
                            _ => {}
                        }
                    }
                }
            }
            AnyObject::Branch(branch) => {
                out.push(branch.head);
                out.push(branch.base);
            }
            AnyObject::Session(session) => {
                out.push(session.head);
                out.extend(session.prepared);
                out.push(session.manifest);
                out.extend(session.stash);
            }
            AnyObject::Manifest(manifest) => {
                for tracked in manifest.entries.values() {
                    out.extend(tracked.id);
                    out.extend(tracked.stash);
                }
            }
            AnyObject::Stash(stash) => {
                out.push(stash.manifest);
                out.extend(stash.unsaved.iter().copied());
            }
            AnyObject::Settings(settings) => out.extend(settings.authors),
            AnyObject::Authors(_) => {}
            AnyObject::Action(action) => {
                out.extend(action.prev);
                for change in action.physical.values() {
                    for value in [&change.old, &change.new] {
                        if let Some(text) = value {
                            if let Ok(id) = ObjectId::from_hex(text) {
                                out.push(id);
                            }
                        }
                    }
                }
                collect_ids_from_value(&action.args, &mut out);
                collect_ids_from_value(&action.inverse.args, &mut out);
            }
            AnyObject::Redo(redo) => {
                out.extend(redo.anchor);
                out.extend(redo.alternatives.iter().copied());
                out.extend(redo.prev);
            }
        }
        out
    }
}

/// Collects anything that parses as an object id from a JSON value.
///
/// Logical-inverse arguments may embed blob ids (e.g. stashed contents for
/// `restore:revert`); those must stay reachable until the action is purged.
fn collect_ids_from_value(value: &Value, out: &mut Vec<ObjectId>) {
    match value {
        Value::String(s) => {
            if s.len() == ObjectId::HEX_LEN {
                if let Ok(id) = ObjectId::from_hex(s) {
                    out.push(id);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ids_from_value(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_ids_from_value(v, out)),
        _ => {}
    }
}
