//! The project model: repository handle, command catalog, undo/redo.
//!
//! Every mutating command runs as exactly one transaction plus one
//! action-log append. Handlers stage object writes and pointer updates
//! and return the command's logical inverse along with a deferred
//! working-copy plan; the driver turns that into an [`ActionRecord`]
//! and commits. `undo` consumes the most recent record, restoring
//! pointers when the inverse is physical and re-running the recorded
//! inverse command when it is not. `redo` re-applies from the redo
//! stack.

use crate::error::{Result, VexError};
use crate::history;
use crate::lock::{RepoLock, DEFAULT_LOCK_TIMEOUT};
use crate::manifest::{self, Matcher, PathStatus, StatusReport};
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::scratch::{
    branch_ptr, name_ptr, session_ptr, ScratchStore, ACTION_LOG_HEAD, ACTIVE_SESSION,
    REDO_STACK_HEAD, SETTINGS,
};
use crate::transaction::{self, Recovery, Transaction};
use crate::tree;
use crate::types::{
    ActionRecord, Branch, ChangeOp, Commit, CommitKind, FileEntry, LogicalOp, Manifest, PropValue,
    Props, RedoRecord, Session, SessionMode, Settings, StashEntry, Tracked, TrackedKind,
    TrackedState,
};
use crate::worktree::{self, WorkOp, WorkPlan, VEX_DIR};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use uuid::Uuid;

/// Environment variable naming an explicit repository root.
pub const VEX_REPO_ENV: &str = "VEX_REPO";

/// How an action is undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseKind {
    /// Restoring the recorded pointer values suffices.
    Physical,
    /// The recorded inverse command must be run back through the
    /// command layer.
    Logical,
}

/// One entry in the fixed command registry.
pub struct CommandSpec {
    /// Canonical colon-separated name.
    pub name: &'static str,
    /// Inverse discipline.
    pub inverse: InverseKind,
    /// Internal commands exist only as recorded inverses; the CLI never
    /// exposes them.
    pub internal: bool,
}

/// The fixed catalog of mutating commands. Read-only commands (`status`,
/// `log`, listings, `debug:*`) never appear in the action log and are
/// not registered.
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "init", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "init:revert", inverse: InverseKind::Physical, internal: true },
    CommandSpec { name: "add", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "forget", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "remove", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "remove:revert", inverse: InverseKind::Physical, internal: true },
    CommandSpec { name: "restore", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "restore:revert", inverse: InverseKind::Physical, internal: true },
    CommandSpec { name: "ignore", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "include", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "commit", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "commit:prepare", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "commit:amend", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "switch", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "branch:new", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "branch:open", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "branch:saveas", inverse: InverseKind::Logical, internal: false },
    CommandSpec { name: "branch:attach", inverse: InverseKind::Physical, internal: true },
    CommandSpec { name: "session:open", inverse: InverseKind::Logical, internal: true },
    CommandSpec { name: "branch:swap", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "branch:rename", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "prop:set", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "message:set", inverse: InverseKind::Physical, internal: false },
    CommandSpec { name: "purge", inverse: InverseKind::Physical, internal: false },
];

/// Looks a command up in the registry.
pub fn lookup_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

// Canonical argument shapes. These serialize into `ActionRecord.args`
// and must stay replayable, so paths are repository paths.

#[derive(Debug, Serialize, Deserialize)]
struct FilesArgs {
    files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PatternsArgs {
    patterns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageOptArgs {
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwitchArgs {
    prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionOpenArgs {
    session: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
struct BranchAttachArgs {
    session: Uuid,
    branch: Uuid,
    drop_branch: Uuid,
    drop_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct InitArgs {
    prefix: String,
    include: Vec<String>,
    ignore: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RevertEntry {
    path: String,
    blob: Option<ObjectId>,
    file: Option<ObjectId>,
    state: TrackedState,
    executable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RevertArgs {
    entries: Vec<RevertEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PropSetArgs {
    file: String,
    name: String,
    value: PropValue,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageArgs {
    message: String,
}

/// What a handler hands back to the driver.
struct Outcome {
    inverse: LogicalOp,
    work: WorkPlan,
    output: Value,
}

impl Outcome {
    fn physical(output: Value) -> Self {
        Self {
            inverse: LogicalOp::physical(),
            work: WorkPlan::default(),
            output,
        }
    }
}

/// Result of running one command.
#[derive(Debug)]
pub struct CommandReport {
    /// Canonical command name.
    pub command: String,
    /// False when nothing changed (no action appended) or fake mode ran.
    pub applied: bool,
    /// Command-specific JSON output.
    pub output: Value,
    /// Descriptions of working-copy changes that were (or would be) made.
    pub work: Vec<String>,
}

/// One line of `log` output.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// 0 for prepared commits, then -1, -2, … along the applied chain.
    pub offset: i64,
    /// Commit id.
    pub id: ObjectId,
    /// Commit kind.
    pub kind: CommitKind,
    /// When the commit entered the branch history.
    pub timestamp_applied: i64,
    /// Commit message.
    pub message: String,
}

/// Scratch and transaction state, for `debug:status`.
#[derive(Debug, Serialize)]
pub struct DebugStatus {
    /// Every pointer and its value.
    pub pointers: BTreeMap<String, String>,
    /// Whether a `pending/` directory is on disk.
    pub pending: bool,
    /// Whether a `plan` file is on disk.
    pub plan: bool,
}

/// A vex repository handle.
pub struct Project {
    working_dir: PathBuf,
    vex_dir: PathBuf,
    store: ObjectStore,
    scratch: ScratchStore,
    fake: bool,
    debug: bool,
    recovered: Option<Recovery>,
    time_provider: Option<Arc<dyn Fn() -> i64 + Send + Sync>>,
}

impl Project {
    /// Resolves the repository root: `VEX_REPO` if set, else the nearest
    /// ancestor of `start` containing `.vex/`.
    pub fn discover(start: &Path) -> Result<PathBuf> {
        if let Ok(explicit) = std::env::var(VEX_REPO_ENV) {
            let root = PathBuf::from(explicit);
            if root.join(".vex").exists() {
                return Ok(root);
            }
            return Err(VexError::domain(format!(
                "{} does not name a vex repository",
                VEX_REPO_ENV
            )));
        }

        let mut current = Some(start);
        while let Some(dir) = current {
            if dir.join(".vex").exists() {
                return Ok(dir.to_path_buf());
            }
            current = dir.parent();
        }
        Err(VexError::domain("not inside a vex repository"))
    }

    /// Opens an existing repository, running crash recovery first.
    pub fn open(working_dir: impl AsRef<Path>) -> Result<Self> {
        let working_dir = working_dir.as_ref().to_path_buf();
        let vex_dir = working_dir.join(".vex");
        if !vex_dir.join("scratch").exists() && !vex_dir.join("cas").exists() {
            return Err(VexError::domain(format!(
                "not a vex repository: {}",
                working_dir.display()
            )));
        }

        let store = ObjectStore::new(vex_dir.join("cas"));
        let scratch = ScratchStore::new(vex_dir.join("scratch"));

        let recovered = {
            let _lock = RepoLock::exclusive(&vex_dir.join("lock"), DEFAULT_LOCK_TIMEOUT)?;
            transaction::recover(&scratch, &vex_dir)?
        };

        Ok(Self {
            working_dir,
            vex_dir,
            store,
            scratch,
            fake: false,
            debug: false,
            recovered,
            time_provider: None,
        })
    }

    /// Initializes a repository: scaffold plus the `init` action.
    ///
    /// `prefix` defaults to `/<basename of the working directory>`.
    pub fn init(
        working_dir: impl AsRef<Path>,
        prefix: Option<&str>,
        include: Vec<String>,
        ignore: Vec<String>,
    ) -> Result<Self> {
        let working_dir = working_dir.as_ref().to_path_buf();
        let vex_dir = working_dir.join(".vex");

        let scratch = ScratchStore::new(vex_dir.join("scratch"));
        if scratch.get(ACTION_LOG_HEAD)?.is_some() || scratch.get(ACTIVE_SESSION)?.is_some() {
            return Err(VexError::domain("repository already initialized"));
        }

        fs::create_dir_all(vex_dir.join("cas"))?;
        fs::create_dir_all(vex_dir.join("scratch"))?;

        let prefix = match prefix {
            Some(p) => worktree::normalize_repo_path(p)?,
            None => {
                let base = working_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("work");
                format!("/{}", base)
            }
        };

        let project = Self {
            store: ObjectStore::new(vex_dir.join("cas")),
            scratch,
            working_dir,
            vex_dir,
            fake: false,
            debug: false,
            recovered: None,
            time_provider: None,
        };

        let args = args_value(InitArgs {
            prefix,
            include,
            ignore,
        });
        project.run_logged("init", args)?;
        Ok(project)
    }

    /// Runs commands through the transaction layer but aborts instead of
    /// committing, narrating what would have been written.
    pub fn with_fake(mut self, fake: bool) -> Self {
        self.fake = fake;
        self
    }

    /// Leaves half-applied state in place on domain errors, for
    /// inspection via `debug:status` / `debug:rollback`.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Injects a clock, for tests.
    pub fn with_time_provider(
        mut self,
        provider: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// What recovery did when the repository was opened, if anything.
    pub fn recovered(&self) -> Option<Recovery> {
        self.recovered
    }

    /// The working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The `.vex` directory.
    pub fn vex_dir(&self) -> &Path {
        &self.vex_dir
    }

    /// The object store.
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// The scratch pointer store.
    pub fn scratch(&self) -> &ScratchStore {
        &self.scratch
    }

    fn now(&self) -> i64 {
        match &self.time_provider {
            Some(provider) => provider(),
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.vex_dir.join("lock")
    }

    // ===== public command surface =====

    /// `add`: track files, recording their current contents.
    pub fn add(&self, paths: &[PathBuf]) -> Result<CommandReport> {
        let files = self.to_repo_paths(paths)?;
        self.run_logged("add", args_value(FilesArgs { files }))
    }

    /// `forget`: untrack paths without touching the working copy.
    pub fn forget(&self, paths: &[PathBuf]) -> Result<CommandReport> {
        let files = self.to_repo_paths(paths)?;
        self.run_logged("forget", args_value(FilesArgs { files }))
    }

    /// `remove`: untrack paths and delete them from the working copy.
    pub fn remove(&self, paths: &[PathBuf]) -> Result<CommandReport> {
        let files = self.to_repo_paths(paths)?;
        self.run_logged("remove", args_value(FilesArgs { files }))
    }

    /// `restore`: overwrite working-copy paths from the current commit.
    pub fn restore(&self, paths: &[PathBuf]) -> Result<CommandReport> {
        let files = self.to_repo_paths(paths)?;
        self.run_logged("restore", args_value(FilesArgs { files }))
    }

    /// `ignore`: add ignore patterns.
    pub fn ignore(&self, patterns: Vec<String>) -> Result<CommandReport> {
        self.run_logged(
            "ignore",
            args_value(PatternsArgs { patterns }),
        )
    }

    /// `include`: add include patterns.
    pub fn include(&self, patterns: Vec<String>) -> Result<CommandReport> {
        self.run_logged(
            "include",
            args_value(PatternsArgs { patterns }),
        )
    }

    /// `commit`: promote prepared and working changes into a new commit.
    pub fn commit(&self, message: Option<String>) -> Result<CommandReport> {
        self.run_logged(
            "commit",
            args_value(MessageOptArgs { message }),
        )
    }

    /// `commit:prepare`: capture working changes without moving the head.
    pub fn prepare(&self) -> Result<CommandReport> {
        self.run_logged("commit:prepare", json!({}))
    }

    /// `commit:amend`: replace the branch head with a corrected commit.
    pub fn amend(&self, message: Option<String>) -> Result<CommandReport> {
        self.run_logged(
            "commit:amend",
            args_value(MessageOptArgs { message }),
        )
    }

    /// `switch`: change the checkout prefix.
    pub fn switch(&self, prefix: &str) -> Result<CommandReport> {
        let prefix = worktree::normalize_repo_path(prefix)?;
        self.run_logged("switch", args_value(SwitchArgs { prefix }))
    }

    /// `branch:new`: create a branch at the current head and open it.
    pub fn branch_new(&self, name: &str) -> Result<CommandReport> {
        let name = self.branch_name(name)?;
        self.run_logged("branch:new", args_value(NameArgs { name }))
    }

    /// `branch:open`: switch to another branch, stashing uncommitted work.
    pub fn branch_open(&self, name: &str) -> Result<CommandReport> {
        let name = self.branch_name(name)?;
        self.run_logged(
            "branch:open",
            args_value(NameArgs { name }),
        )
    }

    /// `branch:saveas`: fork the current state into a new branch,
    /// keeping the working copy as it is.
    pub fn branch_saveas(&self, name: &str) -> Result<CommandReport> {
        let name = self.branch_name(name)?;
        self.run_logged(
            "branch:saveas",
            args_value(NameArgs { name }),
        )
    }

    /// `branch:swap`: exchange names with another branch.
    pub fn branch_swap(&self, name: &str) -> Result<CommandReport> {
        let name = self.branch_name(name)?;
        self.run_logged(
            "branch:swap",
            args_value(NameArgs { name }),
        )
    }

    /// `branch:rename`: rename the active branch.
    pub fn branch_rename(&self, name: &str) -> Result<CommandReport> {
        let name = self.branch_name(name)?;
        self.run_logged(
            "branch:rename",
            args_value(NameArgs { name }),
        )
    }

    /// `prop:set`: set a file property in the working manifest.
    pub fn prop_set(&self, path: &Path, name: &str, value: PropValue) -> Result<CommandReport> {
        let file = self
            .to_repo_paths(std::slice::from_ref(&path.to_path_buf()))?
            .remove(0);
        self.run_logged(
            "prop:set",
            args_value(PropSetArgs {
                file,
                name: name.to_string(),
                value,
            }),
        )
    }

    /// `message:set`: set the pending commit message.
    pub fn message_set(&self, message: &str) -> Result<CommandReport> {
        self.run_logged(
            "message:set",
            args_value(MessageArgs {
                message: message.to_string(),
            }),
        )
    }

    /// `purge`: rewrite history with the given paths removed.
    pub fn purge(&self, paths: &[PathBuf]) -> Result<CommandReport> {
        let files = self.to_repo_paths(paths)?;
        self.run_logged("purge", args_value(FilesArgs { files }))
    }

    // ===== undo / redo =====

    /// Undoes the most recent action. `Ok(None)` when the log is empty.
    pub fn undo(&self) -> Result<Option<CommandReport>> {
        let _lock = RepoLock::exclusive(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;

        let Some(head_id) = history::head(&self.scratch)? else {
            return Ok(None);
        };
        let record: ActionRecord = self.store.get_typed(head_id)?;

        let mut txn = Transaction::begin(&self.store, &self.scratch, &self.vex_dir)?;
        let work = if record.inverse.is_physical() {
            for (name, change) in &record.physical {
                txn.set_pointer(name, change.old.clone());
            }
            WorkPlan::default()
        } else {
            match self.dispatch(&mut txn, &record.inverse.command, &record.inverse.args) {
                Ok(outcome) => outcome.work,
                Err(e) => {
                    self.fail_txn(txn, &e)?;
                    return Err(e);
                }
            }
        };
        history::plan_undo(&mut txn, head_id, record.prev)?;

        let work_desc = work.describe_all();
        if self.fake {
            self.narrate(&txn);
            txn.abort()?;
            work.execute(&self.store, true)?;
        } else {
            txn.commit()?;
            work.execute(&self.store, false)?;
        }

        Ok(Some(CommandReport {
            command: record.command,
            applied: !self.fake,
            output: json!({ "undone": head_id.as_hex() }),
            work: work_desc,
        }))
    }

    /// Redoes an undone action. `choice` is 1-based among the current
    /// alternatives (default 1). `Ok(None)` when the redo stack is empty.
    pub fn redo(&self, choice: Option<usize>) -> Result<Option<CommandReport>> {
        let _lock = RepoLock::exclusive(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;

        let Some(node_id) = self.scratch.get_id(REDO_STACK_HEAD)? else {
            return Ok(None);
        };
        let node: RedoRecord = self.store.get_typed(node_id)?;

        let choice = choice.unwrap_or(1);
        if choice == 0 || choice > node.alternatives.len() {
            return Err(VexError::domain(format!(
                "no redo choice {} (have {})",
                choice,
                node.alternatives.len()
            )));
        }
        let action_id = node.alternatives[choice - 1];
        let action: ActionRecord = self.store.get_typed(action_id)?;
        let current = history::head(&self.scratch)?;

        let mut txn = Transaction::begin(&self.store, &self.scratch, &self.vex_dir)?;
        let mut work = WorkPlan::default();

        if Some(action_id) == current {
            // Choosing the line we are already on just dismisses it.
            history::plan_consume(&mut txn, &node, action_id)?;
        } else if action.inverse.is_physical() && action.prev == current {
            // The chain still links here: a pointer forward-swap suffices.
            for (name, change) in &action.physical {
                txn.set_pointer(name, change.new.clone());
            }
            txn.set_pointer(ACTION_LOG_HEAD, Some(action_id.as_hex()));
            history::plan_consume(&mut txn, &node, action_id)?;
        } else {
            // The state diverged (or the action has external effects):
            // replay the command logically as a fresh action.
            let outcome = match self.dispatch(&mut txn, &action.command, &action.args) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.fail_txn(txn, &e)?;
                    return Err(e);
                }
            };
            work = outcome.work;
            let record = ActionRecord {
                prev: current,
                command: action.command.clone(),
                args: action.args.clone(),
                physical: txn.physical_map(),
                inverse: outcome.inverse,
                timestamp: self.now(),
            };
            txn.stage_action(&record)?;
            history::plan_consume(&mut txn, &node, action_id)?;
        }

        let work_desc = work.describe_all();
        if self.fake {
            self.narrate(&txn);
            txn.abort()?;
            work.execute(&self.store, true)?;
        } else {
            txn.commit()?;
            work.execute(&self.store, false)?;
        }

        Ok(Some(CommandReport {
            command: action.command,
            applied: !self.fake,
            output: json!({ "redone": action_id.as_hex() }),
            work: work_desc,
        }))
    }

    /// `undo:list`: the applied actions, most recent first.
    pub fn undo_list(&self, limit: usize) -> Result<Vec<(ObjectId, ActionRecord)>> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        history::entries(&self.store, history::head(&self.scratch)?, limit)
    }

    /// `redo:list`: the alternatives redo would pick from.
    pub fn redo_list(&self) -> Result<Vec<(ObjectId, ActionRecord)>> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        history::redo_alternatives(&self.store, &self.scratch)
    }

    // ===== read-only queries =====

    /// `status`: tracked-state report plus untracked files, computed
    /// in memory; appends nothing to the action log.
    pub fn status(&self) -> Result<StatusReport> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;

        let (_, session) = self.active_direct()?;
        let mut manifest: Manifest = self.store.get_typed(session.manifest)?;
        let settings = self.settings_direct()?;
        let matcher = Matcher::new(&settings.include, &settings.ignore)?;
        let now = self.now();

        let mut report = StatusReport::default();
        for (path, entry) in manifest.entries.iter_mut() {
            if !entry.working {
                continue;
            }
            if let Some(full) = worktree::repo_to_full(&self.working_dir, &session.prefix, path) {
                if manifest::refresh_entry(entry, &full, now) == manifest::Refresh::Probe
                    && !same_content(&self.store, entry, &full)
                {
                    entry.state = TrackedState::Modified;
                }
            }
            if path == "/" || worktree::under(path, VEX_DIR) {
                continue;
            }
            report
                .entries
                .insert(path.clone(), PathStatus::from((entry.kind, entry.state)));
        }

        for (rel, is_dir) in manifest::walk_dir(&self.working_dir, &matcher, &session.prefix)? {
            if is_dir {
                continue;
            }
            let repo_path = if session.prefix == "/" {
                format!("/{}", rel)
            } else {
                format!("{}/{}", session.prefix, rel)
            };
            if !manifest.entries.contains_key(&repo_path) {
                report.entries.insert(repo_path, PathStatus::Untracked);
            }
        }

        Ok(report)
    }

    /// `log`: the commit history of the active session.
    pub fn log(&self, all: bool, count: usize) -> Result<Vec<LogEntry>> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;

        let (_, session) = self.active_direct()?;
        let branch = self.branch_direct(session.branch)?;
        let mut out = Vec::new();

        // Prepared commits first, at offset 0.
        let mut current = session.prepared;
        while let Some(id) = current {
            if id == session.head {
                break;
            }
            let commit: Commit = self.store.get_typed(id)?;
            out.push(LogEntry {
                offset: 0,
                id,
                kind: commit.kind,
                timestamp_applied: commit.timestamp_applied,
                message: commit.message.clone(),
            });
            current = commit.parent;
        }

        let mut offset = -1;
        let mut current = Some(session.head);
        while let Some(id) = current {
            let commit: Commit = self.store.get_typed(id)?;
            out.push(LogEntry {
                offset,
                id,
                kind: commit.kind,
                timestamp_applied: commit.timestamp_applied,
                message: commit.message.clone(),
            });
            if out.len() >= count {
                break;
            }
            if !all && id == branch.base {
                break;
            }
            current = commit.parent;
            offset -= 1;
        }

        Ok(out)
    }

    /// `branch:list`: every live branch.
    pub fn branches(&self) -> Result<Vec<Branch>> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let mut out = Vec::new();
        for (_, value) in self.scratch.list("branches")? {
            let id = ObjectId::from_hex(&value)?;
            out.push(self.store.get_typed::<Branch>(id)?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// The branch the active session is attached to.
    pub fn active_branch(&self) -> Result<Branch> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let (_, session) = self.active_direct()?;
        self.branch_direct(session.branch)
    }

    /// `session:list`: the active branch's sessions.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let (_, active) = self.active_direct()?;
        let mut out = Vec::new();
        for (_, value) in self.scratch.list("sessions")? {
            let id = ObjectId::from_hex(&value)?;
            let session: Session = self.store.get_typed(id)?;
            if session.branch == active.branch {
                out.push(session);
            }
        }
        Ok(out)
    }

    /// `prop:get`: a tracked path's properties.
    pub fn prop_get(&self, path: &Path) -> Result<Props> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let repo = self
            .to_repo_paths(std::slice::from_ref(&path.to_path_buf()))?
            .remove(0);
        let (_, session) = self.active_direct()?;
        let manifest: Manifest = self.store.get_typed(session.manifest)?;
        let entry = manifest
            .entries
            .get(&repo)
            .ok_or_else(|| VexError::domain(format!("{} is not tracked", repo)))?;
        Ok(entry.properties.clone())
    }

    /// `message:get`: the pending commit message.
    pub fn message_get(&self) -> Result<String> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let (_, session) = self.active_direct()?;
        Ok(session.message)
    }

    /// `debug:cat`: render an object by id or unambiguous prefix.
    pub fn debug_cat(&self, id_or_prefix: &str) -> Result<(String, String)> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let id = self.store.resolve_prefix(id_or_prefix)?;
        let obj = self.store.get_any(id)?;
        let kind = obj.kind().to_string();
        let rendered = if let crate::types::AnyObject::Blob(bytes) = obj {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            let bytes = fs::read(self.store.object_path(id))?;
            let value: Value =
                serde_json::from_slice(&bytes).map_err(|e| VexError::Encode(e.to_string()))?;
            serde_json::to_string_pretty(&value).map_err(|e| VexError::Encode(e.to_string()))?
        };
        Ok((kind, rendered))
    }

    /// `debug:status`: pointer dump plus transaction leftovers.
    pub fn debug_status(&self) -> Result<DebugStatus> {
        let _lock = RepoLock::shared(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        Ok(DebugStatus {
            pointers: self.scratch.dump_all()?,
            pending: self.vex_dir.join(transaction::PENDING_DIR).exists(),
            plan: self.vex_dir.join(transaction::PLAN_FILE).exists(),
        })
    }

    /// `debug:rollback`: run the §4.4 recovery routine now.
    pub fn debug_rollback(&self) -> Result<Option<Recovery>> {
        let _lock = RepoLock::exclusive(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        transaction::recover(&self.scratch, &self.vex_dir)
    }

    /// `debug:gc`: mark-and-sweep unreachable objects.
    pub fn gc(
        &self,
        config: crate::gc::GcConfig,
        progress: Option<&crate::gc::GcProgressCallback>,
    ) -> Result<crate::gc::GcReport> {
        let _lock = RepoLock::exclusive(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        crate::gc::gc(&self.scratch, &self.store, config, progress)
    }

    // ===== the command driver =====

    fn run_logged(&self, command: &str, args: Value) -> Result<CommandReport> {
        let spec = lookup_command(command)
            .ok_or_else(|| VexError::domain(format!("unknown command '{}'", command)))?;
        debug!(command = spec.name, "running");

        let _lock = RepoLock::exclusive(&self.lock_path(), DEFAULT_LOCK_TIMEOUT)?;
        let mut txn = Transaction::begin(&self.store, &self.scratch, &self.vex_dir)?;

        let outcome = match self.dispatch(&mut txn, command, &args) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail_txn(txn, &e)?;
                return Err(e);
            }
        };

        if txn.planned().is_empty() {
            // Nothing observable changed; no action is appended.
            txn.abort()?;
            return Ok(CommandReport {
                command: command.to_string(),
                applied: false,
                output: outcome.output,
                work: vec![],
            });
        }

        let record = ActionRecord {
            prev: txn.pointer_id(ACTION_LOG_HEAD)?,
            command: command.to_string(),
            args,
            physical: txn.physical_map(),
            inverse: outcome.inverse,
            timestamp: self.now(),
        };
        let action_id = txn.stage_action(&record)?;
        history::plan_branching(&mut txn, action_id)?;

        let work_desc = outcome.work.describe_all();
        if self.fake {
            self.narrate(&txn);
            txn.abort()?;
            outcome.work.execute(&self.store, true)?;
            return Ok(CommandReport {
                command: command.to_string(),
                applied: false,
                output: outcome.output,
                work: work_desc,
            });
        }

        txn.commit()?;
        outcome.work.execute(&self.store, false)?;

        Ok(CommandReport {
            command: command.to_string(),
            applied: true,
            output: outcome.output,
            work: work_desc,
        })
    }

    fn fail_txn(&self, txn: Transaction<'_>, error: &VexError) -> Result<()> {
        if self.debug && matches!(error, VexError::Domain(_)) {
            info!("debug mode: leaving half-applied state for inspection");
            txn.leave_for_inspection();
            Ok(())
        } else {
            txn.abort()
        }
    }

    fn narrate(&self, txn: &Transaction<'_>) {
        info!(
            staged_objects = txn.staged_count(),
            pointer_updates = txn.planned().len(),
            "fake mode: aborting instead of committing"
        );
        for entry in txn.planned() {
            info!(
                "would set {} = {}",
                entry.name,
                entry.new.as_deref().unwrap_or("<absent>")
            );
        }
    }

    fn dispatch(&self, txn: &mut Transaction<'_>, command: &str, args: &Value) -> Result<Outcome> {
        match command {
            "init" => self.handle_init(txn, parse_args(args)?),
            "init:revert" => self.handle_init_revert(txn),
            "add" => self.handle_add(txn, parse_args(args)?),
            "forget" => self.handle_forget(txn, parse_args(args)?),
            "remove" => self.handle_remove(txn, parse_args(args)?),
            "remove:revert" => self.handle_remove_revert(txn, parse_args(args)?),
            "restore" => self.handle_restore(txn, parse_args(args)?),
            "restore:revert" => self.handle_restore_revert(txn, parse_args(args)?),
            "ignore" => self.handle_patterns(txn, parse_args(args)?, true),
            "include" => self.handle_patterns(txn, parse_args(args)?, false),
            "commit" => self.handle_commit(txn, parse_args(args)?),
            "commit:prepare" => self.handle_prepare(txn),
            "commit:amend" => self.handle_amend(txn, parse_args(args)?),
            "switch" => self.handle_switch(txn, parse_args(args)?),
            "branch:new" => self.handle_branch_new(txn, parse_args(args)?),
            "branch:open" => self.handle_branch_open(txn, parse_args(args)?),
            "branch:saveas" => self.handle_branch_saveas(txn, parse_args(args)?),
            "branch:attach" => self.handle_branch_attach(txn, parse_args(args)?),
            "session:open" => self.handle_session_open(txn, parse_args(args)?),
            "branch:swap" => self.handle_branch_swap(txn, parse_args(args)?),
            "branch:rename" => self.handle_branch_rename(txn, parse_args(args)?),
            "prop:set" => self.handle_prop_set(txn, parse_args(args)?),
            "message:set" => self.handle_message_set(txn, parse_args(args)?),
            "purge" => self.handle_purge(txn, parse_args(args)?),
            other => Err(VexError::domain(format!("unknown command '{}'", other))),
        }
    }

    // ===== handlers =====

    fn handle_init(&self, txn: &mut Transaction<'_>, args: InitArgs) -> Result<Outcome> {
        if txn.pointer(ACTION_LOG_HEAD).is_some() || txn.pointer(ACTIVE_SESSION).is_some() {
            return Err(VexError::domain("repository already initialized"));
        }
        Matcher::new(&args.include, &args.ignore)?;

        let author = Uuid::new_v4();
        let settings = Settings {
            include: args.include.clone(),
            ignore: args.ignore.clone(),
            author,
            authors: None,
            features: vec![],
        };
        let settings_id = txn.put_typed(&settings)?;
        txn.set_pointer(SETTINGS, Some(settings_id.as_hex()));

        let include_text = patterns_text(&args.include);
        let ignore_text = patterns_text(&args.ignore);
        let include_blob = txn.put_blob(include_text.as_bytes())?;
        let ignore_blob = txn.put_blob(ignore_text.as_bytes())?;
        let include_file = txn.put_typed(&FileEntry {
            blob: include_blob,
            properties: Props::new(),
        })?;
        let ignore_file = txn.put_typed(&FileEntry {
            blob: ignore_blob,
            properties: Props::new(),
        })?;

        let mut ops: BTreeMap<String, Vec<ChangeOp>> = BTreeMap::new();
        ops.insert(
            VEX_DIR.to_string(),
            vec![ChangeOp::AddDir {
                properties: Props::new(),
            }],
        );
        ops.insert(
            format!("{}/settings", VEX_DIR),
            vec![ChangeOp::AddDir {
                properties: Props::new(),
            }],
        );
        ops.insert(
            format!("{}/settings/include", VEX_DIR),
            vec![ChangeOp::AddFile {
                id: include_file,
                properties: Props::new(),
            }],
        );
        ops.insert(
            format!("{}/settings/ignore", VEX_DIR),
            vec![ChangeOp::AddFile {
                id: ignore_file,
                properties: Props::new(),
            }],
        );
        if args.prefix != "/" {
            ops.insert(
                args.prefix.clone(),
                vec![ChangeOp::AddDir {
                    properties: Props::new(),
                }],
            );
        }

        let root = tree::apply_ops(txn, None, &ops)?;
        let changelog = txn.put_typed(&crate::types::ChangelogEntry { prev: None, ops })?;

        let now = self.now();
        let commit = Commit {
            parent: None,
            root_tree: root,
            author,
            timestamp_applied: now,
            timestamp_written: now,
            message: String::new(),
            changelog: Some(changelog),
            kind: CommitKind::Init,
        };
        let commit_id = txn.put_typed(&commit)?;

        let branch = Branch {
            name: "latest".to_string(),
            head: commit_id,
            base: commit_id,
            upstream: None,
            uuid: Uuid::new_v4(),
            sealed: false,
        };
        self.save_branch(txn, &branch)?;
        txn.set_pointer(&name_ptr(&branch.name), Some(branch.uuid.to_string()));

        let mut manifest = tree::manifest_from_tree(txn, root)?;
        for (path, entry) in manifest.entries.iter_mut() {
            entry.working = worktree::under(path, &args.prefix) || worktree::under(path, VEX_DIR);
        }
        let manifest_id = txn.put_typed(&manifest)?;

        let session = Session {
            uuid: Uuid::new_v4(),
            branch: branch.uuid,
            head: commit_id,
            prepared: None,
            manifest: manifest_id,
            stash: None,
            prefix: args.prefix.clone(),
            mode: SessionMode::Attached,
            message: String::new(),
        };
        self.save_session(txn, &session)?;
        txn.set_pointer(ACTIVE_SESSION, Some(session.uuid.to_string()));

        let mut work = WorkPlan::default();
        work.push(WorkOp::MkDir {
            path: self.working_dir.join(".vex/settings"),
        });
        work.push(WorkOp::WriteText {
            path: self.working_dir.join(".vex/settings/include"),
            text: include_text,
        });
        work.push(WorkOp::WriteText {
            path: self.working_dir.join(".vex/settings/ignore"),
            text: ignore_text,
        });

        Ok(Outcome {
            inverse: LogicalOp {
                command: "init:revert".to_string(),
                args: json!({}),
            },
            work,
            output: json!({
                "branch": branch.name,
                "commit": commit_id.as_hex(),
                "prefix": args.prefix,
            }),
        })
    }

    fn handle_init_revert(&self, txn: &mut Transaction<'_>) -> Result<Outcome> {
        // Undo of init leaves .vex/ in place: every pointer goes away,
        // the CAS and the log remain as unreachable data. An explicit
        // `vex destroy` in the CLI glue removes the scaffold.
        for name in txn.snapshot_names() {
            if name == ACTION_LOG_HEAD || name == REDO_STACK_HEAD {
                continue;
            }
            txn.set_pointer(&name, None);
        }

        let mut work = WorkPlan::default();
        work.push(WorkOp::RemoveFile {
            path: self.working_dir.join(".vex/settings/include"),
        });
        work.push(WorkOp::RemoveFile {
            path: self.working_dir.join(".vex/settings/ignore"),
        });
        work.push(WorkOp::RmDirIfEmpty {
            path: self.working_dir.join(".vex/settings"),
        });

        Ok(Outcome {
            inverse: LogicalOp::physical(),
            work,
            output: json!({}),
        })
    }

    fn handle_add(&self, txn: &mut Transaction<'_>, args: FilesArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;
        let settings = self.settings(txn)?;
        let matcher = Matcher::new(&settings.include, &settings.ignore)?;

        let mut added = Vec::new();
        for repo_path in &args.files {
            let repo_path = worktree::normalize_repo_path(repo_path)?;
            let full = worktree::repo_to_full(&self.working_dir, &session.prefix, &repo_path)
                .ok_or_else(|| {
                    VexError::domain(format!("{} is outside the current prefix", repo_path))
                })?;

            if full.is_dir() {
                for (rel, is_dir) in manifest::walk_dir(&full, &matcher, &repo_path)? {
                    let child = format!("{}/{}", repo_path.trim_end_matches('/'), rel);
                    if is_dir {
                        self.track_dir(&mut manifest, &child, &mut added);
                    } else {
                        let child_full = full.join(&rel);
                        self.track_file(txn, &mut manifest, &child, &child_full, &mut added)?;
                    }
                }
                if repo_path != session.prefix {
                    self.track_dir(&mut manifest, &repo_path, &mut added);
                }
            } else if full.is_file() {
                let name = repo_path.rsplit('/').next().unwrap_or_default();
                if !matcher.enters_dir(&repo_path, name) {
                    return Err(VexError::domain(format!("{} is ignored", repo_path)));
                }
                self.track_file(txn, &mut manifest, &repo_path, &full, &mut added)?;
            } else {
                return Err(VexError::domain(format!(
                    "{} does not exist",
                    full.display()
                )));
            }
        }

        if added.is_empty() {
            return Ok(Outcome::physical(json!({ "added": [] })));
        }

        // Parent directories of everything added become tracked too.
        let paths: Vec<String> = added.clone();
        for path in &paths {
            for parent in worktree::parent_dirs(path) {
                if worktree::under(&parent, VEX_DIR) {
                    continue;
                }
                if !manifest.entries.contains_key(&parent) {
                    manifest.entries.insert(parent, Tracked::added_dir());
                }
            }
        }

        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome::physical(json!({ "added": added })))
    }

    fn track_file(
        &self,
        txn: &mut Transaction<'_>,
        manifest: &mut Manifest,
        repo_path: &str,
        full: &Path,
        added: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(existing) = manifest.entries.get(repo_path) {
            if existing.state != TrackedState::Deleted {
                return Ok(());
            }
        }
        let bytes = fs::read(full)?;
        let blob = txn.put_blob(&bytes)?;
        let properties = file_props(full);
        let file_id = txn.put_typed(&FileEntry {
            blob,
            properties: properties.clone(),
        })?;
        manifest
            .entries
            .insert(repo_path.to_string(), Tracked::added_file(file_id, properties));
        added.push(repo_path.to_string());
        Ok(())
    }

    fn track_dir(&self, manifest: &mut Manifest, repo_path: &str, added: &mut Vec<String>) {
        if !manifest.entries.contains_key(repo_path) {
            manifest
                .entries
                .insert(repo_path.to_string(), Tracked::added_dir());
            added.push(repo_path.to_string());
        }
    }

    fn handle_forget(&self, txn: &mut Transaction<'_>, args: FilesArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        let mut forgotten = Vec::new();
        for repo_path in &args.files {
            let repo_path = worktree::normalize_repo_path(repo_path)?;
            let targets: Vec<String> = manifest
                .entries
                .keys()
                .filter(|p| worktree::under(p, &repo_path))
                .cloned()
                .collect();
            if targets.is_empty() {
                return Err(VexError::domain(format!("{} is not tracked", repo_path)));
            }
            for path in targets {
                let entry = manifest.entries.get_mut(&path).expect("listed above");
                if entry.state == TrackedState::Added {
                    manifest.entries.remove(&path);
                } else {
                    entry.state = TrackedState::Deleted;
                }
                forgotten.push(path);
            }
        }

        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;
        Ok(Outcome::physical(json!({ "forgotten": forgotten })))
    }

    fn handle_remove(&self, txn: &mut Transaction<'_>, args: FilesArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        let mut work = WorkPlan::default();
        let mut reverts = Vec::new();
        for repo_path in &args.files {
            let repo_path = worktree::normalize_repo_path(repo_path)?;
            let entry = manifest
                .entries
                .get_mut(&repo_path)
                .ok_or_else(|| VexError::domain(format!("{} is not tracked", repo_path)))?;
            if entry.kind != TrackedKind::File {
                return Err(VexError::domain(format!("{} is not a file", repo_path)));
            }

            let full = worktree::repo_to_full(&self.working_dir, &session.prefix, &repo_path)
                .ok_or_else(|| {
                    VexError::domain(format!("{} is outside the current prefix", repo_path))
                })?;

            let blob = match fs::read(&full) {
                Ok(bytes) => Some(txn.put_blob(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };

            reverts.push(RevertEntry {
                path: repo_path.clone(),
                blob,
                file: entry.id,
                state: entry.state,
                executable: entry
                    .properties
                    .get("vex:executable")
                    .is_some_and(|v| matches!(v, PropValue::Bool(true))),
            });

            entry.state = TrackedState::Deleted;
            entry.working = false;
            entry.mtime = None;
            entry.size = None;
            entry.mode = None;
            work.push(WorkOp::RemoveFile { path: full });
        }

        let removed: Vec<&String> = reverts.iter().map(|r| &r.path).collect();
        let output = json!({ "removed": removed });
        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome {
            inverse: LogicalOp {
                command: "remove:revert".to_string(),
                args: serde_json::to_value(RevertArgs { entries: reverts })
                    .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work,
            output,
        })
    }

    fn handle_remove_revert(&self, txn: &mut Transaction<'_>, args: RevertArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        let mut work = WorkPlan::default();
        for revert in &args.entries {
            let mut properties = Props::new();
            if revert.executable {
                properties.insert("vex:executable".to_string(), PropValue::Bool(true));
            }
            manifest.entries.insert(
                revert.path.clone(),
                Tracked {
                    kind: TrackedKind::File,
                    state: revert.state,
                    id: revert.file,
                    properties,
                    working: true,
                    mtime: None,
                    size: None,
                    mode: None,
                    stash: None,
                },
            );
            if let (Some(blob), Some(full)) = (
                revert.blob,
                worktree::repo_to_full(&self.working_dir, &session.prefix, &revert.path),
            ) {
                work.push(WorkOp::WriteBlob {
                    path: full,
                    blob,
                    executable: revert.executable,
                });
            }
        }

        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;
        Ok(Outcome {
            inverse: LogicalOp::physical(),
            work,
            output: json!({}),
        })
    }

    fn handle_restore(&self, txn: &mut Transaction<'_>, args: FilesArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        let mut work = WorkPlan::default();
        let mut reverts = Vec::new();
        for repo_path in &args.files {
            let repo_path = worktree::normalize_repo_path(repo_path)?;
            let entry = manifest
                .entries
                .get_mut(&repo_path)
                .ok_or_else(|| VexError::domain(format!("{} is not tracked", repo_path)))?;
            let file_id = entry
                .id
                .ok_or_else(|| VexError::domain(format!("{} has no stored contents", repo_path)))?;
            let file: FileEntry = txn.get_typed(file_id)?;

            let full = worktree::repo_to_full(&self.working_dir, &session.prefix, &repo_path)
                .ok_or_else(|| {
                    VexError::domain(format!("{} is outside the current prefix", repo_path))
                })?;

            // Stash what is being overwritten so undo can bring it back.
            let overwritten = match fs::read(&full) {
                Ok(bytes) => Some(txn.put_blob(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            let executable = file
                .properties
                .get("vex:executable")
                .is_some_and(|v| matches!(v, PropValue::Bool(true)));

            reverts.push(RevertEntry {
                path: repo_path.clone(),
                blob: overwritten,
                file: Some(file_id),
                state: entry.state,
                executable,
            });

            work.push(WorkOp::WriteBlob {
                path: full,
                blob: file.blob,
                executable,
            });
            entry.state = TrackedState::Tracked;
            entry.working = true;
            entry.mtime = None;
            entry.size = None;
            entry.mode = None;
        }

        let restored: Vec<&String> = reverts.iter().map(|r| &r.path).collect();
        let output = json!({ "restored": restored });
        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome {
            inverse: LogicalOp {
                command: "restore:revert".to_string(),
                args: serde_json::to_value(RevertArgs { entries: reverts })
                    .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work,
            output,
        })
    }

    fn handle_restore_revert(
        &self,
        txn: &mut Transaction<'_>,
        args: RevertArgs,
    ) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        let mut work = WorkPlan::default();
        for revert in &args.entries {
            let Some(entry) = manifest.entries.get_mut(&revert.path) else {
                continue;
            };
            entry.state = revert.state;
            entry.mtime = None;
            entry.size = None;
            entry.mode = None;
            let Some(full) =
                worktree::repo_to_full(&self.working_dir, &session.prefix, &revert.path)
            else {
                continue;
            };
            match revert.blob {
                Some(blob) => work.push(WorkOp::WriteBlob {
                    path: full,
                    blob,
                    executable: revert.executable,
                }),
                None => work.push(WorkOp::RemoveFile { path: full }),
            }
        }

        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;
        Ok(Outcome {
            inverse: LogicalOp::physical(),
            work,
            output: json!({}),
        })
    }

    fn handle_patterns(
        &self,
        txn: &mut Transaction<'_>,
        args: PatternsArgs,
        is_ignore: bool,
    ) -> Result<Outcome> {
        let mut settings = self.settings(txn)?;
        let list = if is_ignore {
            &mut settings.ignore
        } else {
            &mut settings.include
        };
        let mut changed = false;
        for pattern in &args.patterns {
            if !list.contains(pattern) {
                list.push(pattern.clone());
                changed = true;
            }
        }
        if !changed {
            return Ok(Outcome::physical(json!({ "patterns": args.patterns })));
        }
        Matcher::new(&settings.include, &settings.ignore)?;

        let mirror_name = if is_ignore { "ignore" } else { "include" };
        let text = patterns_text(if is_ignore {
            &settings.ignore
        } else {
            &settings.include
        });

        let settings_id = txn.put_typed(&settings)?;
        txn.set_pointer(SETTINGS, Some(settings_id.as_hex()));

        let mut work = WorkPlan::default();
        work.push(WorkOp::WriteText {
            path: self.working_dir.join(".vex/settings").join(mirror_name),
            text,
        });

        Ok(Outcome {
            inverse: LogicalOp::physical(),
            work,
            output: json!({ "patterns": args.patterns }),
        })
    }

    fn handle_commit(&self, txn: &mut Transaction<'_>, args: MessageOptArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut branch = self.branch(txn, session.branch)?;
        if branch.sealed {
            return Err(VexError::domain(format!(
                "branch '{}' is sealed",
                branch.name
            )));
        }
        if branch.head != session.head {
            return Err(VexError::domain(
                "branch head moved since this session last synced; reopen the branch",
            ));
        }

        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        // Prepared commits replay first, then live working changes.
        let mut ops = self.prepared_ops(txn, &session)?;
        let active = self.collect_changeset(txn, &session, &mut manifest)?;
        merge_ops(&mut ops, active);
        if ops.is_empty() {
            return Err(VexError::domain("nothing to commit"));
        }

        let head_commit: Commit = txn.get_typed(session.head)?;
        let root = tree::apply_ops(txn, Some(head_commit.root_tree), &ops)?;
        if root == head_commit.root_tree {
            return Err(VexError::domain("nothing to commit"));
        }

        let changelog = txn.put_typed(&crate::types::ChangelogEntry {
            prev: head_commit.changelog,
            ops,
        })?;

        let settings = self.settings(txn)?;
        let now = self.now();
        let message = args
            .message
            .or_else(|| (!session.message.is_empty()).then(|| session.message.clone()))
            .unwrap_or_default();
        let commit = Commit {
            parent: Some(session.head),
            root_tree: root,
            author: settings.author,
            timestamp_applied: now.max(head_commit.timestamp_applied),
            timestamp_written: now,
            message: message.clone(),
            changelog: Some(changelog),
            kind: CommitKind::Normal,
        };
        let commit_id = txn.put_typed(&commit)?;

        branch.head = commit_id;
        self.save_branch(txn, &branch)?;

        session.head = commit_id;
        session.prepared = None;
        session.message = String::new();
        settle_manifest(&mut manifest);
        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome::physical(json!({
            "commit": commit_id.as_hex(),
            "message": message,
        })))
    }

    fn handle_prepare(&self, txn: &mut Transaction<'_>) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        let ops = self.collect_changeset(txn, &session, &mut manifest)?;
        if ops.is_empty() {
            return Ok(Outcome::physical(json!({ "prepared": Value::Null })));
        }

        let base = session.prepared.unwrap_or(session.head);
        let base_commit: Commit = txn.get_typed(base)?;
        let root = tree::apply_ops(txn, Some(base_commit.root_tree), &ops)?;
        let changelog = txn.put_typed(&crate::types::ChangelogEntry {
            prev: base_commit.changelog,
            ops,
        })?;

        let settings = self.settings(txn)?;
        let now = self.now();
        let commit = Commit {
            parent: Some(base),
            root_tree: root,
            author: settings.author,
            timestamp_applied: now.max(base_commit.timestamp_applied),
            timestamp_written: now,
            message: session.message.clone(),
            changelog: Some(changelog),
            kind: CommitKind::Normal,
        };
        let commit_id = txn.put_typed(&commit)?;

        session.prepared = Some(commit_id);
        settle_manifest(&mut manifest);
        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome::physical(json!({
            "prepared": commit_id.as_hex(),
        })))
    }

    fn handle_amend(&self, txn: &mut Transaction<'_>, args: MessageOptArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut branch = self.branch(txn, session.branch)?;
        if branch.sealed {
            return Err(VexError::domain(format!(
                "branch '{}' is sealed",
                branch.name
            )));
        }
        if branch.head != session.head {
            return Err(VexError::domain(
                "branch head moved since this session last synced; reopen the branch",
            ));
        }

        let old_head: Commit = txn.get_typed(session.head)?;
        let Some(base) = old_head.parent else {
            return Err(VexError::domain("cannot amend the initial commit"));
        };
        let base_commit: Commit = txn.get_typed(base)?;

        let mut manifest: Manifest = txn.get_typed(session.manifest)?;

        // Replay the head's own changes onto its parent, then fold in
        // whatever the working copy changed since.
        let mut ops: BTreeMap<String, Vec<ChangeOp>> = match old_head.changelog {
            Some(id) => txn
                .get_typed::<crate::types::ChangelogEntry>(id)?
                .ops,
            None => BTreeMap::new(),
        };
        let active = self.collect_changeset(txn, &session, &mut manifest)?;
        merge_ops(&mut ops, active);
        if ops.is_empty() {
            return Err(VexError::domain("nothing to amend"));
        }

        let root = tree::apply_ops(txn, Some(base_commit.root_tree), &ops)?;
        let changelog = txn.put_typed(&crate::types::ChangelogEntry {
            prev: base_commit.changelog,
            ops,
        })?;

        let now = self.now();
        let message = args.message.unwrap_or_else(|| old_head.message.clone());
        let commit = Commit {
            parent: Some(base),
            root_tree: root,
            author: old_head.author,
            timestamp_applied: now.max(base_commit.timestamp_applied),
            timestamp_written: old_head.timestamp_written,
            message: message.clone(),
            changelog: Some(changelog),
            kind: CommitKind::Amend,
        };
        let commit_id = txn.put_typed(&commit)?;

        // The pre-amend commit becomes unreachable; a later gc collects it.
        branch.head = commit_id;
        self.save_branch(txn, &branch)?;

        session.head = commit_id;
        session.prepared = None;
        settle_manifest(&mut manifest);
        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome::physical(json!({
            "commit": commit_id.as_hex(),
            "message": message,
        })))
    }

    fn handle_switch(&self, txn: &mut Transaction<'_>, args: SwitchArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let new_prefix = worktree::normalize_repo_path(&args.prefix)?;
        if worktree::under(&new_prefix, VEX_DIR) {
            return Err(VexError::domain("cannot check out the settings mirror"));
        }
        if new_prefix == session.prefix {
            return Err(VexError::domain(format!(
                "already checked out at {}",
                new_prefix
            )));
        }

        let mut manifest: Manifest = txn.get_typed(session.manifest)?;
        let known_dir = new_prefix == "/"
            || manifest
                .entries
                .get(&new_prefix)
                .map(|e| e.kind == TrackedKind::Dir)
                .unwrap_or(false);
        if !known_dir {
            return Err(VexError::domain(format!(
                "{} is not a tracked directory",
                new_prefix
            )));
        }

        // The prefix root itself maps onto the working directory, so a
        // nested prefix shifts every on-disk location beneath it: clear
        // the whole checkout, then materialize the new subtree.
        let old_prefix = session.prefix.clone();
        let now = self.now();

        let mut removals = WorkPlan::default();
        let mut dir_drops: Vec<PathBuf> = Vec::new();
        let paths: Vec<String> = manifest.entries.keys().cloned().collect();
        for path in &paths {
            if path == "/" || worktree::under(path, VEX_DIR) {
                continue;
            }
            let entry = manifest.entries.get_mut(path).expect("key from keys()");
            if !entry.working {
                continue;
            }
            let Some(full) = worktree::repo_to_full(&self.working_dir, &old_prefix, path) else {
                continue;
            };
            match entry.kind {
                TrackedKind::File => {
                    if entry.state != TrackedState::Deleted {
                        if manifest::refresh_entry(entry, &full, now) == manifest::Refresh::Probe
                            && !same_content(&*txn, entry, &full)
                        {
                            entry.state = TrackedState::Modified;
                        }
                        if entry.state.is_changed() {
                            let bytes = fs::read(&full)?;
                            entry.stash = Some(txn.put_blob(&bytes)?);
                        }
                        removals.push(WorkOp::RemoveFile { path: full });
                    }
                }
                TrackedKind::Dir => {
                    if full != self.working_dir {
                        dir_drops.push(full);
                    }
                }
                TrackedKind::Ignored => {}
            }
            entry.working = false;
            entry.mtime = None;
            entry.size = None;
            entry.mode = None;
        }

        let mut restores = WorkPlan::default();
        for path in &paths {
            if path == "/" || worktree::under(path, VEX_DIR) {
                continue;
            }
            let entry = manifest.entries.get_mut(path).expect("key from keys()");
            if !worktree::under(path, &new_prefix) {
                continue;
            }
            let Some(full) = worktree::repo_to_full(&self.working_dir, &new_prefix, path) else {
                continue;
            };
            match entry.kind {
                TrackedKind::Dir => {
                    if full != self.working_dir {
                        restores.push(WorkOp::MkDir { path: full });
                    }
                }
                TrackedKind::File => {
                    if entry.state == TrackedState::Deleted {
                        // Stays deleted; nothing to materialize.
                    } else if let Some(stash) = entry.stash.take() {
                        restores.push(WorkOp::WriteBlob {
                            path: full,
                            blob: stash,
                            executable: is_exec_prop(&entry.properties),
                        });
                    } else if let Some(file_id) = entry.id {
                        let file: FileEntry = txn.get_typed(file_id)?;
                        restores.push(WorkOp::WriteBlob {
                            path: full,
                            blob: file.blob,
                            executable: is_exec_prop(&file.properties),
                        });
                    }
                }
                TrackedKind::Ignored => {}
            }
            entry.working = true;
        }

        // Deepest directories first, after their files are gone.
        dir_drops.sort_by(|a, b| b.cmp(a));
        let mut work = removals;
        for dir in dir_drops {
            work.push(WorkOp::RmDirIfEmpty { path: dir });
        }
        work.extend(restores);

        session.prefix = new_prefix.clone();
        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;

        Ok(Outcome {
            inverse: LogicalOp {
                command: "switch".to_string(),
                args: serde_json::to_value(SwitchArgs { prefix: old_prefix })
                    .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work,
            output: json!({ "prefix": new_prefix }),
        })
    }

    fn handle_branch_new(&self, txn: &mut Transaction<'_>, args: NameArgs) -> Result<Outcome> {
        let (active_uuid, active) = self.active(txn)?;

        // Undoing branch:new leaves the branch itself behind (only the
        // switch is reverted), so a replay may find its own leftover:
        // reuse it when it still points where we would point it.
        let branch = match self.branch_uuid(txn, &args.name)? {
            Some(existing) => {
                let branch = self.branch(txn, existing)?;
                if branch.head != active.head || branch.upstream != Some(active.branch) {
                    return Err(VexError::domain(format!(
                        "branch '{}' already exists",
                        args.name
                    )));
                }
                branch
            }
            None => {
                let branch = Branch {
                    name: args.name.clone(),
                    head: active.head,
                    base: active.head,
                    upstream: Some(active.branch),
                    uuid: Uuid::new_v4(),
                    sealed: false,
                };
                self.save_branch(txn, &branch)?;
                txn.set_pointer(&name_ptr(&branch.name), Some(branch.uuid.to_string()));
                branch
            }
        };

        let mut target = None;
        for (_, value) in txn_sessions(txn)? {
            let session: Session = txn.get_typed(value)?;
            if session.branch == branch.uuid && session.mode == SessionMode::Attached {
                target = Some(session.uuid);
                break;
            }
        }
        let target = match target {
            Some(t) => t,
            None => self.create_session(txn, &branch, &active.prefix)?,
        };
        let work = self.switch_session(txn, target)?;

        Ok(Outcome {
            inverse: LogicalOp {
                command: "session:open".to_string(),
                args: serde_json::to_value(SessionOpenArgs {
                    session: active_uuid,
                })
                .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work,
            output: json!({ "branch": args.name, "session": target.to_string() }),
        })
    }

    fn handle_branch_open(&self, txn: &mut Transaction<'_>, args: NameArgs) -> Result<Outcome> {
        let uuid = self
            .branch_uuid(txn, &args.name)?
            .ok_or_else(|| VexError::domain(format!("branch '{}' does not exist", args.name)))?;
        let branch = self.branch(txn, uuid)?;
        let (active_uuid, active) = self.active(txn)?;
        if active.branch == uuid {
            return Err(VexError::domain(format!(
                "already on branch '{}'",
                args.name
            )));
        }

        // Reuse the branch's attached session, or create one at its head.
        let mut target = None;
        for (_, value) in txn_sessions(txn)? {
            let session: Session = txn.get_typed(value)?;
            if session.branch == uuid && session.mode == SessionMode::Attached {
                target = Some(session.uuid);
                break;
            }
        }
        let target = match target {
            Some(t) => t,
            None => self.create_session(txn, &branch, &active.prefix)?,
        };

        let work = self.switch_session(txn, target)?;

        Ok(Outcome {
            inverse: LogicalOp {
                command: "session:open".to_string(),
                args: serde_json::to_value(SessionOpenArgs {
                    session: active_uuid,
                })
                .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work,
            output: json!({ "branch": args.name, "session": target.to_string() }),
        })
    }

    fn handle_session_open(
        &self,
        txn: &mut Transaction<'_>,
        args: SessionOpenArgs,
    ) -> Result<Outcome> {
        let (active_uuid, _) = self.active(txn)?;
        if active_uuid == args.session {
            return Err(VexError::domain("session is already active"));
        }
        let work = self.switch_session(txn, args.session)?;
        Ok(Outcome {
            inverse: LogicalOp {
                command: "session:open".to_string(),
                args: serde_json::to_value(SessionOpenArgs {
                    session: active_uuid,
                })
                .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work,
            output: json!({ "session": args.session.to_string() }),
        })
    }

    fn handle_branch_saveas(&self, txn: &mut Transaction<'_>, args: NameArgs) -> Result<Outcome> {
        if self.branch_uuid(txn, &args.name)?.is_some() {
            return Err(VexError::domain(format!(
                "branch '{}' already exists",
                args.name
            )));
        }
        let (session_uuid, mut session) = self.active(txn)?;
        let old_branch = self.branch(txn, session.branch)?;

        let branch = Branch {
            name: args.name.clone(),
            head: session.head,
            base: old_branch.base,
            upstream: Some(old_branch.uuid),
            uuid: Uuid::new_v4(),
            sealed: false,
        };
        self.save_branch(txn, &branch)?;
        txn.set_pointer(&name_ptr(&branch.name), Some(branch.uuid.to_string()));

        // The working copy stays put, uncommitted edits included; the
        // session simply re-homes onto the fork.
        session.branch = branch.uuid;
        self.save_session(txn, &session)?;

        Ok(Outcome {
            inverse: LogicalOp {
                command: "branch:attach".to_string(),
                args: serde_json::to_value(BranchAttachArgs {
                    session: session_uuid,
                    branch: old_branch.uuid,
                    drop_branch: branch.uuid,
                    drop_name: args.name.clone(),
                })
                .map_err(|e| VexError::Encode(e.to_string()))?,
            },
            work: WorkPlan::default(),
            output: json!({ "branch": args.name }),
        })
    }

    fn handle_branch_attach(
        &self,
        txn: &mut Transaction<'_>,
        args: BranchAttachArgs,
    ) -> Result<Outcome> {
        let session_id = txn
            .pointer_id(&session_ptr(args.session))?
            .ok_or_else(|| VexError::domain("no such session"))?;
        let mut session: Session = txn.get_typed(session_id)?;
        session.branch = args.branch;
        self.save_session(txn, &session)?;
        txn.set_pointer(&name_ptr(&args.drop_name), None);
        txn.set_pointer(&branch_ptr(args.drop_branch), None);
        Ok(Outcome {
            inverse: LogicalOp::physical(),
            work: WorkPlan::default(),
            output: json!({}),
        })
    }

    fn handle_branch_swap(&self, txn: &mut Transaction<'_>, args: NameArgs) -> Result<Outcome> {
        let (_, session) = self.active(txn)?;
        let mut mine = self.branch(txn, session.branch)?;
        let other_uuid = self
            .branch_uuid(txn, &args.name)?
            .ok_or_else(|| VexError::domain(format!("branch '{}' does not exist", args.name)))?;
        if other_uuid == mine.uuid {
            return Err(VexError::domain("cannot swap a branch with itself"));
        }
        let mut other = self.branch(txn, other_uuid)?;

        std::mem::swap(&mut mine.name, &mut other.name);
        self.save_branch(txn, &mine)?;
        self.save_branch(txn, &other)?;
        txn.set_pointer(&name_ptr(&mine.name), Some(mine.uuid.to_string()));
        txn.set_pointer(&name_ptr(&other.name), Some(other.uuid.to_string()));

        Ok(Outcome::physical(json!({
            "renamed": [
                { "name": mine.name, "uuid": mine.uuid.to_string() },
                { "name": other.name, "uuid": other.uuid.to_string() },
            ],
        })))
    }

    fn handle_branch_rename(&self, txn: &mut Transaction<'_>, args: NameArgs) -> Result<Outcome> {
        if self.branch_uuid(txn, &args.name)?.is_some() {
            return Err(VexError::domain(format!(
                "branch '{}' already exists",
                args.name
            )));
        }
        let (_, session) = self.active(txn)?;
        let mut branch = self.branch(txn, session.branch)?;
        let old_name = branch.name.clone();
        branch.name = args.name.clone();
        self.save_branch(txn, &branch)?;
        txn.set_pointer(&name_ptr(&old_name), None);
        txn.set_pointer(&name_ptr(&args.name), Some(branch.uuid.to_string()));

        Ok(Outcome::physical(json!({
            "from": old_name,
            "to": args.name,
        })))
    }

    fn handle_prop_set(&self, txn: &mut Transaction<'_>, args: PropSetArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(session.manifest)?;
        let repo_path = worktree::normalize_repo_path(&args.file)?;
        let entry = manifest
            .entries
            .get_mut(&repo_path)
            .ok_or_else(|| VexError::domain(format!("{} is not tracked", repo_path)))?;

        entry.properties.insert(args.name.clone(), args.value.clone());
        if entry.state == TrackedState::Tracked {
            entry.state = TrackedState::Modified;
        }

        self.save_manifest(txn, &mut session, &manifest)?;
        self.save_session(txn, &session)?;
        Ok(Outcome::physical(json!({
            "file": repo_path,
            "name": args.name,
        })))
    }

    fn handle_message_set(&self, txn: &mut Transaction<'_>, args: MessageArgs) -> Result<Outcome> {
        let (_, mut session) = self.active(txn)?;
        session.message = args.message;
        self.save_session(txn, &session)?;
        Ok(Outcome::physical(json!({})))
    }

    fn handle_purge(&self, txn: &mut Transaction<'_>, args: FilesArgs) -> Result<Outcome> {
        if args.files.is_empty() {
            return Err(VexError::domain("purge needs at least one path"));
        }
        let targets: Vec<String> = args
            .files
            .iter()
            .map(|f| worktree::normalize_repo_path(f))
            .collect::<Result<_>>()?;

        let (_, session) = self.active(txn)?;
        let mut branch = self.branch(txn, session.branch)?;
        if session.prepared.is_some() {
            return Err(VexError::domain(
                "commit or discard prepared changes before purging",
            ));
        }

        // Collect the chain, oldest first.
        let mut chain = Vec::new();
        let mut current = Some(branch.head);
        while let Some(id) = current {
            let commit: Commit = txn.get_typed(id)?;
            current = commit.parent;
            chain.push((id, commit));
        }
        chain.reverse();

        let mut map: BTreeMap<ObjectId, ObjectId> = BTreeMap::new();
        let mut new_parent: Option<ObjectId> = None;
        let mut prev_changelog: Option<ObjectId> = None;
        let mut prev_root: Option<ObjectId> = None;
        let mut changed = false;
        let mut rewritten = 0usize;

        for (old_id, commit) in &chain {
            let ops = match commit.changelog {
                Some(id) => txn.get_typed::<crate::types::ChangelogEntry>(id)?.ops,
                None => BTreeMap::new(),
            };
            let filtered: BTreeMap<String, Vec<ChangeOp>> = ops
                .iter()
                .filter(|(path, _)| {
                    !targets.iter().any(|t| worktree::under(path, t))
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            if !changed && filtered == ops {
                new_parent = Some(*old_id);
                prev_changelog = commit.changelog;
                prev_root = Some(commit.root_tree);
                map.insert(*old_id, *old_id);
                continue;
            }
            changed = true;
            rewritten += 1;

            let root = tree::apply_ops(txn, prev_root, &filtered)?;
            let changelog = txn.put_typed(&crate::types::ChangelogEntry {
                prev: prev_changelog,
                ops: filtered,
            })?;
            let rebuilt = Commit {
                parent: new_parent,
                root_tree: root,
                author: commit.author,
                timestamp_applied: commit.timestamp_applied,
                timestamp_written: commit.timestamp_written,
                message: commit.message.clone(),
                changelog: Some(changelog),
                kind: commit.kind,
            };
            let new_id = txn.put_typed(&rebuilt)?;
            map.insert(*old_id, new_id);
            new_parent = Some(new_id);
            prev_changelog = Some(changelog);
            prev_root = Some(root);
        }

        if !changed {
            return Err(VexError::domain("no commit touches those paths"));
        }

        branch.head = map[&branch.head];
        branch.base = map.get(&branch.base).copied().unwrap_or(branch.base);
        self.save_branch(txn, &branch)?;

        // Every session on this branch follows the rewritten chain; the
        // purged paths also drop out of the working manifests (the files
        // themselves are left on disk, untracked).
        for (_, session_id) in txn_sessions(txn)? {
            let mut other: Session = txn.get_typed(session_id)?;
            if other.branch != branch.uuid {
                continue;
            }
            if let Some(mapped) = map.get(&other.head) {
                other.head = *mapped;
            }
            let mut manifest: Manifest = txn.get_typed(other.manifest)?;
            manifest
                .entries
                .retain(|path, _| !targets.iter().any(|t| worktree::under(path, t)));
            self.save_manifest(txn, &mut other, &manifest)?;
            self.save_session(txn, &other)?;
        }

        Ok(Outcome::physical(json!({
            "rewritten": rewritten,
            "head": branch.head.as_hex(),
        })))
    }

    // ===== shared helpers =====

    fn active(&self, txn: &Transaction<'_>) -> Result<(Uuid, Session)> {
        let uuid = txn
            .pointer(ACTIVE_SESSION)
            .ok_or_else(|| VexError::domain("repository has no active session"))?;
        let uuid = Uuid::parse_str(&uuid).map_err(|_| VexError::InvalidPointer {
            name: ACTIVE_SESSION.to_string(),
            reason: "not a uuid".to_string(),
        })?;
        let session_id = txn
            .pointer_id(&session_ptr(uuid))?
            .ok_or_else(|| VexError::domain("active session does not resolve"))?;
        let session: Session = txn.get_typed(session_id)?;
        Ok((uuid, session))
    }

    fn active_direct(&self) -> Result<(Uuid, Session)> {
        let uuid = self
            .scratch
            .get_uuid(ACTIVE_SESSION)?
            .ok_or_else(|| VexError::domain("repository has no active session"))?;
        let session_id = self
            .scratch
            .get_id(&session_ptr(uuid))?
            .ok_or_else(|| VexError::domain("active session does not resolve"))?;
        Ok((uuid, self.store.get_typed(session_id)?))
    }

    fn branch(&self, txn: &Transaction<'_>, uuid: Uuid) -> Result<Branch> {
        let id = txn
            .pointer_id(&branch_ptr(uuid))?
            .ok_or_else(|| VexError::domain(format!("branch {} does not resolve", uuid)))?;
        txn.get_typed(id)
    }

    fn branch_direct(&self, uuid: Uuid) -> Result<Branch> {
        let id = self
            .scratch
            .get_id(&branch_ptr(uuid))?
            .ok_or_else(|| VexError::domain(format!("branch {} does not resolve", uuid)))?;
        self.store.get_typed(id)
    }

    fn branch_uuid(&self, txn: &Transaction<'_>, name: &str) -> Result<Option<Uuid>> {
        match txn.pointer(&name_ptr(name)) {
            None => Ok(None),
            Some(value) => Uuid::parse_str(&value)
                .map(Some)
                .map_err(|_| VexError::InvalidPointer {
                    name: name_ptr(name),
                    reason: "not a uuid".to_string(),
                }),
        }
    }

    fn settings(&self, txn: &Transaction<'_>) -> Result<Settings> {
        let id = txn
            .pointer_id(SETTINGS)?
            .ok_or_else(|| VexError::domain("repository has no settings"))?;
        txn.get_typed(id)
    }

    fn settings_direct(&self) -> Result<Settings> {
        let id = self
            .scratch
            .get_id(SETTINGS)?
            .ok_or_else(|| VexError::domain("repository has no settings"))?;
        self.store.get_typed(id)
    }

    fn save_branch(&self, txn: &mut Transaction<'_>, branch: &Branch) -> Result<()> {
        let id = txn.put_typed(branch)?;
        txn.set_pointer(&branch_ptr(branch.uuid), Some(id.as_hex()));
        Ok(())
    }

    fn save_session(&self, txn: &mut Transaction<'_>, session: &Session) -> Result<()> {
        let id = txn.put_typed(session)?;
        txn.set_pointer(&session_ptr(session.uuid), Some(id.as_hex()));
        Ok(())
    }

    fn save_manifest(
        &self,
        txn: &mut Transaction<'_>,
        session: &mut Session,
        manifest: &Manifest,
    ) -> Result<()> {
        session.manifest = txn.put_typed(manifest)?;
        Ok(())
    }

    fn create_session(
        &self,
        txn: &mut Transaction<'_>,
        branch: &Branch,
        wanted_prefix: &str,
    ) -> Result<Uuid> {
        let head: Commit = txn.get_typed(branch.head)?;
        let mut manifest = tree::manifest_from_tree(txn, head.root_tree)?;
        let prefix = if wanted_prefix == "/"
            || manifest
                .entries
                .get(wanted_prefix)
                .map(|e| e.kind == TrackedKind::Dir)
                .unwrap_or(false)
        {
            wanted_prefix.to_string()
        } else {
            "/".to_string()
        };
        for entry in manifest.entries.values_mut() {
            entry.working = false;
        }
        let manifest_id = txn.put_typed(&manifest)?;

        let session = Session {
            uuid: Uuid::new_v4(),
            branch: branch.uuid,
            head: branch.head,
            prepared: None,
            manifest: manifest_id,
            stash: None,
            prefix,
            mode: SessionMode::Attached,
            message: String::new(),
        };
        self.save_session(txn, &session)?;
        Ok(session.uuid)
    }

    /// Stashes the active session's uncommitted work, clears its files
    /// out of the working copy, then materializes the target session.
    fn switch_session(&self, txn: &mut Transaction<'_>, target: Uuid) -> Result<WorkPlan> {
        let (_, mut current) = self.active(txn)?;
        let mut manifest: Manifest = txn.get_typed(current.manifest)?;
        let now = self.now();

        let mut removals = WorkPlan::default();
        let mut dir_drops: Vec<PathBuf> = Vec::new();
        let mut unsaved = Vec::new();

        let paths: Vec<String> = manifest.entries.keys().cloned().collect();
        for path in &paths {
            if path == "/" || worktree::under(path, VEX_DIR) {
                continue;
            }
            let entry = manifest.entries.get_mut(path).expect("key from keys()");
            if !entry.working {
                continue;
            }
            let Some(full) = worktree::repo_to_full(&self.working_dir, &current.prefix, path)
            else {
                continue;
            };
            match entry.kind {
                TrackedKind::File => {
                    if entry.state != TrackedState::Deleted {
                        if manifest::refresh_entry(entry, &full, now) == manifest::Refresh::Probe
                            && !same_content(&*txn, entry, &full)
                        {
                            entry.state = TrackedState::Modified;
                        }
                        if entry.state.is_changed() && entry.state != TrackedState::Deleted {
                            let bytes = fs::read(&full)?;
                            let blob = txn.put_blob(&bytes)?;
                            entry.stash = Some(blob);
                            unsaved.push(blob);
                        }
                        removals.push(WorkOp::RemoveFile { path: full });
                    }
                }
                TrackedKind::Dir => {
                    if full != self.working_dir {
                        dir_drops.push(full);
                    }
                }
                TrackedKind::Ignored => {}
            }
            entry.working = false;
            entry.mtime = None;
            entry.size = None;
            entry.mode = None;
        }

        let manifest_id = txn.put_typed(&manifest)?;
        let stash = StashEntry {
            session: current.uuid,
            manifest: manifest_id,
            unsaved,
        };
        current.manifest = manifest_id;
        current.stash = Some(txn.put_typed(&stash)?);
        self.save_session(txn, &current)?;

        // Materialize the target.
        let target_id = txn
            .pointer_id(&session_ptr(target))?
            .ok_or_else(|| VexError::domain("no such session"))?;
        let mut next: Session = txn.get_typed(target_id)?;
        let mut next_manifest: Manifest = txn.get_typed(next.manifest)?;

        let mut restores = WorkPlan::default();
        let paths: Vec<String> = next_manifest.entries.keys().cloned().collect();
        for path in &paths {
            let entry = next_manifest.entries.get_mut(path).expect("key from keys()");
            if worktree::under(path, VEX_DIR) {
                entry.working = true;
                continue;
            }
            if path == "/" {
                entry.working = true;
                continue;
            }
            if !worktree::under(path, &next.prefix) {
                entry.working = false;
                continue;
            }
            let Some(full) = worktree::repo_to_full(&self.working_dir, &next.prefix, path) else {
                continue;
            };
            match entry.kind {
                TrackedKind::Dir => {
                    if full != self.working_dir {
                        restores.push(WorkOp::MkDir { path: full });
                    }
                }
                TrackedKind::File => {
                    if entry.state == TrackedState::Deleted {
                        // Stays deleted in this session's working copy.
                    } else if let Some(stash) = entry.stash.take() {
                        restores.push(WorkOp::WriteBlob {
                            path: full,
                            blob: stash,
                            executable: is_exec_prop(&entry.properties),
                        });
                    } else if let Some(file_id) = entry.id {
                        let file: FileEntry = txn.get_typed(file_id)?;
                        restores.push(WorkOp::WriteBlob {
                            path: full,
                            blob: file.blob,
                            executable: is_exec_prop(&file.properties),
                        });
                    }
                }
                TrackedKind::Ignored => {}
            }
            entry.working = true;
            entry.mtime = None;
            entry.size = None;
            entry.mode = None;
        }

        next.stash = None;
        self.save_manifest(txn, &mut next, &next_manifest)?;
        self.save_session(txn, &next)?;
        txn.set_pointer(ACTIVE_SESSION, Some(target.to_string()));

        dir_drops.sort_by(|a, b| b.cmp(a));
        let mut work = removals;
        for dir in dir_drops {
            work.push(WorkOp::RmDirIfEmpty { path: dir });
        }
        work.extend(restores);
        Ok(work)
    }

    fn prepared_ops(
        &self,
        txn: &Transaction<'_>,
        session: &Session,
    ) -> Result<BTreeMap<String, Vec<ChangeOp>>> {
        let mut chains = Vec::new();
        let mut current = session.prepared;
        while let Some(id) = current {
            if id == session.head {
                break;
            }
            let commit: Commit = txn.get_typed(id)?;
            if let Some(changelog) = commit.changelog {
                chains.push(txn.get_typed::<crate::types::ChangelogEntry>(changelog)?.ops);
            }
            current = commit.parent;
        }

        let mut merged = BTreeMap::new();
        for ops in chains.into_iter().rev() {
            merge_ops(&mut merged, ops);
        }
        Ok(merged)
    }

    /// Refreshes the manifest against the filesystem and produces the
    /// changeset of everything uncommitted, staging new blobs for files
    /// whose contents moved.
    fn collect_changeset(
        &self,
        txn: &mut Transaction<'_>,
        session: &Session,
        manifest: &mut Manifest,
    ) -> Result<BTreeMap<String, Vec<ChangeOp>>> {
        let now = self.now();
        let mut ops: BTreeMap<String, Vec<ChangeOp>> = BTreeMap::new();

        let paths: Vec<String> = manifest.entries.keys().cloned().collect();
        for path in &paths {
            if path == "/" {
                continue;
            }
            let entry = manifest.entries.get_mut(path).expect("key from keys()");
            if entry.working {
                if let Some(full) =
                    worktree::repo_to_full(&self.working_dir, &session.prefix, path)
                {
                    if manifest::refresh_entry(entry, &full, now) == manifest::Refresh::Probe {
                        // Re-hashed below; flag it so the hash runs.
                        entry.state = TrackedState::Modified;
                    }
                }
            }
            if !entry.state.is_changed() {
                continue;
            }

            match (entry.kind, entry.state) {
                (TrackedKind::File, TrackedState::Added)
                | (TrackedKind::File, TrackedState::Modified)
                | (TrackedKind::File, TrackedState::Replaced) => {
                    let Some(full) =
                        worktree::repo_to_full(&self.working_dir, &session.prefix, path)
                    else {
                        continue;
                    };
                    let bytes = match fs::read(&full) {
                        Ok(bytes) => bytes,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            entry.state = TrackedState::Deleted;
                            ops.entry(path.clone()).or_default().push(ChangeOp::DeleteFile);
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let blob = txn.put_blob(&bytes)?;
                    let mut properties = entry.properties.clone();
                    sync_exec_prop(&mut properties, &full);
                    let file_id = txn.put_typed(&FileEntry {
                        blob,
                        properties: properties.clone(),
                    })?;

                    if entry.state == TrackedState::Modified
                        && entry.id == Some(file_id)
                    {
                        // A stat flagged the file but the content is
                        // byte-identical; nothing really changed.
                        entry.state = TrackedState::Tracked;
                        continue;
                    }

                    let op = if entry.state == TrackedState::Added {
                        ChangeOp::AddFile {
                            id: file_id,
                            properties: properties.clone(),
                        }
                    } else {
                        ChangeOp::ModifyFile {
                            id: file_id,
                            properties: properties.clone(),
                        }
                    };
                    entry.id = Some(file_id);
                    entry.properties = properties;
                    ops.entry(path.clone()).or_default().push(op);
                }
                (TrackedKind::File, TrackedState::Deleted) => {
                    ops.entry(path.clone()).or_default().push(ChangeOp::DeleteFile);
                }
                (TrackedKind::Dir, TrackedState::Added) => {
                    ops.entry(path.clone()).or_default().push(ChangeOp::AddDir {
                        properties: entry.properties.clone(),
                    });
                }
                (TrackedKind::Dir, TrackedState::Deleted) => {
                    ops.entry(path.clone()).or_default().push(ChangeOp::DeleteDir);
                }
                (TrackedKind::Dir, _) => {}
                (TrackedKind::Ignored, _) => {}
                (TrackedKind::File, TrackedState::Tracked) => unreachable!(
                    "filtered out by the is_changed() check above"
                ),
            }
        }

        Ok(ops)
    }

    fn to_repo_paths(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        let (_, session) = self.active_direct()?;
        paths
            .iter()
            .map(|path| {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    self.working_dir.join(path)
                };
                worktree::full_to_repo(&self.working_dir, &session.prefix, &absolute)
            })
            .collect()
    }

    fn branch_name(&self, name: &str) -> Result<String> {
        let name = crate::codec::nfc(name.trim());
        if name.is_empty()
            || name.contains('/')
            || name.starts_with('.')
            || name.chars().any(char::is_whitespace)
        {
            return Err(VexError::domain(format!("bad branch name '{}'", name)));
        }
        Ok(name)
    }
}

// The session family listing a transaction can see: snapshot plus plan.
fn txn_sessions(txn: &Transaction<'_>) -> Result<Vec<(String, ObjectId)>> {
    let mut out = Vec::new();
    for name in txn.snapshot_names() {
        if let Some(rest) = name.strip_prefix("sessions/") {
            if let Some(id) = txn.pointer_id(&name)? {
                out.push((rest.to_string(), id));
            }
        }
    }
    Ok(out)
}

fn parse_args<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| VexError::domain(format!("bad arguments: {}", e)))
}


fn args_value<T: Serialize>(args: T) -> Value {
    serde_json::to_value(args).expect("command arguments always serialize")
}

fn merge_ops(
    into: &mut BTreeMap<String, Vec<ChangeOp>>,
    from: BTreeMap<String, Vec<ChangeOp>>,
) {
    for (path, ops) in from {
        into.entry(path).or_default().extend(ops);
    }
}

/// Deleted entries drop out; everything else settles to `tracked`.
fn settle_manifest(manifest: &mut Manifest) {
    manifest
        .entries
        .retain(|_, entry| entry.state != TrackedState::Deleted);
    for entry in manifest.entries.values_mut() {
        entry.state = TrackedState::Tracked;
        entry.stash = None;
    }
}

fn patterns_text(patterns: &[String]) -> String {
    let mut text = patterns.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

fn file_props(path: &Path) -> Props {
    let mut props = Props::new();
    sync_exec_prop(&mut props, path);
    props
}

fn sync_exec_prop(props: &mut Props, path: &Path) {
    let executable = fs::metadata(path)
        .map(|meta| manifest::is_executable(mode_of(&meta)))
        .unwrap_or(false);
    if executable {
        props.insert("vex:executable".to_string(), PropValue::Bool(true));
    } else {
        props.remove("vex:executable");
    }
}

/// Content probe for entries whose stats were inconclusive: true when
/// the on-disk bytes hash to the stored file's blob.
fn same_content<S: tree::ReadTyped>(source: &S, entry: &Tracked, full: &Path) -> bool {
    let Some(file_id) = entry.id else {
        return false;
    };
    let Ok(file) = source.read_typed::<FileEntry>(file_id) else {
        return false;
    };
    let Ok(bytes) = fs::read(full) else {
        return false;
    };
    ObjectId::for_payload(crate::codec::BLOB_KIND, &bytes) == file.blob
}

fn is_exec_prop(props: &Props) -> bool {
    props
        .get("vex:executable")
        .is_some_and(|v| matches!(v, PropValue::Bool(true)))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Project) {
        let tmp = TempDir::new().unwrap();
        let project = Project::init(
            tmp.path(),
            Some("/code"),
            vec!["*.py".to_string()],
            vec![],
        )
        .unwrap();
        (tmp, project)
    }

    fn write(tmp: &TempDir, name: &str, contents: &[u8]) {
        fs::write(tmp.path().join(name), contents).unwrap();
    }

    fn read(tmp: &TempDir, name: &str) -> Vec<u8> {
        fs::read(tmp.path().join(name)).unwrap()
    }

    fn path_status(project: &Project, repo_path: &str) -> Option<PathStatus> {
        project.status().unwrap().entries.get(repo_path).cloned()
    }

    #[test]
    fn test_init_scaffold_and_first_commit() {
        let (tmp, project) = setup();

        assert!(tmp.path().join(".vex/cas").exists());
        assert!(tmp.path().join(".vex/scratch/active_session").exists());
        assert!(tmp.path().join(".vex/settings/include").exists());

        let log = project.log(true, 50).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, CommitKind::Init);

        let branches = project.branches().unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "latest");
    }

    #[test]
    fn test_add_undo_redo_roundtrip() {
        let (tmp, project) = setup();
        write(&tmp, "hello.py", b"print('hi')\n");

        project.add(&[PathBuf::from("hello.py")]).unwrap();
        assert_eq!(
            path_status(&project, "/code/hello.py"),
            Some(PathStatus::Added)
        );

        project.undo().unwrap().unwrap();
        assert_eq!(
            path_status(&project, "/code/hello.py"),
            Some(PathStatus::Untracked)
        );

        project.redo(None).unwrap().unwrap();
        assert_eq!(
            path_status(&project, "/code/hello.py"),
            Some(PathStatus::Added)
        );
    }

    #[test]
    fn test_undo_on_fresh_log_reverts_init() {
        let (_tmp, project) = setup();
        // The only entry is init itself; undoing it empties the pointers
        // but leaves .vex in place.
        let report = project.undo().unwrap().unwrap();
        assert_eq!(report.command, "init");
        assert!(project.scratch().get(ACTIVE_SESSION).unwrap().is_none());
        assert!(project.vex_dir().exists());

        // Nothing further to undo.
        assert!(project.undo().unwrap().is_none());
    }

    #[test]
    fn test_commit_moves_head_and_settles_status() {
        let (tmp, project) = setup();
        write(&tmp, "hello.py", b"v1\n");
        project.add(&[PathBuf::from("hello.py")]).unwrap();

        let report = project.commit(Some("m1".to_string())).unwrap();
        assert!(report.applied);

        assert_eq!(
            path_status(&project, "/code/hello.py"),
            Some(PathStatus::Tracked)
        );
        let log = project.log(false, 10).unwrap();
        assert_eq!(log[0].message, "m1");
        assert_eq!(log[0].kind, CommitKind::Normal);
    }

    #[test]
    fn test_commit_with_no_changes_is_domain_error() {
        let (_tmp, project) = setup();
        let err = project.commit(Some("empty".to_string())).unwrap_err();
        assert!(matches!(err, VexError::Domain(_)));
    }

    #[test]
    fn test_amend_then_undo_restores_old_head() {
        let (tmp, project) = setup();
        write(&tmp, "hello.py", b"v1\n");
        project.add(&[PathBuf::from("hello.py")]).unwrap();
        project.commit(Some("m1".to_string())).unwrap();

        project.amend(Some("m2".to_string())).unwrap();
        let log = project.log(false, 10).unwrap();
        assert_eq!(log[0].message, "m2");
        assert_eq!(log[0].kind, CommitKind::Amend);

        project.undo().unwrap().unwrap();
        let log = project.log(false, 10).unwrap();
        assert_eq!(log[0].message, "m1");
    }

    #[test]
    fn test_amend_keeps_written_timestamp() {
        let (tmp, project) = setup();
        write(&tmp, "hello.py", b"v1\n");
        project.add(&[PathBuf::from("hello.py")]).unwrap();
        project.commit(Some("m1".to_string())).unwrap();

        let before = project.log(false, 10).unwrap();
        let (_, session) = project.active_direct().unwrap();
        let old: Commit = project.store().get_typed(session.head).unwrap();

        project.amend(Some("m2".to_string())).unwrap();
        let (_, session) = project.active_direct().unwrap();
        let amended: Commit = project.store().get_typed(session.head).unwrap();

        assert_eq!(amended.timestamp_written, old.timestamp_written);
        assert!(amended.timestamp_applied >= before[0].timestamp_applied);
    }

    #[test]
    fn test_timestamps_applied_monotonic() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"a\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("one".to_string())).unwrap();
        write(&tmp, "b.py", b"b\n");
        project.add(&[PathBuf::from("b.py")]).unwrap();
        project.commit(Some("two".to_string())).unwrap();

        let log = project.log(true, 50).unwrap();
        for pair in log.windows(2) {
            assert!(pair[0].timestamp_applied >= pair[1].timestamp_applied);
        }
    }

    #[test]
    fn test_remove_deletes_and_undo_rewrites() {
        let (tmp, project) = setup();
        write(&tmp, "doomed.py", b"contents\n");
        project.add(&[PathBuf::from("doomed.py")]).unwrap();

        project.remove(&[PathBuf::from("doomed.py")]).unwrap();
        assert!(!tmp.path().join("doomed.py").exists());

        // Logical inverse re-writes from the stored blob.
        project.undo().unwrap().unwrap();
        assert_eq!(read(&tmp, "doomed.py"), b"contents\n");
        assert_eq!(
            path_status(&project, "/code/doomed.py"),
            Some(PathStatus::Added)
        );
    }

    #[test]
    fn test_restore_overwrites_and_undo_brings_edits_back() {
        let (tmp, project) = setup();
        write(&tmp, "work.py", b"committed\n");
        project.add(&[PathBuf::from("work.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();

        write(&tmp, "work.py", b"scribbles\n");
        project.restore(&[PathBuf::from("work.py")]).unwrap();
        assert_eq!(read(&tmp, "work.py"), b"committed\n");

        project.undo().unwrap().unwrap();
        assert_eq!(read(&tmp, "work.py"), b"scribbles\n");
    }

    #[test]
    fn test_prepare_then_commit_promotes() {
        let (tmp, project) = setup();
        write(&tmp, "one.py", b"1\n");
        project.add(&[PathBuf::from("one.py")]).unwrap();
        project.prepare().unwrap();

        let (_, session) = project.active_direct().unwrap();
        assert!(session.prepared.is_some());
        // The branch head has not moved yet.
        let log = project.log(false, 10).unwrap();
        assert_eq!(log[0].offset, 0);

        project.commit(Some("promoted".to_string())).unwrap();
        let (_, session) = project.active_direct().unwrap();
        assert!(session.prepared.is_none());
        let log = project.log(false, 10).unwrap();
        assert_eq!(log[0].message, "promoted");
    }

    #[test]
    fn test_branch_stash_roundtrip() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"v1\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();

        // Uncommitted edit, forked into a branch: edits stay on disk.
        write(&tmp, "a.py", b"v2 uncommitted\n");
        project.branch_saveas("feature").unwrap();
        assert_eq!(read(&tmp, "a.py"), b"v2 uncommitted\n");

        // Switching away stashes the edit and restores the commit.
        project.branch_open("latest").unwrap();
        assert_eq!(read(&tmp, "a.py"), b"v1\n");

        // Switching back unstashes it.
        project.branch_open("feature").unwrap();
        assert_eq!(read(&tmp, "a.py"), b"v2 uncommitted\n");
    }

    #[test]
    fn test_branch_open_undo_returns_to_previous_session() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"v1\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();

        write(&tmp, "a.py", b"working\n");
        project.branch_saveas("feature").unwrap();
        project.branch_open("latest").unwrap();
        assert_eq!(read(&tmp, "a.py"), b"v1\n");

        // Undo of branch:open runs the logical inverse: back on feature
        // with the stashed edit in the working copy.
        project.undo().unwrap().unwrap();
        assert_eq!(read(&tmp, "a.py"), b"working\n");
    }

    #[test]
    fn test_redo_branching_preserves_both_lines() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"a\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();

        write(&tmp, "b.py", b"b\n");
        project.add(&[PathBuf::from("b.py")]).unwrap();
        project.undo().unwrap().unwrap();

        write(&tmp, "c.py", b"c\n");
        project.add(&[PathBuf::from("c.py")]).unwrap();

        // Both the undone line and the current one are listed.
        let choices = project.redo_list().unwrap();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].1.command, "add");
        assert_eq!(choices[1].1.command, "add");

        // Re-applying the undone add replays it logically on top of the
        // divergent state: both additions are now present.
        project.redo(Some(1)).unwrap().unwrap();
        assert_eq!(
            path_status(&project, "/code/b.py"),
            Some(PathStatus::Added)
        );
        assert_eq!(
            path_status(&project, "/code/c.py"),
            Some(PathStatus::Added)
        );
    }

    #[test]
    fn test_switch_prefix_roundtrip() {
        let (tmp, project) = setup();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        write(&tmp, "top.py", b"top\n");
        fs::write(tmp.path().join("sub/inner.py"), b"inner\n").unwrap();
        project
            .add(&[PathBuf::from("top.py"), PathBuf::from("sub")])
            .unwrap();
        project.commit(Some("layout".to_string())).unwrap();

        project.switch("/code/sub").unwrap();
        // The subtree is materialized at the working root; the rest is
        // moved out of the way.
        assert!(tmp.path().join("inner.py").exists());
        assert!(!tmp.path().join("top.py").exists());

        project.undo().unwrap().unwrap();
        assert!(tmp.path().join("top.py").exists());
        assert!(tmp.path().join("sub/inner.py").exists());
        assert!(!tmp.path().join("inner.py").exists());
    }

    #[test]
    fn test_branch_swap_and_rename() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"a\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();
        project.branch_new("other").unwrap();

        project.branch_swap("latest").unwrap();
        let branches = project.branches().unwrap();
        let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["latest", "other"]);

        project.branch_rename("renamed").unwrap();
        let branches = project.branches().unwrap();
        assert!(branches.iter().any(|b| b.name == "renamed"));

        // Both are plain pointer swaps; physical undo reverses them.
        project.undo().unwrap().unwrap();
        project.undo().unwrap().unwrap();
        let branches = project.branches().unwrap();
        let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["latest", "other"]);
    }

    #[test]
    fn test_purge_rewrites_history() {
        let (tmp, project) = setup();
        write(&tmp, "keep.py", b"keep\n");
        write(&tmp, "secrets.txt", b"hunter2\n");
        project
            .add(&[PathBuf::from("keep.py"), PathBuf::from("secrets.txt")])
            .unwrap();
        project.commit(Some("everything".to_string())).unwrap();
        write(&tmp, "keep.py", b"keep 2\n");
        project.add(&[PathBuf::from("keep.py")]).unwrap();
        project.commit(Some("more".to_string())).unwrap();

        let old_head = project.active_direct().unwrap().1.head;

        project.purge(&[PathBuf::from("secrets.txt")]).unwrap();

        let (_, session) = project.active_direct().unwrap();
        assert_ne!(session.head, old_head);
        let head: Commit = project.store().get_typed(session.head).unwrap();
        let flat = tree::flatten(project.store(), head.root_tree).unwrap();
        assert!(flat.contains_key("/code/keep.py"));
        assert!(!flat.contains_key("/code/secrets.txt"));

        // The file itself is left on disk, no longer tracked; it does not
        // match the include patterns, so status stops mentioning it.
        assert!(tmp.path().join("secrets.txt").exists());
        assert_eq!(path_status(&project, "/code/secrets.txt"), None);

        // Physical undo restores the old heads.
        project.undo().unwrap().unwrap();
        let (_, session) = project.active_direct().unwrap();
        assert_eq!(session.head, old_head);
    }

    #[test]
    fn test_fake_mode_commits_nothing() {
        let (tmp, project) = setup();
        let project = project.with_fake(true);
        write(&tmp, "hello.py", b"hi\n");

        let report = project.add(&[PathBuf::from("hello.py")]).unwrap();
        assert!(!report.applied);
        assert_eq!(
            path_status(&project, "/code/hello.py"),
            Some(PathStatus::Untracked)
        );
        // No transaction leftovers either.
        assert!(!project.vex_dir().join("pending").exists());
        assert!(!project.vex_dir().join("plan").exists());
    }

    #[test]
    fn test_message_buffer_feeds_commit() {
        let (tmp, project) = setup();
        project.message_set("queued message").unwrap();
        write(&tmp, "hello.py", b"hi\n");
        project.add(&[PathBuf::from("hello.py")]).unwrap();
        project.commit(None).unwrap();

        let log = project.log(false, 10).unwrap();
        assert_eq!(log[0].message, "queued message");
        assert_eq!(project.message_get().unwrap(), "");
    }

    #[test]
    fn test_prop_set_marks_modified() {
        let (tmp, project) = setup();
        write(&tmp, "tool.py", b"#!x\n");
        project.add(&[PathBuf::from("tool.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();

        project
            .prop_set(
                Path::new("tool.py"),
                "vex:mime",
                PropValue::Text("text/x-python".to_string()),
            )
            .unwrap();

        let props = project.prop_get(Path::new("tool.py")).unwrap();
        assert_eq!(
            props.get("vex:mime"),
            Some(&PropValue::Text("text/x-python".to_string()))
        );
        assert_eq!(
            path_status(&project, "/code/tool.py"),
            Some(PathStatus::Modified)
        );
    }

    #[test]
    fn test_ignore_pattern_hides_from_status() {
        let (tmp, project) = setup();
        project.ignore(vec!["*.tmp".to_string()]).unwrap();
        write(&tmp, "junk.tmp", b"x");
        write(&tmp, "real.py", b"x");

        let report = project.status().unwrap();
        assert!(!report.entries.contains_key("/code/junk.tmp"));
        assert_eq!(
            report.entries.get("/code/real.py"),
            Some(&PathStatus::Untracked)
        );
    }

    #[test]
    fn test_action_log_chain_is_gap_free() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"a\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("one".to_string())).unwrap();

        let entries = project.undo_list(100).unwrap();
        assert_eq!(entries.len(), 3); // init, add, commit
        assert_eq!(entries[0].1.command, "commit");
        assert_eq!(entries[1].1.command, "add");
        assert_eq!(entries[2].1.command, "init");
        assert_eq!(entries[2].1.prev, None);
    }

    #[test]
    fn test_debug_status_reports_pointers() {
        let (_tmp, project) = setup();
        let status = project.debug_status().unwrap();
        assert!(status.pointers.contains_key(ACTIVE_SESSION));
        assert!(status.pointers.contains_key(ACTION_LOG_HEAD));
        assert!(!status.pending);
        assert!(!status.plan);
    }

    #[test]
    fn test_branch_new_undo_redo_roundtrip() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"a\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("base".to_string())).unwrap();

        project.branch_new("feature").unwrap();
        assert_eq!(project.active_branch().unwrap().name, "feature");

        project.undo().unwrap().unwrap();
        assert_eq!(project.active_branch().unwrap().name, "latest");

        // The branch object survives the undo; redo reuses it instead of
        // refusing on the name collision.
        project.redo(None).unwrap().unwrap();
        assert_eq!(project.active_branch().unwrap().name, "feature");
    }

    #[test]
    fn test_gc_spares_everything_reachable() {
        let (tmp, project) = setup();
        write(&tmp, "a.py", b"a\n");
        project.add(&[PathBuf::from("a.py")]).unwrap();
        project.commit(Some("one".to_string())).unwrap();

        let report = project
            .gc(
                crate::gc::GcConfig {
                    dry_run: false,
                    grace_period_days: 0,
                    aggressive: true,
                },
                None,
            )
            .unwrap();
        assert_eq!(report.objects_deleted, 0);

        // Still fully functional afterwards.
        assert_eq!(
            path_status(&project, "/code/a.py"),
            Some(PathStatus::Tracked)
        );
    }
}
