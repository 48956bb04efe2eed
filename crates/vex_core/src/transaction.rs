//! Two-phase transactions over the object store and scratch pointers.
//!
//! A command stages CAS writes into `.vex/pending/` and pointer updates
//! into an in-memory plan. Commit proceeds in strict order:
//!
//! 1. write the `plan` file (action-log-head entry first) and fsync it,
//! 2. fsync every staged object and rename it into the CAS,
//! 3. apply pointer swaps in plan order; the first swap, the
//!    action-log head, is the commit point,
//! 4. remove `plan` and `pending/`.
//!
//! A process killed at any moment leaves a state [`recover`] maps to
//! exactly the pre-begin or post-commit repository: if the live value of
//! the first planned pointer equals its planned `new`, recovery rolls
//! forward (all CAS installs already happened before any swap); otherwise
//! it rolls back by discarding the staged files.

use crate::codec::{self, Persist};
use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::scratch::{ScratchStore, ACTION_LOG_HEAD, REDO_STACK_HEAD};
use crate::types::{ActionRecord, PointerChange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the staged-objects directory under `.vex/`.
pub const PENDING_DIR: &str = "pending";
/// Name of the plan file under `.vex/`.
pub const PLAN_FILE: &str = "plan";

/// One planned pointer update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Pointer name.
    pub name: String,
    /// Value observed at `begin`.
    pub old: Option<String>,
    /// Value to install at commit; `None` removes the pointer.
    pub new: Option<String>,
}

/// What recovery did with an interrupted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The commit point had been reached; remaining swaps were re-applied.
    RolledForward,
    /// The commit point had not been reached; staged state was discarded.
    RolledBack,
}

/// An open transaction.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a ObjectStore,
    scratch: &'a ScratchStore,
    vex_dir: PathBuf,
    snapshot: BTreeMap<String, String>,
    staged: BTreeMap<ObjectId, PathBuf>,
    plan: Vec<PlanEntry>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    /// Opens a transaction, capturing a snapshot of every scratch pointer.
    ///
    /// # Errors
    ///
    /// Fails with a domain error if an interrupted transaction is still
    /// on disk (recovery must run first).
    pub fn begin(
        store: &'a ObjectStore,
        scratch: &'a ScratchStore,
        vex_dir: &Path,
    ) -> Result<Self> {
        let pending = vex_dir.join(PENDING_DIR);
        let plan_path = vex_dir.join(PLAN_FILE);
        if pending.exists() || plan_path.exists() {
            return Err(VexError::domain(
                "an interrupted transaction exists; run 'vex debug:rollback'",
            ));
        }
        fs::create_dir_all(&pending)?;

        Ok(Self {
            store,
            scratch,
            vex_dir: vex_dir.to_path_buf(),
            snapshot: scratch.dump_all()?,
            staged: BTreeMap::new(),
            plan: Vec::new(),
            finished: false,
        })
    }

    /// Stages a blob write. Idempotent against both the store and
    /// previously staged objects.
    pub fn put_blob(&mut self, data: &[u8]) -> Result<ObjectId> {
        let (id, bytes) = codec::encode_blob(data);
        self.stage(id, &bytes)?;
        Ok(id)
    }

    /// Stages a typed object write.
    pub fn put_typed<T: Persist>(&mut self, value: &T) -> Result<ObjectId> {
        let (id, bytes) = codec::encode_typed(value)?;
        self.stage(id, &bytes)?;
        Ok(id)
    }

    /// Reads a typed object, staged objects included.
    pub fn get_typed<T: Persist>(&self, id: ObjectId) -> Result<T> {
        if let Some(path) = self.staged.get(&id) {
            let bytes = fs::read(path)?;
            return codec::decode(&bytes, path)?.into_typed();
        }
        self.store.get_typed(id)
    }

    /// Reads a blob, staged objects included.
    pub fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>> {
        if let Some(path) = self.staged.get(&id) {
            let bytes = fs::read(path)?;
            return codec::decode(&bytes, path)?.into_blob();
        }
        self.store.get_blob(id)
    }

    /// True if the object is resident or staged.
    pub fn has(&self, id: ObjectId) -> bool {
        self.staged.contains_key(&id) || self.store.has(id)
    }

    /// Records a pointer update for commit.
    pub fn set_pointer(&mut self, name: &str, value: Option<String>) {
        if let Some(entry) = self.plan.iter_mut().find(|e| e.name == name) {
            entry.new = value;
            return;
        }
        self.plan.push(PlanEntry {
            name: name.to_string(),
            old: self.snapshot.get(name).cloned(),
            new: value,
        });
    }

    /// Current view of a pointer: planned value if set, else the snapshot.
    pub fn pointer(&self, name: &str) -> Option<String> {
        if let Some(entry) = self.plan.iter().find(|e| e.name == name) {
            return entry.new.clone();
        }
        self.snapshot.get(name).cloned()
    }

    /// Current view of a pointer as an object id.
    pub fn pointer_id(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.pointer(name) {
            None => Ok(None),
            Some(value) => ObjectId::from_hex(&value)
                .map(Some)
                .map_err(|_| VexError::InvalidPointer {
                    name: name.to_string(),
                    reason: format!("'{}' is not an object id", value),
                }),
        }
    }

    /// The snapshot value a pointer had at `begin`.
    pub fn snapshot_value(&self, name: &str) -> Option<String> {
        self.snapshot.get(name).cloned()
    }

    /// Every pointer name captured in the `begin` snapshot.
    pub fn snapshot_names(&self) -> Vec<String> {
        self.snapshot.keys().cloned().collect()
    }

    /// The physical before/after map for the action record: every planned
    /// pointer except the structural action-log and redo-stack swaps.
    pub fn physical_map(&self) -> BTreeMap<String, PointerChange> {
        self.plan
            .iter()
            .filter(|e| e.name != ACTION_LOG_HEAD && e.name != REDO_STACK_HEAD)
            .map(|e| {
                (
                    e.name.clone(),
                    PointerChange {
                        old: e.old.clone(),
                        new: e.new.clone(),
                    },
                )
            })
            .collect()
    }

    /// True when nothing has been staged or planned.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.plan.is_empty()
    }

    /// Stages an action record and plans the head swap to it.
    pub fn stage_action(&mut self, record: &ActionRecord) -> Result<ObjectId> {
        let id = self.put_typed(record)?;
        self.set_pointer(ACTION_LOG_HEAD, Some(id.as_hex()));
        Ok(id)
    }

    /// Number of staged objects, for fake-mode reporting.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Planned pointer updates, for fake-mode reporting.
    pub fn planned(&self) -> &[PlanEntry] {
        &self.plan
    }

    /// Commits the batch.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;

        if self.plan.is_empty() {
            // Nothing observable changes; staged objects are discarded.
            self.cleanup()?;
            return Ok(());
        }

        // The action-log-head swap is the commit point; it goes first.
        self.plan
            .sort_by_key(|e| if e.name == ACTION_LOG_HEAD { 0 } else { 1 });

        self.write_plan_file()?;

        for (id, path) in &self.staged {
            let file = File::open(path)?;
            file.sync_all()?;
            drop(file);
            self.store.install(path, *id)?;
        }

        for entry in &self.plan {
            match &entry.new {
                Some(value) => self.scratch.set(&entry.name, value)?,
                None => self.scratch.remove(&entry.name)?,
            }
        }

        self.cleanup()?;
        Ok(())
    }

    /// Abandons the transaction, discarding staged state.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.cleanup()
    }

    /// Leaves staged state on disk for inspection (debug mode).
    pub fn leave_for_inspection(mut self) {
        self.finished = true;
        // A later command will refuse to start until debug:rollback runs.
        if let Err(e) = self.write_plan_marker_for_debug() {
            warn!("could not persist debug plan: {}", e);
        }
    }

    fn write_plan_marker_for_debug(&self) -> Result<()> {
        // None of the swaps were applied, so recovery of this plan
        // always rolls back; until then it is inspectable JSON.
        let bytes =
            serde_json::to_vec_pretty(&self.plan).map_err(|e| VexError::Encode(e.to_string()))?;
        fs::write(self.vex_dir.join(PLAN_FILE), bytes)?;
        Ok(())
    }

    fn write_plan_file(&self) -> Result<()> {
        let path = self.vex_dir.join(PLAN_FILE);
        let tmp = self.vex_dir.join("plan.tmp");
        let bytes =
            serde_json::to_vec(&self.plan).map_err(|e| VexError::Encode(e.to_string()))?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn stage(&mut self, id: ObjectId, bytes: &[u8]) -> Result<()> {
        if self.staged.contains_key(&id) || self.store.has(id) {
            return Ok(());
        }
        let path = self.vex_dir.join(PENDING_DIR).join(id.as_hex());
        fs::write(&path, bytes)?;
        self.staged.insert(id, path);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let pending = self.vex_dir.join(PENDING_DIR);
        if pending.exists() {
            fs::remove_dir_all(&pending)?;
        }
        let plan = self.vex_dir.join(PLAN_FILE);
        if plan.exists() {
            fs::remove_file(&plan)?;
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // A dropped transaction (error unwind) must not leak staged
            // state; recovery would otherwise refuse the next command.
            let pending = self.vex_dir.join(PENDING_DIR);
            if pending.exists() {
                let _ = fs::remove_dir_all(&pending);
            }
        }
    }
}

/// Finishes or rolls back an interrupted transaction found on startup.
pub fn recover(scratch: &ScratchStore, vex_dir: &Path) -> Result<Option<Recovery>> {
    let pending = vex_dir.join(PENDING_DIR);
    let plan_path = vex_dir.join(PLAN_FILE);

    if !pending.exists() && !plan_path.exists() {
        return Ok(None);
    }

    if plan_path.exists() {
        let outcome = match read_plan(&plan_path) {
            Ok(plan) if !plan.is_empty() => {
                let first = &plan[0];
                let live = scratch.get(&first.name)?;
                if live == first.new {
                    // Commit point reached: every staged object was
                    // installed before the first swap. Re-apply the rest.
                    for entry in &plan[1..] {
                        match &entry.new {
                            Some(value) => scratch.set(&entry.name, value)?,
                            None => scratch.remove(&entry.name)?,
                        }
                    }
                    Recovery::RolledForward
                } else {
                    Recovery::RolledBack
                }
            }
            // Unreadable or empty plan: the crash happened while writing
            // it, before any swap. Discard.
            _ => Recovery::RolledBack,
        };

        fs::remove_file(&plan_path)
            .map_err(|e| VexError::RecoveryFailed(format!("removing plan: {}", e)))?;
        if pending.exists() {
            fs::remove_dir_all(&pending)
                .map_err(|e| VexError::RecoveryFailed(format!("removing pending: {}", e)))?;
        }
        info!("recovered interrupted transaction: {:?}", outcome);
        return Ok(Some(outcome));
    }

    // Staged objects without a plan: crash before commit began.
    fs::remove_dir_all(&pending)
        .map_err(|e| VexError::RecoveryFailed(format!("removing pending: {}", e)))?;
    info!("discarded staged objects from interrupted transaction");
    Ok(Some(Recovery::RolledBack))
}

fn read_plan(path: &Path) -> Result<Vec<PlanEntry>> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| VexError::Encode(e.to_string()))
}
