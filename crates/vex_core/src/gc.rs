//! Garbage collection for unreachable objects.
//!
//! The CAS is append-only: amend and purge leave their old objects in
//! place, merely unreachable. This explicit mark-and-sweep computes
//! reachability from every scratch pointer and deletes the rest. The
//! roots cover the full action log and redo stack, since records chain
//! through `prev`.

use crate::error::Result;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::scratch::ScratchStore;
use std::time::{Duration, SystemTime};

/// Progress callback: `(current, total, phase)`.
pub type GcProgressCallback = dyn Fn(usize, usize, &str);

/// Configuration for garbage collection.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
    /// Keep unreachable objects newer than this many days.
    pub grace_period_days: u32,
    /// Skip the grace period and delete immediately.
    pub aggressive: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            grace_period_days: 7,
            aggressive: false,
        }
    }
}

/// Report from one garbage collection run.
#[derive(Debug, Default)]
pub struct GcReport {
    /// Objects examined.
    pub objects_scanned: usize,
    /// Objects kept because they are reachable.
    pub objects_reachable: usize,
    /// Objects deleted (or that would be, under dry-run).
    pub objects_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
    /// Non-fatal errors.
    pub errors: Vec<String>,
}

/// Runs mark-and-sweep over the store.
pub fn gc(
    scratch: &ScratchStore,
    store: &ObjectStore,
    config: GcConfig,
    progress: Option<&GcProgressCallback>,
) -> Result<GcReport> {
    let mut report = GcReport::default();

    if let Some(cb) = progress {
        cb(0, 3, "roots");
    }
    let roots = collect_roots(scratch)?;

    if let Some(cb) = progress {
        cb(1, 3, "mark");
    }
    let reachable = store.iter_reachable(&roots)?;
    report.objects_reachable = reachable.len();

    if let Some(cb) = progress {
        cb(2, 3, "sweep");
    }

    let grace = if config.aggressive {
        Duration::from_secs(0)
    } else {
        Duration::from_secs(config.grace_period_days as u64 * 24 * 60 * 60)
    };
    let cutoff = SystemTime::now() - grace;

    let all = store.list_all()?;
    report.objects_scanned = all.len();
    let total = all.len();

    for (idx, (id, size, mtime)) in all.into_iter().enumerate() {
        if let Some(cb) = progress {
            if idx % 100 == 0 || idx + 1 == total {
                cb(idx + 1, total, "sweep");
            }
        }
        if reachable.contains(&id) {
            continue;
        }
        if mtime > cutoff {
            continue;
        }

        if config.dry_run {
            report.objects_deleted += 1;
            report.bytes_freed += size;
        } else {
            match store.delete(id) {
                Ok(()) => {
                    report.objects_deleted += 1;
                    report.bytes_freed += size;
                }
                Err(e) => report
                    .errors
                    .push(format!("failed to delete {}: {}", id.as_hex(), e)),
            }
        }
    }

    if let Some(cb) = progress {
        cb(3, 3, "done");
    }

    Ok(report)
}

/// Every scratch pointer value that is an object id is a GC root.
/// Uuid-valued pointers (session names, branch name map) root nothing
/// themselves; their objects are rooted by the `sessions/` and
/// `branches/` pointer families.
fn collect_roots(scratch: &ScratchStore) -> Result<Vec<ObjectId>> {
    let mut roots = Vec::new();
    for value in scratch.dump_all()?.into_values() {
        if let Ok(id) = ObjectId::from_hex(&value) {
            roots.push(id);
        }
    }
    Ok(roots)
}
