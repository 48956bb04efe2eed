//! Working-copy path mapping and deferred filesystem mutations.
//!
//! Repository paths are absolute, `/`-separated and NFC-normalized:
//! `/` is the repository root, `/.vex` the tracked settings mirror, and
//! the session prefix names the subtree materialized into the working
//! directory. Commands never touch the working copy mid-transaction;
//! they return a [`WorkPlan`] that runs after the commit point (or is
//! narrated instead, under fake mode).

use crate::codec;
use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Repository path of the tracked settings mirror.
pub const VEX_DIR: &str = "/.vex";

/// Normalizes a repository path: leading slash, no trailing slash, NFC.
pub fn normalize_repo_path(path: &str) -> Result<String> {
    let path = codec::nfc(path.trim());
    let trimmed = path.trim_end_matches('/');
    let base = if trimmed.is_empty() { "/" } else { trimmed };
    if !base.starts_with('/') {
        return Err(VexError::domain(format!(
            "repository paths are absolute: '{}'",
            path
        )));
    }
    if base.split('/').any(|part| part == "." || part == "..") {
        return Err(VexError::domain(format!("bad repository path '{}'", path)));
    }
    Ok(base.to_string())
}

/// True when `path` equals `prefix` or sits beneath it.
pub fn under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Ancestor directories of a repository path, nearest last, excluding `/`.
pub fn parent_dirs(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

/// Maps a repository path to its working-copy location, if materialized.
///
/// Paths under `/.vex` map into the settings mirror; paths under the
/// session prefix map into the working directory; anything else is not
/// on disk while this prefix is checked out.
pub fn repo_to_full(working_dir: &Path, prefix: &str, repo_path: &str) -> Option<PathBuf> {
    if under(repo_path, VEX_DIR) {
        let rel = repo_path.trim_start_matches('/');
        return Some(working_dir.join(rel));
    }
    if !under(repo_path, prefix) {
        return None;
    }
    if repo_path == prefix {
        return Some(working_dir.to_path_buf());
    }
    let rel = if prefix == "/" {
        repo_path.trim_start_matches('/')
    } else {
        &repo_path[prefix.len() + 1..]
    };
    Some(working_dir.join(rel))
}

/// Maps a working-copy file back to its repository path.
pub fn full_to_repo(working_dir: &Path, prefix: &str, full: &Path) -> Result<String> {
    let rel = full
        .strip_prefix(working_dir)
        .map_err(|_| VexError::domain(format!("{} is outside the project", full.display())))?;
    let rel_text = rel.to_string_lossy().replace('\\', "/");
    let repo = if rel_text.starts_with(".vex/") || rel_text == ".vex" {
        format!("/{}", rel_text)
    } else if prefix == "/" {
        format!("/{}", rel_text)
    } else {
        format!("{}/{}", prefix, rel_text)
    };
    normalize_repo_path(&repo)
}

/// One deferred working-copy mutation.
#[derive(Debug, Clone)]
pub enum WorkOp {
    /// Write a file from a stored blob.
    WriteBlob {
        /// Destination path.
        path: PathBuf,
        /// Blob holding the contents.
        blob: ObjectId,
        /// Whether to set the executable bit.
        executable: bool,
    },
    /// Write a file with literal contents (settings mirror).
    WriteText {
        /// Destination path.
        path: PathBuf,
        /// Contents.
        text: String,
    },
    /// Remove a file.
    RemoveFile {
        /// Path to remove.
        path: PathBuf,
    },
    /// Create a directory (and parents).
    MkDir {
        /// Directory to create.
        path: PathBuf,
    },
    /// Remove a directory if it is empty; skipped otherwise.
    RmDirIfEmpty {
        /// Directory to remove.
        path: PathBuf,
    },
}

/// Deferred working-copy mutations, applied after the commit point.
#[derive(Debug, Clone, Default)]
pub struct WorkPlan {
    ops: Vec<WorkOp>,
}

impl WorkPlan {
    /// Appends an operation.
    pub fn push(&mut self, op: WorkOp) {
        self.ops.push(op);
    }

    /// Merges another plan after this one.
    pub fn extend(&mut self, other: WorkPlan) {
        self.ops.extend(other.ops);
    }

    /// True when there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Applies the plan. Under `fake`, narrates instead of writing.
    pub fn execute(&self, store: &ObjectStore, fake: bool) -> Result<()> {
        for op in &self.ops {
            if fake {
                info!("would {}", describe(op));
                continue;
            }
            apply(store, op)?;
        }
        Ok(())
    }

    /// Human-readable description of every operation.
    pub fn describe_all(&self) -> Vec<String> {
        self.ops.iter().map(describe).collect()
    }
}

fn describe(op: &WorkOp) -> String {
    match op {
        WorkOp::WriteBlob { path, blob, .. } => {
            format!("write {} from {}", path.display(), &blob.as_hex()[..12])
        }
        WorkOp::WriteText { path, .. } => format!("write {}", path.display()),
        WorkOp::RemoveFile { path } => format!("remove {}", path.display()),
        WorkOp::MkDir { path } => format!("create directory {}", path.display()),
        WorkOp::RmDirIfEmpty { path } => format!("remove directory {}", path.display()),
    }
}

fn apply(store: &ObjectStore, op: &WorkOp) -> Result<()> {
    match op {
        WorkOp::WriteBlob {
            path,
            blob,
            executable,
        } => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = store.get_blob(*blob)?;
            fs::write(path, bytes)?;
            set_executable(path, *executable)?;
        }
        WorkOp::WriteText { path, text } => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, text)?;
        }
        WorkOp::RemoveFile { path } => {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        WorkOp::MkDir { path } => {
            fs::create_dir_all(path)?;
        }
        WorkOp::RmDirIfEmpty { path } => match fs::remove_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => {
                // Untracked files keep the directory alive; leave it.
                warn!("not removing non-empty directory {}", path.display());
            }
        },
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if executable {
        let meta = fs::metadata(path)?;
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}
