//! Named mutable pointers, the only mutable state in a repository.
//!
//! Each pointer is one file under `.vex/scratch/` holding a single line:
//! an object id, a uuid, or a short literal. Updates are write-temp,
//! fsync, atomic-rename, so a reader sees either the old or the new
//! value, never a torn one. All mutation goes through the transaction
//! layer; nothing else calls [`ScratchStore::set`].

use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The active session's uuid.
pub const ACTIVE_SESSION: &str = "active_session";
/// Head of the action log (an action record id).
pub const ACTION_LOG_HEAD: &str = "action_log_head";
/// Head of the redo stack (a redo record id).
pub const REDO_STACK_HEAD: &str = "redo_stack_head";
/// Current settings object id.
pub const SETTINGS: &str = "settings";

/// Pointer name for a branch object.
pub fn branch_ptr(uuid: Uuid) -> String {
    format!("branches/{}", uuid)
}

/// Pointer name for a session object.
pub fn session_ptr(uuid: Uuid) -> String {
    format!("sessions/{}", uuid)
}

/// Pointer name mapping a branch name to its uuid.
pub fn name_ptr(name: &str) -> String {
    format!("names/{}", name)
}

/// The scratch pointer store.
#[derive(Debug)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    /// Creates a store rooted at the scratch directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the scratch root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads a pointer. `None` when the pointer does not exist.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        let path = self.pointer_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let value = content.trim();
        if value.is_empty() || value.contains('\n') {
            return Err(VexError::InvalidPointer {
                name: name.to_string(),
                reason: "expected a single non-empty line".to_string(),
            });
        }
        Ok(Some(value.to_string()))
    }

    /// Reads a pointer expected to hold an object id.
    pub fn get_id(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.get(name)? {
            None => Ok(None),
            Some(value) => {
                ObjectId::from_hex(&value)
                    .map(Some)
                    .map_err(|_| VexError::InvalidPointer {
                        name: name.to_string(),
                        reason: format!("'{}' is not an object id", value),
                    })
            }
        }
    }

    /// Reads a pointer expected to hold a uuid.
    pub fn get_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        match self.get(name)? {
            None => Ok(None),
            Some(value) => Uuid::parse_str(&value)
                .map(Some)
                .map_err(|_| VexError::InvalidPointer {
                    name: name.to_string(),
                    reason: format!("'{}' is not a uuid", value),
                }),
        }
    }

    /// Writes a pointer atomically. Transaction layer only.
    pub(crate) fn set(&self, name: &str, value: &str) -> Result<()> {
        let path = self.pointer_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            writeln!(file, "{}", value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        #[cfg(unix)]
        {
            if let Some(parent) = path.parent() {
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }

        Ok(())
    }

    /// Removes a pointer. No-op when absent. Transaction layer only.
    pub(crate) fn remove(&self, name: &str) -> Result<()> {
        let path = self.pointer_path(name)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Snapshot of every pointer, keyed by name.
    pub fn dump_all(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        if self.root.exists() {
            self.collect(&self.root.clone(), &mut out)?;
        }
        Ok(out)
    }

    /// Lists pointers under a namespace prefix such as `branches` or `names`.
    pub fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let all = self.dump_all()?;
        let wanted = format!("{}/", prefix);
        Ok(all
            .into_iter()
            .filter(|(name, _)| name.starts_with(&wanted))
            .map(|(name, value)| (name[wanted.len()..].to_string(), value))
            .collect())
    }

    fn collect(&self, dir: &Path, out: &mut BTreeMap<String, String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if path.is_file() {
                if path.extension().and_then(|s| s.to_str()) == Some("tmp") {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let Some(name) = rel.to_str() else { continue };
                let name = name.to_string();
                if let Some(value) = self.get(&name)? {
                    out.insert(name, value);
                }
            }
        }
        Ok(())
    }

    fn pointer_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.starts_with('/')
            || name.split('/').any(|part| {
                part.is_empty() || part == "." || part == ".." || part.ends_with(".tmp")
            })
        {
            return Err(VexError::InvalidPointer {
                name: name.to_string(),
                reason: "bad pointer name".to_string(),
            });
        }
        Ok(self.root.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ScratchStore) {
        let tmp = TempDir::new().unwrap();
        let store = ScratchStore::new(tmp.path().join("scratch"));
        (tmp, store)
    }

    #[test]
    fn test_roundtrip() {
        let (_tmp, store) = store();
        store.set(ACTION_LOG_HEAD, &"ab".repeat(32)).unwrap();
        assert_eq!(
            store.get(ACTION_LOG_HEAD).unwrap().unwrap(),
            "ab".repeat(32)
        );
        assert_eq!(
            store.get_id(ACTION_LOG_HEAD).unwrap().unwrap(),
            ObjectId::from_bytes([0xab; 32])
        );
    }

    #[test]
    fn test_absent_pointer_is_none() {
        let (_tmp, store) = store();
        assert_eq!(store.get(REDO_STACK_HEAD).unwrap(), None);
        assert_eq!(store.get_id(REDO_STACK_HEAD).unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_tmp, store) = store();
        store.set(SETTINGS, "x").unwrap();
        store.remove(SETTINGS).unwrap();
        store.remove(SETTINGS).unwrap();
        assert_eq!(store.get(SETTINGS).unwrap(), None);
    }

    #[test]
    fn test_namespaced_pointers() {
        let (_tmp, store) = store();
        let uuid = Uuid::new_v4();
        store.set(&branch_ptr(uuid), &"01".repeat(32)).unwrap();
        store.set(&name_ptr("latest"), &uuid.to_string()).unwrap();

        let branches = store.list("branches").unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].0, uuid.to_string());

        assert_eq!(store.get_uuid(&name_ptr("latest")).unwrap(), Some(uuid));
    }

    #[test]
    fn test_dump_all_skips_temp_files() {
        let (_tmp, store) = store();
        store.set(ACTIVE_SESSION, &Uuid::new_v4().to_string()).unwrap();
        fs::create_dir_all(store.root()).unwrap();
        fs::write(store.root().join("leftover.tmp"), "junk").unwrap();

        let all = store.dump_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(ACTIVE_SESSION));
    }

    #[test]
    fn test_bad_names_rejected() {
        let (_tmp, store) = store();
        assert!(store.get("../escape").is_err());
        assert!(store.get("").is_err());
        assert!(store.get("/abs").is_err());
    }

    #[test]
    fn test_invalid_id_value_reported() {
        let (_tmp, store) = store();
        store.set(ACTION_LOG_HEAD, "not-a-hash").unwrap();
        assert!(matches!(
            store.get_id(ACTION_LOG_HEAD),
            Err(VexError::InvalidPointer { .. })
        ));
    }
}
