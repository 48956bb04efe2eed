//! Content-addressed object storage with integrity verification.

use crate::codec::{self, Persist};
use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use crate::types::AnyObject;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Content-addressed store.
///
/// Objects live at `cas/{first 2 hex}/{remaining 62 hex}`, written with
/// temp file + fsync + rename so a reader never observes a torn object.
/// The store never overwrites: `put` of existing content is a no-op.
#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores raw bytes, returning their content id. Idempotent.
    pub fn put_blob(&self, data: &[u8]) -> Result<ObjectId> {
        let (id, bytes) = codec::encode_blob(data);
        if self.has(id) {
            return Ok(id);
        }
        self.write_object(id, &bytes)?;
        Ok(id)
    }

    /// Stores a typed object, returning its id. Idempotent.
    pub fn put_typed<T: Persist>(&self, value: &T) -> Result<ObjectId> {
        let (id, bytes) = codec::encode_typed(value)?;
        if self.has(id) {
            return Ok(id);
        }
        self.write_object(id, &bytes)?;
        Ok(id)
    }

    /// Retrieves blob contents by id.
    pub fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>> {
        self.read_verified(id)?.into_blob()
    }

    /// Retrieves and decodes a typed object by id.
    pub fn get_typed<T: Persist>(&self, id: ObjectId) -> Result<T> {
        self.read_verified(id)?.into_typed()
    }

    /// Retrieves any object by id, whatever its kind.
    pub fn get_any(&self, id: ObjectId) -> Result<AnyObject> {
        let path = self.object_path(id);
        let decoded = self.read_verified(id)?;
        AnyObject::from_decoded(decoded, &path)
    }

    /// Checks whether an object is resident.
    pub fn has(&self, id: ObjectId) -> bool {
        self.object_path(id).exists()
    }

    /// Resolves a truncated hex prefix to a full id.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `AmbiguousPrefix` when more than
    /// one object does.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<ObjectId> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.len() < 2 || prefix.len() > ObjectId::HEX_LEN {
            return Err(VexError::InvalidId(prefix));
        }
        if prefix.len() == ObjectId::HEX_LEN {
            return ObjectId::from_hex(&prefix);
        }
        if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VexError::InvalidId(prefix));
        }

        let shard = &prefix[..2];
        let rest_prefix = &prefix[2..];
        let shard_dir = self.root.join(shard);
        if !shard_dir.exists() {
            return Err(VexError::NotFound(prefix));
        }

        let mut found = None;
        for entry in fs::read_dir(&shard_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.contains('.') {
                // Skip temp files from interrupted writes.
                continue;
            }
            if name.starts_with(rest_prefix) {
                if found.is_some() {
                    return Err(VexError::AmbiguousPrefix(prefix));
                }
                found = Some(ObjectId::from_hex(&format!("{}{}", shard, name))?);
            }
        }

        found.ok_or(VexError::NotFound(prefix))
    }

    /// Lists every resident object with its on-disk size and mtime.
    pub fn list_all(&self) -> Result<Vec<(ObjectId, u64, std::time::SystemTime)>> {
        let mut objects = Vec::new();
        if !self.root.exists() {
            return Ok(objects);
        }

        for shard_entry in fs::read_dir(&self.root)? {
            let shard_entry = shard_entry?;
            let shard_path = shard_entry.path();
            if !shard_path.is_dir() {
                continue;
            }
            let Some(shard) = shard_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            for obj_entry in fs::read_dir(&shard_path)? {
                let obj_entry = obj_entry?;
                let obj_path = obj_entry.path();
                if !obj_path.is_file() || obj_path.extension().is_some() {
                    continue;
                }
                let Some(name) = obj_path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Ok(id) = ObjectId::from_hex(&format!("{}{}", shard, name)) else {
                    continue;
                };

                let metadata = fs::metadata(&obj_path)?;
                let mtime = metadata
                    .modified()
                    .unwrap_or_else(|_| std::time::SystemTime::now());
                objects.push((id, metadata.len(), mtime));
            }
        }

        Ok(objects)
    }

    /// Walks the reference graph from the given roots, yielding every
    /// reachable id. Missing objects are skipped (the caller decides
    /// whether that is an error).
    pub fn iter_reachable(&self, roots: &[ObjectId]) -> Result<HashSet<ObjectId>> {
        let mut reachable = HashSet::new();
        let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if !self.has(id) {
                continue;
            }
            let obj = self.get_any(id)?;
            queue.extend(obj.references());
        }

        Ok(reachable)
    }

    /// Deletes an object. Only the GC calls this, after a reachability walk.
    pub fn delete(&self, id: ObjectId) -> Result<()> {
        let path = self.object_path(id);
        if !path.exists() {
            return Err(VexError::NotFound(id.as_hex()));
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    /// Installs an already-encoded, already-fsynced file at its final path.
    ///
    /// Used by the transaction layer to move staged objects out of
    /// `pending/`. The rename is atomic per file.
    pub(crate) fn install(&self, staged: &Path, id: ObjectId) -> Result<()> {
        let path = self.object_path(id);
        if path.exists() {
            fs::remove_file(staged)?;
            return Ok(());
        }
        let dir = path.parent().expect("object path always has a parent");
        fs::create_dir_all(dir)?;
        fs::rename(staged, &path)?;
        sync_dir(dir);
        Ok(())
    }

    /// Computes the filesystem path of an object.
    pub fn object_path(&self, id: ObjectId) -> PathBuf {
        self.root.join(id.shard()).join(id.rest())
    }

    /// Writes encoded bytes to disk atomically.
    fn write_object(&self, id: ObjectId, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(id);
        let dir = path.parent().expect("object path always has a parent");
        fs::create_dir_all(dir)?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        sync_dir(dir);
        Ok(())
    }

    /// Reads an object and verifies its hash matches its name.
    fn read_verified(&self, id: ObjectId) -> Result<codec::Decoded> {
        let path = self.object_path(id);
        if !path.exists() {
            return Err(VexError::NotFound(id.as_hex()));
        }

        let bytes = fs::read(&path)?;
        let decoded = codec::decode(&bytes, &path)?;
        let actual = decoded.id()?;
        if actual != id {
            return Err(VexError::CorruptObject {
                path,
                reason: format!("hash mismatch: content hashes to {}", actual.as_hex()),
            });
        }
        Ok(decoded)
    }
}

/// fsync a directory so renames into it survive a crash.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
