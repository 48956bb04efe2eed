use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use vex_core::Project;

/// Isolated working directory for one scenario.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Creates an empty workspace.
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("failed to create temp directory")?;
        Ok(Self { dir })
    }

    /// Creates a workspace seeded with files.
    pub fn with_files(files: HashMap<String, Vec<u8>>) -> Result<Self> {
        let workspace = Self::empty()?;
        for (path, content) in files {
            workspace.write_file(&path, &content)?;
        }
        Ok(workspace)
    }

    /// The working directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Initializes a vex repository in the workspace.
    pub fn init_vex(&self, include: Vec<String>, ignore: Vec<String>) -> Result<Project> {
        Ok(Project::init(self.path(), Some("/code"), include, ignore)?)
    }

    /// Reopens the repository (recovery runs on open).
    pub fn open_vex(&self) -> Result<Project> {
        Ok(Project::open(self.path())?)
    }

    /// Writes a file, creating parent directories.
    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directories for {}", path))?;
        }
        fs::write(&full, content).with_context(|| format!("failed to write {}", path))?;
        Ok(())
    }

    /// Reads a file.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.path().join(path)).with_context(|| format!("failed to read {}", path))
    }

    /// Whether a file exists.
    pub fn file_exists(&self, path: &str) -> bool {
        self.path().join(path).exists()
    }
}
