//! CLI command implementations.

use anyhow::{Context, Result};
use vex_core::{Project, Recovery};

pub mod branch;
pub mod commit;
pub mod debug;
pub mod files;
pub mod init;
pub mod props;
pub mod purge;
pub mod status;
pub mod undo;

/// Output sink honoring `--json`.
pub struct Output {
    json: bool,
}

impl Output {
    /// Creates an output sink.
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// True when `--json` was given.
    pub fn json(&self) -> bool {
        self.json
    }

    /// Prints the canonical JSON document (under `--json`) or runs the
    /// human rendering otherwise.
    pub fn emit(&self, value: serde_json::Value, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(&value)?);
        } else {
            human();
        }
        Ok(())
    }
}

/// Opens the repository resolved from `VEX_REPO` or the current
/// directory upward, reporting what recovery did if anything.
pub fn open_project(fake: bool, debug: bool) -> Result<Project> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let root = Project::discover(&cwd)?;
    let project = Project::open(&root)?.with_fake(fake).with_debug(debug);

    match project.recovered() {
        Some(Recovery::RolledForward) => {
            eprintln!("note: finished an interrupted transaction from a previous run");
        }
        Some(Recovery::RolledBack) => {
            eprintln!("note: rolled back an interrupted transaction from a previous run");
        }
        None => {}
    }

    Ok(project)
}

/// Prints the working-copy changes a command reported.
pub fn print_work(report: &vex_core::CommandReport) {
    for line in &report.work {
        let prefix = if report.applied { "" } else { "(fake) " };
        println!("  {}{}", prefix, line);
    }
}
