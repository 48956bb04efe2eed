//! Initialize a repository.

use super::Output;
use anyhow::{Context, Result};
use serde_json::json;
use vex_core::Project;

pub fn run(
    out: &Output,
    prefix: Option<&str>,
    include: Vec<String>,
    ignore: Vec<String>,
) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let project = Project::init(&cwd, prefix, include, ignore)?;

    let log = project.log(true, 1)?;
    let commit = log.first().map(|e| e.id.as_hex()).unwrap_or_default();

    out.emit(
        json!({ "initialized": cwd.display().to_string(), "commit": commit }),
        || {
            println!("Initialized vex repository in .vex/");
            println!();
            println!("  .vex/cas/       content-addressed objects");
            println!("  .vex/scratch/   branch, session and log pointers");
            println!("  .vex/settings/  tracked settings mirror");
            println!();
            println!("Initial commit: {}", commit);
        },
    )
}
