//! History rewriting.

use super::Output;
use anyhow::Result;
use std::path::PathBuf;
use vex_core::Project;

pub fn run(project: &Project, out: &Output, paths: &[PathBuf]) -> Result<()> {
    let report = project.purge(paths)?;
    out.emit(report.output.clone(), || {
        println!(
            "rewrote {} commit(s); new head {}",
            report.output["rewritten"].as_u64().unwrap_or(0),
            report.output["head"].as_str().unwrap_or_default()
        );
        println!("purged objects stay on disk until 'vex debug:gc'");
    })
}
