//! Commit commands: commit, commit:prepare (with --watch), commit:amend.

use super::Output;
use anyhow::Result;
use std::time::Duration;
use vex_core::Project;

pub fn commit(project: &Project, out: &Output, message: Option<String>) -> Result<()> {
    let report = project.commit(message)?;
    out.emit(report.output.clone(), || {
        println!(
            "committed {}",
            report.output["commit"].as_str().unwrap_or_default()
        );
    })
}

pub fn amend(project: &Project, out: &Output, message: Option<String>) -> Result<()> {
    let report = project.amend(message)?;
    out.emit(report.output.clone(), || {
        println!(
            "amended to {}",
            report.output["commit"].as_str().unwrap_or_default()
        );
    })
}

pub fn prepare(project: &Project, out: &Output, watch: bool, interval: u64) -> Result<()> {
    if !watch {
        let report = project.prepare()?;
        return out.emit(report.output.clone(), || match report.output["prepared"].as_str() {
            Some(id) => println!("prepared {}", id),
            None => println!("nothing to prepare"),
        });
    }

    // Polling watch loop: each pass is one full transactional prepare,
    // with no state carried in memory between passes. A standard
    // interrupt ends the loop between transactions.
    if out.json() {
        anyhow::bail!("--watch produces a stream, not a single document; drop --json");
    }
    eprintln!("watching for changes (interrupt to stop)");
    loop {
        let report = project.prepare()?;
        if let Some(id) = report.output["prepared"].as_str() {
            println!("prepared {}", id);
        }
        std::thread::sleep(Duration::from_secs(interval.max(1)));
    }
}
