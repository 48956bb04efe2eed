//! Tracking commands: add, forget, remove, restore, ignore, include.

use super::{print_work, Output};
use anyhow::Result;
use std::path::PathBuf;
use vex_core::Project;

fn list_of(report: &vex_core::CommandReport, key: &str) -> Vec<String> {
    report.output[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn add(project: &Project, out: &Output, files: &[PathBuf]) -> Result<()> {
    let report = project.add(files)?;
    let added = list_of(&report, "added");
    out.emit(report.output.clone(), || {
        if added.is_empty() {
            println!("nothing to add");
        } else {
            for path in &added {
                println!("added {}", path);
            }
        }
    })
}

pub fn forget(project: &Project, out: &Output, files: &[PathBuf]) -> Result<()> {
    let report = project.forget(files)?;
    let forgotten = list_of(&report, "forgotten");
    out.emit(report.output.clone(), || {
        for path in &forgotten {
            println!("forgot {}", path);
        }
    })
}

pub fn remove(project: &Project, out: &Output, files: &[PathBuf]) -> Result<()> {
    let report = project.remove(files)?;
    let removed = list_of(&report, "removed");
    out.emit(report.output.clone(), || {
        for path in &removed {
            println!("removed {}", path);
        }
        print_work(&report);
    })
}

pub fn restore(project: &Project, out: &Output, files: &[PathBuf]) -> Result<()> {
    let report = project.restore(files)?;
    let restored = list_of(&report, "restored");
    out.emit(report.output.clone(), || {
        for path in &restored {
            println!("restored {}", path);
        }
        print_work(&report);
    })
}

pub fn ignore(project: &Project, out: &Output, patterns: Vec<String>) -> Result<()> {
    let report = project.ignore(patterns)?;
    out.emit(report.output.clone(), || {
        println!("updated ignore patterns");
    })
}

pub fn include(project: &Project, out: &Output, patterns: Vec<String>) -> Result<()> {
    let report = project.include(patterns)?;
    out.emit(report.output.clone(), || {
        println!("updated include patterns");
    })
}
