//! Branch and session commands.

use super::{print_work, Output};
use anyhow::Result;
use console::style;
use serde_json::json;
use vex_core::Project;

pub fn switch(project: &Project, out: &Output, prefix: &str) -> Result<()> {
    let report = project.switch(prefix)?;
    out.emit(report.output.clone(), || {
        println!(
            "checked out {}",
            report.output["prefix"].as_str().unwrap_or(prefix)
        );
        print_work(&report);
    })
}

pub fn new(project: &Project, out: &Output, name: &str) -> Result<()> {
    let report = project.branch_new(name)?;
    out.emit(report.output.clone(), || {
        println!("created and opened branch {}", name);
        print_work(&report);
    })
}

pub fn open(project: &Project, out: &Output, name: &str) -> Result<()> {
    let report = project.branch_open(name)?;
    out.emit(report.output.clone(), || {
        println!("opened branch {}", name);
        print_work(&report);
    })
}

pub fn saveas(project: &Project, out: &Output, name: &str) -> Result<()> {
    let report = project.branch_saveas(name)?;
    out.emit(report.output.clone(), || {
        println!("saved as branch {}", name);
    })
}

pub fn swap(project: &Project, out: &Output, name: &str) -> Result<()> {
    let report = project.branch_swap(name)?;
    out.emit(report.output.clone(), || {
        println!("swapped names with branch {}", name);
    })
}

pub fn rename(project: &Project, out: &Output, name: &str) -> Result<()> {
    let report = project.branch_rename(name)?;
    out.emit(report.output.clone(), || {
        println!(
            "renamed branch {} to {}",
            report.output["from"].as_str().unwrap_or_default(),
            name
        );
    })
}

pub fn list(project: &Project, out: &Output) -> Result<()> {
    let branches = project.branches()?;
    let active = project.active_branch()?.uuid;

    let as_json = json!({
        "branches": branches
            .iter()
            .map(|b| {
                json!({
                    "name": b.name,
                    "uuid": b.uuid.to_string(),
                    "head": b.head.as_hex(),
                    "sealed": b.sealed,
                })
            })
            .collect::<Vec<_>>(),
    });

    out.emit(as_json, || {
        for branch in &branches {
            let marker = if branch.uuid == active { "*" } else { " " };
            let line = format!(
                "{} {}  {}{}",
                marker,
                branch.name,
                &branch.head.as_hex()[..12],
                if branch.sealed { "  (sealed)" } else { "" }
            );
            if branch.uuid == active {
                println!("{}", style(line).green());
            } else {
                println!("{}", line);
            }
        }
    })
}

pub fn sessions(project: &Project, out: &Output) -> Result<()> {
    let sessions = project.sessions()?;

    let as_json = json!({
        "sessions": sessions
            .iter()
            .map(|s| {
                json!({
                    "uuid": s.uuid.to_string(),
                    "head": s.head.as_hex(),
                    "prefix": s.prefix,
                    "prepared": s.prepared.map(|id| id.as_hex()),
                })
            })
            .collect::<Vec<_>>(),
    });

    out.emit(as_json, || {
        for session in &sessions {
            println!(
                "{}  {}  {}",
                session.uuid,
                &session.head.as_hex()[..12],
                session.prefix
            );
        }
    })
}
