//! The undo/redo surface.

use super::{print_work, Output};
use anyhow::Result;
use chrono::DateTime;
use console::style;
use serde_json::json;
use vex_core::Project;

pub fn undo(project: &Project, out: &Output) -> Result<()> {
    match project.undo()? {
        Some(report) => out.emit(report.output.clone(), || {
            println!("undid {}", report.command);
            print_work(&report);
        }),
        None => out.emit(json!({ "undone": null }), || {
            println!("nothing to undo");
        }),
    }
}

pub fn redo(project: &Project, out: &Output, choice: Option<usize>) -> Result<()> {
    match project.redo(choice)? {
        Some(report) => out.emit(report.output.clone(), || {
            println!("redid {}", report.command);
            print_work(&report);
        }),
        None => out.emit(json!({ "redone": null }), || {
            println!("nothing to redo");
        }),
    }
}

pub fn undo_list(project: &Project, out: &Output, count: usize) -> Result<()> {
    let entries = project.undo_list(count)?;

    let as_json = json!({
        "actions": entries
            .iter()
            .map(|(id, record)| {
                json!({
                    "id": id.as_hex(),
                    "command": record.command,
                    "timestamp": record.timestamp,
                })
            })
            .collect::<Vec<_>>(),
    });

    out.emit(as_json, || {
        for (n, (id, record)) in entries.iter().enumerate() {
            let when = DateTime::from_timestamp(record.timestamp, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| record.timestamp.to_string());
            println!(
                "{:>3}  {}  {}  {}",
                n + 1,
                when,
                style(&id.as_hex()[..12]).cyan(),
                record.command
            );
        }
    })
}

pub fn redo_list(project: &Project, out: &Output) -> Result<()> {
    let entries = project.redo_list()?;

    let as_json = json!({
        "choices": entries
            .iter()
            .map(|(id, record)| {
                json!({
                    "id": id.as_hex(),
                    "command": record.command,
                    "args": record.args,
                })
            })
            .collect::<Vec<_>>(),
    });

    out.emit(as_json, || {
        if entries.is_empty() {
            println!("nothing to redo");
            return;
        }
        for (n, (id, record)) in entries.iter().enumerate() {
            println!(
                "{:>3}  {}  {} {}",
                n + 1,
                style(&id.as_hex()[..12]).cyan(),
                record.command,
                record.args
            );
        }
        println!();
        println!("re-apply one with: vex redo --choice=<n>");
    })
}
