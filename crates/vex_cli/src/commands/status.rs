//! Read-only reporting: status and log.

use super::Output;
use anyhow::Result;
use chrono::DateTime;
use console::style;
use serde_json::json;
use vex_core::{PathStatus, Project};

pub fn status(project: &Project, out: &Output) -> Result<()> {
    let report = project.status()?;

    let paths: serde_json::Map<String, serde_json::Value> = report
        .entries
        .iter()
        .map(|(path, state)| (path.clone(), json!(state.to_string())))
        .collect();
    let as_json = json!({ "paths": paths });

    out.emit(as_json, || {
        if report.entries.is_empty() {
            println!("nothing tracked, nothing new");
            return;
        }
        for (path, state) in &report.entries {
            let rendered = match state {
                PathStatus::Added => style(format!("{:>10}", state)).green(),
                PathStatus::Modified | PathStatus::Replaced => {
                    style(format!("{:>10}", state)).yellow()
                }
                PathStatus::Deleted => style(format!("{:>10}", state)).red(),
                PathStatus::Untracked | PathStatus::Ignored => {
                    style(format!("{:>10}", state)).dim()
                }
                PathStatus::Tracked => style(format!("{:>10}", state)),
            };
            println!("{}  {}", rendered, path);
        }
    })
}

pub fn log(project: &Project, out: &Output, all: bool, count: usize) -> Result<()> {
    let entries = project.log(all, count)?;

    let as_json = json!({
        "commits": entries,
    });

    out.emit(as_json, || {
        for entry in &entries {
            let when = DateTime::from_timestamp(entry.timestamp_applied, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| entry.timestamp_applied.to_string());
            let kind = format!("{:?}", entry.kind).to_lowercase();
            println!(
                "{:>3} {} {} {}: {}",
                entry.offset,
                when,
                style(&entry.id.as_hex()[..12]).cyan(),
                kind,
                entry.message
            );
        }
    })
}
