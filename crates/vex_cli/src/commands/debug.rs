//! Debug and inspection commands.

use super::Output;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use vex_core::{GcConfig, Project, Recovery};

pub fn cat(project: &Project, out: &Output, id: &str) -> Result<()> {
    let (kind, rendered) = project.debug_cat(id)?;
    out.emit(json!({ "kind": kind, "object": rendered }), || {
        println!("kind: {}", kind);
        println!("{}", rendered);
    })
}

pub fn status(project: &Project, out: &Output) -> Result<()> {
    let status = project.debug_status()?;
    let as_json = serde_json::to_value(&status)?;
    out.emit(as_json, || {
        for (name, value) in &status.pointers {
            println!("{:<40} {}", name, value);
        }
        println!();
        if status.pending || status.plan {
            println!("interrupted transaction on disk (pending: {}, plan: {})", status.pending, status.plan);
            println!("run 'vex debug:rollback' to resolve it");
        } else {
            println!("no transaction in flight");
        }
    })
}

pub fn rollback(project: &Project, out: &Output) -> Result<()> {
    let outcome = project.debug_rollback()?;
    let text = match outcome {
        Some(Recovery::RolledForward) => "finished the interrupted transaction",
        Some(Recovery::RolledBack) => "rolled the interrupted transaction back",
        None => "nothing to recover",
    };
    out.emit(json!({ "recovery": text }), || {
        println!("{}", text);
    })
}

pub fn gc(project: &Project, out: &Output, dry_run: bool, aggressive: bool) -> Result<()> {
    let config = GcConfig {
        dry_run,
        aggressive,
        ..GcConfig::default()
    };

    let bar = if out.json() {
        None
    } else {
        let bar = ProgressBar::new(1);
        bar.set_style(
            ProgressStyle::with_template("{msg:>6} [{bar:30}] {pos}/{len}")
                .expect("static template"),
        );
        Some(bar)
    };

    let progress = bar.clone().map(|bar| {
        move |current: usize, total: usize, phase: &str| {
            bar.set_length(total.max(1) as u64);
            bar.set_position(current as u64);
            bar.set_message(phase.to_string());
        }
    });
    let progress_ref = progress
        .as_ref()
        .map(|cb| cb as &vex_core::gc::GcProgressCallback);

    let report = project.gc(config, progress_ref)?;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    out.emit(
        json!({
            "scanned": report.objects_scanned,
            "reachable": report.objects_reachable,
            "deleted": report.objects_deleted,
            "bytes_freed": report.bytes_freed,
            "errors": report.errors,
        }),
        || {
            let verb = if dry_run { "would delete" } else { "deleted" };
            println!(
                "{} objects scanned, {} reachable, {} {} ({} bytes)",
                report.objects_scanned,
                report.objects_reachable,
                verb,
                report.objects_deleted,
                report.bytes_freed
            );
            for error in &report.errors {
                eprintln!("warning: {}", error);
            }
        },
    )
}
