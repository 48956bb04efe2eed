//! File properties and the pending commit message.

use super::Output;
use anyhow::Result;
use serde_json::json;
use std::path::Path;
use vex_core::{Project, PropValue};

pub fn get(project: &Project, out: &Output, file: &Path) -> Result<()> {
    let props = project.prop_get(file)?;
    let as_json = serde_json::to_value(&props)?;
    out.emit(as_json, || {
        if props.is_empty() {
            println!("no properties");
        }
        for (name, value) in &props {
            println!("{} = {:?}", name, value);
        }
    })
}

pub fn set(project: &Project, out: &Output, file: &Path, name: &str, value: &str) -> Result<()> {
    // Booleans and integers parse as themselves; anything else is text.
    let value = if value == "true" {
        PropValue::Bool(true)
    } else if value == "false" {
        PropValue::Bool(false)
    } else if let Ok(n) = value.parse::<i64>() {
        PropValue::Int(n)
    } else {
        PropValue::Text(value.to_string())
    };

    let report = project.prop_set(file, name, value)?;
    out.emit(report.output.clone(), || {
        println!("set {} on {}", name, file.display());
    })
}

pub fn message_get(project: &Project, out: &Output) -> Result<()> {
    let message = project.message_get()?;
    out.emit(json!({ "message": message }), || {
        println!("{}", message);
    })
}

pub fn message_set(project: &Project, out: &Output, message: &str) -> Result<()> {
    let report = project.message_set(message)?;
    out.emit(report.output.clone(), || {
        println!("message set");
    })
}
