//! Reports printed by CLI commands.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::cli::args::{IndexlibArgs, OutputFormat};
use crate::error::Result;
use crate::index::segment::SegmentId;
use crate::merge::MergeStats;

/// Result of `indexlib merge`.
#[derive(Debug, Serialize)]
pub struct MergeReport {
    pub dest: String,
    pub version_id: u32,
    pub segment_ids: Vec<SegmentId>,
    pub stats: MergeStats,
    pub counters: BTreeMap<String, u64>,
}

/// One segment of an inspected version.
#[derive(Debug, Serialize)]
pub struct SegmentReport {
    pub segment_id: SegmentId,
    pub base_doc_id: u32,
    pub doc_count: u32,
    pub deleted_count: u32,
    pub merged: bool,
    pub timestamp: i64,
}

/// Result of `indexlib inspect`.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub path: String,
    pub schema: String,
    pub version_id: u32,
    pub timestamp: i64,
    pub locator: String,
    pub shard_count: u32,
    pub total_docs: u32,
    pub live_docs: u32,
    pub indexes: Vec<String>,
    pub pack_attributes: Vec<String>,
    pub segments: Vec<SegmentReport>,
}

/// Print `result` in the format selected on the command line.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &IndexlibArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if !args.quiet {
                println!("{message}");
                println!();
            }
            print!("{}", render_human(&serde_json::to_value(result)?));
        }
        OutputFormat::Json => {
            let json = if args.pretty {
                serde_json::to_string_pretty(result)?
            } else {
                serde_json::to_string(result)?
            };
            println!("{json}");
        }
    }
    Ok(())
}

/// `key: value` lines; nested objects and arrays of objects are indented.
pub fn render_human(value: &serde_json::Value) -> String {
    let mut out = String::new();
    render_into(&mut out, value, 0);
    out
}

fn render_into(out: &mut String, value: &serde_json::Value, depth: usize) {
    let pad = "  ".repeat(depth);
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) => {
                        let _ = writeln!(out, "{pad}{key}:");
                        render_into(out, val, depth + 1);
                    }
                    serde_json::Value::Array(arr) if arr.iter().any(|v| v.is_object()) => {
                        let _ = writeln!(out, "{pad}{key}:");
                        for (i, item) in arr.iter().enumerate() {
                            let _ = writeln!(out, "{pad}  [{i}]");
                            render_into(out, item, depth + 2);
                        }
                    }
                    _ => {
                        let _ = writeln!(out, "{pad}{key}: {}", format_value(val));
                    }
                }
            }
        }
        _ => {
            let _ = writeln!(out, "{pad}{}", format_value(value));
        }
    }
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}
