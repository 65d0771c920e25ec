// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Output formatting for sbaudit
//!
//! Results go to stdout so they can be piped; logs and errors go to
//! stderr. Two formats are supported: pretty JSON and an indented
//! `key: value` listing for reading on a terminal.

use crate::error::Error;
use serde_json::{json, Value};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Table,
}

impl From<crate::OutputFormat> for Format {
    fn from(format: crate::OutputFormat) -> Self {
        match format {
            crate::OutputFormat::Json => Format::Json,
            crate::OutputFormat::Table => Format::Table,
        }
    }
}

#[derive(Debug)]
pub struct OutputHandler {
    format: Format,
}

impl OutputHandler {
    pub fn new(format: crate::OutputFormat) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Print a successful result to stdout
    pub fn success(&self, value: Value) {
        let output = match self.format {
            Format::Json => self.format_json(&value),
            Format::Table => self.format_table(&value),
        };

        println!("{output}");
    }

    /// Print an error to stderr
    pub fn error(&self, error: &Error) {
        match self.format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&error_json(error))
                        .unwrap_or_default()
                );
            }
            Format::Table => eprintln!("Error: {error}"),
        }
    }

    fn format_json(&self, value: &Value) -> String {
        serde_json::to_string_pretty(value)
            .unwrap_or_else(|_| "{}".to_string())
    }

    fn format_table(&self, value: &Value) -> String {
        let mut output = String::new();
        match value {
            Value::Object(map) if map.is_empty() => output.push_str("(empty)"),
            Value::Object(_) | Value::Array(_) => {
                write_nested(&mut output, value, 0)
            }
            _ => output.push_str(&format_value_brief(value)),
        }
        output.trim_end().to_string()
    }
}

pub(crate) fn error_json(error: &Error) -> Value {
    json!({
        "error": {
            "kind": error.kind(),
            "message": error.to_string(),
        }
    })
}

fn format_value_brief(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        Value::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
        other => other.to_string(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/*
 * Objects print one "key: value" line per scalar and a "key:" header
 * followed by an indented block for anything nested. Array items are
 * bulleted; a nested object item starts on the bullet line.
 */
fn write_nested(output: &mut String, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Array(items) if items.is_empty() => {
                        output.push_str(&format!("{indent}{key}: (none)\n"))
                    }
                    v if is_scalar(v) => output.push_str(&format!(
                        "{indent}{key}: {}\n",
                        format_value_brief(v)
                    )),
                    v => {
                        output.push_str(&format!("{indent}{key}:\n"));
                        write_nested(output, v, depth + 1);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if is_scalar(item) {
                    output.push_str(&format!(
                        "{indent}- {}\n",
                        format_value_brief(item)
                    ));
                } else {
                    let mut block = String::new();
                    write_nested(&mut block, item, depth + 1);
                    let block = block.trim_start();
                    output.push_str(&format!("{indent}- {block}"));
                }
            }
        }
        scalar => output.push_str(&format!(
            "{indent}{}\n",
            format_value_brief(scalar)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(value: Value) -> String {
        OutputHandler::new(crate::OutputFormat::Table).format_table(&value)
    }

    #[test]
    fn test_table_scalars_and_nesting() {
        let out = table(json!({
            "secure_boot_enabled": true,
            "setup_mode": null,
            "active_entry": {"loader_filename": "shimx64.efi"},
            "warnings": [],
        }));
        assert!(out.contains("secure_boot_enabled: yes"));
        assert!(out.contains("setup_mode: -"));
        assert!(out.contains("active_entry:\n  loader_filename: shimx64.efi"));
        assert!(out.contains("warnings: (none)"));
    }

    #[test]
    fn test_table_array_of_objects() {
        let out = table(json!({
            "records": [
                {"index": 1, "issuer": "CN=A"},
                {"index": 2, "issuer": "CN=B"},
            ]
        }));
        assert!(out.contains("records:\n  - index: 1\n    issuer: CN=A\n"));
        assert!(out.contains("  - index: 2\n    issuer: CN=B"));
    }

    #[test]
    fn test_table_empty_object() {
        assert_eq!(table(json!({})), "(empty)");
    }

    #[test]
    fn test_error_json() {
        let e = Error::MalformedDescriptor("no GPT".to_string());
        let v = error_json(&e);
        assert_eq!(v["error"]["kind"], "malformed_descriptor");
        assert!(v["error"]["message"].as_str().unwrap().contains("no GPT")); //#[allow_ci]
    }
}
