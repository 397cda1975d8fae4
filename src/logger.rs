//! Output logger: per-device records rendered as human-readable text,
//! JSON, or CSV, to stdout or a file.
//!
//! Records preserve insertion order, with the device index stored first
//! under the `gpu` key. CSV output is the union of every record's
//! flattened fields; devices missing a field get the `N/A` sentinel.
//! Watch iterations are timestamped and buffered so a whole run prints
//! as one JSON array or one CSV table.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::Result;

pub const NA: &str = "N/A";

/// One device's worth of output fields, in insertion order.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

/// Output schema family. `RocmSmi` renders the legacy concise table
/// for human-readable output; structured formats are unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Amdsmi,
    RocmSmi,
}

pub enum Destination {
    Stdout,
    File(File),
}

pub struct OutputLogger {
    format: OutputFormat,
    compatibility: Compatibility,
    destination: Destination,
    records: Vec<Record>,
    watch_buffer: Vec<Record>,
    watching: bool,
}

impl OutputLogger {
    pub fn new(format: OutputFormat, file: Option<PathBuf>) -> Result<Self> {
        let destination = match file {
            Some(path) => Destination::File(File::create(path)?),
            None => Destination::Stdout,
        };
        Ok(Self {
            format,
            compatibility: Compatibility::Amdsmi,
            destination,
            records: Vec::new(),
            watch_buffer: Vec::new(),
            watching: false,
        })
    }

    pub fn with_compatibility(mut self, compatibility: Compatibility) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Store one field on the record for `device_index`, creating the
    /// record with its leading `gpu` key on first touch.
    pub fn store(&mut self, device_index: usize, key: &str, value: Value) {
        let record = self.record_for(device_index);
        record.insert(key.to_string(), value);
    }

    /// Store the `N/A` sentinel for an unsupported field.
    pub fn store_na(&mut self, device_index: usize, key: &str) {
        self.store(device_index, key, Value::String(NA.to_string()));
    }

    /// Store a field on the invocation-wide record (no `gpu` key),
    /// used by subcommands that do not report per device.
    pub fn store_global(&mut self, key: &str, value: Value) {
        let position = self.records.iter().position(|r| !r.contains_key("gpu"));
        let record = match position {
            Some(i) => &mut self.records[i],
            None => {
                self.records.push(Record::new());
                self.records.last_mut().unwrap()
            }
        };
        record.insert(key.to_string(), value);
    }

    /// Write one raw line to the destination, bypassing the record
    /// buffer. Used for prompts and one-line text summaries.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_rendered(&format!("{line}\n"))
    }

    fn record_for(&mut self, device_index: usize) -> &mut Record {
        let gpu = Value::Number(device_index.into());
        let position = self
            .records
            .iter()
            .position(|r| r.get("gpu") == Some(&gpu));
        match position {
            Some(i) => &mut self.records[i],
            None => {
                let mut record = Record::new();
                record.insert("gpu".to_string(), gpu);
                self.records.push(record);
                self.records.last_mut().unwrap()
            }
        }
    }

    /// Mark the start of a watch run. Flushed iterations are buffered
    /// and printed together by [`finish`](Self::finish).
    pub fn start_watching(&mut self) {
        self.watching = true;
        self.watch_buffer.clear();
    }

    /// Emit the current iteration's records.
    ///
    /// Outside a watch this renders immediately. Inside a watch the
    /// records are timestamped and buffered; human-readable text still
    /// prints per iteration so the terminal shows progress.
    pub fn flush(&mut self) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.records);
        if self.watching {
            let stamp = Value::Number(Utc::now().timestamp().into());
            for mut record in records {
                // Timestamp leads the record, before the gpu key.
                let mut stamped = Record::new();
                stamped.insert("timestamp".to_string(), stamp.clone());
                stamped.append(&mut record);
                if self.format == OutputFormat::Text {
                    self.write_rendered(&render_text(std::slice::from_ref(&stamped)))?;
                }
                self.watch_buffer.push(stamped);
            }
            Ok(())
        } else {
            self.render_and_write(&records)
        }
    }

    /// End a watch run, printing the buffered iterations for the
    /// structured formats.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        if !self.watching {
            return Ok(());
        }
        self.watching = false;
        let buffered = std::mem::take(&mut self.watch_buffer);
        match self.format {
            OutputFormat::Text => Ok(()),
            // An empty CSV table has no header worth printing; an empty
            // JSON run still emits a valid document.
            OutputFormat::Csv if buffered.is_empty() => Ok(()),
            _ => self.render_and_write(&buffered),
        }
    }

    fn render_and_write(&mut self, records: &[Record]) -> Result<()> {
        let rendered = match self.format {
            OutputFormat::Text => match self.compatibility {
                Compatibility::Amdsmi => render_text(records),
                Compatibility::RocmSmi => render_table(records),
            },
            OutputFormat::Json => render_json(records)?,
            OutputFormat::Csv => render_csv(records),
        };
        self.write_rendered(&rendered)
    }

    fn write_rendered(&mut self, rendered: &str) -> Result<()> {
        match &mut self.destination {
            Destination::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(rendered.as_bytes())?;
                out.flush()?;
            }
            Destination::File(file) => {
                file.write_all(rendered.as_bytes())?;
                file.flush()?;
            }
        }
        Ok(())
    }
}

/// Render records as aligned `KEY: VALUE` blocks, one per device,
/// nested objects indented under their parent key.
pub fn render_text(records: &[Record]) -> String {
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let width = record.keys().map(|k| k.len()).max().unwrap_or(0);
        for (key, value) in record {
            render_text_field(&mut out, key, value, width, 0);
        }
    }
    out
}

fn render_text_field(out: &mut String, key: &str, value: &Value, width: usize, depth: usize) {
    let indent = "    ".repeat(depth);
    let label = key.to_uppercase();
    match value {
        Value::Object(map) => {
            out.push_str(&format!("{indent}{label}:\n"));
            let inner_width = map.keys().map(|k| k.len()).max().unwrap_or(0);
            for (k, v) in map {
                render_text_field(out, k, v, inner_width, depth + 1);
            }
        }
        Value::Array(items) => {
            out.push_str(&format!("{indent}{label}:\n"));
            if items.is_empty() {
                out.push_str(&format!("{}{NA}\n", "    ".repeat(depth + 1)));
            }
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Object(map) => {
                        let inner_width = map.keys().map(|k| k.len()).max().unwrap_or(0);
                        if i > 0 {
                            out.push('\n');
                        }
                        for (k, v) in map {
                            render_text_field(out, k, v, inner_width, depth + 1);
                        }
                    }
                    other => {
                        out.push_str(&format!(
                            "{}{}\n",
                            "    ".repeat(depth + 1),
                            scalar_text(other)
                        ));
                    }
                }
            }
        }
        other => {
            out.push_str(&format!(
                "{indent}{label}:{} {}\n",
                " ".repeat(width.saturating_sub(key.len())),
                scalar_text(other)
            ));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => NA.to_string(),
        other => other.to_string(),
    }
}

/// Render records as a JSON array. Numeric fields stay numeric.
pub fn render_json(records: &[Record]) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(records)?;
    rendered.push('\n');
    Ok(rendered)
}

/// Render records as CSV. The header is the union of every record's
/// flattened fields in first-seen order; missing cells get `N/A`.
pub fn render_csv(records: &[Record]) -> String {
    let flat: Vec<Record> = records.iter().map(flatten_record).collect();

    let mut header: Vec<String> = Vec::new();
    for record in &flat {
        for key in record.keys() {
            if !header.iter().any(|h| h == key) {
                header.push(key.clone());
            }
        }
    }

    let mut out = String::new();
    out.push_str(&header.join(","));
    out.push('\n');
    for record in &flat {
        let row: Vec<String> = header
            .iter()
            .map(|key| {
                record
                    .get(key)
                    .map(|v| csv_cell(&scalar_text(v)))
                    .unwrap_or_else(|| NA.to_string())
            })
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Flatten nested objects with parent-key prefixes and arrays with
/// positional prefixes, e.g. `fw_list_0_fw_id`.
pub fn flatten_record(record: &Record) -> Record {
    let mut flat = Record::new();
    for (key, value) in record {
        flatten_value(&mut flat, key, value);
    }
    flat
}

fn flatten_value(flat: &mut Record, key: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_value(flat, &format!("{key}_{k}"), v);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(flat, &format!("{key}_{i}"), item);
            }
        }
        other => {
            flat.insert(key.to_string(), other.clone());
        }
    }
}

fn csv_cell(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Render the legacy concise table: one row per device, columns from
/// the first record's scalar fields.
pub fn render_table(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let columns: Vec<&String> = first
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Object(_) | Value::Array(_)))
        .map(|(k, _)| k)
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|c| record.get(*c).map(scalar_text).unwrap_or_else(|| NA.to_string()))
            .collect();
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
        rows.push(row);
    }

    let mut out = String::new();
    for (i, column) in columns.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", column.to_uppercase(), width = widths[i]));
    }
    out.push('\n');
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
        }
        out.push('\n');
    }
    out
}
