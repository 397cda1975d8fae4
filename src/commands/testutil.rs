//! Helpers for command tests: run a command against a scripted backend
//! with file output, then hand the parsed JSON back for assertions.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::commands::CommandContext;
use crate::error::Result;
use crate::logger::{OutputFormat, OutputLogger};
use crate::registry::DeviceRegistry;
use crate::smi::mock::MockSmi;

fn scratch_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("asmi-cmd-{}", std::process::id()));
    let _ = fs::create_dir_all(&dir);
    dir.join(name)
}

/// Run `command` with JSON output captured to a file, returning the
/// parsed array of records.
pub fn run_json(
    name: &str,
    backend: &MockSmi,
    command: impl FnOnce(&mut CommandContext<'_>) -> Result<()>,
) -> Vec<Value> {
    run_format(name, backend, OutputFormat::Json, command)
        .map(|text| serde_json::from_str::<Vec<Value>>(&text).unwrap())
        .unwrap()
}

/// Run `command` with the given format captured to a file.
pub fn run_format(
    name: &str,
    backend: &MockSmi,
    format: OutputFormat,
    command: impl FnOnce(&mut CommandContext<'_>) -> Result<()>,
) -> Result<String> {
    let path = scratch_file(name);
    let registry = DeviceRegistry::enumerate(backend)?;
    let mut logger = OutputLogger::new(format, Some(path.clone()))?;
    let mut ctx = CommandContext {
        backend,
        registry: &registry,
        logger: &mut logger,
    };
    command(&mut ctx)?;
    let text = fs::read_to_string(&path)?;
    let _ = fs::remove_file(&path);
    Ok(text)
}
