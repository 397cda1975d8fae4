//! `version`: tool, library, and kernel versions.

use serde_json::Value;

use crate::commands::CommandContext;
use crate::error::Result;
use crate::logger::{OutputFormat, NA};

pub fn run(ctx: &mut CommandContext<'_>) -> Result<()> {
    let tool = env!("CARGO_PKG_VERSION").to_string();
    let lib = ctx.backend.library_version().to_string();
    let kernel = kernel_version().unwrap_or_else(|| NA.to_string());

    if ctx.logger.format() == OutputFormat::Text {
        return ctx.logger.write_line(&format!(
            "AMDSMI Tool: {tool} | AMDSMI Library version: {lib} | Kernel: {kernel}"
        ));
    }

    ctx.logger.store_global("tool_version", Value::String(tool));
    ctx.logger.store_global("lib_version", Value::String(lib));
    ctx.logger.store_global("kernel_version", Value::String(kernel));
    ctx.logger.flush()
}

#[cfg(unix)]
fn kernel_version() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(not(unix))]
fn kernel_version() -> Option<String> {
    None
}
