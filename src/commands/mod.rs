//! Subcommand implementations.
//!
//! Every subcommand gathers native results for the resolved devices and
//! appends typed fields to the logger. Failure policy: a per-field
//! unsupported condition records the `N/A` sentinel, a per-device hard
//! failure aborts that device only, and argument or init failures abort
//! the invocation.

pub mod bad_pages;
pub mod discovery;
pub mod event;
pub mod firmware;
pub mod metric;
pub mod process;
pub mod profile;
pub mod reset;
pub mod rocm_smi;
pub mod set_value;
pub mod static_info;
pub mod topology;
pub mod version;

#[cfg(test)]
pub mod testutil;

use clap::Args;
use log::error;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::logger::OutputLogger;
use crate::registry::{DeviceEntry, DeviceRegistry};
use crate::smi::SmiBackend;

/// Everything a subcommand needs to run.
pub struct CommandContext<'a> {
    pub backend: &'a dyn SmiBackend,
    pub registry: &'a DeviceRegistry,
    pub logger: &'a mut OutputLogger,
}

/// Device selectors shared by all device-scoped subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct GpuArgs {
    /// Target GPUs by index, BDF, or UUID; all GPUs when omitted
    #[arg(short = 'g', long = "gpu", value_name = "GPU", num_args = 1..)]
    pub gpu: Vec<String>,
}

/// Watch flags shared by `metric` and `process`.
#[derive(Debug, Clone, Default, Args)]
pub struct WatchArgs {
    /// Repeat every SECONDS seconds
    #[arg(short = 'w', long = "watch", value_name = "SECONDS")]
    pub watch: Option<u64>,

    /// Stop watching after SECONDS seconds
    #[arg(short = 'W', long = "watch-time", value_name = "SECONDS")]
    pub watch_time: Option<u64>,

    /// Stop watching after N iterations
    #[arg(short = 'i', long = "iterations", value_name = "N")]
    pub iterations: Option<u64>,
}

impl WatchArgs {
    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch.is_none() && (self.watch_time.is_some() || self.iterations.is_some()) {
            return Err(crate::error::AmdSmiError::InvalidArgument(
                "--watch-time and --iterations require --watch".into(),
            ));
        }
        Ok(())
    }
}

/// Store a gathered value, mapping per-field unsupported conditions to
/// the `N/A` sentinel. Other errors propagate.
pub fn store_field<T: Serialize>(
    logger: &mut OutputLogger,
    device_index: usize,
    key: &str,
    result: Result<T>,
) -> Result<()> {
    match result {
        Ok(value) => {
            logger.store(device_index, key, serde_json::to_value(value)?);
            Ok(())
        }
        Err(e) if e.is_field_error() => {
            logger.store_na(device_index, key);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Run `gather` per device, isolating per-device hard failures: a
/// failing device is reported and skipped, the rest still print.
pub fn for_each_device(
    ctx: &mut CommandContext<'_>,
    selectors: &[String],
    mut gather: impl FnMut(&dyn SmiBackend, &mut OutputLogger, &DeviceEntry) -> Result<()>,
) -> Result<()> {
    let devices = ctx.registry.resolve_or_all(selectors)?;
    for entry in devices {
        if let Err(e) = gather(ctx.backend, ctx.logger, entry) {
            error!("GPU {}: {e}", entry.index);
        }
    }
    Ok(())
}

/// Run a gather closure once, or under the watch engine when `-w` was
/// given. The closure never sees the watch flags, so a watched
/// subcommand cannot re-enter the watch engine.
pub fn run_maybe_watched(
    ctx: &mut CommandContext<'_>,
    watch: &WatchArgs,
    mut gather: impl FnMut(&mut CommandContext<'_>) -> Result<()>,
) -> Result<()> {
    watch.validate()?;
    match watch.watch {
        None => {
            gather(ctx)?;
            ctx.logger.flush()
        }
        Some(period) => {
            let params = crate::watch::WatchParams::new(period, watch.watch_time, watch.iterations)?;
            ctx.logger.start_watching();
            let stop = crate::signals::termination_flag();
            crate::watch::run(params, stop, |_| {
                gather(ctx)?;
                ctx.logger.flush()
            })?;
            ctx.logger.finish()
        }
    }
}

/// Hex identity rendering for PCI ids.
pub fn hex_id(id: u32) -> Value {
    Value::String(format!("0x{id:X}"))
}
