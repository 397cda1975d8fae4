//! `metric`: live telemetry sections, optionally watched.

use clap::Args;
use serde_json::{json, Map, Value};

use crate::commands::{
    for_each_device, run_maybe_watched, store_field, CommandContext, GpuArgs, WatchArgs,
};
use crate::error::Result;
use crate::smi::{ClockType, DeviceHandle, SmiBackend, TemperatureSensor};

#[derive(Debug, Clone, Default, Args)]
pub struct MetricArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,

    #[command(flatten)]
    pub watch: WatchArgs,

    /// Engine activity percentages
    #[arg(short = 'u', long)]
    pub usage: bool,

    /// Socket power and power limit
    #[arg(short = 'p', long)]
    pub power: bool,

    /// Graphics and memory clocks
    #[arg(short = 'c', long)]
    pub clock: bool,

    /// Temperature sensors
    #[arg(short = 't', long)]
    pub temperature: bool,

    /// Current PCIe link state
    #[arg(short = 'P', long)]
    pub pcie: bool,

    /// ECC error counters
    #[arg(short = 'e', long)]
    pub ecc: bool,

    /// VRAM accounting
    #[arg(short = 'm', long = "mem-usage")]
    pub mem_usage: bool,
}

impl MetricArgs {
    fn all(&self) -> bool {
        !(self.usage
            || self.power
            || self.clock
            || self.temperature
            || self.pcie
            || self.ecc
            || self.mem_usage)
    }
}

pub fn run(ctx: &mut CommandContext<'_>, args: &MetricArgs) -> Result<()> {
    run_maybe_watched(ctx, &args.watch, |ctx| gather(ctx, args))
}

fn gather(ctx: &mut CommandContext<'_>, args: &MetricArgs) -> Result<()> {
    let all = args.all();
    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        if all || args.usage {
            store_field(logger, entry.index, "usage", backend.gpu_activity(entry.handle))?;
        }
        if all || args.power {
            store_field(logger, entry.index, "power", backend.power_info(entry.handle))?;
        }
        if all || args.clock {
            store_field(logger, entry.index, "clock", clock_section(backend, entry.handle))?;
        }
        if all || args.temperature {
            store_field(
                logger,
                entry.index,
                "temperature",
                temperature_section(backend, entry.handle),
            )?;
        }
        if all || args.pcie {
            store_field(logger, entry.index, "pcie", backend.pcie_link_status(entry.handle))?;
        }
        if all || args.ecc {
            store_field(logger, entry.index, "ecc", backend.ecc_counts(entry.handle))?;
        }
        if all || args.mem_usage {
            store_field(logger, entry.index, "mem_usage", backend.vram_usage(entry.handle))?;
        }
        Ok(())
    })
}

fn clock_section(backend: &dyn SmiBackend, handle: DeviceHandle) -> Result<Value> {
    let mut section = Map::new();
    section.insert("gfx".into(), json!(backend.clock_info(handle, ClockType::Gfx)?));
    section.insert("mem".into(), json!(backend.clock_info(handle, ClockType::Mem)?));
    Ok(Value::Object(section))
}

/// Sensors are reported individually; a missing sensor is `N/A` while
/// the others still read.
fn temperature_section(backend: &dyn SmiBackend, handle: DeviceHandle) -> Result<Value> {
    let mut section = Map::new();
    let sensors = [
        ("edge", TemperatureSensor::Edge),
        ("hotspot", TemperatureSensor::Junction),
        ("mem", TemperatureSensor::Vram),
    ];
    let mut any = false;
    for (name, sensor) in sensors {
        match backend.temperature(handle, sensor) {
            Ok(celsius) => {
                any = true;
                section.insert(name.into(), json!(celsius));
            }
            Err(e) if e.is_field_error() => {
                section.insert(name.into(), json!(crate::logger::NA));
            }
            Err(e) => return Err(e),
        }
    }
    if !any {
        return Err(crate::error::AmdSmiError::NotSupported(
            "temperature sensors".into(),
        ));
    }
    Ok(Value::Object(section))
}
