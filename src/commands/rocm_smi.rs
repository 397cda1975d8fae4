//! `rocm-smi`: legacy one-row-per-device summary in the classic
//! concise-table schema.

use clap::Args;
use serde_json::json;

use crate::commands::{for_each_device, store_field, CommandContext, GpuArgs};
use crate::error::Result;
use crate::smi::{ClockType, TemperatureSensor};

#[derive(Debug, Clone, Default, Args)]
pub struct RocmSmiArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &RocmSmiArgs) -> Result<()> {
    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        store_field(
            logger,
            entry.index,
            "temp",
            backend
                .temperature(entry.handle, TemperatureSensor::Edge)
                .map(|c| format!("{c}C")),
        )?;
        store_field(
            logger,
            entry.index,
            "power",
            backend
                .power_info(entry.handle)
                .map(|p| format!("{}W", p.average_socket_power)),
        )?;
        store_field(
            logger,
            entry.index,
            "sclk",
            backend
                .clock_info(entry.handle, ClockType::Gfx)
                .map(|c| format!("{}Mhz", c.cur_clk)),
        )?;
        store_field(
            logger,
            entry.index,
            "mclk",
            backend
                .clock_info(entry.handle, ClockType::Mem)
                .map(|c| format!("{}Mhz", c.cur_clk)),
        )?;
        store_field(
            logger,
            entry.index,
            "gpu%",
            backend
                .gpu_activity(entry.handle)
                .map(|u| format!("{}%", u.gfx_activity)),
        )?;
        store_field(
            logger,
            entry.index,
            "vram%",
            backend.vram_usage(entry.handle).map(|v| {
                if v.vram_total == 0 {
                    json!(crate::logger::NA)
                } else {
                    json!(format!("{}%", v.vram_used * 100 / v.vram_total))
                }
            }),
        )?;
        Ok(())
    })?;
    ctx.logger.flush()
}
