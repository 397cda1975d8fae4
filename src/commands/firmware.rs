//! `firmware`: per-device firmware block list.

use clap::Args;

use crate::commands::{for_each_device, store_field, CommandContext, GpuArgs};
use crate::error::Result;

#[derive(Debug, Clone, Default, Args)]
pub struct FirmwareArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &FirmwareArgs) -> Result<()> {
    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        store_field(
            logger,
            entry.index,
            "fw_list",
            backend.firmware_list(entry.handle),
        )
    })?;
    ctx.logger.flush()
}
