//! `profile`: workload profile support.
//!
//! Profiles are only exposed on virtualized hosts; on bare metal every
//! device reports the sentinel.

use clap::Args;
use log::info;

use crate::commands::{for_each_device, CommandContext, GpuArgs};
use crate::error::Result;
use crate::platform::{Platform, PlatformKind};

#[derive(Debug, Clone, Default, Args)]
pub struct ProfileArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &ProfileArgs, platform: &Platform) -> Result<()> {
    if platform.kind != PlatformKind::Guest {
        info!("workload profiles are only available on virtualized hosts");
    }
    for_each_device(ctx, &args.gpu.gpu, |_, logger, entry| {
        logger.store_na(entry.index, "profile");
        Ok(())
    })?;
    ctx.logger.flush()
}
