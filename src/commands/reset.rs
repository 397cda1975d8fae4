//! `reset`: GPU reset, fan control, and performance level restoration.

use clap::Args;
use serde_json::json;

use crate::commands::{for_each_device, CommandContext, GpuArgs};
use crate::error::{AmdSmiError, Result};
use crate::smi::PerfLevel;

#[derive(Debug, Clone, Default, Args)]
pub struct ResetArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,

    /// Trigger a full GPU reset
    #[arg(short = 'G', long = "gpu-reset")]
    pub gpu_reset: bool,

    /// Return fan control to automatic mode
    #[arg(short = 'f', long)]
    pub fans: bool,

    /// Restore the automatic performance level
    #[arg(short = 'p', long = "perf-level")]
    pub perf_level: bool,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &ResetArgs) -> Result<()> {
    if !(args.gpu_reset || args.fans || args.perf_level) {
        return Err(AmdSmiError::InvalidArgument(
            "reset requires at least one of --gpu-reset, --fans, --perf-level".into(),
        ));
    }

    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        if args.gpu_reset {
            backend.reset_gpu(entry.handle)?;
            logger.store(entry.index, "gpu_reset", json!("Successfully reset GPU"));
        }
        if args.fans {
            backend.reset_fan(entry.handle)?;
            logger.store(
                entry.index,
                "fans",
                json!("Successfully returned fan control to automatic"),
            );
        }
        if args.perf_level {
            backend.set_perf_level(entry.handle, PerfLevel::Auto)?;
            logger.store(
                entry.index,
                "perf_level",
                json!("Successfully reset performance level to auto"),
            );
        }
        Ok(())
    })?;
    ctx.logger.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::run_json;
    use crate::smi::mock::MockSmi;

    #[test]
    fn test_no_action_is_an_argument_error() {
        let backend = MockSmi::with_devices(1);
        let result = crate::commands::testutil::run_format(
            "reset-none",
            &backend,
            crate::logger::OutputFormat::Json,
            |ctx| run(ctx, &ResetArgs::default()),
        );
        assert!(matches!(result, Err(AmdSmiError::InvalidArgument(_))));
    }

    #[test]
    fn test_reset_issues_selected_operations() {
        let backend = MockSmi::with_devices(1);
        let state = backend.counters();
        let args = ResetArgs {
            fans: true,
            perf_level: true,
            ..Default::default()
        };
        let records = run_json("reset", &backend, |ctx| run(ctx, &args));

        assert_eq!(state.actions(), vec!["reset_fan:0", "set_perf_level:0:auto"]);
        let record = records[0].as_object().unwrap();
        assert!(record.contains_key("fans"));
        assert!(record.contains_key("perf_level"));
        assert!(!record.contains_key("gpu_reset"));
    }
}
