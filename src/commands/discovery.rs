//! `discovery`: enumerate devices with their identity tuple.

use clap::Args;
use serde_json::{json, Value};

use crate::commands::{for_each_device, CommandContext, GpuArgs};
use crate::error::Result;
use crate::logger::NA;

#[derive(Debug, Clone, Default, Args)]
pub struct DiscoveryArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &DiscoveryArgs) -> Result<()> {
    for_each_device(ctx, &args.gpu.gpu, |_, logger, entry| {
        logger.store(entry.index, "bdf", json!(entry.bdf));
        let uuid = entry
            .uuid
            .as_deref()
            .map(|u| Value::String(u.to_string()))
            .unwrap_or_else(|| Value::String(NA.to_string()));
        logger.store(entry.index, "uuid", uuid);
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
    fn test_discovery_records_identity_per_device() {
        let backend = MockSmi::with_devices(2);
        let records = run_json("discovery", &backend, |ctx| {
            run(ctx, &DiscoveryArgs::default())
        });

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["gpu"], 0);
        assert_eq!(records[0]["bdf"], "0000:03:00:0");
        assert_eq!(records[1]["bdf"], "0000:04:00:0");
        assert!(records[0]["uuid"].as_str().unwrap().contains('-'));
    }

    #[test]
    fn test_discovery_uuid_falls_back_to_na() {
        let backend = MockSmi::with_devices(1).without("device_uuid");
        let records = run_json("discovery-na", &backend, |ctx| {
            run(ctx, &DiscoveryArgs::default())
        });
        assert_eq!(records[0]["uuid"], "N/A");
    }

    #[test]
    fn test_discovery_honors_selector() {
        let backend = MockSmi::with_devices(3);
        let args = DiscoveryArgs {
            gpu: GpuArgs {
                gpu: vec!["0000:04:00.0".to_string()],
            },
        };
        let records = run_json("discovery-sel", &backend, |ctx| run(ctx, &args));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["gpu"], 1);
    }
}
