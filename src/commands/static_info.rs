//! `static`: identity and capability blocks that do not change at
//! runtime (ASIC, bus, driver, VBIOS, board).

use clap::Args;
use serde_json::{json, Map, Value};

use crate::commands::{for_each_device, hex_id, store_field, CommandContext, GpuArgs};
use crate::error::Result;
use crate::smi::{DeviceHandle, SmiBackend};

#[derive(Debug, Clone, Default, Args)]
pub struct StaticArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,

    /// ASIC identity (market name, ids, serial)
    #[arg(short = 'a', long)]
    pub asic: bool,

    /// PCIe bus identity and link capabilities
    #[arg(short = 'b', long)]
    pub bus: bool,

    /// Kernel driver version
    #[arg(short = 'd', long)]
    pub driver: bool,

    /// Video BIOS identity
    #[arg(short = 'V', long)]
    pub vbios: bool,

    /// Board identity
    #[arg(short = 'B', long)]
    pub board: bool,
}

impl StaticArgs {
    /// With no section flag every section is reported.
    fn all(&self) -> bool {
        !(self.asic || self.bus || self.driver || self.vbios || self.board)
    }
}

pub fn run(ctx: &mut CommandContext<'_>, args: &StaticArgs) -> Result<()> {
    let all = args.all();
    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        if all || args.asic {
            store_field(logger, entry.index, "asic", asic_section(backend, entry.handle))?;
        }
        if all || args.bus {
            store_field(logger, entry.index, "bus", bus_section(backend, entry))?;
        }
        if all || args.driver {
            store_field(
                logger,
                entry.index,
                "driver",
                backend.driver_version(entry.handle),
            )?;
        }
        if all || args.vbios {
            store_field(logger, entry.index, "vbios", backend.vbios_info(entry.handle))?;
        }
        if all || args.board {
            store_field(logger, entry.index, "board", backend.board_info(entry.handle))?;
        }
        Ok(())
    })?;
    ctx.logger.flush()
}

fn asic_section(backend: &dyn SmiBackend, handle: DeviceHandle) -> Result<Value> {
    let asic = backend.asic_info(handle)?;
    let mut section = Map::new();
    section.insert("market_name".into(), json!(asic.market_name));
    section.insert("vendor_id".into(), hex_id(asic.vendor_id));
    section.insert("device_id".into(), hex_id(asic.device_id));
    section.insert("rev_id".into(), hex_id(asic.rev_id));
    section.insert("asic_serial".into(), json!(asic.asic_serial));
    Ok(Value::Object(section))
}

fn bus_section(backend: &dyn SmiBackend, entry: &crate::registry::DeviceEntry) -> Result<Value> {
    let caps = backend.pcie_link_caps(entry.handle)?;
    let mut section = Map::new();
    section.insert("bdf".into(), json!(entry.bdf));
    section.insert("max_pcie_lanes".into(), json!(caps.pcie_lanes));
    section.insert("max_pcie_speed".into(), json!(caps.pcie_speed));
    Ok(Value::Object(section))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::run_json;
    use crate::smi::mock::MockSmi;

    #[test]
    fn test_no_flags_reports_every_section() {
        let backend = MockSmi::with_devices(1);
        let records = run_json("static-all", &backend, |ctx| {
            run(ctx, &StaticArgs::default())
        });

        let record = &records[0];
        assert_eq!(record["asic"]["market_name"], "Radeon Test Device");
        assert_eq!(record["asic"]["vendor_id"], "0x1002");
        assert_eq!(record["bus"]["bdf"], "0000:03:00:0");
        assert_eq!(record["bus"]["max_pcie_speed"], 16000);
        assert_eq!(record["driver"], "6.3.6");
        assert_eq!(record["vbios"]["vbios_version"], "020.001.000.000");
        assert_eq!(record["board"]["product_name"], "Test Board");
    }

    #[test]
    fn test_section_flags_limit_output() {
        let backend = MockSmi::with_devices(1);
        let args = StaticArgs {
            asic: true,
            ..Default::default()
        };
        let records = run_json("static-asic", &backend, |ctx| run(ctx, &args));
        let record = records[0].as_object().unwrap();
        assert!(record.contains_key("asic"));
        assert!(!record.contains_key("bus"));
        assert!(!record.contains_key("vbios"));
    }

    #[test]
    fn test_unsupported_section_is_na() {
        let backend = MockSmi::with_devices(1).without("vbios_info");
        let args = StaticArgs {
            vbios: true,
            ..Default::default()
        };
        let records = run_json("static-na", &backend, |ctx| run(ctx, &args));
        assert_eq!(records[0]["vbios"], "N/A");
    }
}
