//! `topology`: link metrics between every pair of selected devices.

use clap::Args;
use serde_json::{json, Map, Value};

use crate::commands::{CommandContext, GpuArgs};
use crate::error::Result;
use crate::logger::NA;

#[derive(Debug, Clone, Default, Args)]
pub struct TopologyArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,
}

pub fn run(ctx: &mut CommandContext<'_>, args: &TopologyArgs) -> Result<()> {
    let devices = ctx.registry.resolve_or_all(&args.gpu.gpu)?;
    for entry in &devices {
        let mut links = Vec::new();
        for peer in &devices {
            let mut link = Map::new();
            link.insert("gpu".into(), json!(peer.index));
            link.insert("bdf".into(), json!(peer.bdf));
            match ctx.backend.link_metrics(entry.handle, peer.handle) {
                Ok(metrics) => {
                    link.insert("weight".into(), json!(metrics.weight));
                    link.insert("hops".into(), json!(metrics.hops));
                    link.insert("link_type".into(), json!(metrics.link_type));
                }
                Err(e) if e.is_field_error() => {
                    link.insert("weight".into(), json!(NA));
                    link.insert("hops".into(), json!(NA));
                    link.insert("link_type".into(), json!(NA));
                }
                Err(e) => return Err(e),
            }
            links.push(Value::Object(link));
        }
        ctx.logger.store(entry.index, "bdf", json!(entry.bdf));
        ctx.logger.store(entry.index, "links", Value::Array(links));
    }
    ctx.logger.flush()
}
