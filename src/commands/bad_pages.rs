//! `bad-pages`: retired, pending, and unreservable VRAM pages.

use clap::Args;
use serde_json::{json, Map, Value};

use crate::commands::{for_each_device, store_field, CommandContext, GpuArgs};
use crate::error::Result;
use crate::smi::PageStatus;

#[derive(Debug, Clone, Default, Args)]
pub struct BadPagesArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,

    /// Only pages pending retirement
    #[arg(short = 'p', long)]
    pub pending: bool,

    /// Only retired (reserved) pages
    #[arg(short = 'r', long)]
    pub retired: bool,

    /// Only unreservable pages
    #[arg(short = 'u', long = "un-res")]
    pub un_res: bool,
}

impl BadPagesArgs {
    fn wants(&self, status: PageStatus) -> bool {
        if !(self.pending || self.retired || self.un_res) {
            return true;
        }
        match status {
            PageStatus::Pending => self.pending,
            PageStatus::Reserved => self.retired,
            PageStatus::Unreservable => self.un_res,
        }
    }
}

pub fn run(ctx: &mut CommandContext<'_>, args: &BadPagesArgs) -> Result<()> {
    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        let pages = backend.bad_pages(entry.handle).map(|pages| {
            pages
                .into_iter()
                .filter(|p| args.wants(p.status))
                .map(|p| {
                    let mut page = Map::new();
                    page.insert("page_address".into(), json!(format!("{:#x}", p.page_address)));
                    page.insert("page_size".into(), json!(format!("{:#x}", p.page_size)));
                    page.insert("status".into(), json!(p.status));
                    Value::Object(page)
                })
                .collect::<Vec<Value>>()
        });
        store_field(logger, entry.index, "bad_pages", pages)
    })?;
    ctx.logger.flush()
}
