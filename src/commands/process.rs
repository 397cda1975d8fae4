//! `process`: processes with memory resident on each device,
//! optionally filtered and watched.

use clap::Args;
use serde_json::{json, Map, Value};

use crate::commands::{
    for_each_device, run_maybe_watched, store_field, CommandContext, GpuArgs, WatchArgs,
};
use crate::error::Result;
use crate::smi::GpuProcessInfo;

#[derive(Debug, Clone, Default, Args)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,

    #[command(flatten)]
    pub watch: WatchArgs,

    /// Only the process with this PID
    #[arg(long, value_name = "PID")]
    pub pid: Option<u32>,

    /// Only processes whose name matches (case-insensitive)
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// General fields only (name, pid, memory usage)
    #[arg(short = 'G', long)]
    pub general: bool,

    /// Engine memory breakdown only (vram, gtt)
    #[arg(short = 'e', long)]
    pub engine: bool,
}

impl ProcessArgs {
    fn matches(&self, process: &GpuProcessInfo) -> bool {
        if let Some(pid) = self.pid {
            if process.pid != pid {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !process.name.eq_ignore_ascii_case(name) {
                return false;
            }
        }
        true
    }

    fn render(&self, process: &GpuProcessInfo) -> Value {
        let all = !(self.general || self.engine);
        let mut fields = Map::new();
        fields.insert("name".into(), json!(process.name));
        fields.insert("pid".into(), json!(process.pid));
        if all || self.general {
            fields.insert("mem_usage".into(), json!(process.mem_usage));
        }
        if all || self.engine {
            fields.insert("vram_mem".into(), json!(process.vram_mem));
            fields.insert("gtt_mem".into(), json!(process.gtt_mem));
        }
        Value::Object(fields)
    }
}

pub fn run(ctx: &mut CommandContext<'_>, args: &ProcessArgs) -> Result<()> {
    run_maybe_watched(ctx, &args.watch, |ctx| gather(ctx, args))
}

fn gather(ctx: &mut CommandContext<'_>, args: &ProcessArgs) -> Result<()> {
    for_each_device(ctx, &args.gpu.gpu, |backend, logger, entry| {
        let list = backend.process_list(entry.handle).map(|processes| {
            processes
                .iter()
                .filter(|p| args.matches(p))
                .map(|p| args.render(p))
                .collect::<Vec<Value>>()
        });
        store_field(logger, entry.index, "process_list", list)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::run_json;
    use crate::smi::mock::MockSmi;

    #[test]
    fn test_process_list_reports_all_fields() {
        let backend = MockSmi::with_devices(1);
        let records = run_json("process", &backend, |ctx| {
            run(ctx, &ProcessArgs::default())
        });

        let list = records[0]["process_list"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["name"], "glxgears");
        assert_eq!(list[0]["pid"], 4221);
        assert_eq!(list[0]["mem_usage"], 25 * 1024 * 1024);
        assert_eq!(list[0]["vram_mem"], 16 * 1024 * 1024);
    }

    #[test]
    fn test_pid_filter_excludes_other_processes() {
        let backend = MockSmi::with_devices(1);
        let args = ProcessArgs {
            pid: Some(1),
            ..Default::default()
        };
        let records = run_json("process-pid", &backend, |ctx| run(ctx, &args));
        assert_eq!(records[0]["process_list"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_name_filter_is_case_insensitive() {
        let backend = MockSmi::with_devices(1);
        let args = ProcessArgs {
            name: Some("GLXGEARS".to_string()),
            ..Default::default()
        };
        let records = run_json("process-name", &backend, |ctx| run(ctx, &args));
        assert_eq!(records[0]["process_list"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_general_subset_drops_engine_fields() {
        let backend = MockSmi::with_devices(1);
        let args = ProcessArgs {
            general: true,
            ..Default::default()
        };
        let records = run_json("process-general", &backend, |ctx| run(ctx, &args));
        let process = records[0]["process_list"][0].as_object().unwrap();
        assert!(process.contains_key("mem_usage"));
        assert!(!process.contains_key("vram_mem"));
    }
}
