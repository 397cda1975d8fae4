//! `event`: listen for RAS state changes (ECC counter increments and
//! newly retired pages) until interrupted.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::AtomicBool;

use clap::Args;
use serde_json::{json, Value};

use crate::commands::{CommandContext, GpuArgs};
use crate::error::Result;
use crate::logger::OutputLogger;
use crate::smi::{DeviceHandle, SmiBackend};
use crate::watch::{self, WatchParams};

const POLL_SECS: u64 = 1;

#[derive(Debug, Clone, Default, Args)]
pub struct EventArgs {
    #[command(flatten)]
    pub gpu: GpuArgs,
}

/// RAS counters snapshotted per device between polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RasSnapshot {
    correctable: u64,
    uncorrectable: u64,
    bad_pages: u64,
}

impl RasSnapshot {
    fn read(backend: &dyn SmiBackend, handle: DeviceHandle) -> Self {
        // Devices without RAS never produce events; count as zero.
        let (correctable, uncorrectable) = backend
            .ecc_counts(handle)
            .map(|c| (c.correctable_count, c.uncorrectable_count))
            .unwrap_or((0, 0));
        let bad_pages = backend
            .bad_pages(handle)
            .map(|p| p.len() as u64)
            .unwrap_or(0);
        Self {
            correctable,
            uncorrectable,
            bad_pages,
        }
    }
}

/// Name the events that occurred between two snapshots, with the
/// number of new occurrences.
fn diff_events(prev: RasSnapshot, cur: RasSnapshot) -> Vec<(&'static str, u64)> {
    let mut events = Vec::new();
    if cur.correctable > prev.correctable {
        events.push(("ECC_CORRECTABLE", cur.correctable - prev.correctable));
    }
    if cur.uncorrectable > prev.uncorrectable {
        events.push(("ECC_UNCORRECTABLE", cur.uncorrectable - prev.uncorrectable));
    }
    if cur.bad_pages > prev.bad_pages {
        events.push(("BAD_PAGE_RETIRED", cur.bad_pages - prev.bad_pages));
    }
    events
}

/// Store one poll's events for a device as an array, so several events
/// in the same second all survive to the flush.
fn store_events(logger: &mut OutputLogger, device_index: usize, events: &[(&'static str, u64)]) {
    if events.is_empty() {
        return;
    }
    let items: Vec<Value> = events
        .iter()
        .map(|(event, count)| json!({ "event": event, "count": count }))
        .collect();
    logger.store(device_index, "events", Value::Array(items));
}

pub fn run(ctx: &mut CommandContext<'_>, args: &EventArgs, stop: &AtomicBool) -> Result<()> {
    let devices = ctx.registry.resolve_or_all(&args.gpu.gpu)?;
    let handles: Vec<(usize, DeviceHandle)> =
        devices.iter().map(|e| (e.index, e.handle)).collect();

    // Progress notice goes to stderr so the structured formats stay a
    // single document on the selected destination.
    let mut err = io::stderr();
    writeln!(
        err,
        "Listening for events on all selected GPUs (ctrl-c to stop)..."
    )?;

    let mut snapshots: HashMap<usize, RasSnapshot> = handles
        .iter()
        .map(|(index, handle)| (*index, RasSnapshot::read(ctx.backend, *handle)))
        .collect();

    let params = WatchParams::new(POLL_SECS, None, None)?;
    ctx.logger.start_watching();
    watch::run(params, stop, |_| {
        for (index, handle) in &handles {
            let cur = RasSnapshot::read(ctx.backend, *handle);
            let prev = snapshots.insert(*index, cur).unwrap_or_default();
            store_events(ctx.logger, *index, &diff_events(prev, cur));
        }
        ctx.logger.flush()
    })?;
    ctx.logger.finish()
}
