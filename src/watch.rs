//! Watch engine: repeat a telemetry subcommand at a fixed period until
//! a duration, an iteration budget, or a termination signal ends it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{AmdSmiError, Result};

/// Slice length for interruptible sleeps. Shutdown latency after a
/// signal is bounded by this.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Validated watch arguments.
#[derive(Debug, Clone, Copy)]
pub struct WatchParams {
    pub period: Duration,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
}

impl WatchParams {
    /// Build from CLI seconds. `period` must be positive and
    /// `iterations`, when given, at least 1.
    pub fn new(period_secs: u64, duration_secs: Option<u64>, iterations: Option<u64>) -> Result<Self> {
        if period_secs == 0 {
            return Err(AmdSmiError::InvalidArgument(
                "watch period must be greater than 0 seconds".into(),
            ));
        }
        if iterations == Some(0) {
            return Err(AmdSmiError::InvalidArgument(
                "watch iterations must be at least 1".into(),
            ));
        }
        Ok(Self {
            period: Duration::from_secs(period_secs),
            duration: duration_secs.map(Duration::from_secs),
            iterations,
        })
    }
}

/// Run `tick` once per period until the first stop condition triggers.
///
/// The run ends when the iteration budget is spent or the duration
/// deadline passes, whichever fires first. A raised `stop` flag ends it
/// immediately. There is no sleep after the final iteration.
pub fn run(params: WatchParams, stop: &AtomicBool, mut tick: impl FnMut(u64) -> Result<()>) -> Result<()> {
    let deadline = params.duration.map(|d| Instant::now() + d);
    let mut iteration = 0u64;

    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("watch stopped by signal after {iteration} iterations");
            return Ok(());
        }
        tick(iteration)?;
        iteration += 1;

        if let Some(budget) = params.iterations {
            if iteration >= budget {
                return Ok(());
            }
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(());
            }
        }
        if !sleep_interruptible(params.period, stop) {
            debug!("watch stopped by signal during sleep");
            return Ok(());
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(());
            }
        }
    }
}

/// Sleep for `period` in slices, returning false if `stop` was raised.
fn sleep_interruptible(period: Duration, stop: &AtomicBool) -> bool {
    let until = Instant::now() + period;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(until - now));
    }
}
