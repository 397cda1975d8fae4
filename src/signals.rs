//! Signal handling: SIGINT/SIGTERM raise a flag the watch loop and
//! main polling paths observe, so teardown happens on the main thread.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);

/// The flag the watch engine polls.
pub fn termination_flag() -> &'static AtomicBool {
    &TERMINATION_REQUESTED
}

pub fn termination_requested() -> bool {
    TERMINATION_REQUESTED.load(Ordering::SeqCst)
}

/// Install SIGINT and SIGTERM handlers.
///
/// The handler only stores to the atomic; everything else (logging,
/// library shutdown, exit) runs on the main thread once the flag is
/// observed.
#[cfg(unix)]
pub fn install_handlers() -> Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    extern "C" fn handle(_signal: libc::c_int) {
        TERMINATION_REQUESTED.store(true, Ordering::SeqCst);
    }

    let action = SigAction::new(SigHandler::Handler(handle), SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_handlers() -> Result<()> {
    Ok(())
}
