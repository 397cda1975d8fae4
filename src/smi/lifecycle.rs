//! Native library lifecycle: init once, shut down exactly once
//!
//! The process holds a single [`Smi`] value which owns the backend and
//! walks the `Uninitialized -> Initialized -> ShutDown` state machine.
//! Dropping an initialized `Smi` performs the shutdown, so every exit
//! path that unwinds `main` tears the library down.

use log::{debug, error};

use crate::error::{AmdSmiError, Result};
use crate::platform::{InitFlag, Platform};
use crate::smi::SmiBackend;

/// Library lifecycle states. The machine only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    ShutDown,
}

/// Owner of the native library state.
pub struct Smi {
    backend: Box<dyn SmiBackend>,
    state: LifecycleState,
    flag: InitFlag,
}

impl Smi {
    /// Wrap a backend without initializing it.
    pub fn new(backend: Box<dyn SmiBackend>) -> Self {
        Self {
            backend,
            state: LifecycleState::Uninitialized,
            flag: InitFlag::AllProcessors,
        }
    }

    /// Probe the platform, select the init flag, and initialize.
    ///
    /// With no live driver the flag is `ALL_PROCESSORS` and a
    /// driver-not-loaded failure from the native init is terminal.
    pub fn init_for_platform(backend: Box<dyn SmiBackend>, platform: &Platform) -> Result<Self> {
        let mut smi = Self::new(backend);
        smi.init(platform.init_flag())?;
        Ok(smi)
    }

    /// Initialize the library. A second call is a no-op.
    pub fn init(&mut self, flag: InitFlag) -> Result<()> {
        match self.state {
            LifecycleState::Initialized => {
                debug!("init skipped: already initialized");
                Ok(())
            }
            LifecycleState::ShutDown => Err(AmdSmiError::Other(
                "library was already shut down in this process".into(),
            )),
            LifecycleState::Uninitialized => {
                debug!("initializing native library with flag {flag}");
                self.backend.init(flag)?;
                self.state = LifecycleState::Initialized;
                self.flag = flag;
                Ok(())
            }
        }
    }

    /// Shut the library down. Runs the native shutdown at most once.
    pub fn shut_down(&mut self) -> Result<()> {
        if self.state != LifecycleState::Initialized {
            return Ok(());
        }
        self.state = LifecycleState::ShutDown;
        self.backend.shut_down().map_err(|e| {
            error!("Unable to cleanly shut down the native library: {e}");
            e
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn init_flag(&self) -> InitFlag {
        self.flag
    }

    pub fn backend(&self) -> &dyn SmiBackend {
        self.backend.as_ref()
    }
}

impl Drop for Smi {
    fn drop(&mut self) {
        // Last line of defense for exit paths that skip the explicit
        // shut_down call; state machine makes this run at most once.
        let _ = self.shut_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smi::mock::MockSmi;

    #[test]
    fn test_init_is_idempotent() {
        let mock = MockSmi::with_devices(1);
        let counters = mock.counters();
        let mut smi = Smi::new(Box::new(mock));

        smi.init(InitFlag::Gpus).unwrap();
        smi.init(InitFlag::Gpus).unwrap();
        assert_eq!(smi.state(), LifecycleState::Initialized);
        assert_eq!(counters.inits(), 1);
    }

    #[test]
    fn test_shutdown_runs_exactly_once() {
        let mock = MockSmi::with_devices(1);
        let counters = mock.counters();
        let mut smi = Smi::new(Box::new(mock));

        smi.init(InitFlag::Gpus).unwrap();
        smi.shut_down().unwrap();
        smi.shut_down().unwrap();
        drop(smi);
        assert_eq!(counters.shutdowns(), 1);
    }

    #[test]
    fn test_drop_shuts_down_initialized_library() {
        let mock = MockSmi::with_devices(1);
        let counters = mock.counters();
        {
            let mut smi = Smi::new(Box::new(mock));
            smi.init(InitFlag::Apus).unwrap();
            assert_eq!(smi.init_flag(), InitFlag::Apus);
        }
        assert_eq!(counters.shutdowns(), 1);
    }

    #[test]
    fn test_drop_without_init_does_not_shut_down() {
        let mock = MockSmi::with_devices(1);
        let counters = mock.counters();
        drop(Smi::new(Box::new(mock)));
        assert_eq!(counters.shutdowns(), 0);
    }

    #[test]
    fn test_driver_not_loaded_propagates() {
        let mock = MockSmi::driver_not_loaded();
        let mut smi = Smi::new(Box::new(mock));
        let err = smi.init(InitFlag::AllProcessors).unwrap_err();
        assert!(matches!(err, AmdSmiError::DriverNotLoaded));
        assert_eq!(smi.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_init_failure_code_survives_to_exit_code() {
        let mock = MockSmi::failing_init(9);
        let mut smi = Smi::new(Box::new(mock));
        let err = smi.init(InitFlag::Gpus).unwrap_err();
        assert!(matches!(err, AmdSmiError::LibraryInit(9)));
        assert_eq!(err.exit_code(), 9);
        assert_eq!(smi.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_no_reinit_after_shutdown() {
        let mock = MockSmi::with_devices(1);
        let mut smi = Smi::new(Box::new(mock));
        smi.init(InitFlag::Gpus).unwrap();
        smi.shut_down().unwrap();
        assert!(smi.init(InitFlag::Gpus).is_err());
    }
}
