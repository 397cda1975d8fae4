//! Platform probe: OS family, virtualization kind, and driver liveness
//!
//! Decides which capability flag the native library is initialized with,
//! from the state of the `amdgpu` and `amd_hsmp` kernel modules.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

/// Kernel status files whose contents equal "live" when the driver is up.
const AMDGPU_INITSTATE: &str = "sys/module/amdgpu/initstate";
const AMD_HSMP_INITSTATE: &str = "sys/module/amd_hsmp/initstate";

/// DMI product name, used to recognize guest VMs.
const DMI_PRODUCT_NAME: &str = "sys/class/dmi/id/product_name";

/// Product-name prefixes reported by common hypervisor guests.
const VIRTUAL_PRODUCT_NAMES: &[&str] = &[
    "VMware",
    "VirtualBox",
    "KVM",
    "QEMU",
    "Virtual Machine",
    "Xen",
    "Parallels",
    "OpenStack",
    "Google Compute Engine",
    "Amazon EC2",
];

/// OS names that identify a hypervisor host rather than a guest.
const HYPERVISOR_OS_NAMES: &[&str] = &["vmkernel", "esxi", "xen"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    Windows,
    Unknown,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "Linux"),
            OsFamily::Windows => write!(f, "Windows"),
            OsFamily::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Baremetal,
    Guest,
    Hypervisor,
    Unknown,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Baremetal => write!(f, "Baremetal"),
            PlatformKind::Guest => write!(f, "Guest"),
            PlatformKind::Hypervisor => write!(f, "Hypervisor"),
            PlatformKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Which kernel drivers are live, read from the two initstate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverState {
    pub gpu_driver_live: bool,
    pub host_mgmt_driver_live: bool,
}

/// Capability flag passed to the native library at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitFlag {
    AllProcessors,
    Apus,
    Gpus,
    Cpus,
}

impl InitFlag {
    /// Select the init flag from driver liveness: both drivers live means
    /// APU enumeration; a single live driver narrows to that class.
    pub fn from_driver_state(state: DriverState) -> Self {
        match (state.gpu_driver_live, state.host_mgmt_driver_live) {
            (true, true) => InitFlag::Apus,
            (true, false) => InitFlag::Gpus,
            (false, true) => InitFlag::Cpus,
            (false, false) => InitFlag::AllProcessors,
        }
    }
}

impl fmt::Display for InitFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitFlag::AllProcessors => write!(f, "ALL_PROCESSORS"),
            InitFlag::Apus => write!(f, "APUS"),
            InitFlag::Gpus => write!(f, "GPUS"),
            InitFlag::Cpus => write!(f, "CPUS"),
        }
    }
}

/// Host platform state, computed once at startup.
#[derive(Debug, Clone)]
pub struct Platform {
    pub os: OsFamily,
    pub kind: PlatformKind,
    root: PathBuf,
}

impl Platform {
    /// Probe the running host.
    pub fn detect() -> Self {
        Self::detect_at(Path::new("/"), std::env::consts::OS)
    }

    /// Probe with an explicit filesystem root and OS name.
    pub fn detect_at(root: &Path, os_name: &str) -> Self {
        let os = match os_name {
            "linux" => OsFamily::Linux,
            "windows" => OsFamily::Windows,
            _ => OsFamily::Unknown,
        };

        let kind = if HYPERVISOR_OS_NAMES.contains(&os_name.to_lowercase().as_str()) {
            PlatformKind::Hypervisor
        } else if os == OsFamily::Linux {
            // Unreadable product name is treated as baremetal.
            match fs::read_to_string(root.join(DMI_PRODUCT_NAME)) {
                Ok(product) => {
                    let product = product.trim();
                    if VIRTUAL_PRODUCT_NAMES
                        .iter()
                        .any(|prefix| product.starts_with(prefix))
                    {
                        PlatformKind::Guest
                    } else {
                        PlatformKind::Baremetal
                    }
                }
                Err(_) => PlatformKind::Baremetal,
            }
        } else {
            PlatformKind::Unknown
        };

        debug!("platform probe: os={os} kind={kind}");
        Platform {
            os,
            kind,
            root: root.to_path_buf(),
        }
    }

    pub fn is_linux(&self) -> bool {
        self.os == OsFamily::Linux
    }

    pub fn is_baremetal(&self) -> bool {
        self.kind == PlatformKind::Baremetal
    }

    /// "Linux Baremetal" style display used by the version banner.
    pub fn os_info(&self) -> String {
        format!("{} {}", self.os, self.kind)
    }

    /// Read driver liveness from the well-known initstate files.
    pub fn driver_state(&self) -> DriverState {
        DriverState {
            gpu_driver_live: initstate_is_live(&self.root.join(AMDGPU_INITSTATE)),
            host_mgmt_driver_live: initstate_is_live(&self.root.join(AMD_HSMP_INITSTATE)),
        }
    }

    /// Init flag for the current driver state.
    pub fn init_flag(&self) -> InitFlag {
        let state = self.driver_state();
        let flag = InitFlag::from_driver_state(state);
        debug!(
            "driver state: amdgpu={} amd_hsmp={} -> {flag}",
            state.gpu_driver_live, state.host_mgmt_driver_live
        );
        flag
    }
}

fn initstate_is_live(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|contents| contents.trim() == "live")
        .unwrap_or(false)
}
