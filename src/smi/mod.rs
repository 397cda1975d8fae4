//! Native AMD SMI library seam
//!
//! The wrapped library is modeled as the [`SmiBackend`] trait: the
//! externally observable contract the CLI depends on. Device handles are
//! opaque identifiers, comparable by identity, valid only for the current
//! init cycle. The production backend reads the amdgpu sysfs tree; tests
//! use a scripted backend.

pub mod lifecycle;
pub mod sysfs;

#[cfg(test)]
pub mod mock;

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::platform::InitFlag;
use crate::Bdf;

pub use lifecycle::{LifecycleState, Smi};
pub use sysfs::SysfsSmi;

/// Opaque native device identifier.
///
/// Handles are comparable by identity and must not be assumed to survive
/// a shutdown/init cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub(crate) u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{:#x}", self.0)
    }
}

/// ASIC identity block.
#[derive(Debug, Clone, Serialize)]
pub struct AsicInfo {
    pub market_name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub rev_id: u32,
    pub asic_serial: String,
}

/// Board identity block.
#[derive(Debug, Clone, Serialize)]
pub struct BoardInfo {
    pub product_name: String,
    pub product_serial: String,
    pub model_number: String,
}

/// Video BIOS identity block.
#[derive(Debug, Clone, Serialize)]
pub struct VbiosInfo {
    pub name: String,
    pub vbios_version: String,
    pub build_date: String,
    pub part_number: String,
}

/// PCIe link capability or status: width in lanes, speed in MT/s.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PcieLink {
    pub pcie_lanes: u32,
    pub pcie_speed: u32,
}

/// One firmware block reported by the device.
#[derive(Debug, Clone, Serialize)]
pub struct FirmwareBlock {
    pub fw_id: String,
    pub fw_version: String,
}

/// Retirement state of one memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PageStatus {
    Reserved,
    Pending,
    Unreservable,
}

/// One bad VRAM page.
#[derive(Debug, Clone, Serialize)]
pub struct BadPage {
    pub page_address: u64,
    pub page_size: u64,
    pub status: PageStatus,
}

/// Engine activity percentages.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineUsage {
    pub gfx_activity: u32,
    pub umc_activity: u32,
}

/// VRAM accounting in megabytes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VramUsage {
    pub vram_total: u64,
    pub vram_used: u64,
}

/// Socket power telemetry.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PowerInfo {
    /// Average socket power draw in watts.
    pub average_socket_power: u32,
    /// Enforced power limit in watts.
    pub power_limit: u32,
}

/// Clock domains the CLI reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockType {
    Gfx,
    Mem,
}

/// Clock frequencies in MHz for one domain.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClockInfo {
    pub cur_clk: u32,
    pub min_clk: u32,
    pub max_clk: u32,
}

/// Temperature sensors the CLI reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureSensor {
    Edge,
    Junction,
    Vram,
}

/// ECC error counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EccCounts {
    pub correctable_count: u64,
    pub uncorrectable_count: u64,
}

/// One process with memory resident on the device.
#[derive(Debug, Clone, Serialize)]
pub struct GpuProcessInfo {
    pub name: String,
    pub pid: u32,
    /// Device memory usage in bytes.
    pub mem_usage: u64,
    /// VRAM share of the usage in bytes.
    pub vram_mem: u64,
    /// GTT share of the usage in bytes.
    pub gtt_mem: u64,
}

/// Link metrics between a device pair.
#[derive(Debug, Clone, Serialize)]
pub struct LinkMetrics {
    pub weight: u64,
    pub hops: u32,
    pub link_type: String,
}

/// Native library version triple.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LibVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for LibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Performance level accepted by `set-value --perf-level` and reset ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfLevel {
    Auto,
    Low,
    High,
    Manual,
}

impl PerfLevel {
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_lowercase().as_str() {
            "auto" => Some(PerfLevel::Auto),
            "low" => Some(PerfLevel::Low),
            "high" => Some(PerfLevel::High),
            "manual" => Some(PerfLevel::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerfLevel::Auto => "auto",
            PerfLevel::Low => "low",
            PerfLevel::High => "high",
            PerfLevel::Manual => "manual",
        }
    }
}

/// Externally observable contract of the native AMD SMI library.
///
/// Per-field unsupported conditions surface as
/// [`AmdSmiError::NotSupported`](crate::AmdSmiError::NotSupported); the
/// subcommands record those as the `N/A` sentinel.
pub trait SmiBackend {
    /// Bring the library up for the device classes selected by `flag`.
    fn init(&self, flag: InitFlag) -> Result<()>;

    /// Tear the library down. Called exactly once per successful init.
    fn shut_down(&self) -> Result<()>;

    /// Enumerate device handles. Order is stable within a process
    /// lifetime and defines the user-visible device index.
    fn device_handles(&self) -> Result<Vec<DeviceHandle>>;

    fn device_bdf(&self, handle: DeviceHandle) -> Result<Bdf>;
    fn device_uuid(&self, handle: DeviceHandle) -> Result<String>;

    fn asic_info(&self, handle: DeviceHandle) -> Result<AsicInfo>;
    fn board_info(&self, handle: DeviceHandle) -> Result<BoardInfo>;
    fn vbios_info(&self, handle: DeviceHandle) -> Result<VbiosInfo>;
    fn driver_version(&self, handle: DeviceHandle) -> Result<String>;
    fn pcie_link_caps(&self, handle: DeviceHandle) -> Result<PcieLink>;
    fn pcie_link_status(&self, handle: DeviceHandle) -> Result<PcieLink>;

    fn firmware_list(&self, handle: DeviceHandle) -> Result<Vec<FirmwareBlock>>;
    fn bad_pages(&self, handle: DeviceHandle) -> Result<Vec<BadPage>>;

    fn gpu_activity(&self, handle: DeviceHandle) -> Result<EngineUsage>;
    fn vram_usage(&self, handle: DeviceHandle) -> Result<VramUsage>;
    fn power_info(&self, handle: DeviceHandle) -> Result<PowerInfo>;
    fn clock_info(&self, handle: DeviceHandle, clock: ClockType) -> Result<ClockInfo>;
    /// Current temperature in degrees Celsius.
    fn temperature(&self, handle: DeviceHandle, sensor: TemperatureSensor) -> Result<i64>;
    fn ecc_counts(&self, handle: DeviceHandle) -> Result<EccCounts>;

    fn process_list(&self, handle: DeviceHandle) -> Result<Vec<GpuProcessInfo>>;
    fn link_metrics(&self, handle: DeviceHandle, peer: DeviceHandle) -> Result<LinkMetrics>;

    fn library_version(&self) -> LibVersion;

    /// Fan speed as a raw PWM level 0-255.
    fn set_fan_speed(&self, handle: DeviceHandle, speed: u32) -> Result<()>;
    /// Power cap in watts.
    fn set_power_cap(&self, handle: DeviceHandle, watts: u32) -> Result<()>;
    fn set_perf_level(&self, handle: DeviceHandle, level: PerfLevel) -> Result<()>;

    fn reset_gpu(&self, handle: DeviceHandle) -> Result<()>;
    /// Return fan control to automatic mode.
    fn reset_fan(&self, handle: DeviceHandle) -> Result<()>;
}
