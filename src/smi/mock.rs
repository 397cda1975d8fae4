//! Scripted backend for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::bdf::Bdf;
use crate::error::{AmdSmiError, Result};
use crate::platform::InitFlag;
use crate::smi::{
    AsicInfo, BadPage, BoardInfo, ClockInfo, ClockType, DeviceHandle, EccCounts, EngineUsage,
    FirmwareBlock, GpuProcessInfo, LibVersion, LinkMetrics, PageStatus, PcieLink, PerfLevel,
    PowerInfo, SmiBackend, TemperatureSensor, VbiosInfo, VramUsage,
};

/// Shared observation channel: call counters plus a log of mutating
/// operations, kept alive by the test after the backend is moved into
/// the code under test.
#[derive(Debug, Default)]
pub struct MockState {
    inits: AtomicU32,
    shutdowns: AtomicU32,
    actions: Mutex<Vec<String>>,
}

impl MockState {
    pub fn inits(&self) -> u32 {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }
}

#[derive(Debug, Clone)]
struct MockDevice {
    bdf: Bdf,
    uuid: String,
}

pub struct MockSmi {
    devices: Vec<MockDevice>,
    state: Arc<MockState>,
    fail_driver_not_loaded: bool,
    init_failure_code: Option<i32>,
    escalate_ras: bool,
    ras_reads: AtomicU32,
    unsupported: HashSet<&'static str>,
}

impl MockSmi {
    /// Backend scripted with `count` devices on consecutive buses.
    pub fn with_devices(count: u8) -> Self {
        let devices = (0..count)
            .map(|i| MockDevice {
                bdf: Bdf::new(0, 3 + i, 0, 0),
                uuid: format!("8f000000-0000-0000-0000-0123456789{i:02x}"),
            })
            .collect();
        Self {
            devices,
            state: Arc::new(MockState::default()),
            fail_driver_not_loaded: false,
            init_failure_code: None,
            escalate_ras: false,
            ras_reads: AtomicU32::new(0),
            unsupported: HashSet::new(),
        }
    }

    /// Make RAS counters climb on every read: each ECC read reports 3
    /// more correctable errors and one more retired page than the last,
    /// so successive snapshots always differ.
    pub fn with_escalating_ras(mut self) -> Self {
        self.escalate_ras = true;
        self
    }

    /// Backend whose init fails as if no AMD driver were loaded.
    pub fn driver_not_loaded() -> Self {
        let mut mock = Self::with_devices(0);
        mock.fail_driver_not_loaded = true;
        mock
    }

    /// Backend whose init fails with a native status code.
    pub fn failing_init(code: i32) -> Self {
        let mut mock = Self::with_devices(0);
        mock.init_failure_code = Some(code);
        mock
    }

    /// Make the named accessor report unsupported on every device.
    /// Accessor names match the trait method names.
    pub fn without(mut self, field: &'static str) -> Self {
        self.unsupported.insert(field);
        self
    }

    pub fn counters(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    fn device(&self, handle: DeviceHandle) -> Result<&MockDevice> {
        self.devices
            .get(handle.0 as usize)
            .ok_or_else(|| AmdSmiError::DeviceNotFound(handle.to_string()))
    }

    fn supported(&self, field: &'static str) -> Result<()> {
        if self.unsupported.contains(field) {
            return Err(AmdSmiError::NotSupported(field.to_string()));
        }
        Ok(())
    }
}

impl SmiBackend for MockSmi {
    fn init(&self, _flag: InitFlag) -> Result<()> {
        if self.fail_driver_not_loaded {
            return Err(AmdSmiError::DriverNotLoaded);
        }
        if let Some(code) = self.init_failure_code {
            return Err(AmdSmiError::LibraryInit(code));
        }
        self.state.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shut_down(&self) -> Result<()> {
        self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn device_handles(&self) -> Result<Vec<DeviceHandle>> {
        Ok((0..self.devices.len())
            .map(|i| DeviceHandle(i as u64))
            .collect())
    }

    fn device_bdf(&self, handle: DeviceHandle) -> Result<Bdf> {
        Ok(self.device(handle)?.bdf)
    }

    fn device_uuid(&self, handle: DeviceHandle) -> Result<String> {
        self.supported("device_uuid")?;
        Ok(self.device(handle)?.uuid.clone())
    }

    fn asic_info(&self, handle: DeviceHandle) -> Result<AsicInfo> {
        self.supported("asic_info")?;
        let index = handle.0;
        self.device(handle)?;
        Ok(AsicInfo {
            market_name: "Radeon Test Device".to_string(),
            vendor_id: 0x1002,
            device_id: 0x73bf,
            rev_id: 0xc1,
            asic_serial: format!("0x9A8C7B6D5E4F30{index:02X}"),
        })
    }

    fn board_info(&self, handle: DeviceHandle) -> Result<BoardInfo> {
        self.supported("board_info")?;
        self.device(handle)?;
        Ok(BoardInfo {
            product_name: "Test Board".to_string(),
            product_serial: "PSN012345".to_string(),
            model_number: "D00000".to_string(),
        })
    }

    fn vbios_info(&self, handle: DeviceHandle) -> Result<VbiosInfo> {
        self.supported("vbios_info")?;
        self.device(handle)?;
        Ok(VbiosInfo {
            name: "NAVI21 Test VBIOS".to_string(),
            vbios_version: "020.001.000.000".to_string(),
            build_date: "2024/01/01 00:00".to_string(),
            part_number: "113-TESTPART-001".to_string(),
        })
    }

    fn driver_version(&self, handle: DeviceHandle) -> Result<String> {
        self.supported("driver_version")?;
        self.device(handle)?;
        Ok("6.3.6".to_string())
    }

    fn pcie_link_caps(&self, handle: DeviceHandle) -> Result<PcieLink> {
        self.supported("pcie_link_caps")?;
        self.device(handle)?;
        Ok(PcieLink {
            pcie_lanes: 16,
            pcie_speed: 16000,
        })
    }

    fn pcie_link_status(&self, handle: DeviceHandle) -> Result<PcieLink> {
        self.supported("pcie_link_status")?;
        self.device(handle)?;
        Ok(PcieLink {
            pcie_lanes: 16,
            pcie_speed: 8000,
        })
    }

    fn firmware_list(&self, handle: DeviceHandle) -> Result<Vec<FirmwareBlock>> {
        self.supported("firmware_list")?;
        self.device(handle)?;
        Ok(vec![
            FirmwareBlock {
                fw_id: "MEC".to_string(),
                fw_version: "112".to_string(),
            },
            FirmwareBlock {
                fw_id: "VCN".to_string(),
                fw_version: "0x0110901c".to_string(),
            },
        ])
    }

    fn bad_pages(&self, handle: DeviceHandle) -> Result<Vec<BadPage>> {
        self.supported("bad_pages")?;
        self.device(handle)?;
        if handle.0 == 0 {
            let mut pages = vec![BadPage {
                page_address: 0x1000,
                page_size: 0x1000,
                status: PageStatus::Reserved,
            }];
            if self.escalate_ras {
                // One retired page per completed ECC read so far; the
                // counter was bumped by ecc_counts earlier in the same
                // snapshot.
                let extra = self.ras_reads.load(Ordering::SeqCst) as u64;
                for i in 0..extra {
                    pages.push(BadPage {
                        page_address: 0x2000 + i * 0x1000,
                        page_size: 0x1000,
                        status: PageStatus::Reserved,
                    });
                }
            }
            Ok(pages)
        } else {
            Ok(Vec::new())
        }
    }

    fn gpu_activity(&self, handle: DeviceHandle) -> Result<EngineUsage> {
        self.supported("gpu_activity")?;
        let index = handle.0 as u32;
        self.device(handle)?;
        Ok(EngineUsage {
            gfx_activity: 40 + index,
            umc_activity: 10 + index,
        })
    }

    fn vram_usage(&self, handle: DeviceHandle) -> Result<VramUsage> {
        self.supported("vram_usage")?;
        self.device(handle)?;
        Ok(VramUsage {
            vram_total: 16368,
            vram_used: 1024 + handle.0,
        })
    }

    fn power_info(&self, handle: DeviceHandle) -> Result<PowerInfo> {
        self.supported("power_info")?;
        let index = handle.0 as u32;
        self.device(handle)?;
        Ok(PowerInfo {
            average_socket_power: 100 + index,
            power_limit: 255,
        })
    }

    fn clock_info(&self, handle: DeviceHandle, clock: ClockType) -> Result<ClockInfo> {
        self.supported("clock_info")?;
        self.device(handle)?;
        Ok(match clock {
            ClockType::Gfx => ClockInfo {
                cur_clk: 1500,
                min_clk: 500,
                max_clk: 2100,
            },
            ClockType::Mem => ClockInfo {
                cur_clk: 800,
                min_clk: 100,
                max_clk: 1000,
            },
        })
    }

    fn temperature(&self, handle: DeviceHandle, sensor: TemperatureSensor) -> Result<i64> {
        self.supported("temperature")?;
        self.device(handle)?;
        Ok(match sensor {
            TemperatureSensor::Edge => 64,
            TemperatureSensor::Junction => 72,
            TemperatureSensor::Vram => 68,
        })
    }

    fn ecc_counts(&self, handle: DeviceHandle) -> Result<EccCounts> {
        self.supported("ecc_counts")?;
        self.device(handle)?;
        let step = if self.escalate_ras {
            u64::from(self.ras_reads.fetch_add(1, Ordering::SeqCst))
        } else {
            0
        };
        Ok(EccCounts {
            correctable_count: 3 * step,
            uncorrectable_count: 0,
        })
    }

    fn process_list(&self, handle: DeviceHandle) -> Result<Vec<GpuProcessInfo>> {
        self.supported("process_list")?;
        self.device(handle)?;
        Ok(vec![GpuProcessInfo {
            name: "glxgears".to_string(),
            pid: 4221,
            mem_usage: 25 * 1024 * 1024,
            vram_mem: 16 * 1024 * 1024,
            gtt_mem: 9 * 1024 * 1024,
        }])
    }

    fn link_metrics(&self, handle: DeviceHandle, peer: DeviceHandle) -> Result<LinkMetrics> {
        self.supported("link_metrics")?;
        self.device(handle)?;
        self.device(peer)?;
        if handle == peer {
            Ok(LinkMetrics {
                weight: 0,
                hops: 0,
                link_type: "SELF".to_string(),
            })
        } else {
            Ok(LinkMetrics {
                weight: 40,
                hops: 2,
                link_type: "PCIE".to_string(),
            })
        }
    }

    fn library_version(&self) -> LibVersion {
        LibVersion {
            major: 1,
            minor: 4,
            patch: 0,
        }
    }

    fn set_fan_speed(&self, handle: DeviceHandle, speed: u32) -> Result<()> {
        self.device(handle)?;
        if speed > 255 {
            return Err(AmdSmiError::InvalidArgument(format!(
                "fan speed {speed} out of range (0-255)"
            )));
        }
        self.state.record(format!("set_fan_speed:{}:{speed}", handle.0));
        Ok(())
    }

    fn set_power_cap(&self, handle: DeviceHandle, watts: u32) -> Result<()> {
        self.device(handle)?;
        self.state.record(format!("set_power_cap:{}:{watts}", handle.0));
        Ok(())
    }

    fn set_perf_level(&self, handle: DeviceHandle, level: PerfLevel) -> Result<()> {
        self.device(handle)?;
        self.state
            .record(format!("set_perf_level:{}:{}", handle.0, level.as_str()));
        Ok(())
    }

    fn reset_gpu(&self, handle: DeviceHandle) -> Result<()> {
        self.device(handle)?;
        self.state.record(format!("reset_gpu:{}", handle.0));
        Ok(())
    }

    fn reset_fan(&self, handle: DeviceHandle) -> Result<()> {
        self.device(handle)?;
        self.state.record(format!("reset_fan:{}", handle.0));
        Ok(())
    }
}
