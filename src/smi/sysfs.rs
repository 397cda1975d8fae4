//! Production backend reading the amdgpu sysfs tree
//!
//! Device enumeration scans `sys/class/drm/card*` for amdgpu-bound
//! cards; telemetry comes from the per-device sysfs files and the hwmon
//! channel the driver registers. The filesystem root is injectable so
//! unit tests can run against scratch trees.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::bdf::Bdf;
use crate::error::{AmdSmiError, Result};
use crate::platform::InitFlag;
use crate::smi::{
    AsicInfo, BadPage, BoardInfo, ClockInfo, ClockType, DeviceHandle, EccCounts, EngineUsage,
    FirmwareBlock, GpuProcessInfo, LibVersion, LinkMetrics, PageStatus, PcieLink, PerfLevel,
    PowerInfo, SmiBackend, TemperatureSensor, VbiosInfo, VramUsage,
};

const NA: &str = "N/A";

/// One enumerated amdgpu card.
#[derive(Debug, Clone)]
struct Card {
    /// PCI address as sysfs spells it, e.g. `0000:03:00.0`.
    pci_addr: String,
    bdf: Bdf,
    device_path: PathBuf,
    hwmon_path: Option<PathBuf>,
}

/// Sysfs-backed [`SmiBackend`].
pub struct SysfsSmi {
    root: PathBuf,
    cards: RefCell<Vec<Card>>,
}

impl SysfsSmi {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cards: RefCell::new(Vec::new()),
        }
    }

    fn card(&self, handle: DeviceHandle) -> Result<Card> {
        self.cards
            .borrow()
            .get(handle.0 as usize)
            .cloned()
            .ok_or_else(|| AmdSmiError::DeviceNotFound(handle.to_string()))
    }

    fn hwmon_file(&self, handle: DeviceHandle, name: &str) -> Result<PathBuf> {
        let card = self.card(handle)?;
        card.hwmon_path
            .map(|h| h.join(name))
            .ok_or_else(|| AmdSmiError::NotSupported(format!("hwmon channel ({name})")))
    }

    fn scan_cards(&self) -> Result<Vec<Card>> {
        let drm_path = self.root.join("sys/class/drm");
        let mut cards = Vec::new();
        if !drm_path.exists() {
            return Ok(cards);
        }

        let mut names: Vec<String> = fs::read_dir(&drm_path)?
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                // card0, card1, ... but not connector nodes like card0-DP-1
                if name.starts_with("card") && !name.contains('-') {
                    Some(name)
                } else {
                    None
                }
            })
            .collect();
        names.sort();

        for name in names {
            let device_path = drm_path.join(&name).join("device");

            let driver_name = match fs::read_link(device_path.join("driver")) {
                Ok(target) => target
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
                Err(_) => continue,
            };
            if driver_name != "amdgpu" {
                continue;
            }

            // The device node is a symlink whose target name is the PCI
            // address of the function.
            let pci_addr = match fs::read_link(drm_path.join(&name)) {
                Ok(target) => pci_addr_from_link(&target),
                Err(_) => fs::canonicalize(&device_path)
                    .ok()
                    .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string())),
            };
            let Some(pci_addr) = pci_addr else {
                debug!("skipping {name}: no PCI address in device link");
                continue;
            };
            let bdf = Bdf::parse(&pci_addr)?;

            let hwmon_path = find_hwmon_path(&device_path);
            debug!("found amdgpu card {name} at {pci_addr}");
            cards.push(Card {
                pci_addr,
                bdf,
                device_path,
                hwmon_path,
            });
        }
        Ok(cards)
    }
}

impl Default for SysfsSmi {
    fn default() -> Self {
        Self::new()
    }
}

impl SmiBackend for SysfsSmi {
    fn init(&self, flag: InitFlag) -> Result<()> {
        // ALL_PROCESSORS is only selected when neither driver is live,
        // and the library cannot come up without one of them.
        if flag == InitFlag::AllProcessors {
            return Err(AmdSmiError::DriverNotLoaded);
        }
        if flag != InitFlag::Cpus {
            *self.cards.borrow_mut() = self.scan_cards()?;
        }
        Ok(())
    }

    fn shut_down(&self) -> Result<()> {
        self.cards.borrow_mut().clear();
        Ok(())
    }

    fn device_handles(&self) -> Result<Vec<DeviceHandle>> {
        Ok((0..self.cards.borrow().len())
            .map(|i| DeviceHandle(i as u64))
            .collect())
    }

    fn device_bdf(&self, handle: DeviceHandle) -> Result<Bdf> {
        Ok(self.card(handle)?.bdf)
    }

    fn device_uuid(&self, handle: DeviceHandle) -> Result<String> {
        let card = self.card(handle)?;
        let unique_id = read_trimmed_opt(&card.device_path.join("unique_id"))
            .ok_or_else(|| AmdSmiError::NotSupported("unique_id".into()))?;
        Ok(format_uuid(&unique_id))
    }

    fn asic_info(&self, handle: DeviceHandle) -> Result<AsicInfo> {
        let card = self.card(handle)?;
        Ok(AsicInfo {
            market_name: read_trimmed_opt(&card.device_path.join("product_name"))
                .unwrap_or_else(|| NA.to_string()),
            vendor_id: read_hex_id(&card.device_path.join("vendor"))?,
            device_id: read_hex_id(&card.device_path.join("device"))?,
            rev_id: read_hex_id(&card.device_path.join("revision"))?,
            asic_serial: read_trimmed_opt(&card.device_path.join("unique_id"))
                .map(|id| format!("0x{}", id.to_uppercase()))
                .unwrap_or_else(|| NA.to_string()),
        })
    }

    fn board_info(&self, handle: DeviceHandle) -> Result<BoardInfo> {
        let card = self.card(handle)?;
        Ok(BoardInfo {
            product_name: read_trimmed_opt(&card.device_path.join("product_name"))
                .unwrap_or_else(|| NA.to_string()),
            product_serial: read_trimmed_opt(&card.device_path.join("serial_number"))
                .unwrap_or_else(|| NA.to_string()),
            model_number: read_trimmed_opt(&card.device_path.join("product_number"))
                .unwrap_or_else(|| NA.to_string()),
        })
    }

    fn vbios_info(&self, handle: DeviceHandle) -> Result<VbiosInfo> {
        let card = self.card(handle)?;
        let version = read_trimmed_opt(&card.device_path.join("vbios_version"))
            .ok_or_else(|| AmdSmiError::NotSupported("vbios_version".into()))?;
        Ok(VbiosInfo {
            name: NA.to_string(),
            vbios_version: version.clone(),
            build_date: NA.to_string(),
            part_number: version,
        })
    }

    fn driver_version(&self, handle: DeviceHandle) -> Result<String> {
        self.card(handle)?;
        read_trimmed_opt(&self.root.join("sys/module/amdgpu/version"))
            .ok_or_else(|| AmdSmiError::NotSupported("driver version".into()))
    }

    fn pcie_link_caps(&self, handle: DeviceHandle) -> Result<PcieLink> {
        let card = self.card(handle)?;
        read_pcie_link(
            &card.device_path.join("max_link_width"),
            &card.device_path.join("max_link_speed"),
        )
    }

    fn pcie_link_status(&self, handle: DeviceHandle) -> Result<PcieLink> {
        let card = self.card(handle)?;
        read_pcie_link(
            &card.device_path.join("current_link_width"),
            &card.device_path.join("current_link_speed"),
        )
    }

    fn firmware_list(&self, handle: DeviceHandle) -> Result<Vec<FirmwareBlock>> {
        let card = self.card(handle)?;
        let fw_dir = card.device_path.join("fw_version");
        if !fw_dir.exists() {
            return Err(AmdSmiError::NotSupported("firmware versions".into()));
        }
        let mut blocks = Vec::new();
        for entry in fs::read_dir(&fw_dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(block) = name.strip_suffix("_fw_version") else {
                continue;
            };
            if let Some(version) = read_trimmed_opt(&entry.path()) {
                blocks.push(FirmwareBlock {
                    fw_id: block.to_uppercase(),
                    fw_version: version,
                });
            }
        }
        blocks.sort_by(|a, b| a.fw_id.cmp(&b.fw_id));
        Ok(blocks)
    }

    fn bad_pages(&self, handle: DeviceHandle) -> Result<Vec<BadPage>> {
        let card = self.card(handle)?;
        let path = card.device_path.join("ras/gpu_vram_bad_pages");
        let contents = read_trimmed_opt(&path)
            .ok_or_else(|| AmdSmiError::NotSupported("bad page retrieval".into()))?;
        parse_bad_pages(&contents)
    }

    fn gpu_activity(&self, handle: DeviceHandle) -> Result<EngineUsage> {
        let card = self.card(handle)?;
        Ok(EngineUsage {
            gfx_activity: read_u64(&card.device_path.join("gpu_busy_percent"))? as u32,
            umc_activity: read_u64(&card.device_path.join("mem_busy_percent"))? as u32,
        })
    }

    fn vram_usage(&self, handle: DeviceHandle) -> Result<VramUsage> {
        let card = self.card(handle)?;
        let total = read_u64(&card.device_path.join("mem_info_vram_total"))?;
        let used = read_u64(&card.device_path.join("mem_info_vram_used"))?;
        Ok(VramUsage {
            vram_total: total / (1024 * 1024),
            vram_used: used / (1024 * 1024),
        })
    }

    fn power_info(&self, handle: DeviceHandle) -> Result<PowerInfo> {
        let average = read_u64(&self.hwmon_file(handle, "power1_average")?)?;
        let limit = read_u64(&self.hwmon_file(handle, "power1_cap")?)?;
        Ok(PowerInfo {
            average_socket_power: (average / 1_000_000) as u32,
            power_limit: (limit / 1_000_000) as u32,
        })
    }

    fn clock_info(&self, handle: DeviceHandle, clock: ClockType) -> Result<ClockInfo> {
        let card = self.card(handle)?;
        let (freq_input, dpm_table) = match clock {
            ClockType::Gfx => ("freq1_input", "pp_dpm_sclk"),
            ClockType::Mem => ("freq2_input", "pp_dpm_mclk"),
        };
        let cur_hz = read_u64(&self.hwmon_file(handle, freq_input)?)?;
        let table = read_trimmed_opt(&card.device_path.join(dpm_table))
            .ok_or_else(|| AmdSmiError::NotSupported(format!("clock table ({dpm_table})")))?;
        let (min_clk, max_clk) = parse_dpm_range(&table)
            .ok_or_else(|| AmdSmiError::Parse(format!("unparseable {dpm_table} table")))?;
        Ok(ClockInfo {
            cur_clk: (cur_hz / 1_000_000) as u32,
            min_clk,
            max_clk,
        })
    }

    fn temperature(&self, handle: DeviceHandle, sensor: TemperatureSensor) -> Result<i64> {
        let channel = match sensor {
            TemperatureSensor::Edge => "temp1_input",
            TemperatureSensor::Junction => "temp2_input",
            TemperatureSensor::Vram => "temp3_input",
        };
        let path = self.hwmon_file(handle, channel)?;
        let milli = read_trimmed_opt(&path)
            .ok_or_else(|| AmdSmiError::NotSupported(format!("temperature sensor ({channel})")))?
            .parse::<i64>()
            .map_err(|e| AmdSmiError::Parse(format!("{channel}: {e}")))?;
        Ok(milli / 1000)
    }

    fn ecc_counts(&self, handle: DeviceHandle) -> Result<EccCounts> {
        let card = self.card(handle)?;
        let ce = card.device_path.join("ras/ce_count");
        let ue = card.device_path.join("ras/ue_count");
        if !ce.exists() || !ue.exists() {
            return Err(AmdSmiError::NotSupported("ECC counters".into()));
        }
        Ok(EccCounts {
            correctable_count: read_u64(&ce)?,
            uncorrectable_count: read_u64(&ue)?,
        })
    }

    fn process_list(&self, handle: DeviceHandle) -> Result<Vec<GpuProcessInfo>> {
        let card = self.card(handle)?;
        scan_fdinfo_processes(&self.root.join("proc"), &card.pci_addr)
    }

    fn link_metrics(&self, handle: DeviceHandle, peer: DeviceHandle) -> Result<LinkMetrics> {
        self.card(handle)?;
        self.card(peer)?;
        if handle == peer {
            return Ok(LinkMetrics {
                weight: 0,
                hops: 0,
                link_type: "SELF".to_string(),
            });
        }
        Err(AmdSmiError::NotSupported("inter-device link metrics".into()))
    }

    fn library_version(&self) -> LibVersion {
        parse_version(env!("CARGO_PKG_VERSION"))
    }

    fn set_fan_speed(&self, handle: DeviceHandle, speed: u32) -> Result<()> {
        if speed > 255 {
            return Err(AmdSmiError::InvalidArgument(format!(
                "fan speed {speed} out of range (0-255)"
            )));
        }
        // Manual fan control mode first, then the PWM level.
        fs::write(self.hwmon_file(handle, "pwm1_enable")?, "1")?;
        fs::write(self.hwmon_file(handle, "pwm1")?, speed.to_string())?;
        Ok(())
    }

    fn set_power_cap(&self, handle: DeviceHandle, watts: u32) -> Result<()> {
        let microwatts = u64::from(watts) * 1_000_000;
        fs::write(self.hwmon_file(handle, "power1_cap")?, microwatts.to_string())?;
        Ok(())
    }

    fn set_perf_level(&self, handle: DeviceHandle, level: PerfLevel) -> Result<()> {
        let card = self.card(handle)?;
        fs::write(
            card.device_path.join("power_dpm_force_performance_level"),
            level.as_str(),
        )?;
        Ok(())
    }

    fn reset_gpu(&self, handle: DeviceHandle) -> Result<()> {
        let card = self.card(handle)?;
        fs::write(card.device_path.join("reset"), "1")?;
        Ok(())
    }

    fn reset_fan(&self, handle: DeviceHandle) -> Result<()> {
        fs::write(self.hwmon_file(handle, "pwm1_enable")?, "2")?;
        Ok(())
    }
}

fn pci_addr_from_link(target: &Path) -> Option<String> {
    // Walk the link target components for a PCI address, e.g.
    // ../../devices/pci0000:00/0000:00:01.0/0000:03:00.0/drm/card0
    target
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .filter(|s| s.len() == 12 && s.as_bytes()[4] == b':' && s.as_bytes()[10] == b'.')
        .last()
        .map(|s| s.to_string())
}

fn find_hwmon_path(device_path: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(device_path.join("hwmon")).ok()?;
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("hwmon"))
                .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

fn read_trimmed_opt(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_u64(path: &Path) -> Result<u64> {
    let contents = fs::read_to_string(path)?;
    contents
        .trim()
        .parse::<u64>()
        .map_err(|e| AmdSmiError::Parse(format!("{}: {e}", path.display())))
}

/// Read a hex PCI id file, e.g. `0x1002`.
fn read_hex_id(path: &Path) -> Result<u32> {
    let contents = fs::read_to_string(path)?;
    let trimmed = contents.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(digits, 16)
        .map_err(|e| AmdSmiError::Parse(format!("{}: {e}", path.display())))
}

fn read_pcie_link(width_path: &Path, speed_path: &Path) -> Result<PcieLink> {
    let lanes = read_u64(width_path)? as u32;
    let speed_text = read_trimmed_opt(speed_path)
        .ok_or_else(|| AmdSmiError::NotSupported("PCIe link speed".into()))?;
    let speed = parse_link_speed(&speed_text)
        .ok_or_else(|| AmdSmiError::Parse(format!("unparseable link speed '{speed_text}'")))?;
    Ok(PcieLink {
        pcie_lanes: lanes,
        pcie_speed: speed,
    })
}

/// Parse a sysfs link speed like `16.0 GT/s PCIe` into MT/s.
fn parse_link_speed(text: &str) -> Option<u32> {
    let gt = text.split_whitespace().next()?.parse::<f64>().ok()?;
    Some((gt * 1000.0) as u32)
}

/// Parse a pp_dpm clock table and return the (min, max) levels in MHz.
///
/// Each line reads `N: 500Mhz` with an optional trailing `*` on the
/// active level.
fn parse_dpm_range(table: &str) -> Option<(u32, u32)> {
    let mut min = u32::MAX;
    let mut max = 0u32;
    for line in table.lines() {
        let freq_field = line.split(':').nth(1)?.trim();
        let digits: String = freq_field.chars().take_while(|c| c.is_ascii_digit()).collect();
        let mhz = digits.parse::<u32>().ok()?;
        min = min.min(mhz);
        max = max.max(mhz);
    }
    if max == 0 {
        return None;
    }
    Some((min, max))
}

/// Parse the RAS bad page list. Each line reads
/// `0x<address> : 0x<size> : <R|P|F>`.
fn parse_bad_pages(contents: &str) -> Result<Vec<BadPage>> {
    let mut pages = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(AmdSmiError::Parse(format!("bad page line '{line}'")));
        }
        let address = parse_hex_u64(fields[0])
            .ok_or_else(|| AmdSmiError::Parse(format!("bad page address '{}'", fields[0])))?;
        let size = parse_hex_u64(fields[1])
            .ok_or_else(|| AmdSmiError::Parse(format!("bad page size '{}'", fields[1])))?;
        let status = match fields[2] {
            "R" => PageStatus::Reserved,
            "P" => PageStatus::Pending,
            "F" => PageStatus::Unreservable,
            other => {
                return Err(AmdSmiError::Parse(format!("bad page status '{other}'")));
            }
        };
        pages.push(BadPage {
            page_address: address,
            page_size: size,
            status,
        });
    }
    Ok(pages)
}

fn parse_hex_u64(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

/// Hyphenate a unique id into the 8-4-4-4-12 uuid shape.
fn format_uuid(unique_id: &str) -> String {
    let mut hex: String = unique_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    while hex.len() < 32 {
        hex.insert(0, '0');
    }
    hex.truncate(32);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn parse_version(version: &str) -> LibVersion {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    LibVersion {
        major: parts.next().unwrap_or(0),
        minor: parts.next().unwrap_or(0),
        patch: parts.next().unwrap_or(0),
    }
}

/// Scan /proc fdinfo entries for clients of the card at `pci_addr`.
fn scan_fdinfo_processes(proc_dir: &Path, pci_addr: &str) -> Result<Vec<GpuProcessInfo>> {
    let mut processes: Vec<GpuProcessInfo> = Vec::new();
    let Ok(proc_entries) = fs::read_dir(proc_dir) else {
        return Ok(processes);
    };

    for proc_entry in proc_entries.flatten() {
        let pid: u32 = match proc_entry.file_name().to_string_lossy().parse() {
            Ok(p) => p,
            Err(_) => continue,
        };

        let fdinfo_dir = proc_entry.path().join("fdinfo");
        let Ok(fdinfo_entries) = fs::read_dir(&fdinfo_dir) else {
            continue;
        };

        let mut vram_mem = 0u64;
        let mut gtt_mem = 0u64;
        let mut is_client = false;
        for fdinfo_entry in fdinfo_entries.flatten() {
            let Ok(content) = fs::read_to_string(fdinfo_entry.path()) else {
                continue;
            };
            if !content.contains("drm-driver:\tamdgpu") {
                continue;
            }
            // Multi-GPU hosts need the pdev line to attribute the fd
            // to the right card.
            let matches_card = content
                .lines()
                .find_map(|l| l.strip_prefix("drm-pdev:"))
                .map(|pdev| pdev.trim().eq_ignore_ascii_case(pci_addr))
                .unwrap_or(true);
            if !matches_card {
                continue;
            }
            is_client = true;
            for line in content.lines() {
                if line.starts_with("drm-memory-vram:") {
                    if let Some(val) = parse_fdinfo_memory(line) {
                        vram_mem = vram_mem.max(val);
                    }
                } else if line.starts_with("drm-memory-gtt:") {
                    if let Some(val) = parse_fdinfo_memory(line) {
                        gtt_mem = gtt_mem.max(val);
                    }
                }
            }
        }

        if is_client {
            let name = fs::read_to_string(proc_entry.path().join("comm"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| format!("Process {pid}"));
            processes.push(GpuProcessInfo {
                name,
                pid,
                mem_usage: vram_mem + gtt_mem,
                vram_mem,
                gtt_mem,
            });
        }
    }

    processes.sort_by_key(|p| p.pid);
    processes.dedup_by_key(|p| p.pid);
    Ok(processes)
}

fn parse_fdinfo_memory(line: &str) -> Option<u64> {
    // "drm-memory-vram:\t1234 KiB"
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    let value: u64 = parts[1].parse().ok()?;
    let unit = parts.get(2).unwrap_or(&"B");
    let bytes = match unit.to_uppercase().as_str() {
        "KIB" | "KB" => value * 1024,
        "MIB" | "MB" => value * 1024 * 1024,
        "GIB" | "GB" => value * 1024 * 1024 * 1024,
        _ => value,
    };
    Some(bytes)
}
