//! Device registry: enumeration, stable user-visible indices, and
//! selector resolution for the `--gpu` argument.

use log::debug;

use crate::bdf::Bdf;
use crate::error::{AmdSmiError, Result};
use crate::smi::{DeviceHandle, SmiBackend};

/// One enumerated device with its user-visible identity.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub handle: DeviceHandle,
    /// Position in enumeration order; this is the index users pass to
    /// `--gpu` and the key the logger stores records under.
    pub index: usize,
    pub bdf: Bdf,
    /// Absent when the device does not expose a unique id.
    pub uuid: Option<String>,
}

/// A classified `--gpu` selector token. Classification is syntactic;
/// resolution against the enumerated devices happens in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuSelector {
    Index(usize),
    Bdf(Bdf),
    Uuid(String),
}

impl GpuSelector {
    /// Classify a raw token. A token that is neither a number nor a
    /// BDF is treated as a UUID candidate.
    pub fn classify(token: &str) -> Self {
        if let Ok(index) = token.parse::<usize>() {
            return GpuSelector::Index(index);
        }
        if let Ok(bdf) = Bdf::parse(token) {
            return GpuSelector::Bdf(bdf);
        }
        GpuSelector::Uuid(token.to_string())
    }
}

/// Registry built once per invocation after library init.
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn enumerate(backend: &dyn SmiBackend) -> Result<Self> {
        let mut entries = Vec::new();
        for (index, handle) in backend.device_handles()?.into_iter().enumerate() {
            let bdf = backend.device_bdf(handle)?;
            let uuid = backend.device_uuid(handle).ok();
            debug!("device {index}: {bdf}");
            entries.push(DeviceEntry {
                handle,
                index,
                bdf,
                uuid,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn amd_bdfs(&self) -> Vec<Bdf> {
        self.entries.iter().map(|e| e.bdf).collect()
    }

    /// Human-readable identity lines, one per device, used in selector
    /// error messages and `discovery` output.
    pub fn choices(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "ID:{} | BDF:{} | UUID:{}",
                    e.index,
                    e.bdf,
                    e.uuid.as_deref().unwrap_or("N/A")
                )
            })
            .collect()
    }

    /// Map a handle back to its index. A handle the registry never
    /// enumerated is stale.
    pub fn index_of(&self, handle: DeviceHandle) -> Result<usize> {
        self.entries
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| e.index)
            .ok_or_else(|| AmdSmiError::DeviceNotFound(handle.to_string()))
    }

    /// Resolve `--gpu` selector tokens to devices, preserving selector
    /// order and dropping duplicates. Each token may be an index, a
    /// BDF, or a case-insensitive UUID; the first matching
    /// interpretation wins.
    pub fn resolve(&self, selectors: &[String]) -> Result<Vec<&DeviceEntry>> {
        let mut resolved: Vec<&DeviceEntry> = Vec::new();
        for token in selectors {
            let entry = self.resolve_one(token)?;
            if !resolved.iter().any(|e| e.index == entry.index) {
                resolved.push(entry);
            }
        }
        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve), defaulting to every device when
    /// no selector was given.
    pub fn resolve_or_all(&self, selectors: &[String]) -> Result<Vec<&DeviceEntry>> {
        if selectors.is_empty() {
            return Ok(self.entries.iter().collect());
        }
        self.resolve(selectors)
    }

    fn resolve_one(&self, token: &str) -> Result<&DeviceEntry> {
        let entry = match GpuSelector::classify(token) {
            GpuSelector::Index(index) => self.entries.get(index),
            GpuSelector::Bdf(bdf) => self.entries.iter().find(|e| e.bdf == bdf),
            GpuSelector::Uuid(uuid) => self.entries.iter().find(|e| {
                e.uuid
                    .as_deref()
                    .map(|u| u.eq_ignore_ascii_case(&uuid))
                    .unwrap_or(false)
            }),
        };
        entry.ok_or_else(|| {
            AmdSmiError::InvalidArgument(format!(
                "'{token}' is not a valid GPU. Valid choices are:\n  {}",
                self.choices().join("\n  ")
            ))
        })
    }
}
