//! Disk and network device records and the indexed collections that hold them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};
use crate::nic_model::NicModel;

/// Position of a device within its collection (`virtio0`, `net1`, ...).
pub type DeviceIndex = u32;

/// Per-kind merge rule used when reconciling declared devices with live ones.
///
/// Required attributes are present on both sides and are left alone.
/// Optional attributes that are unset on `self` take the value from
/// `configured`; attributes already set on `self` are never overwritten.
pub trait DeviceAttributes: Clone + PartialEq {
    fn fill_missing_from(&mut self, configured: &Self);
}

/// Devices of a single kind keyed by their index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCollection<D>(BTreeMap<DeviceIndex, D>);

impl<D> DeviceCollection<D> {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a device, returning the one previously at `index`.
    pub fn insert(&mut self, index: DeviceIndex, device: D) -> Option<D> {
        self.0.insert(index, device)
    }

    pub fn get(&self, index: DeviceIndex) -> Option<&D> {
        self.0.get(&index)
    }

    pub fn get_mut(&mut self, index: DeviceIndex) -> Option<&mut D> {
        self.0.get_mut(&index)
    }

    pub fn contains(&self, index: DeviceIndex) -> bool {
        self.0.contains_key(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceIndex, &D)> {
        self.0.iter().map(|(idx, dev)| (*idx, dev))
    }

    pub fn indices(&self) -> impl Iterator<Item = DeviceIndex> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<D> Default for DeviceCollection<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> FromIterator<(DeviceIndex, D)> for DeviceCollection<D> {
    fn from_iter<I: IntoIterator<Item = (DeviceIndex, D)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<D> IntoIterator for DeviceCollection<D> {
    type Item = (DeviceIndex, D);
    type IntoIter = std::collections::btree_map::IntoIter<DeviceIndex, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// =============================================================================
// DISKS
// =============================================================================

/// Disk bus type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Virtio,
    Scsi,
    Sata,
    Ide,
}

impl DiskBus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskBus::Virtio => "virtio",
            DiskBus::Scsi => "scsi",
            DiskBus::Sata => "sata",
            DiskBus::Ide => "ide",
        }
    }

    /// Hypervisor device name for the disk at `index` on this bus.
    pub fn device_name(&self, index: DeviceIndex) -> String {
        format!("{}{}", self.as_str(), index)
    }
}

/// Disk caching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskCache {
    None,
    Writeback,
    Writethrough,
    Directsync,
    Unsafe,
}

/// Disk size as the hypervisor writes it, e.g. `32G` or `512M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiskSize {
    value: u64,
    unit: SizeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeUnit {
    K,
    M,
    G,
    T,
}

impl DiskSize {
    pub fn from_gib(gib: u64) -> Self {
        Self {
            value: gib,
            unit: SizeUnit::G,
        }
    }

    /// Whole GiB, rounding partial GiB down.
    pub fn as_gib(&self) -> u64 {
        match self.unit {
            SizeUnit::K => self.value / (1024 * 1024),
            SizeUnit::M => self.value / 1024,
            SizeUnit::G => self.value,
            SizeUnit::T => self.value.saturating_mul(1024),
        }
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            SizeUnit::K => "K",
            SizeUnit::M => "M",
            SizeUnit::G => "G",
            SizeUnit::T => "T",
        };
        write!(f, "{}{}", self.value, unit)
    }
}

impl FromStr for DiskSize {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (digits, unit) = match s.char_indices().last() {
            Some((pos, c)) if c.is_ascii_alphabetic() => (&s[..pos], c.to_ascii_uppercase()),
            _ => (s, 'G'),
        };
        let unit = match unit {
            'K' => SizeUnit::K,
            'M' => SizeUnit::M,
            'G' => SizeUnit::G,
            'T' => SizeUnit::T,
            other => {
                return Err(HypervisorError::InvalidConfig(format!(
                    "unknown disk size unit '{}' in {}",
                    other, s
                )))
            }
        };
        let value = digits
            .parse::<u64>()
            .map_err(|_| HypervisorError::InvalidConfig(format!("invalid disk size: {}", s)))?;
        // Sizes must fit in a u64 once converted to GiB.
        if unit == SizeUnit::T && value.checked_mul(1024).is_none() {
            return Err(HypervisorError::InvalidConfig(format!(
                "disk size out of range: {}",
                s
            )));
        }
        Ok(Self { value, unit })
    }
}

impl TryFrom<String> for DiskSize {
    type Error = HypervisorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DiskSize> for String {
    fn from(size: DiskSize) -> Self {
        size.to_string()
    }
}

/// A disk device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskDevice {
    /// Bus the disk hangs off (`type` in the hypervisor config)
    #[serde(rename = "type")]
    pub bus: DiskBus,
    /// Storage pool holding the volume
    pub storage: String,
    /// Allocated size
    pub size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<DiskCache>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iothread: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate: Option<bool>,
}

impl DiskDevice {
    /// Create a disk with its required attributes.
    pub fn new(bus: DiskBus, storage: impl Into<String>, size: DiskSize) -> Result<Self> {
        let storage = storage.into();
        if storage.trim().is_empty() {
            return Err(HypervisorError::InvalidConfig(
                "disk storage must not be empty".to_string(),
            ));
        }
        Ok(Self {
            bus,
            storage,
            size,
            cache: None,
            backup: None,
            iothread: None,
            replicate: None,
        })
    }

    pub fn with_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_iothread(mut self, iothread: bool) -> Self {
        self.iothread = Some(iothread);
        self
    }

    pub fn with_replicate(mut self, replicate: bool) -> Self {
        self.replicate = Some(replicate);
        self
    }
}

impl DeviceAttributes for DiskDevice {
    fn fill_missing_from(&mut self, configured: &Self) {
        self.cache = self.cache.or(configured.cache);
        self.backup = self.backup.or(configured.backup);
        self.iothread = self.iothread.or(configured.iothread);
        self.replicate = self.replicate.or(configured.replicate);
    }
}

// =============================================================================
// NETWORKS
// =============================================================================

/// A network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDevice {
    /// NIC model, carrying the MAC once the hypervisor has assigned one
    pub model: NicModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    /// VLAN tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<bool>,
    /// Rate limit in MB/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queues: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_down: Option<bool>,
}

impl NetworkDevice {
    /// VLAN ids are 12 bits; 0 and 4095 are reserved.
    const MAX_VLAN_TAG: u16 = 4094;

    pub fn new(model: NicModel) -> Self {
        Self {
            model,
            bridge: None,
            tag: None,
            firewall: None,
            rate: None,
            queues: None,
            link_down: None,
        }
    }

    pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = Some(bridge.into());
        self
    }

    pub fn with_tag(mut self, tag: u16) -> Result<Self> {
        if tag == 0 || tag > Self::MAX_VLAN_TAG {
            return Err(HypervisorError::InvalidConfig(format!(
                "VLAN tag {} out of range 1-{}",
                tag,
                Self::MAX_VLAN_TAG
            )));
        }
        self.tag = Some(tag);
        Ok(self)
    }

    pub fn with_firewall(mut self, firewall: bool) -> Self {
        self.firewall = Some(firewall);
        self
    }

    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_queues(mut self, queues: u32) -> Self {
        self.queues = Some(queues);
        self
    }

    pub fn with_link_down(mut self, link_down: bool) -> Self {
        self.link_down = Some(link_down);
        self
    }
}

impl DeviceAttributes for NetworkDevice {
    fn fill_missing_from(&mut self, configured: &Self) {
        if self.bridge.is_none() {
            self.bridge = configured.bridge.clone();
        }
        self.tag = self.tag.or(configured.tag);
        self.firewall = self.firewall.or(configured.firewall);
        self.rate = self.rate.or(configured.rate);
        self.queues = self.queues.or(configured.queues);
        self.link_down = self.link_down.or(configured.link_down);
    }
}
