//! NIC model strings.
//!
//! The hypervisor reports a network device's model and its MAC address as a
//! single `"<model>=<MAC>"` string (for example `virtio=AA:BB:CC:00:11:22`),
//! and accepts a bare `"<model>"` when it should assign the address itself.
//! This module is the only place that string encoding is parsed or produced;
//! everything else works with [`NicModel`] and [`MacAddress`].

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::HypervisorError;

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// QEMU's locally administered OUI.
    const QEMU_PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Generate a random address under the QEMU prefix.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let [a, b, c] = Self::QEMU_PREFIX;
        Self([a, b, c, rng.gen(), rng.gen(), rng.gen()])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HypervisorError::InvalidConfig(format!("invalid MAC address: {}", s));

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

/// Emulated NIC hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NicKind {
    Virtio,
    E1000,
    E1000e,
    Rtl8139,
    Vmxnet3,
}

impl NicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NicKind::Virtio => "virtio",
            NicKind::E1000 => "e1000",
            NicKind::E1000e => "e1000e",
            NicKind::Rtl8139 => "rtl8139",
            NicKind::Vmxnet3 => "vmxnet3",
        }
    }
}

impl FromStr for NicKind {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtio" => Ok(NicKind::Virtio),
            "e1000" => Ok(NicKind::E1000),
            "e1000e" => Ok(NicKind::E1000e),
            "rtl8139" => Ok(NicKind::Rtl8139),
            "vmxnet3" => Ok(NicKind::Vmxnet3),
            other => Err(HypervisorError::InvalidConfig(format!(
                "unknown NIC model: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for NicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A NIC model, optionally bound to a MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NicModel {
    pub kind: NicKind,
    pub mac: Option<MacAddress>,
}

impl NicModel {
    /// A model without a MAC; the hypervisor assigns one.
    pub fn new(kind: NicKind) -> Self {
        Self { kind, mac: None }
    }

    pub fn with_mac(self, mac: MacAddress) -> Self {
        Self {
            mac: Some(mac),
            ..self
        }
    }

    pub fn without_mac(self) -> Self {
        Self { mac: None, ..self }
    }
}

impl fmt::Display for NicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mac {
            Some(mac) => write!(f, "{}={}", self.kind, mac),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for NicModel {
    type Err = HypervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((kind, mac)) => Ok(Self {
                kind: kind.trim().parse()?,
                mac: Some(mac.trim().parse()?),
            }),
            None => Ok(Self::new(s.trim().parse()?)),
        }
    }
}

impl TryFrom<String> for NicModel {
    type Error = HypervisorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NicModel> for String {
    fn from(model: NicModel) -> Self {
        model.to_string()
    }
}
