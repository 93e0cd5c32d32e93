// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! PCI addresses.

use core::fmt::{Display, Formatter};
use core::str::FromStr;

/// A PCI address in extended bus/device/function form (`dddd:bb:dd.f`).
///
/// The canonical text form is the one the kernel uses under `/sys/bus/pci/devices`, e.g.
/// `0000:af:00.1`.  Parsing also accepts the short `bb:dd.f` form, which implies domain zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct PciAddress {
    domain: u32,
    bus: u8,
    device: u8,
    function: u8,
}

/// Errors which can occur when parsing a [`PciAddress`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPciAddress {
    /// The string does not have the `[dddd:]bb:dd.f` shape.
    #[error("invalid pci address '{0}': expected [dddd:]bb:dd.f")]
    Syntax(String),
    /// The device number is out of range (max 0x1f).
    #[error("invalid pci address '{0}': device must be at most 1f")]
    Device(String),
    /// The function number is out of range (max 7).
    #[error("invalid pci address '{0}': function must be at most 7")]
    Function(String),
}

impl PciAddress {
    /// Build an address from its parts.
    ///
    /// # Errors
    ///
    /// Fails if `device` is greater than `0x1f` or `function` is greater than `7`.
    pub fn new(domain: u32, bus: u8, device: u8, function: u8) -> Result<Self, InvalidPciAddress> {
        let address = PciAddress {
            domain,
            bus,
            device,
            function,
        };
        if device > 0x1f {
            return Err(InvalidPciAddress::Device(address.to_string()));
        }
        if function > 7 {
            return Err(InvalidPciAddress::Function(address.to_string()));
        }
        Ok(address)
    }

    /// The PCI domain (segment).
    #[must_use]
    pub fn domain(&self) -> u32 {
        self.domain
    }

    /// The bus number.
    #[must_use]
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// The device number.
    #[must_use]
    pub fn device(&self) -> u8 {
        self.device
    }

    /// The function number.
    #[must_use]
    pub fn function(&self) -> u8 {
        self.function
    }
}

impl FromStr for PciAddress {
    type Err = InvalidPciAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syntax = || InvalidPciAddress::Syntax(s.to_string());
        let (rest, function) = s.rsplit_once('.').ok_or_else(syntax)?;
        let mut parts = rest.rsplitn(3, ':');
        let device = parts.next().ok_or_else(syntax)?;
        let bus = parts.next().ok_or_else(syntax)?;
        let domain = parts.next().unwrap_or("0");
        let hex_u8 = |value: &str| {
            if value.is_empty() || value.len() > 2 {
                return Err(syntax());
            }
            u8::from_str_radix(value, 16).map_err(|_| syntax())
        };
        if domain.is_empty() || domain.len() > 8 || function.len() != 1 {
            return Err(syntax());
        }
        let domain = u32::from_str_radix(domain, 16).map_err(|_| syntax())?;
        let function = u8::from_str_radix(function, 16).map_err(|_| syntax())?;
        PciAddress::new(domain, hex_u8(bus)?, hex_u8(device)?, function)
    }
}

impl TryFrom<String> for PciAddress {
    type Error = InvalidPciAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PciAddress::from_str(&value)
    }
}

impl TryFrom<&str> for PciAddress {
    type Error = InvalidPciAddress;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        PciAddress::from_str(value)
    }
}

impl From<PciAddress> for String {
    fn from(value: PciAddress) -> Self {
        value.to_string()
    }
}

impl Display for PciAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}
