// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mac address type and logic.

use core::fmt::{Debug, Display, Formatter};
use core::str::FromStr;

/// A [MAC Address] type.
///
/// `Mac` is a transparent wrapper around `[u8; 6]` which provides a
/// small collection of methods and type safety.
///
/// The text form is six lower case, colon separated octets (`02:00:5e:10:00:01`).  Parsing also
/// accepts dash separated octets and upper case digits.
///
/// [MAC Address]: https://en.wikipedia.org/wiki/MAC_address
#[must_use]
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Mac(pub [u8; 6]);

impl From<[u8; 6]> for Mac {
    fn from(value: [u8; 6]) -> Self {
        Mac(value)
    }
}

impl From<Mac> for [u8; 6] {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl AsRef<[u8; 6]> for Mac {
    #[must_use]
    fn as_ref(&self) -> &[u8; 6] {
        &self.0
    }
}

impl Mac {
    /// The broadcast `Mac`
    pub const BROADCAST: Mac = Mac([u8::MAX; 6]);
    /// The zero `Mac`.
    ///
    /// Drivers report `ZERO` as the administrative address of a VF which was never assigned one.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Returns true iff the binary representation of the [`Mac`] is exclusively ones.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self == &Mac::BROADCAST
    }

    /// Returns true iff the least significant bit of the first octet of the `[Mac]` is one.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    /// Returns true iff the binary representation of the [`Mac`] is exclusively zeros.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Mac::ZERO
    }

    /// Returns true iff the [`Mac`] is a legal source `Mac`.
    ///
    /// Multicast and zero are not legal source [`Mac`].
    #[must_use]
    pub fn is_valid_src(&self) -> bool {
        !self.is_zero() && !self.is_multicast()
    }
}

/// Errors which can occur while parsing a [`Mac`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacParseError {
    /// Wrong number of octets.
    #[error("invalid mac address '{0}': expected 6 octets")]
    OctetCount(String),
    /// An octet was not two hex digits.
    #[error("invalid mac address '{0}': octets must be two hex digits")]
    BadOctet(String),
    /// The raw byte representation had the wrong length.
    #[error("invalid mac address: expected 6 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Mac {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(separator) {
            if count == octets.len() {
                return Err(MacParseError::OctetCount(s.to_string()));
            }
            if part.len() != 2 {
                return Err(MacParseError::BadOctet(s.to_string()));
            }
            octets[count] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError::BadOctet(s.to_string()))?;
            count += 1;
        }
        if count != octets.len() {
            return Err(MacParseError::OctetCount(s.to_string()));
        }
        Ok(Mac(octets))
    }
}

impl TryFrom<&[u8]> for Mac {
    type Error = MacParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let octets: [u8; 6] = value
            .try_into()
            .map_err(|_| MacParseError::Length(value.len()))?;
        Ok(Mac(octets))
    }
}

impl TryFrom<String> for Mac {
    type Error = MacParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Mac::from_str(&value)
    }
}

impl From<Mac> for String {
    fn from(value: Mac) -> Self {
        value.to_string()
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Debug for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Display::fmt(self, f)
    }
}
