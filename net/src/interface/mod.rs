// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network interface identity types.

use core::fmt::{Display, Formatter};
use core::num::NonZero;

/// A validated linux network interface name.
///
/// The kernel limits names to [`InterfaceName::MAX_LEN`] bytes (`IFNAMSIZ` minus the trailing
/// null) and refuses `/`, whitespace, and the names `.` and `..`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct InterfaceName(String);

/// Errors which can occur when validating an [`InterfaceName`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IllegalInterfaceName {
    /// Empty names are not legal.
    #[error("interface name must not be empty")]
    Empty,
    /// The name is longer than the kernel allows.
    #[error("interface name '{0}' is longer than {max} bytes", max = InterfaceName::MAX_LEN)]
    TooLong(String),
    /// The name contains a character the kernel refuses.
    #[error("interface name '{0}' contains an illegal character")]
    IllegalCharacters(String),
    /// `.` and `..` are reserved.
    #[error("interface name '{0}' is reserved")]
    Reserved(String),
}

impl InterfaceName {
    /// Maximum legal length of an interface name in bytes.
    pub const MAX_LEN: usize = 15;

    /// Borrow the name as a `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(IllegalInterfaceName::Empty);
        }
        if value.len() > InterfaceName::MAX_LEN {
            return Err(IllegalInterfaceName::TooLong(value.to_string()));
        }
        if value == "." || value == ".." {
            return Err(IllegalInterfaceName::Reserved(value.to_string()));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_graphic() && c != '/' && c != ':')
        {
            return Err(IllegalInterfaceName::IllegalCharacters(value.to_string()));
        }
        Ok(InterfaceName(value.to_string()))
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceName::try_from(value.as_str())
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A kernel interface index.  Zero is never a valid index.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InterfaceIndex(NonZero<u32>);

/// Returned when zero is offered as an [`InterfaceIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("zero is not a legal interface index")]
pub struct ZeroInterfaceIndex;

impl InterfaceIndex {
    /// Validate a raw kernel index.
    ///
    /// # Errors
    ///
    /// Returns [`ZeroInterfaceIndex`] if `index` is zero.
    pub fn try_new(index: u32) -> Result<Self, ZeroInterfaceIndex> {
        NonZero::new(index)
            .map(InterfaceIndex)
            .ok_or(ZeroInterfaceIndex)
    }

    /// The raw index.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl Display for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
