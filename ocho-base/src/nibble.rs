use std::convert::TryFrom;

use derive_more::{Display, Into};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Error)]
#[error("value {value:#X} exceeds the field maximum {max:#X}")]
pub struct FieldOverflowError {
    value: u16,
    max: u16,
}

/// A 4-bit integer, as carried by the sub-fields of an instruction word.
///
/// Supports only what decoding and encoding need; storage is a full byte.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Into, Display)]
#[repr(transparent)]
pub struct U4(u8);

impl U4 {
    pub const MAX: Self = Self(0xF);

    /// The high nibble of `byte`.
    pub const fn hi(byte: u8) -> Self {
        Self(byte >> 4)
    }

    /// The low nibble of `byte`.
    pub const fn lo(byte: u8) -> Self {
        Self(byte & 0xF)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for U4 {
    type Error = FieldOverflowError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(FieldOverflowError {
                value: value as u16,
                max: Self::MAX.0 as u16,
            })
        }
    }
}

/// A 12-bit integer, the address field of an instruction word.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Into, Display)]
#[repr(transparent)]
pub struct U12(u16);

impl U12 {
    pub const MAX: Self = Self(0xFFF);

    /// Join the low nibble of `hi` with all of `lo`, as laid out in an
    /// instruction word.
    pub const fn from_bytes(hi: u8, lo: u8) -> Self {
        Self((((hi & 0xF) as u16) << 8) | lo as u16)
    }

    /// Split back into the byte pair of an instruction word.
    /// The first byte carries only the top nibble of the address.
    pub const fn to_bytes(self) -> [u8; 2] {
        [(self.0 >> 8) as u8, self.0 as u8]
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for U12 {
    type Error = FieldOverflowError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(FieldOverflowError {
                value,
                max: Self::MAX.0,
            })
        }
    }
}
