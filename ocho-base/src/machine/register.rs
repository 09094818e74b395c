use num_enum::{IntoPrimitive, TryFromPrimitive, UnsafeFromPrimitive};
use static_assertions::const_assert;

use crate::nibble::U4;

/// Number of general purpose data registers.
pub const REGISTER_COUNT: usize = 16;

/// A general purpose data register, `V0` through `VF`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    TryFromPrimitive,
    IntoPrimitive,
    UnsafeFromPrimitive,
)]
#[repr(u8)]
pub enum Register {
    /// Also the offset register for indexed jumps.
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    VA,
    VB,
    VC,
    VD,
    VE,
    /// Doubles as the carry/borrow/collision flag register.
    VF,
}

const_assert!(Register::VF as usize + 1 == REGISTER_COUNT);

impl Register {
    /// The register selected by a register field of an instruction word.
    pub fn from_nibble(nibble: U4) -> Self {
        // SAFETY: there is one variant for every U4 value.
        unsafe { Self::from_unchecked(nibble.into_u8()) }
    }

    pub fn index(self) -> usize {
        self as u8 as usize
    }
}
