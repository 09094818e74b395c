use num_enum::{IntoPrimitive, TryFromPrimitive, UnsafeFromPrimitive};
use static_assertions::const_assert;

use crate::nibble::U4;

/// Number of keys on the keypad.
pub const KEY_COUNT: usize = 16;

/// A key of the 16-key keypad, named after its hex key code.
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
pub enum Key {
    K0,
    K1,
    K2,
    K3,
    K4,
    K5,
    K6,
    K7,
    K8,
    K9,
    KA,
    KB,
    KC,
    KD,
    KE,
    KF,
}

const_assert!(Key::KF as usize + 1 == KEY_COUNT);

impl Key {
    /// The key addressed by a register value.
    /// Only the low nibble selects within the 0-F code space.
    pub fn from_code(code: u8) -> Self {
        // SAFETY: there is one variant for every U4 value.
        unsafe { Self::from_unchecked(U4::lo(code).into_u8()) }
    }

    /// The key code written to a register by the key wait operation.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Whether a key is currently held down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

impl Default for KeyState {
    fn default() -> Self {
        Self::Released
    }
}
