//! Event flag masks

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Set of event flags, one bit per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    /// No flags
    pub const NONE: Self = Self(0);

    /// Every flag
    pub const ALL: Self = Self(u32::MAX);

    /// Create a mask from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Mask with the single flag `n` (0..32) set
    pub const fn flag(n: u8) -> Self {
        assert!(n < 32, "event flag out of range");
        Self(1 << n)
    }

    /// Get the raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if any flag is shared with `other`
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Check if every flag of `other` is set in this mask
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Lowest set flag, if any
    pub const fn lowest(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for EventMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for EventMask {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMask({:#010x})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventMask {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "EventMask({=u32:b})", self.0);
    }
}
