//! System time: the wrapping tick counter and timeouts built on it

use core::fmt;

/// Relative number of system ticks.
pub type Ticks = u32;

/// Longest delay that can be armed. Deadlines are compared modulo 2^32, so a
/// deadline must never be more than half the counter range away.
pub const MAX_DELAY: Ticks = (u32::MAX >> 1) - 1;

/// Absolute value of the system tick counter.
///
/// The counter wraps; ordering between two instants is only meaningful when
/// they are less than `MAX_DELAY` ticks apart, which is why `Systime` does
/// not implement `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Systime(u32);

impl Systime {
    /// Counter value at boot
    pub const ZERO: Self = Self(0);

    /// Create an instant from a raw counter value
    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    /// Get the raw counter value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Advance by one tick
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Instant `ticks` after this one
    pub const fn after(self, ticks: Ticks) -> Self {
        Self(self.0.wrapping_add(ticks))
    }

    /// Ticks elapsed from `earlier` to this instant
    pub const fn since(self, earlier: Systime) -> Ticks {
        self.0.wrapping_sub(earlier.0)
    }

    /// Ticks remaining until `deadline`, or zero if it has passed
    pub const fn until(self, deadline: Systime) -> Ticks {
        if deadline.is_reached_at(self) {
            0
        } else {
            deadline.0.wrapping_sub(self.0)
        }
    }

    /// Whether this deadline is due at instant `now` (handles wraparound)
    pub const fn is_reached_at(self, now: Systime) -> bool {
        (now.0.wrapping_sub(self.0) as i32) >= 0
    }
}

impl fmt::Display for Systime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Systime {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.0);
    }
}

/// How long a blocking call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Do not block: fail with a timeout if the call would wait
    Immediate,
    /// Give up after this many ticks
    Ticks(Ticks),
    /// Wait until woken
    Never,
}

impl Timeout {
    /// Timeout of `ticks`, where zero means `Immediate`
    pub const fn ticks(ticks: Ticks) -> Self {
        if ticks == 0 {
            Self::Immediate
        } else {
            Self::Ticks(ticks)
        }
    }

    /// Check if the call must not block. `Ticks(0)` counts as immediate.
    pub const fn is_immediate(self) -> bool {
        matches!(self, Self::Immediate | Self::Ticks(0))
    }
}

impl From<Option<Ticks>> for Timeout {
    fn from(value: Option<Ticks>) -> Self {
        match value {
            Some(ticks) => Self::ticks(ticks),
            None => Self::Never,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Ticks(ticks) => write!(f, "{ticks}ticks"),
            Self::Never => write!(f, "never"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Timeout {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Immediate => defmt::write!(fmt, "immediate"),
            Self::Ticks(ticks) => defmt::write!(fmt, "{}ticks", ticks),
            Self::Never => defmt::write!(fmt, "never"),
        }
    }
}
