//! Thread priorities

use core::fmt;

/// Scheduling priority of a thread. Larger values are more urgent.
///
/// The range is fixed: `IDLE` is reserved for the idle thread the
/// application must provide, application threads use `LOWEST..=HIGHEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Priority of the idle thread; every other thread outranks it.
    pub const IDLE: Priority = Priority(0);

    /// Lowest priority for application threads
    pub const LOWEST: Priority = Priority(1);

    /// Default priority for application threads
    pub const NORMAL: Priority = Priority(128);

    /// Highest priority
    pub const HIGHEST: Priority = Priority(255);

    /// Create a priority from its raw level
    pub const fn new(level: u8) -> Self {
        Priority(level)
    }

    /// Get the raw priority level
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Check if this is the idle sentinel
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }

    /// One level more urgent, saturating at `HIGHEST`
    pub const fn raised(self) -> Self {
        Priority(self.0.saturating_add(1))
    }

    /// One level less urgent, saturating at `IDLE`
    pub const fn lowered(self) -> Self {
        Priority(self.0.saturating_sub(1))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u8> for Priority {
    fn from(level: u8) -> Self {
        Priority(level)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Macro to create compile-time priority constants
#[macro_export]
macro_rules! priority {
    ($value:literal) => {
        $crate::Priority::new($value)
    };
}
