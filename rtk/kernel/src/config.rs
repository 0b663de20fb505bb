//! Kernel configuration.

/// Boot-time kernel settings.
///
/// Capacities (thread and timer slots) are const generic parameters of
/// [`System`](crate::System); everything else is configured here. All
/// constructors are `const` so a configuration can initialise a `static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Name reported in diagnostics.
    pub name: &'static str,
    /// Ticks a thread may run before yielding to an equal-priority peer.
    /// Zero disables timeslicing: threads of equal priority then run until
    /// they block or yield.
    pub time_quantum: u32,
}

impl KernelConfig {
    /// Default configuration: run-to-completion within a priority level.
    pub const DEFAULT: KernelConfig = KernelConfig {
        name: "rtk",
        time_quantum: 0,
    };

    /// Creates a new kernel configuration builder.
    pub const fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder {
            config: Self::DEFAULT,
        }
    }

    /// Check if round-robin timeslicing is enabled
    pub const fn timeslicing(&self) -> bool {
        self.time_quantum != 0
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Builder for kernel configuration, usable in const context.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub const fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the round-robin quantum in ticks (0 disables timeslicing).
    pub const fn time_quantum(mut self, ticks: u32) -> Self {
        self.config.time_quantum = ticks;
        self
    }

    /// Builds the final configuration.
    pub const fn build(self) -> KernelConfig {
        self.config
    }
}
