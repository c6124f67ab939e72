//! Machine registry for automatic front-end discovery.
//!
//! Each machine self-registers via [`inventory::submit!`] with a
//! [`MachineEntry`] containing its CLI name, master clock rate and a factory
//! function. The front-end discovers available machines at runtime without
//! any central list.

use cyclehost_core::core::MachineHost;
use cyclehost_core::error::ConfigError;

/// Describes a front-end-capable machine.
pub struct MachineEntry {
    /// CLI name used to select this machine (e.g., "sandbox").
    pub name: &'static str,
    /// One-line description for `list`.
    pub description: &'static str,
    /// Master clock in ticks per second; the scheduler's default rate.
    pub default_hz: u64,
    /// Factory: construct the machine with its bus wired, no ROM loaded.
    pub create: fn() -> Result<Box<dyn MachineHost>, ConfigError>,
    /// Program image used when no ROM path is given.
    pub builtin_rom: Option<fn() -> Vec<u8>>,
}

impl MachineEntry {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default_hz: u64,
        create: fn() -> Result<Box<dyn MachineHost>, ConfigError>,
    ) -> Self {
        Self {
            name,
            description,
            default_hz,
            create,
            builtin_rom: None,
        }
    }

    pub const fn with_builtin_rom(mut self, rom: fn() -> Vec<u8>) -> Self {
        self.builtin_rom = Some(rom);
        self
    }
}

inventory::collect!(MachineEntry);

/// Return all registered machines, sorted by name.
pub fn all() -> Vec<&'static MachineEntry> {
    let mut entries: Vec<_> = inventory::iter::<MachineEntry>.into_iter().collect();
    entries.sort_by_key(|e| e.name);
    entries
}

/// Look up a machine by its CLI name.
pub fn find(name: &str) -> Option<&'static MachineEntry> {
    inventory::iter::<MachineEntry>
        .into_iter()
        .find(|e| e.name == name)
}
