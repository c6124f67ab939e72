//! Address-space bus: device attachment and address decoding.
//!
//! Resolution uses an ordered scan list. Devices are searched from the most
//! recently attached to the least recently attached and the first range that
//! contains the address owns the access, so a later attachment shadows an
//! earlier one wherever the two overlap. Attach is O(1), lookup O(n).
//!
//! The separate port space (Z80-style IN/OUT) follows the same rules.

use std::any::Any;
use std::io::{self, Read, Write};

use crate::error::ConfigError;

/// Value driven onto the data bus when nothing answers a read.
pub const OPEN_BUS: u8 = 0xFF;

/// Inclusive address range `from..=to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressRange {
    pub from: u32,
    pub to: u32,
}

impl AddressRange {
    /// Build a range, rejecting `to < from`.
    pub fn new(from: u32, to: u32) -> Result<Self, ConfigError> {
        if to < from {
            return Err(ConfigError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Range of `len` bytes starting at `from`.
    pub fn with_len(from: u32, len: u32) -> Result<Self, ConfigError> {
        if len == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let to = from
            .checked_add(len - 1)
            .ok_or(ConfigError::CapacityTooLarge(from as u64 + len as u64))?;
        Ok(Self { from, to })
    }

    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.from && addr <= self.to
    }

    /// Number of addresses covered (a full 32-bit range is 2^32).
    pub const fn size(&self) -> u64 {
        (self.to as u64).saturating_sub(self.from as u64) + 1
    }

    pub const fn overlaps(&self, other: &AddressRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    fn is_inverted(&self) -> bool {
        self.to < self.from
    }
}

/// A memory-mapped device.
///
/// The bus passes offsets relative to `range().from`, so a device never needs
/// to know where it was mapped. The range must not change after attachment.
pub trait Device: Any + Send {
    fn range(&self) -> AddressRange;

    fn read8(&mut self, offset: u32) -> u8;

    fn write8(&mut self, offset: u32, value: u8);

    /// Bytes written by `save_state`. Stateless devices keep the default.
    fn state_size(&self) -> usize {
        0
    }

    fn save_state(&self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn load_state(&mut self, _input: &mut dyn Read) -> io::Result<()> {
        Ok(())
    }
}

/// A device on the separate I/O port space.
pub trait PortDevice: Any + Send {
    fn ports(&self) -> AddressRange;

    fn read_port(&mut self, offset: u16) -> u8;

    fn write_port(&mut self, offset: u16, value: u8);

    fn state_size(&self) -> usize {
        0
    }

    fn save_state(&self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn load_state(&mut self, _input: &mut dyn Read) -> io::Result<()> {
        Ok(())
    }
}

/// Handle to an attached memory-mapped device, in attachment order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

/// Handle to an attached port device, in attachment order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortId(usize);

/// Largest port number on the 16-bit port space.
const MAX_PORT: u32 = 0xFFFF;

struct Mapped<D: ?Sized> {
    range: AddressRange,
    device: Box<D>,
}

/// The machine's address space.
///
/// Owns every attached device for the life of the machine. There is no
/// detach: emulated systems are wired once at construction.
pub struct Bus {
    max_address: u32,
    devices: Vec<Mapped<dyn Device>>,
    ports: Vec<Mapped<dyn PortDevice>>,
}

impl Bus {
    /// Empty address space of `size` bytes (`0..=size-1`).
    ///
    /// Until devices are attached every read floats to [`OPEN_BUS`].
    pub fn new(size: u64) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if size > u32::MAX as u64 + 1 {
            return Err(ConfigError::CapacityTooLarge(size));
        }
        Ok(Self {
            max_address: (size - 1) as u32,
            devices: Vec::new(),
            ports: Vec::new(),
        })
    }

    /// Address space sized by its primary memory.
    ///
    /// The memory becomes the first (lowest-precedence) device and its last
    /// address becomes the bus's `max_address`.
    pub fn with_main_memory(memory: impl Device) -> Result<Self, ConfigError> {
        let range = memory.range();
        if range.is_inverted() {
            return Err(ConfigError::InvalidRange {
                from: range.from,
                to: range.to,
            });
        }
        let mut bus = Self::new(range.to as u64 + 1)?;
        bus.attach(memory)?;
        Ok(bus)
    }

    pub fn max_address(&self) -> u32 {
        self.max_address
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Map a device. Later attachments win over earlier ones where ranges
    /// overlap.
    pub fn attach(&mut self, device: impl Device) -> Result<DeviceId, ConfigError> {
        let range = device.range();
        self.check_range(range, self.max_address)?;
        log::debug!(
            "bus: attach device {:#X}..={:#X} (slot {})",
            range.from,
            range.to,
            self.devices.len()
        );
        self.devices.push(Mapped {
            range,
            device: Box::new(device),
        });
        Ok(DeviceId(self.devices.len() - 1))
    }

    /// Map a device on the port space.
    pub fn attach_port(&mut self, device: impl PortDevice) -> Result<PortId, ConfigError> {
        let range = device.ports();
        self.check_range(range, MAX_PORT)?;
        log::debug!("bus: attach port device {:#06X}..={:#06X}", range.from, range.to);
        self.ports.push(Mapped {
            range,
            device: Box::new(device),
        });
        Ok(PortId(self.ports.len() - 1))
    }

    fn check_range(&self, range: AddressRange, max: u32) -> Result<(), ConfigError> {
        if range.is_inverted() {
            return Err(ConfigError::InvalidRange {
                from: range.from,
                to: range.to,
            });
        }
        if range.to > max {
            return Err(ConfigError::CapacityExceeded {
                from: range.from,
                to: range.to,
                max,
            });
        }
        Ok(())
    }

    /// Typed access to an attached device.
    pub fn device<T: Device>(&self, id: DeviceId) -> Option<&T> {
        let device: &dyn Device = &*self.devices.get(id.0)?.device;
        let device: &dyn Any = device;
        device.downcast_ref::<T>()
    }

    /// Typed mutable access to an attached device.
    pub fn device_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        let device: &mut dyn Device = &mut *self.devices.get_mut(id.0)?.device;
        let device: &mut dyn Any = device;
        device.downcast_mut::<T>()
    }

    pub fn port_device<T: PortDevice>(&self, id: PortId) -> Option<&T> {
        let device: &dyn PortDevice = &*self.ports.get(id.0)?.device;
        let device: &dyn Any = device;
        device.downcast_ref::<T>()
    }

    pub fn port_device_mut<T: PortDevice>(&mut self, id: PortId) -> Option<&mut T> {
        let device: &mut dyn PortDevice = &mut *self.ports.get_mut(id.0)?.device;
        let device: &mut dyn Any = device;
        device.downcast_mut::<T>()
    }

    fn resolve(&mut self, addr: u32) -> Option<&mut Mapped<dyn Device>> {
        if addr > self.max_address {
            return None;
        }
        self.devices
            .iter_mut()
            .rev()
            .find(|m| m.range.contains(addr))
    }

    pub fn read8(&mut self, addr: u32) -> u8 {
        match self.resolve(addr) {
            Some(m) => {
                let offset = addr - m.range.from;
                m.device.read8(offset)
            }
            None => OPEN_BUS,
        }
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        if let Some(m) = self.resolve(addr) {
            let offset = addr - m.range.from;
            m.device.write8(offset, value);
        }
    }

    pub fn read_port(&mut self, port: u16) -> u8 {
        let port = port as u32;
        match self.ports.iter_mut().rev().find(|m| m.range.contains(port)) {
            Some(m) => {
                let offset = (port - m.range.from) as u16;
                m.device.read_port(offset)
            }
            None => OPEN_BUS,
        }
    }

    pub fn write_port(&mut self, port: u16, value: u8) {
        let port = port as u32;
        if let Some(m) = self.ports.iter_mut().rev().find(|m| m.range.contains(port)) {
            let offset = (port - m.range.from) as u16;
            m.device.write_port(offset, value);
        }
    }

    // -----------------------------------------------------------------------
    // Multi-byte helpers. Each composes byte accesses in ascending address
    // order; the suffix names which byte lands at the lowest address.
    // -----------------------------------------------------------------------

    /// High byte at `addr`, low byte at `addr + 1`.
    pub fn read16_be(&mut self, addr: u32) -> u16 {
        let hi = self.read8(addr);
        let lo = self.read8(addr.wrapping_add(1));
        u16::from_be_bytes([hi, lo])
    }

    /// Low byte at `addr`, high byte at `addr + 1`.
    pub fn read16_le(&mut self, addr: u32) -> u16 {
        let lo = self.read8(addr);
        let hi = self.read8(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub fn read24_be(&mut self, addr: u32) -> u32 {
        let b0 = self.read8(addr);
        let b1 = self.read8(addr.wrapping_add(1));
        let b2 = self.read8(addr.wrapping_add(2));
        u32::from_be_bytes([0, b0, b1, b2])
    }

    pub fn read24_le(&mut self, addr: u32) -> u32 {
        let b0 = self.read8(addr);
        let b1 = self.read8(addr.wrapping_add(1));
        let b2 = self.read8(addr.wrapping_add(2));
        u32::from_le_bytes([b0, b1, b2, 0])
    }

    pub fn read32_be(&mut self, addr: u32) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read8(addr.wrapping_add(i as u32));
        }
        u32::from_be_bytes(bytes)
    }

    pub fn read32_le(&mut self, addr: u32) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read8(addr.wrapping_add(i as u32));
        }
        u32::from_le_bytes(bytes)
    }

    pub fn write16_be(&mut self, addr: u32, value: u16) {
        self.write_bytes(addr, &value.to_be_bytes());
    }

    pub fn write16_le(&mut self, addr: u32, value: u16) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    /// Writes the low 24 bits of `value`, most significant first.
    pub fn write24_be(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_be_bytes()[1..]);
    }

    /// Writes the low 24 bits of `value`, least significant first.
    pub fn write24_le(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes()[..3]);
    }

    pub fn write32_be(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_be_bytes());
    }

    pub fn write32_le(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.write8(addr.wrapping_add(i as u32), b);
        }
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// Serialized size of every device, memory devices first, then ports.
    pub fn state_size(&self) -> usize {
        self.devices
            .iter()
            .map(|m| m.device.state_size())
            .chain(self.ports.iter().map(|m| m.device.state_size()))
            .sum()
    }

    pub fn save_state(&self, out: &mut dyn Write) -> io::Result<()> {
        for m in &self.devices {
            m.device.save_state(out)?;
        }
        for m in &self.ports {
            m.device.save_state(out)?;
        }
        Ok(())
    }

    pub fn load_state(&mut self, input: &mut dyn Read) -> io::Result<()> {
        for m in &mut self.devices {
            m.device.load_state(input)?;
        }
        for m in &mut self.ports {
            m.device.load_state(input)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-value device that records the last write.
    struct Probe {
        range: AddressRange,
        value: u8,
        last_write: Option<(u32, u8)>,
    }

    impl Probe {
        fn new(from: u32, to: u32, value: u8) -> Self {
            Self {
                range: AddressRange { from, to },
                value,
                last_write: None,
            }
        }
    }

    impl Device for Probe {
        fn range(&self) -> AddressRange {
            self.range
        }
        fn read8(&mut self, _offset: u32) -> u8 {
            self.value
        }
        fn write8(&mut self, offset: u32, value: u8) {
            self.last_write = Some((offset, value));
        }
    }

    #[test]
    fn address_range_rejects_inverted() {
        assert_eq!(
            AddressRange::new(0x10, 0x0F),
            Err(ConfigError::InvalidRange { from: 0x10, to: 0x0F })
        );
        let r = AddressRange::new(0x10, 0x1F).unwrap();
        assert_eq!(r.size(), 16);
        assert!(r.contains(0x10) && r.contains(0x1F));
        assert!(!r.contains(0x20));
    }

    #[test]
    fn address_range_with_len_overflow() {
        assert!(AddressRange::with_len(0xFFFF_FFFF, 2).is_err());
        assert_eq!(
            AddressRange::with_len(0xFFFF_FFFF, 1).unwrap(),
            AddressRange {
                from: 0xFFFF_FFFF,
                to: 0xFFFF_FFFF
            }
        );
        assert_eq!(
            AddressRange::with_len(0, 0),
            Err(ConfigError::ZeroCapacity)
        );
    }

    #[test]
    fn overlaps_is_symmetric() {
        let a = AddressRange { from: 0, to: 0x0F };
        let b = AddressRange { from: 0x0F, to: 0x1F };
        let c = AddressRange { from: 0x10, to: 0x1F };
        assert!(a.overlaps(&b) && b.overlaps(&a));
        assert!(!a.overlaps(&c) && !c.overlaps(&a));
    }

    #[test]
    fn new_rejects_bad_capacity() {
        assert!(matches!(Bus::new(0), Err(ConfigError::ZeroCapacity)));
        assert!(matches!(
            Bus::new(u32::MAX as u64 + 2),
            Err(ConfigError::CapacityTooLarge(_))
        ));
        assert_eq!(Bus::new(u32::MAX as u64 + 1).unwrap().max_address(), u32::MAX);
    }

    #[test]
    fn device_receives_offsets() {
        let mut bus = Bus::new(0x1_0000).unwrap();
        let id = bus.attach(Probe::new(0x4000, 0x40FF, 0x11)).unwrap();
        bus.write8(0x4010, 0x99);
        assert_eq!(bus.device::<Probe>(id).unwrap().last_write, Some((0x10, 0x99)));
    }

    #[test]
    fn downcast_to_wrong_type_is_none() {
        struct Other;
        impl Device for Other {
            fn range(&self) -> AddressRange {
                AddressRange { from: 0, to: 0 }
            }
            fn read8(&mut self, _offset: u32) -> u8 {
                0
            }
            fn write8(&mut self, _offset: u32, _value: u8) {}
        }

        let mut bus = Bus::new(0x100).unwrap();
        let id = bus.attach(Probe::new(0, 0xFF, 0)).unwrap();
        assert!(bus.device_mut::<Other>(id).is_none());
        assert!(bus.device_mut::<Probe>(id).is_some());
    }

    #[test]
    fn unmapped_port_floats() {
        let mut bus = Bus::new(0x100).unwrap();
        assert_eq!(bus.read_port(0x10), OPEN_BUS);
        bus.write_port(0x10, 0x42);
    }
}
