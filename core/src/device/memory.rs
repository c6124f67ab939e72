use std::io::{self, Read, Write};

use crate::core::bus::{AddressRange, Device};
use crate::error::ConfigError;

/// Plain byte-addressable memory: RAM or ROM.
///
/// RAM contents are part of the save state. ROM contents come from the
/// loaded image and are not serialized; writes to ROM are ignored, which
/// matches a mask ROM with its write strobe unconnected.
pub struct Memory {
    range: AddressRange,
    data: Box<[u8]>,
    writable: bool,
}

impl Memory {
    /// Zeroed RAM of `size` bytes mapped at `base`.
    pub fn ram(base: u32, size: u32) -> Result<Self, ConfigError> {
        let range = AddressRange::with_len(base, size)?;
        Ok(Self {
            range,
            data: vec![0; size as usize].into_boxed_slice(),
            writable: true,
        })
    }

    /// ROM of `size` bytes mapped at `base`, filled with `0xFF` (erased
    /// EPROM) until an image is loaded.
    pub fn rom(base: u32, size: u32) -> Result<Self, ConfigError> {
        let range = AddressRange::with_len(base, size)?;
        Ok(Self {
            range,
            data: vec![0xFF; size as usize].into_boxed_slice(),
            writable: false,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy `src` in at `offset`, bypassing the write-protect.
    ///
    /// Bytes that would land past the end are dropped. Returns the number
    /// of bytes copied.
    pub fn load_from(&mut self, offset: usize, src: &[u8]) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let len = src.len().min(self.data.len() - offset);
        self.data[offset..offset + len].copy_from_slice(&src[..len]);
        len
    }

    /// Fill the whole memory with `value`.
    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Device for Memory {
    fn range(&self) -> AddressRange {
        self.range
    }

    fn read8(&mut self, offset: u32) -> u8 {
        self.data[offset as usize]
    }

    fn write8(&mut self, offset: u32, value: u8) {
        if self.writable {
            self.data[offset as usize] = value;
        }
    }

    fn state_size(&self) -> usize {
        if self.writable { self.data.len() } else { 0 }
    }

    fn save_state(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.writable {
            out.write_all(&self.data)?;
        }
        Ok(())
    }

    fn load_state(&mut self, input: &mut dyn Read) -> io::Result<()> {
        if self.writable {
            input.read_exact(&mut self.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_is_zeroed() {
        let ram = Memory::ram(0, 1024).unwrap();
        assert!(ram.as_slice().iter().all(|&b| b == 0));
        assert_eq!(ram.range(), AddressRange { from: 0, to: 0x3FF });
    }

    #[test]
    fn rom_starts_erased_and_ignores_writes() {
        let mut rom = Memory::rom(0x8000, 16).unwrap();
        assert_eq!(rom.read8(0), 0xFF);
        rom.write8(0, 0x12);
        assert_eq!(rom.read8(0), 0xFF);
        rom.load_from(0, &[0x12, 0x34]);
        assert_eq!(rom.read8(1), 0x34);
    }

    #[test]
    fn zero_sized_memory_is_rejected() {
        assert!(matches!(Memory::ram(0, 0), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn load_from_short_slice() {
        let mut ram = Memory::ram(0, 1024).unwrap();
        ram.write8(512, 0xFF);
        let copied = ram.load_from(0, &[0xBB; 512]);
        assert_eq!(copied, 512);
        assert_eq!(ram.read8(0), 0xBB);
        assert_eq!(ram.read8(511), 0xBB);
        assert_eq!(ram.read8(512), 0xFF);
    }

    #[test]
    fn load_from_truncates_at_end() {
        let mut ram = Memory::ram(0, 8).unwrap();
        assert_eq!(ram.load_from(6, &[1, 2, 3, 4]), 2);
        assert_eq!(&ram.as_slice()[6..], &[1, 2]);
        assert_eq!(ram.load_from(8, &[1]), 0);
    }

    #[test]
    fn ram_state_roundtrip() {
        let mut ram1 = Memory::ram(0, 256).unwrap();
        ram1.write8(0, 0x11);
        ram1.write8(0xFF, 0x33);

        let mut saved = Vec::new();
        ram1.save_state(&mut saved).unwrap();
        assert_eq!(saved.len(), ram1.state_size());

        let mut ram2 = Memory::ram(0, 256).unwrap();
        ram2.load_state(&mut saved.as_slice()).unwrap();
        assert_eq!(ram2.as_slice(), ram1.as_slice());
    }

    #[test]
    fn rom_is_not_part_of_state() {
        let rom = Memory::rom(0, 256).unwrap();
        assert_eq!(rom.state_size(), 0);
        let mut saved = Vec::new();
        rom.save_state(&mut saved).unwrap();
        assert!(saved.is_empty());
    }
}
