use cyclehost_core::core::{AddressRange, Bus, Device, OPEN_BUS, PortDevice};
use cyclehost_core::device::Memory;
use cyclehost_core::error::ConfigError;

/// Register block that answers every read with a fixed value.
struct Fixed {
    range: AddressRange,
    value: u8,
}

impl Fixed {
    fn new(from: u32, to: u32, value: u8) -> Self {
        Self {
            range: AddressRange::new(from, to).unwrap(),
            value,
        }
    }
}

impl Device for Fixed {
    fn range(&self) -> AddressRange {
        self.range
    }
    fn read8(&mut self, _offset: u32) -> u8 {
        self.value
    }
    fn write8(&mut self, _offset: u32, _value: u8) {}
}

/// Port latch: reads back the last value written plus its offset.
struct Latch {
    ports: AddressRange,
    value: u8,
}

impl PortDevice for Latch {
    fn ports(&self) -> AddressRange {
        self.ports
    }
    fn read_port(&mut self, offset: u16) -> u8 {
        self.value.wrapping_add(offset as u8)
    }
    fn write_port(&mut self, _offset: u16, value: u8) {
        self.value = value;
    }
    fn state_size(&self) -> usize {
        1
    }
    fn save_state(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        out.write_all(&[self.value])
    }
    fn load_state(&mut self, input: &mut dyn std::io::Read) -> std::io::Result<()> {
        let mut b = [0u8; 1];
        input.read_exact(&mut b)?;
        self.value = b[0];
        Ok(())
    }
}

// ==========================================================================
// Decoding
// ==========================================================================

#[test]
fn test_unclaimed_and_out_of_range_reads_float() {
    let mut bus = Bus::new(64 * 1024).unwrap();
    bus.attach(Fixed::new(0xC000, 0xC0FF, 0x42)).unwrap();

    assert_eq!(bus.read8(0xC000), 0x42);
    assert_eq!(bus.read8(0xC0FF), 0x42);
    assert_eq!(bus.read8(0xC100), OPEN_BUS);
    assert_eq!(bus.read8(0x0000), OPEN_BUS);
    assert_eq!(bus.read8(0x1_0000), OPEN_BUS);
    assert_eq!(bus.read8(u32::MAX), OPEN_BUS);
}

#[test]
fn test_write_reaches_mapped_ram_device() {
    let mut bus = Bus::new(64 * 1024).unwrap();
    let id = bus.attach(Memory::ram(0xC000, 0x100).unwrap()).unwrap();

    bus.write8(0xC000, 0x42);
    assert_eq!(bus.read8(0xC000), 0x42);
    assert_eq!(bus.read8(0xC100), OPEN_BUS);
    assert_eq!(bus.device::<Memory>(id).unwrap().as_slice()[0], 0x42);
}

#[test]
fn test_main_memory_backs_unclaimed_addresses() {
    let mut bus = Bus::with_main_memory(Memory::ram(0, 0x10000).unwrap()).unwrap();
    assert_eq!(bus.max_address(), 0xFFFF);
    bus.attach(Fixed::new(0xC000, 0xC0FF, 0x42)).unwrap();

    bus.write8(0xC100, 0x99);
    assert_eq!(bus.read8(0xC100), 0x99);
    assert_eq!(bus.read8(0xC000), 0x42);
    assert_eq!(bus.read8(0x1_0000), OPEN_BUS);
}

#[test]
fn test_most_recent_overlapping_device_wins() {
    let mut bus = Bus::new(0x10000).unwrap();
    bus.attach(Fixed::new(0x1000, 0x1FFF, 0x11)).unwrap();
    bus.attach(Fixed::new(0x1800, 0x18FF, 0x22)).unwrap();

    assert_eq!(bus.read8(0x1000), 0x11);
    assert_eq!(bus.read8(0x1800), 0x22);
    assert_eq!(bus.read8(0x18FF), 0x22);
    assert_eq!(bus.read8(0x1900), 0x11);
    assert_eq!(bus.device_count(), 2);
}

#[test]
fn test_writes_to_unclaimed_space_are_dropped() {
    let mut bus = Bus::new(0x100).unwrap();
    bus.write8(0x10, 0x55);
    bus.write8(0x1000, 0x55);
    assert_eq!(bus.read8(0x10), OPEN_BUS);
}

#[test]
fn test_rom_ignores_writes() {
    let mut bus = Bus::new(0x10000).unwrap();
    let mut rom = Memory::rom(0xF000, 0x1000).unwrap();
    rom.load_from(0, &[0x12, 0x34]);
    bus.attach(rom).unwrap();

    bus.write8(0xF000, 0xEE);
    assert_eq!(bus.read8(0xF000), 0x12);
    assert_eq!(bus.read8(0xF002), 0xFF);
}

// ==========================================================================
// Configuration errors
// ==========================================================================

#[test]
fn test_attach_past_capacity_fails() {
    let mut bus = Bus::new(0x1000).unwrap();
    let err = bus.attach(Fixed::new(0x0F00, 0x10FF, 0)).unwrap_err();
    assert_eq!(
        err,
        ConfigError::CapacityExceeded {
            from: 0x0F00,
            to: 0x10FF,
            max: 0x0FFF
        }
    );
    assert_eq!(bus.device_count(), 0);
}

#[test]
fn test_attach_inverted_range_fails() {
    let mut bus = Bus::new(0x1000).unwrap();
    let bad = Fixed {
        range: AddressRange {
            from: 0x200,
            to: 0x100,
        },
        value: 0,
    };
    assert_eq!(
        bus.attach(bad).unwrap_err(),
        ConfigError::InvalidRange {
            from: 0x200,
            to: 0x100
        }
    );
}

#[test]
fn test_full_32_bit_space_is_allowed() {
    let mut bus = Bus::new(1 << 32).unwrap();
    assert_eq!(bus.max_address(), u32::MAX);
    bus.attach(Fixed::new(0xFFFF_FF00, 0xFFFF_FFFF, 0x7E)).unwrap();
    assert_eq!(bus.read8(u32::MAX), 0x7E);
    assert!(matches!(
        Bus::new((1 << 32) + 1),
        Err(ConfigError::CapacityTooLarge(_))
    ));
}

// ==========================================================================
// Multi-byte helpers
// ==========================================================================

#[test]
fn test_multi_byte_endianness() {
    let mut bus = Bus::with_main_memory(Memory::ram(0, 0x100).unwrap()).unwrap();

    bus.write32_be(0x10, 0x1122_3344);
    assert_eq!(
        [bus.read8(0x10), bus.read8(0x11), bus.read8(0x12), bus.read8(0x13)],
        [0x11, 0x22, 0x33, 0x44]
    );
    assert_eq!(bus.read32_le(0x10), 0x4433_2211);
    assert_eq!(bus.read16_be(0x11), 0x2233);
    assert_eq!(bus.read16_le(0x11), 0x3322);
    assert_eq!(bus.read24_be(0x10), 0x11_2233);
    assert_eq!(bus.read24_le(0x10), 0x33_2211);

    bus.write24_le(0x20, 0xAABBCC);
    assert_eq!(bus.read24_be(0x20), 0xCCBBAA);
    bus.write16_le(0x30, 0xBEEF);
    assert_eq!(bus.read16_be(0x30), 0xEFBE);
    bus.write32_le(0x40, 0xDEAD_BEEF);
    assert_eq!(bus.read32_be(0x40), 0xEFBE_ADDE);
    bus.write16_be(0x50, 0x1234);
    bus.write24_be(0x60, 0x123456);
    assert_eq!(bus.read16_le(0x50), 0x3412);
    assert_eq!(bus.read24_le(0x60), 0x563412);
}

#[test]
fn test_multi_byte_read_straddling_max_address() {
    let mut bus = Bus::with_main_memory(Memory::ram(0, 0x100).unwrap()).unwrap();
    bus.write8(0xFF, 0x12);
    // High byte comes from past the end of the space.
    assert_eq!(bus.read16_be(0xFF), 0x12FF);
}

// ==========================================================================
// Ports
// ==========================================================================

#[test]
fn test_ports_decode_with_offsets() {
    let mut bus = Bus::new(0x100).unwrap();
    bus.attach_port(Latch {
        ports: AddressRange::new(0x40, 0x43).unwrap(),
        value: 0,
    })
    .unwrap();

    bus.write_port(0x41, 0x10);
    assert_eq!(bus.read_port(0x40), 0x10);
    assert_eq!(bus.read_port(0x43), 0x13);
    assert_eq!(bus.read_port(0x44), OPEN_BUS);
}

#[test]
fn test_port_range_beyond_16_bits_fails() {
    let mut bus = Bus::new(0x100).unwrap();
    let err = bus
        .attach_port(Latch {
            ports: AddressRange::new(0xFFF0, 0x1_0000).unwrap(),
            value: 0,
        })
        .unwrap_err();
    assert!(matches!(err, ConfigError::CapacityExceeded { .. }));
}

// ==========================================================================
// State
// ==========================================================================

#[test]
fn test_state_round_trip_covers_memory_and_ports() {
    fn build() -> Bus {
        let mut bus = Bus::new(0x10000).unwrap();
        bus.attach(Memory::ram(0x0000, 0x100).unwrap()).unwrap();
        bus.attach(Memory::rom(0xF000, 0x100).unwrap()).unwrap();
        bus.attach(Memory::ram(0x8000, 0x10).unwrap()).unwrap();
        bus.attach_port(Latch {
            ports: AddressRange::new(0, 0).unwrap(),
            value: 0,
        })
        .unwrap();
        bus
    }

    let mut bus = build();
    // RAM + RAM + latch; ROM contributes nothing.
    assert_eq!(bus.state_size(), 0x100 + 0x10 + 1);
    bus.write8(0x0001, 0xA1);
    bus.write8(0x800F, 0xB2);
    bus.write_port(0, 0xC3);

    let mut saved = Vec::new();
    bus.save_state(&mut saved).unwrap();
    assert_eq!(saved.len(), bus.state_size());

    let mut restored = build();
    restored.load_state(&mut saved.as_slice()).unwrap();
    assert_eq!(restored.read8(0x0001), 0xA1);
    assert_eq!(restored.read8(0x800F), 0xB2);
    assert_eq!(restored.read_port(0), 0xC3);
}

#[test]
fn test_truncated_state_is_an_error() {
    let mut bus = Bus::new(0x100).unwrap();
    bus.attach(Memory::ram(0, 0x100).unwrap()).unwrap();
    let short = vec![0u8; 10];
    assert!(bus.load_state(&mut short.as_slice()).is_err());
}
