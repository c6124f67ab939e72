pub mod bus;
pub mod machine;

pub use bus::{AddressRange, Bus, Device, DeviceId, OPEN_BUS, PortDevice, PortId};
pub use machine::{AudioSource, MachineHost, Snapshotter, VideoSource};
