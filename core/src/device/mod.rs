pub mod memory;

pub use memory::Memory;
