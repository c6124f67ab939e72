pub mod registry;
pub mod sandbox;
pub mod trace;

pub use sandbox::SandboxMachine;
pub use trace::{TraceDebugger, TraceLog};
