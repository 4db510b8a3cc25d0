//! Data model shared between the emulator and the trace generators.

pub mod active_mask;
pub mod allocation;
pub mod dim;
pub mod event;
pub mod kernel;

pub use active_mask::{ActiveMask, ToBitString};
pub use allocation::{Allocation, MemoryContext};
pub use dim::Dim;
pub use event::{AddressSpace, Opcode, TraceEvent};
pub use kernel::{ExecutableKernel, ParamType, Parameter};

/// Number of threads in a warp.
pub const WARP_SIZE: u32 = 32;
