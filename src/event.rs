use serde::{Deserialize, Serialize};
use trace_model::{AddressSpace, Dim, Opcode, TraceEvent};

/// Number of components fetched per thread by a texture instruction.
pub const TEXTURE_COMPONENTS: usize = 4;

/// Memory access of a single thread.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub address: u64,
    /// Size of the access in bytes.
    pub size: u32,
    pub thread_id: u32,
}

/// Detailed record of one load, store or texture instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub pc: u64,
    pub opcode: Opcode,
    pub address_space: AddressSpace,
    pub block_id: Dim,
    pub accesses: Vec<Access>,
}

impl Event {
    #[must_use]
    pub fn new(trace_event: &TraceEvent, address_space: AddressSpace) -> Self {
        Self {
            pc: trace_event.pc,
            opcode: trace_event.opcode,
            address_space,
            block_id: trace_event.block_id.clone(),
            accesses: Vec::with_capacity(trace_event.memory_addresses.len()),
        }
    }

    /// Records `access` `replicas` times.
    pub fn push(&mut self, access: Access, replicas: usize) {
        self.accesses.extend(std::iter::repeat_n(access, replicas));
    }

    /// Total number of bytes accessed.
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        self.accesses.iter().map(|access| u64::from(access.size)).sum()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#06x} {}[{}] block {} accesses={}",
            self.pc,
            self.opcode,
            self.address_space,
            self.block_id,
            self.accesses.len(),
        )?;
        if let (Some(first), Some(last)) = (self.accesses.first(), self.accesses.last()) {
            write!(f, " [{:#x}..{:#x}]", first.address, last.address)?;
        }
        Ok(())
    }
}
