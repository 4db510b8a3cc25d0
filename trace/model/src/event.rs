use super::{ActiveMask, Dim};
use serde::{Deserialize, Serialize};

/// Memory domain of an instruction's memory operand.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddressSpace {
    Const,
    Global,
    Local,
    Param,
    Shared,
    Texture,
    /// Unqualified (generic) address.
    Generic,
}

/// PTX instruction opcode.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Abs,
    Add,
    And,
    Atom,
    Bar,
    Bra,
    Call,
    Cvt,
    Div,
    Exit,
    Fma,
    Ld,
    Mad,
    Max,
    Min,
    Mov,
    Mul,
    Neg,
    Not,
    Or,
    Red,
    Rem,
    Ret,
    Selp,
    Setp,
    Shl,
    Shr,
    St,
    Sub,
    Tex,
    Xor,
}

impl Opcode {
    #[must_use]
    pub fn is_load_store(self) -> bool {
        matches!(self, Self::Ld | Self::St)
    }

    #[must_use]
    pub fn is_texture(self) -> bool {
        self == Self::Tex
    }

    /// Whether the instruction accesses memory.
    #[must_use]
    pub fn is_memory(self) -> bool {
        matches!(self, Self::Ld | Self::St | Self::Tex | Self::Atom | Self::Red)
    }
}

/// One dynamic instruction executed by the emulator.
///
/// Memory addresses and sizes are compacted: the i-th entry belongs to the
/// i-th active thread of the block in thread order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Program counter of the instruction.
    pub pc: u64,
    pub opcode: Opcode,
    pub address_space: AddressSpace,
    /// Coordinates of the executing thread block.
    pub block_id: Dim,
    pub active: ActiveMask,
    pub memory_addresses: Vec<u64>,
    pub memory_sizes: Vec<u32>,
}

impl TraceEvent {
    #[must_use]
    pub fn new(
        pc: u64,
        opcode: Opcode,
        address_space: AddressSpace,
        block_id: Dim,
        active: ActiveMask,
    ) -> Self {
        Self {
            pc,
            opcode,
            address_space,
            block_id,
            active,
            memory_addresses: Vec::new(),
            memory_sizes: Vec::new(),
        }
    }

    /// Appends the access of the next active thread.
    pub fn push_access(&mut self, addr: u64, size: u32) {
        self.memory_addresses.push(addr);
        self.memory_sizes.push(size);
    }

    #[must_use]
    pub fn with_accesses(mut self, accesses: impl IntoIterator<Item = (u64, u32)>) -> Self {
        for (addr, size) in accesses {
            self.push_access(addr, size);
        }
        self
    }

    /// `(address, size)` pairs in thread order.
    pub fn accesses(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.memory_addresses
            .iter()
            .copied()
            .zip(self.memory_sizes.iter().copied())
    }
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#06x} {}[{}] block {} ({} active)",
            self.pc,
            self.opcode,
            self.address_space,
            self.block_id,
            self.active.count()
        )
    }
}
