use serde::{Deserialize, Serialize};

/// Basic block profiling mode.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProfilingMode {
    /// Number of times each basic block executed.
    ExecutionCount,
    /// Number of dynamic instructions per basic block.
    InstructionCount,
    /// Executions and memory operations per basic block.
    MemoryIntensity,
}

/// Counter injection strategy for one profiling mode.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum BasicBlockPass {
    ExecutionCount,
    InstructionCount,
    MemoryIntensity,
}

impl BasicBlockPass {
    #[must_use]
    pub fn for_mode(mode: ProfilingMode) -> Self {
        match mode {
            ProfilingMode::ExecutionCount => Self::ExecutionCount,
            ProfilingMode::InstructionCount => Self::InstructionCount,
            ProfilingMode::MemoryIntensity => Self::MemoryIntensity,
        }
    }

    #[must_use]
    pub fn mode(self) -> ProfilingMode {
        match self {
            Self::ExecutionCount => ProfilingMode::ExecutionCount,
            Self::InstructionCount => ProfilingMode::InstructionCount,
            Self::MemoryIntensity => ProfilingMode::MemoryIntensity,
        }
    }

    /// Number of counter slots per basic block and thread.
    #[must_use]
    pub fn entries(self) -> usize {
        match self {
            Self::ExecutionCount | Self::InstructionCount => 1,
            Self::MemoryIntensity => 2,
        }
    }

    /// Device symbol holding the base address of the counter buffer.
    #[must_use]
    pub fn counter_symbol(self) -> &'static str {
        match self {
            Self::ExecutionCount => "__basicBlockExecutionCountBase",
            Self::InstructionCount => "__dynamicInstructionCountBase",
            Self::MemoryIntensity => "__memoryIntensityBase",
        }
    }

    /// Whether the second slot counts memory operations.
    #[must_use]
    pub fn records_memory_operations(self) -> bool {
        self == Self::MemoryIntensity
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ExecutionCount => "Basic Block Execution Count Per Thread",
            Self::InstructionCount => "Dynamic Instruction Count Per Basic Block",
            Self::MemoryIntensity => "Memory Operations Per Basic Block",
        }
    }
}

impl std::fmt::Display for BasicBlockPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}
