use serde::{Deserialize, Serialize};
use trace_model::{AddressSpace, Dim};

/// Format tag of memory traces.
pub const FORMAT: &str = "memory";

/// Summary statistics of the memory traffic of one kernel launch.
///
/// The header is a deterministic function of the sequence of trace events
/// observed since the last initialization of the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub format: String,

    pub block_dim: Dim,
    /// Maximum number of threads per block.
    pub thread_count: u32,
    pub half_warp_size: u32,

    pub dynamic_instructions: u64,
    /// Sum of active threads over all dynamic instructions.
    pub dynamic_operations: u64,

    pub const_accesses: u64,
    pub global_accesses: u64,
    pub local_accesses: u64,
    pub param_accesses: u64,
    pub shared_accesses: u64,
    pub texture_accesses: u64,

    /// Smallest global or texture address observed.
    pub global_min_address: u64,
    /// Largest global or texture address observed.
    pub global_max_address: u64,

    pub global_instructions: u64,
    pub texture_instructions: u64,

    pub global_bytes: u64,
    pub shared_bytes: u64,
    pub texture_bytes: u64,

    pub global_words: u64,
    pub texture_words: u64,

    /// Total size of the allocations reachable from the kernel parameters.
    pub global_extent: u64,

    /// Estimated number of memory transactions.
    pub global_segments: u64,
    /// Number of half-warp boundaries crossed by memory instructions.
    pub halfwarps: u64,

    /// Events were not recorded.
    pub header_only: bool,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            format: FORMAT.to_string(),
            block_dim: Dim::ZERO,
            thread_count: 0,
            half_warp_size: 0,
            dynamic_instructions: 0,
            dynamic_operations: 0,
            const_accesses: 0,
            global_accesses: 0,
            local_accesses: 0,
            param_accesses: 0,
            shared_accesses: 0,
            texture_accesses: 0,
            global_min_address: 0,
            global_max_address: 0,
            global_instructions: 0,
            texture_instructions: 0,
            global_bytes: 0,
            shared_bytes: 0,
            texture_bytes: 0,
            global_words: 0,
            texture_words: 0,
            global_extent: 0,
            global_segments: 0,
            halfwarps: 0,
            header_only: false,
        }
    }
}

impl Header {
    /// Accounts one memory instruction accessing `bytes` bytes in `space`.
    pub fn access(&mut self, space: AddressSpace, bytes: u64) {
        match space {
            AddressSpace::Const => self.const_accesses += 1,
            AddressSpace::Global => {
                self.global_accesses += 1;
                self.global_bytes += bytes;
                self.global_instructions += 1;
            }
            AddressSpace::Local => self.local_accesses += 1,
            AddressSpace::Param => self.param_accesses += 1,
            AddressSpace::Shared => {
                self.shared_accesses += 1;
                self.shared_bytes += bytes;
            }
            AddressSpace::Texture => {
                self.texture_accesses += 1;
                self.texture_bytes += bytes;
                self.texture_instructions += 1;
            }
            AddressSpace::Generic => {}
        }
    }

    /// Accounts one address accessed by a single thread.
    pub fn address(&mut self, space: AddressSpace, addr: u64) {
        match space {
            AddressSpace::Global => {
                self.track_extrema(addr);
                self.global_words += 1;
            }
            AddressSpace::Texture => {
                self.track_extrema(addr);
                self.texture_words += 1;
            }
            AddressSpace::Const
            | AddressSpace::Local
            | AddressSpace::Param
            | AddressSpace::Shared
            | AddressSpace::Generic => {}
        }
    }

    /// Number of global and texture addresses observed so far.
    #[must_use]
    pub fn words(&self) -> u64 {
        self.global_words + self.texture_words
    }

    /// Range of global and texture addresses observed, if any.
    #[must_use]
    pub fn address_range(&self) -> Option<std::ops::RangeInclusive<u64>> {
        (self.words() > 0).then(|| self.global_min_address..=self.global_max_address)
    }

    fn track_extrema(&mut self, addr: u64) {
        // word counters are incremented after tracking
        if self.words() == 0 {
            self.global_min_address = addr;
            self.global_max_address = addr;
            return;
        }
        self.global_min_address = self.global_min_address.min(addr);
        self.global_max_address = self.global_max_address.max(addr);
    }
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("instructions", &self.dynamic_instructions)
            .field("global_accesses", &self.global_accesses)
            .field("texture_accesses", &self.texture_accesses)
            .field("shared_accesses", &self.shared_accesses)
            .field("segments", &self.global_segments)
            .field("halfwarps", &self.halfwarps)
            .field("extent", &self.global_extent)
            .finish_non_exhaustive()
    }
}
