use serde::{Deserialize, Serialize};

/// A device memory allocation.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Allocation {
    /// Base device pointer of the allocation.
    pub base: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl Allocation {
    #[must_use]
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// First address past the end of the allocation.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        (self.base..self.end()).contains(&addr)
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_precision_loss)]
        let size = human_bytes::human_bytes(self.size as f64);
        f.debug_struct("Allocation")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &size)
            .finish()
    }
}

/// Resolves device addresses to the allocations containing them.
///
/// Implemented by the device memory tables of the emulator.
pub trait MemoryContext {
    /// Module-scope global variable containing `addr`.
    fn global_allocation(&self, addr: u64) -> Option<Allocation>;

    /// Runtime allocation on the selected device containing `addr`.
    fn allocation(&self, addr: u64) -> Option<Allocation>;
}

impl<M> MemoryContext for &M
where
    M: MemoryContext + ?Sized,
{
    fn global_allocation(&self, addr: u64) -> Option<Allocation> {
        (**self).global_allocation(addr)
    }

    fn allocation(&self, addr: u64) -> Option<Allocation> {
        (**self).allocation(addr)
    }
}
