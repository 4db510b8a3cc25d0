use serde::{Deserialize, Serialize};
use trace_model::{Allocation, MemoryContext};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("allocation {new} overlaps existing allocation {existing}")]
    Overlapping {
        new: Allocation,
        existing: Allocation,
    },
    #[error("empty allocation at {base:#x}")]
    Empty { base: u64 },
}

/// Table of non-overlapping allocations indexed by address range.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Allocations(rangemap::RangeMap<u64, Allocation>);

impl std::ops::Deref for Allocations {
    type Target = rangemap::RangeMap<u64, Allocation>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Allocations {
    pub fn insert(&mut self, allocation: Allocation) -> Result<(), Error> {
        if allocation.size == 0 {
            return Err(Error::Empty {
                base: allocation.base,
            });
        }
        let range = allocation.base..allocation.end();
        if let Some((_, existing)) = self.0.overlapping(&range).next() {
            return Err(Error::Overlapping {
                new: allocation,
                existing: *existing,
            });
        }
        self.0.insert(range, allocation);
        Ok(())
    }

    /// Allocation containing `addr`.
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<Allocation> {
        self.0.get(&addr).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().next().is_none()
    }

    /// Total size of all allocations in bytes.
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        self.0.iter().map(|(_, allocation)| allocation.size).sum()
    }
}

impl Allocations {
    pub fn try_from_iter(iter: impl IntoIterator<Item = Allocation>) -> Result<Self, Error> {
        let mut allocations = Self::default();
        for allocation in iter {
            allocations.insert(allocation)?;
        }
        Ok(allocations)
    }
}

/// Allocation tables of one device context.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct DeviceMemory {
    /// Module-scope global variables.
    pub global: Allocations,
    /// Runtime allocations of the selected device.
    pub generic: Allocations,
}

/// Serialized form of the allocation tables of a device context.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationTables {
    pub global: Vec<Allocation>,
    pub generic: Vec<Allocation>,
}

impl TryFrom<AllocationTables> for DeviceMemory {
    type Error = Error;

    fn try_from(tables: AllocationTables) -> Result<Self, Self::Error> {
        Ok(Self {
            global: Allocations::try_from_iter(tables.global)?,
            generic: Allocations::try_from_iter(tables.generic)?,
        })
    }
}

impl MemoryContext for DeviceMemory {
    fn global_allocation(&self, addr: u64) -> Option<Allocation> {
        self.global.find(addr)
    }

    fn allocation(&self, addr: u64) -> Option<Allocation> {
        self.generic.find(addr)
    }
}
