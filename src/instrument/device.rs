use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Guaranteed alignment of device allocations.
pub const ALIGNMENT_BYTES: u64 = 256;

/// Base address of the emulated device heap.
pub const HEAP_BASE: u64 = 0xC000_0000;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DevicePtr(pub u64);

impl std::fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("invalid device pointer {0}")]
    InvalidPointer(DevicePtr),

    #[error("unknown device symbol {0:?}")]
    UnknownSymbol(String),

    #[error("access of {len} bytes at offset {offset} exceeds allocation {ptr} of {size} bytes")]
    OutOfBounds {
        ptr: DevicePtr,
        offset: u64,
        len: u64,
        size: u64,
    },
}

/// Runtime interface of the device executing instrumented kernels.
pub trait Device {
    fn malloc(&self, num_bytes: u64) -> Result<DevicePtr, Error>;

    fn memset(&self, ptr: DevicePtr, value: u8, num_bytes: u64) -> Result<(), Error>;

    /// Copies `data` into the device symbol `symbol`.
    fn copy_to_symbol(&self, symbol: &str, data: &[u8]) -> Result<(), Error>;

    /// Fills `dest` with the device memory starting at `ptr`.
    fn copy_to_host(&self, ptr: DevicePtr, dest: &mut [u8]) -> Result<(), Error>;

    fn free(&self, ptr: DevicePtr) -> Result<(), Error>;
}

impl<D> Device for &D
where
    D: Device + ?Sized,
{
    fn malloc(&self, num_bytes: u64) -> Result<DevicePtr, Error> {
        (**self).malloc(num_bytes)
    }

    fn memset(&self, ptr: DevicePtr, value: u8, num_bytes: u64) -> Result<(), Error> {
        (**self).memset(ptr, value, num_bytes)
    }

    fn copy_to_symbol(&self, symbol: &str, data: &[u8]) -> Result<(), Error> {
        (**self).copy_to_symbol(symbol, data)
    }

    fn copy_to_host(&self, ptr: DevicePtr, dest: &mut [u8]) -> Result<(), Error> {
        (**self).copy_to_host(ptr, dest)
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), Error> {
        (**self).free(ptr)
    }
}

#[derive(Debug, Default)]
struct Memory {
    offset: u64,
    used: u64,
    allocations: BTreeMap<u64, Vec<u8>>,
    symbols: HashMap<String, Vec<u8>>,
}

impl Memory {
    /// Allocation containing `addr` and the offset of `addr` into it.
    fn resolve(&mut self, ptr: DevicePtr) -> Result<(&mut Vec<u8>, u64), Error> {
        let (base, data) = self
            .allocations
            .range_mut(..=ptr.0)
            .next_back()
            .ok_or(Error::InvalidPointer(ptr))?;
        let offset = ptr.0 - *base;
        if offset > data.len() as u64 || (offset == data.len() as u64 && !data.is_empty()) {
            return Err(Error::InvalidPointer(ptr));
        }
        Ok((data, offset))
    }
}

fn checked_range(
    ptr: DevicePtr,
    offset: u64,
    len: u64,
    size: usize,
) -> Result<std::ops::Range<usize>, Error> {
    let size = size as u64;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(Error::OutOfBounds {
            ptr,
            offset,
            len,
            size,
        }),
    }
}

/// In-process device memory.
///
/// Allocations are bump allocated from [`HEAP_BASE`] and never reused.
/// Symbols must be declared before they can be written.
#[derive(Debug)]
pub struct EmulatedDevice {
    capacity: u64,
    memory: Mutex<Memory>,
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::with_capacity(u64::MAX)
    }
}

impl EmulatedDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Device with `capacity` bytes of memory.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            memory: Mutex::new(Memory::default()),
        }
    }

    /// Declares the zero-initialized symbol `name` of `size` bytes.
    pub fn declare_symbol(&self, name: impl Into<String>, size: usize) {
        self.memory.lock().symbols.insert(name.into(), vec![0; size]);
    }

    /// Current value of symbol `name`.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<Vec<u8>> {
        self.memory.lock().symbols.get(name).cloned()
    }

    /// Adds `delta` to the `index`-th 64 bit counter of the allocation at `ptr`.
    ///
    /// This is the update performed by instrumented code.
    pub fn increment(&self, ptr: DevicePtr, index: usize, delta: u64) -> Result<(), Error> {
        const WORD: u64 = std::mem::size_of::<u64>() as u64;
        let mut memory = self.memory.lock();
        let (data, offset) = memory.resolve(ptr)?;
        let range = checked_range(ptr, offset + index as u64 * WORD, WORD, data.len())?;
        let word = &mut data[range];
        let mut value = [0; 8];
        value.copy_from_slice(word);
        let value = u64::from_le_bytes(value).wrapping_add(delta);
        word.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Number of live allocations.
    #[must_use]
    pub fn num_allocations(&self) -> usize {
        self.memory.lock().allocations.len()
    }

    /// Number of allocated bytes.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.memory.lock().used
    }
}

impl Device for EmulatedDevice {
    fn malloc(&self, num_bytes: u64) -> Result<DevicePtr, Error> {
        let mut memory = self.memory.lock();
        let available = self.capacity.saturating_sub(memory.used);
        let out_of_memory = || Error::OutOfMemory {
            requested: num_bytes,
            available,
        };
        if num_bytes > available {
            return Err(out_of_memory());
        }
        let size = usize::try_from(num_bytes).map_err(|_| out_of_memory())?;
        let addr = HEAP_BASE
            .checked_add(memory.offset)
            .ok_or_else(out_of_memory)?;
        let offset = memory
            .offset
            .checked_add(num_bytes.max(1))
            .and_then(|end| utils::next_multiple(end, ALIGNMENT_BYTES))
            .ok_or_else(out_of_memory)?;

        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| out_of_memory())?;
        // device memory is not zeroed on allocation
        data.resize(size, 0xAB);

        memory.offset = offset;
        memory.used += num_bytes;
        memory.allocations.insert(addr, data);
        log::trace!("malloc({num_bytes}) = {addr:#x}");
        Ok(DevicePtr(addr))
    }

    fn memset(&self, ptr: DevicePtr, value: u8, num_bytes: u64) -> Result<(), Error> {
        let mut memory = self.memory.lock();
        let (data, offset) = memory.resolve(ptr)?;
        let range = checked_range(ptr, offset, num_bytes, data.len())?;
        data[range].fill(value);
        Ok(())
    }

    fn copy_to_symbol(&self, symbol: &str, data: &[u8]) -> Result<(), Error> {
        let mut memory = self.memory.lock();
        let dest = memory
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| Error::UnknownSymbol(symbol.to_string()))?;
        if data.len() > dest.len() {
            return Err(Error::OutOfBounds {
                ptr: DevicePtr(0),
                offset: 0,
                len: data.len() as u64,
                size: dest.len() as u64,
            });
        }
        dest[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_to_host(&self, ptr: DevicePtr, dest: &mut [u8]) -> Result<(), Error> {
        let mut memory = self.memory.lock();
        let (data, offset) = memory.resolve(ptr)?;
        let range = checked_range(ptr, offset, dest.len() as u64, data.len())?;
        dest.copy_from_slice(&data[range]);
        Ok(())
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), Error> {
        let mut memory = self.memory.lock();
        let data = memory
            .allocations
            .remove(&ptr.0)
            .ok_or(Error::InvalidPointer(ptr))?;
        memory.used -= data.len() as u64;
        log::trace!("free({ptr})");
        Ok(())
    }
}
