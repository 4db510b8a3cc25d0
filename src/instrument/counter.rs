use super::device::{self, Device, DevicePtr};
use super::{AllocationStage, Error};

const COUNTER_BYTES: u64 = std::mem::size_of::<u64>() as u64;

/// Shape of a counter buffer.
///
/// Counters are laid out by thread block, then basic block, then thread,
/// with `entries` consecutive slots per thread.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct CounterLayout {
    pub entries: usize,
    pub basic_blocks: usize,
    pub thread_blocks: usize,
    pub threads: usize,
}

impl CounterLayout {
    /// Number of counters, or `None` if it does not fit in `usize`.
    #[must_use]
    pub fn checked_len(&self) -> Option<usize> {
        self.entries
            .checked_mul(self.basic_blocks)?
            .checked_mul(self.thread_blocks)?
            .checked_mul(self.threads)
    }

    /// Size of the buffer in bytes, or `None` on overflow.
    #[must_use]
    pub fn checked_num_bytes(&self) -> Option<u64> {
        let len = u64::try_from(self.checked_len()?).ok()?;
        len.checked_mul(COUNTER_BYTES)
    }

    /// Number of counters.
    ///
    /// Saturates at `usize::MAX`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Saturates at `u64::MAX`.
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        self.checked_num_bytes().unwrap_or(u64::MAX)
    }

    /// Index of slot `entry` of `thread` in `thread_block` for basic block `block`.
    #[must_use]
    pub fn index(&self, thread_block: usize, block: usize, thread: usize, entry: usize) -> usize {
        ((thread_block * self.basic_blocks + block) * self.threads + thread) * self.entries + entry
    }
}

/// Device resident counter buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CounterBuffer {
    #[default]
    Unallocated,
    Allocated {
        ptr: DevicePtr,
        layout: CounterLayout,
    },
    Released,
}

impl CounterBuffer {
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Allocated { .. })
    }

    #[must_use]
    pub fn ptr(&self) -> Option<DevicePtr> {
        match self {
            Self::Allocated { ptr, .. } => Some(*ptr),
            Self::Unallocated | Self::Released => None,
        }
    }

    #[must_use]
    pub fn layout(&self) -> Option<CounterLayout> {
        match self {
            Self::Allocated { layout, .. } => Some(*layout),
            Self::Unallocated | Self::Released => None,
        }
    }

    /// Allocates a zeroed buffer for `layout` and binds its address to `symbol`.
    ///
    /// A previously allocated buffer is released first.
    /// On failure, nothing remains allocated. A layout whose size overflows
    /// is rejected before the device is touched.
    pub fn allocate<D>(
        &mut self,
        device: &D,
        layout: CounterLayout,
        symbol: &str,
    ) -> Result<(), Error>
    where
        D: Device + ?Sized,
    {
        let num_bytes = layout
            .checked_num_bytes()
            .ok_or(Error::BufferTooLarge { layout })?;
        self.release(device).map_err(Error::Release)?;

        let ptr = device.malloc(num_bytes).map_err(|source| Error::Allocation {
            stage: AllocationStage::Malloc,
            source,
        })?;

        let bound = device
            .memset(ptr, 0, num_bytes)
            .map_err(|source| Error::Allocation {
                stage: AllocationStage::Memset,
                source,
            })
            .and_then(|()| {
                device
                    .copy_to_symbol(symbol, &ptr.0.to_le_bytes())
                    .map_err(|source| Error::Allocation {
                        stage: AllocationStage::BindSymbol,
                        source,
                    })
            });
        if let Err(err) = bound {
            if let Err(free_err) = device.free(ptr) {
                log::warn!("failed to free counter buffer {ptr}: {free_err}");
            }
            return Err(err);
        }

        log::debug!(
            "allocated {num_bytes} byte counter buffer {ptr} bound to {symbol} ({layout:?})"
        );
        *self = Self::Allocated { ptr, layout };
        Ok(())
    }

    /// Copies the counters back to the host and releases the buffer.
    ///
    /// The buffer is released even when the copy fails.
    pub fn read_back<D>(&mut self, device: &D) -> Result<Vec<u64>, Error>
    where
        D: Device + ?Sized,
    {
        let Self::Allocated { ptr, layout } = *self else {
            return Err(Error::NotInitialized);
        };
        let mut bytes = vec![0; layout.num_bytes() as usize];
        let copied = device.copy_to_host(ptr, &mut bytes);
        let released = self.release(device);
        copied.map_err(Error::Readback)?;
        released.map_err(Error::Release)?;

        let counters = bytes
            .chunks_exact(COUNTER_BYTES as usize)
            .map(|chunk| {
                let mut word = [0; COUNTER_BYTES as usize];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(counters)
    }

    /// Frees the buffer if it is allocated.
    pub fn release<D>(&mut self, device: &D) -> Result<(), device::Error>
    where
        D: Device + ?Sized,
    {
        let Self::Allocated { ptr, .. } = *self else {
            return Ok(());
        };
        *self = Self::Released;
        log::debug!("releasing counter buffer {ptr}");
        device.free(ptr)
    }
}
