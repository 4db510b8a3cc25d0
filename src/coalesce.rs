/// Estimates the number of memory transactions of one instruction.
///
/// A new segment starts whenever an access crosses into a different
/// half-warp than the previously observed access, or when its address does
/// not continue the previous access.
/// Crossings are checked first and also count as a half-warp.
///
/// This is an approximation of hardware coalescing, not a bus model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEstimator {
    half_warp_size: u32,
    next_address: u64,
    previous_thread: Option<u32>,
    /// Number of segments started.
    pub segments: u64,
    /// Number of half-warp crossings.
    pub half_warps: u64,
}

impl SegmentEstimator {
    #[must_use]
    pub fn new(half_warp_size: u32) -> Self {
        Self {
            half_warp_size: half_warp_size.max(1),
            next_address: u64::MAX,
            previous_thread: None,
            segments: 0,
            half_warps: 0,
        }
    }

    /// Observes the access of `thread_id`.
    ///
    /// Accesses must be observed in thread order.
    pub fn observe(&mut self, thread_id: u32, address: u64, size: u32) {
        let half_warp = thread_id / self.half_warp_size;
        let crossed = self
            .previous_thread
            .map_or(false, |previous| previous / self.half_warp_size != half_warp);

        if crossed {
            self.segments += 1;
            self.half_warps += 1;
        } else if address != self.next_address {
            self.segments += 1;
        }
        self.next_address = address.wrapping_add(u64::from(size));
        self.previous_thread = Some(thread_id);
    }
}
