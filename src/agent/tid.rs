use std::cell::Cell;

use crate::type_alias::*;

/// High word of every TID issued by this library: ASCII `"gPXE"`.
pub const TID_MAGIC: u32 = 0x6750_5845;

/// Transaction identifier allocator.
///
/// TIDs carry [`TID_MAGIC`] in the high word and a counter in the low word.
/// The first TID has counter value 1. Share one allocator between agents to
/// keep their TIDs distinct.
#[derive(Debug, Default)]
pub struct TidAllocator {
    last: Cell<u32>,
}

impl TidAllocator {
    /// Create an allocator whose first TID has counter value 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator whose first TID has counter value `last + 1`.
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: Cell::new(last),
        }
    }

    /// Allocate a fresh TID.
    #[inline]
    pub fn alloc(&self) -> Tid {
        let counter = self.last.get().wrapping_add(1);
        self.last.set(counter);
        ((TID_MAGIC as Tid) << 32) | counter as Tid
    }

    /// Allocate a fresh TID for which `in_use` returns `false`.
    ///
    /// Only matters once the counter wraps. `in_use` must hold for fewer
    /// than 2^32 counter values.
    pub fn alloc_unused(&self, in_use: impl Fn(Tid) -> bool) -> Tid {
        loop {
            let tid = self.alloc();
            if !in_use(tid) {
                return tid;
            }
            log::debug!("TID {:#018x} still outstanding, skipping", tid);
        }
    }

    /// Return the number of TIDs allocated so far (modulo 2^32).
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.last.get()
    }
}
