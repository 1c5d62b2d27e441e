use crate::mad::Mad;
use crate::retry::RetryTimer;
use crate::transport::AddressVector;
use crate::type_alias::*;

/// An issued request awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Destination.
    pub av: AddressVector,

    /// Request MAD, with its TID assigned.
    pub mad: Mad,

    /// Retransmission timer.
    pub timer: RetryTimer,
}

impl PendingRequest {
    /// Create a pending request with a stopped timer.
    #[inline]
    pub fn new(av: AddressVector, mad: Mad, timer: RetryTimer) -> Self {
        Self { av, mad, timer }
    }

    /// Return the TID of this request.
    #[inline(always)]
    pub fn tid(&self) -> Tid {
        self.mad.tid()
    }
}
