//! Local InfiniBand port state as seen by management agents.

use std::cell::Cell;

use crate::type_alias::*;

/// An InfiniBand device port.
///
/// Holds the port number stamped into directed-route return paths and the
/// current subnet manager binding, which changes whenever the port learns of
/// a (new) master SM. Agents sharing the port read the binding at the time a
/// request is issued.
#[derive(Debug)]
pub struct IbDevice {
    /// Physical port number.
    port: PortNum,

    /// LID of this port.
    lid: Cell<Lid>,

    /// LID of the subnet manager.
    sm_lid: Cell<Lid>,

    /// Service level to use towards the subnet manager.
    sm_sl: Cell<ServiceLevel>,
}

impl IbDevice {
    /// Create a device port that has not yet been assigned any LIDs.
    pub fn new(port: PortNum) -> Self {
        Self {
            port,
            lid: Cell::new(0),
            sm_lid: Cell::new(0),
            sm_sl: Cell::new(0),
        }
    }

    /// Return the physical port number.
    #[inline(always)]
    pub fn port(&self) -> PortNum {
        self.port
    }

    /// Return the LID of this port.
    #[inline]
    pub fn lid(&self) -> Lid {
        self.lid.get()
    }

    /// Set the LID of this port.
    pub fn set_lid(&self, lid: Lid) {
        self.lid.set(lid);
    }

    /// Return the subnet manager LID.
    #[inline]
    pub fn sm_lid(&self) -> Lid {
        self.sm_lid.get()
    }

    /// Return the service level towards the subnet manager.
    #[inline]
    pub fn sm_sl(&self) -> ServiceLevel {
        self.sm_sl.get()
    }

    /// Bind the port to a subnet manager.
    pub fn set_sm(&self, sm_lid: Lid, sm_sl: ServiceLevel) {
        log::debug!(
            "port {}: subnet manager at LID {:#06x} SL {}",
            self.port,
            sm_lid,
            sm_sl
        );
        self.sm_lid.set(sm_lid);
        self.sm_sl.set(sm_sl);
    }
}
