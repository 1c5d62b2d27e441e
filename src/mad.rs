//! Management Datagram wire format.
//!
//! A MAD is a fixed 256-byte record. Every field is stored in network byte
//! order; accessors convert to and from host integers.

use std::{fmt, mem};

use paste::paste;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::type_alias::*;

macro_rules! impl_accessor {
    ($field:ident, $field_ty:ty, $offset:expr, $setter:tt, $getter:tt) => {
        #[inline(always)]
        pub fn $setter(&mut self, val: $field_ty) {
            const LEN: usize = mem::size_of::<$field_ty>();
            self.bytes[$offset..$offset + LEN].copy_from_slice(&val.to_be_bytes());
        }

        #[inline(always)]
        pub fn $getter(&self) -> $field_ty {
            const LEN: usize = mem::size_of::<$field_ty>();
            let mut raw = [0u8; LEN];
            raw.copy_from_slice(&self.bytes[$offset..$offset + LEN]);
            <$field_ty>::from_be_bytes(raw)
        }
    };

    ($field:ident, $field_ty:ty, $offset:expr) => {
        paste! {
            impl_accessor!($field, $field_ty, $offset, [< set_ $field >], $field);
        }
    };
}

/// Size of a MAD in bytes.
pub const MAD_SIZE: usize = 256;

/// Size of the common MAD header in bytes.
pub const MAD_HDR_SIZE: usize = 24;

/// Number of hop slots in a directed-route path.
pub const DR_PATH_HOPS: usize = 64;

/// The only supported base version.
pub const IB_MGMT_BASE_VERSION: u8 = 1;

/// Management classes.
pub mod mgmt_class {
    /// Subnet management, LID-routed.
    pub const SUBN_LID_ROUTED: u8 = 0x01;
    /// Subnet administration.
    pub const SUBN_ADM: u8 = 0x03;
    /// Performance management.
    pub const PERF: u8 = 0x04;
    /// Subnet management, directed-route.
    pub const SUBN_DIRECTED_ROUTE: u8 = 0x81;
}

/// Management methods.
pub mod method {
    /// No method: the exchange ends without a reply.
    pub const NONE: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const SET: u8 = 0x02;
    pub const SEND: u8 = 0x03;
    pub const TRAP: u8 = 0x05;
    pub const REPORT: u8 = 0x06;
    pub const TRAP_REPRESS: u8 = 0x07;
    pub const DELETE: u8 = 0x15;
    pub const GET_RESP: u8 = 0x81;
    pub const REPORT_RESP: u8 = 0x86;
    pub const DELETE_RESP: u8 = 0x95;

    /// Bit set in the method of every response.
    pub const RESP_BIT: u8 = 0x80;
}

/// Management status codes.
pub mod status {
    pub const OK: u16 = 0x0000;
    pub const BAD_VERSION: u16 = 0x0001;
    pub const UNSUPPORTED_METHOD: u16 = 0x0008;
    pub const UNSUPPORTED_METHOD_ATTR: u16 = 0x000c;
    pub const INVALID_VALUE: u16 = 0x001c;

    /// Directed-route SMP direction bit: the packet travels back to its source.
    pub const D_INBOUND: u16 = 0x8000;
}

/// Well-known queue pair numbers.
pub const QPN_SMA: Qpn = 0;
pub const QPN_GMA: Qpn = 1;

/// Well-known queue keys.
pub const QKEY_SMA: QKey = 0;
pub const QKEY_GMA: QKey = 0x8001_0000;

/// Static rate encoding of 2.5 Gbps.
pub const RATE_2_5: u8 = 2;

/// Reasons a directed-route SMP cannot be forwarded back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("hop count {count} does not match hop pointer {pointer}")]
    HopMismatch { pointer: u8, count: u8 },

    #[error("hop pointer {0} exceeds the return path")]
    HopPointerOutOfRange(u8),
}

/// Record `port` into the return path slot selected by `hop_pointer`.
///
/// The slot must be addressable within `hops`; nothing is written otherwise.
/// Returns the index that was written.
pub fn forward_directed_route(
    hop_pointer: u8,
    hop_count: u8,
    hops: &mut [PortNum],
    port: PortNum,
) -> std::result::Result<usize, ForwardError> {
    if hop_count != hop_pointer {
        return Err(ForwardError::HopMismatch {
            pointer: hop_pointer,
            count: hop_count,
        });
    }

    let slot = hops
        .get_mut(hop_pointer as usize)
        .ok_or(ForwardError::HopPointerOutOfRange(hop_pointer))?;
    *slot = port;
    Ok(hop_pointer as usize)
}

/// A Management Datagram.
///
/// # Layout
///
/// | Offset | Size |     Name      |
/// | -----: | ---: | ------------- |
/// |      0 |    1 | base_version  |
/// |      1 |    1 | mgmt_class    |
/// |      2 |    1 | class_version |
/// |      3 |    1 | method        |
/// |      4 |    2 | status        |
/// |      6 |    2 | class_specific (DR SMP: hop_pointer, hop_count) |
/// |      8 |    8 | tid           |
/// |     16 |    2 | attr_id       |
/// |     18 |    2 | reserved      |
/// |     20 |    4 | attr_mod      |
/// |     24 |  232 | class data    |
///
/// Directed-route SMPs lay out the class data as `m_key` (24), `dr_slid` (32),
/// `dr_dlid` (34), SMP data (64..128), initial path (128..192) and return
/// path (192..256).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Mad {
    bytes: [u8; MAD_SIZE],
}

impl Mad {
    impl_accessor!(base_version, u8, 0);
    impl_accessor!(mgmt_class, u8, 1);
    impl_accessor!(class_version, u8, 2);
    impl_accessor!(method, u8, 3);
    impl_accessor!(status, u16, 4);
    impl_accessor!(class_specific, u16, 6);
    impl_accessor!(tid, Tid, 8);
    impl_accessor!(tid_high, u32, 8);
    impl_accessor!(tid_low, u32, 12);
    impl_accessor!(attr_id, u16, 16);
    impl_accessor!(attr_mod, u32, 20);

    // Directed-route SMP fields.
    impl_accessor!(hop_pointer, u8, 6);
    impl_accessor!(hop_count, u8, 7);
    impl_accessor!(m_key, u64, 24);
    impl_accessor!(dr_slid, Lid, 32);
    impl_accessor!(dr_dlid, Lid, 34);

    const SMP_DATA: usize = 64;
    const INITIAL_PATH: usize = 128;
    const RETURN_PATH: usize = 192;

    /// Create a MAD with the supported base version and the given header fields.
    pub fn new(mgmt_class: u8, class_version: u8, method: u8, attr_id: u16) -> Self {
        let mut this = Self::default();
        this.set_base_version(IB_MGMT_BASE_VERSION);
        this.set_mgmt_class(mgmt_class);
        this.set_class_version(class_version);
        this.set_method(method);
        this.set_attr_id(attr_id);
        this
    }

    /// Copy a MAD out of a byte slice that holds exactly one MAD.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; MAD_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::BadMadSize(bytes.len()))?;
        Ok(Self { bytes })
    }

    /// Return the raw wire bytes.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; MAD_SIZE] {
        &self.bytes
    }

    /// Return the class-specific data following the common header.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes[MAD_HDR_SIZE..]
    }

    /// Return the class-specific data following the common header, mutably.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[MAD_HDR_SIZE..]
    }

    /// Return the SMP attribute data.
    #[inline]
    pub fn smp_data(&self) -> &[u8] {
        &self.bytes[Self::SMP_DATA..Self::INITIAL_PATH]
    }

    /// Return the SMP attribute data, mutably.
    #[inline]
    pub fn smp_data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[Self::SMP_DATA..Self::INITIAL_PATH]
    }

    /// Return the directed-route initial path.
    #[inline]
    pub fn initial_path(&self) -> &[PortNum] {
        &self.bytes[Self::INITIAL_PATH..Self::RETURN_PATH]
    }

    /// Return the directed-route initial path, mutably.
    #[inline]
    pub fn initial_path_mut(&mut self) -> &mut [PortNum] {
        &mut self.bytes[Self::INITIAL_PATH..Self::RETURN_PATH]
    }

    /// Return the directed-route return path.
    #[inline]
    pub fn return_path(&self) -> &[PortNum] {
        &self.bytes[Self::RETURN_PATH..]
    }

    /// Return the directed-route return path, mutably.
    #[inline]
    pub fn return_path_mut(&mut self) -> &mut [PortNum] {
        &mut self.bytes[Self::RETURN_PATH..]
    }

    /// Return `true` if this is a directed-route SMP.
    #[inline]
    pub fn is_directed_route(&self) -> bool {
        self.mgmt_class() == mgmt_class::SUBN_DIRECTED_ROUTE
    }

    /// Return `true` if the method is a response method.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.method() & method::RESP_BIT != 0
    }

    /// Turn a directed-route SMP around at this node.
    ///
    /// Sets the inbound direction bit and records `port` in the return path
    /// at the current hop pointer.
    pub fn turn_around(&mut self, port: PortNum) -> std::result::Result<usize, ForwardError> {
        self.set_status(self.status() | status::D_INBOUND);
        let (hop_pointer, hop_count) = (self.hop_pointer(), self.hop_count());
        forward_directed_route(hop_pointer, hop_count, self.return_path_mut(), port)
    }
}

impl Default for Mad {
    fn default() -> Self {
        Self {
            bytes: [0u8; MAD_SIZE],
        }
    }
}

impl fmt::Debug for Mad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mad")
            .field("base_version", &self.base_version())
            .field("mgmt_class", &format_args!("{:#04x}", self.mgmt_class()))
            .field("class_version", &self.class_version())
            .field("method", &format_args!("{:#04x}", self.method()))
            .field("status", &format_args!("{:#06x}", self.status()))
            .field("tid", &format_args!("{:016x}", self.tid()))
            .field("attr_id", &format_args!("{:#06x}", self.attr_id()))
            .field("attr_mod", &format_args!("{:#x}", self.attr_mod()))
            .finish()
    }
}
