//! Type aliases used in this library.

/// [`u64`]: Transaction identifier of a MAD.
/// The high 32 bits carry the agent magic, the low 32 bits a counter.
pub type Tid = u64;

/// [`u32`] (24 bits valid): Queue pair number.
pub type Qpn = u32;

/// [`u32`]: Queue key.
pub type QKey = u32;

/// [`u16`]: Local identifier of a port in the subnet.
pub type Lid = u16;

/// [`u8`] (4 bits valid): Service level.
pub type ServiceLevel = u8;

/// [`u8`]: Physical port number on an HCA or switch.
pub type PortNum = u8;
