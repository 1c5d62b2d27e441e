//! Transport collaborator interface.
//!
//! A management agent does not drive hardware itself. It asks an
//! [`IbTransport`] for a completion queue and a queue pair, posts sends
//! through it, and consumes the completions the transport pushes into the
//! agent's [`CompletionRx`].

pub mod sim;

use std::sync::Arc;

use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};

use crate::error::{CompletionError, Error, Result};
use crate::mad::Mad;
use crate::type_alias::*;

/// Completion queue handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CqHandle(u32);

impl CqHandle {
    /// Wrap a transport-specific completion queue number.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Return the transport-specific completion queue number.
    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Queue pair handle, identified by its QPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QpHandle(Qpn);

impl QpHandle {
    /// Wrap a queue pair number.
    pub const fn new(qpn: Qpn) -> Self {
        Self(qpn)
    }

    /// Return the queue pair number.
    #[inline(always)]
    pub const fn qpn(self) -> Qpn {
        self.0
    }
}

/// Destination (or source, on receive) of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressVector {
    /// Remote queue pair number.
    pub qpn: Qpn,
    /// Remote queue key.
    pub qkey: QKey,
    /// Remote LID.
    pub lid: Lid,
    /// Service level.
    pub sl: ServiceLevel,
    /// Static rate encoding.
    pub rate: u8,
}

/// An I/O buffer owned by whoever holds it.
///
/// Posting a buffer hands it to the transport; it comes back in the
/// matching completion, and is released when dropped.
#[derive(PartialEq, Eq)]
pub struct IoBuf {
    data: Vec<u8>,
}

impl IoBuf {
    /// Allocate a buffer holding a copy of `bytes`.
    pub fn copy_from(bytes: &[u8]) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes.len())
            .map_err(|_| Error::NoMemory)?;
        data.extend_from_slice(bytes);
        Ok(Self { data })
    }

    /// Allocate a buffer holding a copy of `mad`.
    #[inline]
    pub fn from_mad(mad: &Mad) -> Result<Self> {
        Self::copy_from(mad.as_bytes())
    }

    /// Return the number of valid bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return `true` if the buffer holds no data.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return the buffer contents.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Return the buffer contents, mutably.
    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBuf").field("len", &self.data.len()).finish()
    }
}

/// A work completion delivered by the transport.
#[derive(Debug)]
pub enum Completion {
    /// A posted send finished. The buffer returns to its owner.
    Send {
        qp: QpHandle,
        buf: IoBuf,
        status: std::result::Result<(), CompletionError>,
    },

    /// A datagram arrived in a receive buffer.
    Recv {
        qp: QpHandle,
        av: AddressVector,
        buf: IoBuf,
        status: std::result::Result<(), CompletionError>,
    },
}

/// Completion sender, held by the transport for each completion queue.
#[derive(Clone)]
pub struct CompletionTx(Arc<SegQueue<Completion>>);

impl CompletionTx {
    /// Deliver a completion.
    pub fn send(&self, completion: Completion) {
        self.0.push(completion);
    }
}

/// Completion receiver, drained by the owner of the completion queue.
pub struct CompletionRx(Arc<SegQueue<Completion>>);

impl CompletionRx {
    /// Receive a completion.
    pub fn recv(&self) -> Option<Completion> {
        self.0.pop()
    }

    /// Returns `true` if there is no completion in the queue.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Create a pair of completion sender and receiver.
pub fn completion_channel() -> (CompletionTx, CompletionRx) {
    let queue = Arc::new(SegQueue::new());
    (CompletionTx(queue.clone()), CompletionRx(queue))
}

/// Trait for the queue pair / completion queue provider underneath an agent.
///
/// All methods take `&self`: transports are shared by every agent on a
/// device and keep their own interior state. Completions are never delivered
/// synchronously from within these calls.
pub trait IbTransport {
    /// Create a completion queue with `depth` entries. Completions for queue
    /// pairs bound to it are pushed into `tx`.
    fn create_cq(&self, depth: usize, tx: CompletionTx) -> Result<CqHandle>;

    /// Create an unreliable datagram queue pair.
    fn create_qp(
        &self,
        send_depth: usize,
        send_cq: CqHandle,
        recv_depth: usize,
        recv_cq: CqHandle,
        qkey: QKey,
    ) -> Result<QpHandle>;

    /// Post a send of `buf` to `av`.
    ///
    /// On success the buffer comes back in a [`Completion::Send`]. On error
    /// the buffer has been released.
    fn post_send(&self, qp: QpHandle, av: &AddressVector, buf: IoBuf) -> Result<()>;

    /// Top up the receive ring of `qp` with fresh buffers.
    fn refill_recv(&self, qp: QpHandle);

    /// Destroy a queue pair. No completion for it is delivered afterwards.
    fn destroy_qp(&self, qp: QpHandle);

    /// Destroy a completion queue.
    fn destroy_cq(&self, cq: CqHandle);
}
