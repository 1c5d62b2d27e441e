//! In-memory transport.
//!
//! Implements [`IbTransport`] without hardware. Every posted send is recorded
//! and held in flight until the test (or demo) completes it; inbound
//! datagrams are injected with [`SimTransport::deliver()`] and consume one
//! posted receive each, like a real receive ring.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use crate::error::{CompletionError, Error, Result};
use crate::transport::*;
use crate::type_alias::*;

/// A send observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMad {
    /// Queue pair the send was posted on.
    pub qp: QpHandle,
    /// Destination.
    pub av: AddressVector,
    /// Payload.
    pub bytes: Vec<u8>,
}

struct SimCq {
    tx: CompletionTx,
}

struct SimQp {
    send_depth: usize,
    send_cq: CqHandle,
    recv_depth: usize,
    recv_cq: CqHandle,
    qkey: QKey,

    /// Posted sends without a completion yet.
    in_flight: VecDeque<IoBuf>,
    /// Receive buffers currently posted.
    recv_posted: usize,
}

#[derive(Default)]
struct SimInterior {
    next_cq: u32,
    next_qpn: Qpn,
    cqs: HashMap<u32, SimCq>,
    qps: HashMap<Qpn, SimQp>,

    sent: Vec<SentMad>,

    fail_cq: bool,
    fail_qp: bool,
    fail_sends: usize,
}

/// In-memory [`IbTransport`].
pub struct SimTransport {
    state: RefCell<SimInterior>,
}

impl SimTransport {
    /// First QPN handed out.
    pub const FIRST_QPN: Qpn = 0x48;

    /// Create an empty transport.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(SimInterior {
                next_qpn: Self::FIRST_QPN,
                ..Default::default()
            }),
        }
    }

    /// Make the next completion queue creation fail.
    pub fn fail_next_cq(&self) {
        self.state.borrow_mut().fail_cq = true;
    }

    /// Make the next queue pair creation fail.
    pub fn fail_next_qp(&self) {
        self.state.borrow_mut().fail_qp = true;
    }

    /// Make the next `n` sends fail to post.
    pub fn fail_next_sends(&self, n: usize) {
        self.state.borrow_mut().fail_sends = n;
    }

    /// Return every send posted so far.
    pub fn sent(&self) -> Vec<SentMad> {
        self.state.borrow().sent.clone()
    }

    /// Return the number of sends posted so far.
    pub fn sent_count(&self) -> usize {
        self.state.borrow().sent.len()
    }

    /// Return and forget every send posted so far.
    pub fn take_sent(&self) -> Vec<SentMad> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    /// Return the number of sends on `qp` awaiting completion.
    pub fn in_flight(&self, qp: QpHandle) -> usize {
        self.state
            .borrow()
            .qps
            .get(&qp.qpn())
            .map_or(0, |q| q.in_flight.len())
    }

    /// Return the number of receive buffers posted on `qp`.
    pub fn recv_posted(&self, qp: QpHandle) -> usize {
        self.state
            .borrow()
            .qps
            .get(&qp.qpn())
            .map_or(0, |q| q.recv_posted)
    }

    /// Return the queue key `qp` was created with.
    pub fn qkey(&self, qp: QpHandle) -> Option<QKey> {
        self.state.borrow().qps.get(&qp.qpn()).map(|q| q.qkey)
    }

    /// Return the number of live queue pairs.
    pub fn live_qps(&self) -> usize {
        self.state.borrow().qps.len()
    }

    /// Return the number of live completion queues.
    pub fn live_cqs(&self) -> usize {
        self.state.borrow().cqs.len()
    }

    /// Complete every in-flight send on `qp` with `status`.
    /// Return the number of completions generated.
    pub fn complete_sends(
        &self,
        qp: QpHandle,
        status: std::result::Result<(), CompletionError>,
    ) -> usize {
        let mut state = self.state.borrow_mut();
        let state: &mut SimInterior = &mut state;

        let Some(sim_qp) = state.qps.get_mut(&qp.qpn()) else {
            return 0;
        };
        let Some(cq) = state.cqs.get(&sim_qp.send_cq.raw()) else {
            return 0;
        };

        let n = sim_qp.in_flight.len();
        for buf in sim_qp.in_flight.drain(..) {
            cq.tx.send(Completion::Send { qp, buf, status });
        }
        n
    }

    /// Deliver a datagram to `qp` as if it came from `av`.
    ///
    /// Return `false` if the queue pair has no posted receive buffer, in
    /// which case the datagram is lost.
    pub fn deliver(
        &self,
        qp: QpHandle,
        av: AddressVector,
        bytes: &[u8],
        status: std::result::Result<(), CompletionError>,
    ) -> bool {
        let mut state = self.state.borrow_mut();
        let state: &mut SimInterior = &mut state;

        let Some(sim_qp) = state.qps.get_mut(&qp.qpn()) else {
            return false;
        };
        if sim_qp.recv_posted == 0 {
            log::debug!("sim: QPN {:#x} has no receive buffer, datagram lost", qp.qpn());
            return false;
        }
        let Some(cq) = state.cqs.get(&sim_qp.recv_cq.raw()) else {
            return false;
        };
        let Ok(buf) = IoBuf::copy_from(bytes) else {
            return false;
        };

        sim_qp.recv_posted -= 1;
        cq.tx.send(Completion::Recv { qp, av, buf, status });
        true
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IbTransport for SimTransport {
    fn create_cq(&self, depth: usize, tx: CompletionTx) -> Result<CqHandle> {
        let mut state = self.state.borrow_mut();
        if state.fail_cq {
            state.fail_cq = false;
            return Err(Error::CompletionQueue(depth));
        }

        let cqn = state.next_cq;
        state.next_cq += 1;
        state.cqs.insert(cqn, SimCq { tx });
        Ok(CqHandle::new(cqn))
    }

    fn create_qp(
        &self,
        send_depth: usize,
        send_cq: CqHandle,
        recv_depth: usize,
        recv_cq: CqHandle,
        qkey: QKey,
    ) -> Result<QpHandle> {
        let mut state = self.state.borrow_mut();
        for cq in [send_cq, recv_cq] {
            if !state.cqs.contains_key(&cq.raw()) {
                return Err(Error::NoSuchCompletionQueue(cq.raw()));
            }
        }
        if state.fail_qp {
            state.fail_qp = false;
            return Err(Error::QueuePair);
        }

        let qpn = state.next_qpn;
        state.next_qpn += 1;
        state.qps.insert(
            qpn,
            SimQp {
                send_depth,
                send_cq,
                recv_depth,
                recv_cq,
                qkey,
                in_flight: VecDeque::with_capacity(send_depth),
                recv_posted: 0,
            },
        );
        Ok(QpHandle::new(qpn))
    }

    fn post_send(&self, qp: QpHandle, av: &AddressVector, buf: IoBuf) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let state: &mut SimInterior = &mut state;

        let sim_qp = state
            .qps
            .get_mut(&qp.qpn())
            .ok_or(Error::NoSuchQueuePair(qp.qpn()))?;
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(Error::SendQueueFull(qp.qpn()));
        }
        if sim_qp.in_flight.len() >= sim_qp.send_depth {
            return Err(Error::SendQueueFull(qp.qpn()));
        }

        state.sent.push(SentMad {
            qp,
            av: *av,
            bytes: buf.as_slice().to_vec(),
        });
        sim_qp.in_flight.push_back(buf);
        Ok(())
    }

    fn refill_recv(&self, qp: QpHandle) {
        if let Some(sim_qp) = self.state.borrow_mut().qps.get_mut(&qp.qpn()) {
            sim_qp.recv_posted = sim_qp.recv_depth;
        }
    }

    fn destroy_qp(&self, qp: QpHandle) {
        self.state.borrow_mut().qps.remove(&qp.qpn());
    }

    fn destroy_cq(&self, cq: CqHandle) {
        self.state.borrow_mut().cqs.remove(&cq.raw());
    }
}
