mod registry;
mod tid;

use std::cell::RefCell;
use std::rc::Rc;

use quanta::{Clock, Instant};

pub use self::tid::{TidAllocator, TID_MAGIC};

use self::registry::Registry;
use crate::config::AgentConfig;
use crate::device::IbDevice;
use crate::error::{CompletionError, Result};
use crate::handler::{DispatchTable, Dispatched};
use crate::mad::*;
use crate::request::PendingRequest;
use crate::retry::RetryTimer;
use crate::transport::*;
use crate::type_alias::*;

/// Interior-mutable state of an [`Agent`].
struct AgentInterior {
    /// Outstanding requests.
    registry: Registry,

    /// TIDs abandoned since the last [`Agent::take_abandoned()`].
    abandoned: Vec<Tid>,
}

/// Builder of an [`Agent`].
pub struct AgentBuilder<Tp: IbTransport> {
    device: Rc<IbDevice>,
    tp: Rc<Tp>,
    qkey: QKey,
    handlers: Option<Rc<DispatchTable>>,
    config: AgentConfig,
    clock: Option<Clock>,
    tids: Option<Rc<TidAllocator>>,
}

impl<Tp: IbTransport> AgentBuilder<Tp> {
    /// Set the queue key of the agent's queue pair.
    /// Default: `QKEY_GMA`
    pub fn qkey(mut self, qkey: QKey) -> Self {
        self.qkey = qkey;
        self
    }

    /// Set the handler bindings. Without them every inbound MAD is unsupported.
    pub fn handlers(mut self, handlers: impl Into<Rc<DispatchTable>>) -> Self {
        self.handlers = Some(handlers.into());
        self
    }

    /// Set the agent configuration.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock retransmission timers run on.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the TID allocator, which may be shared with other agents.
    pub fn tid_allocator(mut self, tids: Rc<TidAllocator>) -> Self {
        self.tids = Some(tids);
        self
    }

    /// Create the agent, allocating its completion queue and queue pair.
    ///
    /// On failure, every transport resource allocated so far is released.
    pub fn create(self) -> Result<Agent<Tp>> {
        let config = self.config;
        let tp = self.tp;

        let (cq_tx, cq_rx) = completion_channel();
        let cq = tp.create_cq(config.num_cqes, cq_tx)?;
        let qp = match tp.create_qp(
            config.num_send_wqes,
            cq,
            config.num_recv_wqes,
            cq,
            self.qkey,
        ) {
            Ok(qp) => qp,
            Err(e) => {
                tp.destroy_cq(cq);
                return Err(e);
            }
        };
        tp.refill_recv(qp);

        log::debug!(
            "GMA {:#x}: created on port {} with Q_Key {:#010x}",
            qp.qpn(),
            self.device.port(),
            self.qkey
        );
        Ok(Agent {
            device: self.device,
            tp,
            cq,
            qp,
            cq_rx,
            handlers: self.handlers.unwrap_or_default(),
            config,
            clock: self.clock.unwrap_or_default(),
            tids: self.tids.unwrap_or_default(),
            state: RefCell::new(AgentInterior {
                registry: Registry::new(),
                abandoned: Vec::new(),
            }),
            progressing: RefCell::new(()),
        })
    }
}

/// General management agent.
///
/// Owns one completion queue and one unreliable datagram queue pair on a
/// device port. It issues requests and retransmits them until answered,
/// answers inbound MADs through its [`DispatchTable`] and turns
/// directed-route SMPs around.
///
/// An agent is driven by [`Agent::progress()`], which must be called
/// periodically from the thread that owns it.
pub struct Agent<Tp: IbTransport> {
    /// Device port this agent lives on.
    device: Rc<IbDevice>,
    /// Transport.
    tp: Rc<Tp>,

    /// Completion queue.
    cq: CqHandle,
    /// Queue pair.
    qp: QpHandle,
    /// Completion receiver of `cq`.
    cq_rx: CompletionRx,

    /// Handler bindings.
    handlers: Rc<DispatchTable>,
    /// Configuration.
    config: AgentConfig,
    /// Time source for retransmission timers.
    clock: Clock,
    /// TID allocator.
    tids: Rc<TidAllocator>,

    /// Interior-mutable state of this agent.
    /// Never borrowed across a handler call or a transport call.
    state: RefCell<AgentInterior>,
    /// Held for the duration of [`Agent::progress()`].
    progressing: RefCell<()>,
}

/// Completion handlers.
impl<Tp: IbTransport> Agent<Tp> {
    /// Handle a send completion. The buffer is released either way.
    fn complete_send(&self, buf: IoBuf, status: std::result::Result<(), CompletionError>) {
        if let Err(e) = status {
            log::warn!("GMA {:#x}: TX error: {}", self.qpn(), e);
        }
        drop(buf);
    }

    /// Handle a receive completion.
    fn complete_recv(
        &self,
        mut av: AddressVector,
        mut buf: IoBuf,
        status: std::result::Result<(), CompletionError>,
    ) {
        if let Err(e) = status {
            log::debug!("GMA {:#x}: RX error: {}", self.qpn(), e);
            return;
        }
        let mut mad = match Mad::from_bytes(buf.as_slice()) {
            Ok(mad) => mad,
            Err(e) => {
                log::debug!("GMA {:#x}: dropping RX: {}", self.qpn(), e);
                return;
            }
        };
        if mad.base_version() != IB_MGMT_BASE_VERSION {
            log::debug!(
                "GMA {:#x}: dropping RX with unsupported base version {}",
                self.qpn(),
                mad.base_version()
            );
            return;
        }

        log::trace!(
            "GMA {:#x}: RX TID {:#018x} ({:#04x},{:#04x},{:#04x},{:#06x}) status {:#06x}",
            self.qpn(),
            mad.tid(),
            mad.mgmt_class(),
            mad.class_version(),
            mad.method(),
            mad.attr_id(),
            mad.status()
        );

        let matched = self.state.borrow_mut().registry.find_and_remove(mad.tid());
        if matched.is_some() {
            log::trace!("GMA {:#x}: TID {:#018x} completed", self.qpn(), mad.tid());
        }

        match self.handlers.dispatch(&self.device, &mut mad) {
            Dispatched::Handled => {}
            Dispatched::Failed(code) => log::debug!(
                "GMA {:#x}: handler for attribute {:#06x} reported status {:#06x}",
                self.qpn(),
                mad.attr_id(),
                code
            ),
            Dispatched::Unsupported => {
                if !self.config.trap_unsupported {
                    mad.set_method(method::NONE);
                }
            }
        }

        if mad.method() == method::NONE {
            return;
        }

        if mad.is_directed_route() {
            if let Err(e) = mad.turn_around(self.device.port()) {
                log::debug!(
                    "GMA {:#x}: dropping directed-route TID {:#018x}: {}",
                    self.qpn(),
                    mad.tid(),
                    e
                );
                return;
            }
        }

        av.qkey = if av.qpn == QPN_SMA { QKEY_SMA } else { QKEY_GMA };
        av.rate = RATE_2_5;

        // Reply in the receive buffer.
        buf.as_mut_slice().copy_from_slice(mad.as_bytes());
        log::trace!(
            "GMA {:#x}: TX TID {:#018x} ({:#04x},{:#04x},{:#04x},{:#06x}) status {:#06x}",
            self.qpn(),
            mad.tid(),
            mad.mgmt_class(),
            mad.class_version(),
            mad.method(),
            mad.attr_id(),
            mad.status()
        );
        if let Err(e) = self.tp.post_send(self.qp, &av, buf) {
            log::warn!("GMA {:#x}: could not send reply: {}", self.qpn(), e);
        }
    }

    /// Fire the retransmission timer of a request.
    fn fire_timer(&self, tid: Tid, now: Instant) {
        let (av, mad) = {
            let mut state = self.state.borrow_mut();
            let state: &mut AgentInterior = &mut state;
            let Some(req) = state.registry.get_mut(tid) else {
                return;
            };

            if req.timer.fire() {
                state.registry.find_and_remove(tid);
                log::debug!("GMA {:#x}: abandoning TID {:#018x}", self.qpn(), tid);
                if self.config.report_abandoned {
                    state.abandoned.push(tid);
                }
                return;
            }

            // Rearm before transmitting: a failed post waits for the next expiry.
            req.timer.restart(now);
            (req.av, req.mad)
        };

        let buf = match IoBuf::from_mad(&mad) {
            Ok(buf) => buf,
            Err(e) => {
                log::warn!(
                    "GMA {:#x}: could not allocate TX buffer for TID {:#018x}: {}",
                    self.qpn(),
                    tid,
                    e
                );
                return;
            }
        };
        if let Err(e) = self.tp.post_send(self.qp, &av, buf) {
            log::warn!(
                "GMA {:#x}: could not transmit TID {:#018x}: {}",
                self.qpn(),
                tid,
                e
            );
        }
    }
}

impl<Tp: IbTransport> Agent<Tp> {
    /// Start building an agent on `device` over `tp`.
    pub fn builder(device: Rc<IbDevice>, tp: Rc<Tp>) -> AgentBuilder<Tp> {
        AgentBuilder {
            device,
            tp,
            qkey: QKEY_GMA,
            handlers: None,
            config: AgentConfig::default(),
            clock: None,
            tids: None,
        }
    }

    /// Create an agent with default configuration and no handler bindings.
    pub fn create(device: Rc<IbDevice>, tp: Rc<Tp>, qkey: QKey) -> Result<Self> {
        Self::builder(device, tp).qkey(qkey).create()
    }

    /// Destroy the agent.
    ///
    /// Every outstanding request is discarded, then the queue pair and the
    /// completion queue are released. Dropping the agent does the same.
    pub fn destroy(self) {
        drop(self);
    }

    /// Return the queue pair number of this agent.
    #[inline(always)]
    pub fn qpn(&self) -> Qpn {
        self.qp.qpn()
    }

    /// Return the queue pair of this agent.
    #[inline(always)]
    pub fn qp(&self) -> QpHandle {
        self.qp
    }

    /// Return the device port this agent lives on.
    #[inline(always)]
    pub fn device(&self) -> &IbDevice {
        &self.device
    }

    /// Return the configuration of this agent.
    #[inline(always)]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Return the number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.state.borrow().registry.len()
    }

    /// Return `true` if the request with TID `tid` awaits its response.
    pub fn is_outstanding(&self, tid: Tid) -> bool {
        self.state.borrow().registry.contains(tid)
    }

    /// Return the TIDs abandoned since the last call.
    /// Always empty unless `report_abandoned` is configured.
    pub fn take_abandoned(&self) -> Vec<Tid> {
        std::mem::take(&mut self.state.borrow_mut().abandoned)
    }

    /// Issue a request.
    ///
    /// A fresh TID is written into a copy of `mad`, and the request is
    /// transmitted on the next [`Agent::progress()`] and retransmitted until
    /// a response carrying the same TID arrives or the retry budget runs
    /// out. Without an address, the request goes to the subnet manager the
    /// device is currently bound to.
    ///
    /// Return the assigned TID. Transmission failures are not reported here.
    /// Once the TID counter wraps, values still outstanding are skipped.
    ///
    /// May be called from within a handler.
    pub fn issue_request(&self, mad: &Mad, av: Option<AddressVector>) -> Result<Tid> {
        let av = av.unwrap_or_else(|| AddressVector {
            qpn: self.config.sm_qpn,
            qkey: self.config.sm_qkey,
            lid: self.device.sm_lid(),
            sl: self.device.sm_sl(),
            rate: RATE_2_5,
        });

        let mut state = self.state.borrow_mut();
        state.registry.reserve()?;

        let tid = self.tids.alloc_unused(|tid| state.registry.contains(tid));
        let mut mad = *mad;
        mad.set_tid(tid);

        let mut timer = RetryTimer::new(self.config.min_timeout, self.config.max_timeout);
        timer.start_nodelay(self.clock.now());
        state.registry.register(PendingRequest::new(av, mad, timer));

        log::trace!(
            "GMA {:#x}: issued TID {:#018x} to LID {:#06x} QPN {:#x}",
            self.qpn(),
            tid,
            av.lid,
            av.qpn
        );
        Ok(tid)
    }

    /// Run an iteration of the event loop.
    ///
    /// Handles every pending completion, tops up the receive ring, then
    /// fires expired retransmission timers in deadline order. Handlers may
    /// call back into the agent; a nested `progress()` returns immediately.
    pub fn progress(&self) {
        // Abort if progressing recursively.
        let Ok(_progressing) = self.progressing.try_borrow_mut() else {
            return;
        };

        while let Some(completion) = self.cq_rx.recv() {
            match completion {
                Completion::Send { qp, buf, status } => {
                    if qp != self.qp {
                        log::warn!(
                            "GMA {:#x}: ignoring send completion for QPN {:#x}",
                            self.qpn(),
                            qp.qpn()
                        );
                        continue;
                    }
                    self.complete_send(buf, status);
                }
                Completion::Recv {
                    qp,
                    av,
                    buf,
                    status,
                } => {
                    if qp != self.qp {
                        log::warn!(
                            "GMA {:#x}: ignoring receive completion for QPN {:#x}",
                            self.qpn(),
                            qp.qpn()
                        );
                        continue;
                    }
                    self.complete_recv(av, buf, status);
                }
            }
        }
        self.tp.refill_recv(self.qp);

        let now = self.clock.now();
        let expired = self.state.borrow().registry.expired(now);
        for tid in expired {
            self.fire_timer(tid, now);
        }
    }
}

impl<Tp: IbTransport> Drop for Agent<Tp> {
    fn drop(&mut self) {
        let flushed = self.state.get_mut().registry.flush_all();
        self.tp.destroy_qp(self.qp);
        self.tp.destroy_cq(self.cq);
        log::debug!(
            "GMA {:#x}: destroyed, {} outstanding requests discarded",
            self.qpn(),
            flushed
        );
    }
}
