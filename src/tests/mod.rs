#![allow(unused_imports)]

mod receive;

use super::{mad::*, transport::sim::*, transport::*, type_alias::*, *};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use quanta::{Clock, Mock};
use simple_logger::SimpleLogger;

/// Port number of the simulated device.
const PORT: PortNum = 3;

/// LID of the simulated subnet manager.
const SM_LID: Lid = 0x0001;

/// Install a logger. Later calls are no-ops.
fn init_logger() {
    let _ = SimpleLogger::new()
        .with_level(log::LevelFilter::Trace)
        .init();
}

/// An agent over a simulated transport, with a mock clock.
struct Bench {
    device: Rc<IbDevice>,
    tp: Rc<SimTransport>,
    mock: Arc<Mock>,
    agent: Agent<SimTransport>,
}

impl Bench {
    fn new(config: AgentConfig, handlers: DispatchTable) -> Self {
        init_logger();

        let device = Rc::new(IbDevice::new(PORT));
        device.set_lid(0x0042);
        device.set_sm(SM_LID, 0);

        let tp = Rc::new(SimTransport::new());
        let (clock, mock) = Clock::mock();
        let agent = Agent::builder(device.clone(), tp.clone())
            .qkey(QKEY_GMA)
            .config(config)
            .handlers(handlers)
            .clock(clock)
            .create()
            .unwrap();
        Self {
            device,
            tp,
            mock,
            agent,
        }
    }

    fn with_defaults() -> Self {
        Self::new(AgentConfig::default(), DispatchTable::new())
    }

    /// Advance the clock.
    fn advance(&self, by: Duration) {
        self.mock.increment(by);
    }

    /// Deliver a datagram to the agent.
    fn deliver(&self, av: AddressVector, bytes: &[u8]) -> bool {
        self.tp.deliver(self.agent.qp(), av, bytes, Ok(()))
    }

    /// Complete every in-flight send successfully.
    fn complete_sends(&self) -> usize {
        self.tp.complete_sends(self.agent.qp(), Ok(()))
    }

    /// Return the MADs sent so far, forgetting them.
    fn take_sent_mads(&self) -> Vec<(AddressVector, Mad)> {
        self.tp
            .take_sent()
            .into_iter()
            .map(|sent| (sent.av, Mad::from_bytes(&sent.bytes).unwrap()))
            .collect()
    }
}

/// Address of a remote general management agent.
fn peer_gma() -> AddressVector {
    AddressVector {
        qpn: QPN_GMA,
        qkey: QKEY_GMA,
        lid: 0x0017,
        sl: 0,
        rate: 0,
    }
}

/// Address of a remote subnet management agent.
fn peer_sma() -> AddressVector {
    AddressVector {
        qpn: QPN_SMA,
        qkey: QKEY_SMA,
        ..peer_gma()
    }
}

/// A response-method handler that swallows responses without replying.
fn swallow(_: &IbDevice, mad: &mut Mad) -> HandlerResult {
    mad.set_method(method::NONE);
    Ok(())
}

#[test]
fn create_agent() {
    let bench = Bench::with_defaults();
    assert_eq!(bench.agent.qpn(), SimTransport::FIRST_QPN);
    assert_eq!(bench.tp.qkey(bench.agent.qp()), Some(QKEY_GMA));
    assert_eq!(bench.tp.recv_posted(bench.agent.qp()), 2);
    assert_eq!(bench.tp.live_qps(), 1);
    assert_eq!(bench.tp.live_cqs(), 1);
    assert_eq!(bench.agent.outstanding(), 0);
}

#[test]
fn unique_tids() {
    let bench = Bench::with_defaults();
    let mad = Mad::new(mgmt_class::SUBN_ADM, 2, method::GET, 0x0011);

    let tids = (0..64)
        .map(|_| bench.agent.issue_request(&mad, None).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(tids[0], ((TID_MAGIC as Tid) << 32) | 1);
    assert!(tids.windows(2).all(|w| w[0] < w[1]));
    assert!(tids.iter().all(|&tid| bench.agent.is_outstanding(tid)));
    assert_eq!(bench.agent.outstanding(), 64);
}

#[test]
fn shared_tid_allocator() {
    init_logger();
    let device = Rc::new(IbDevice::new(PORT));
    let tp = Rc::new(SimTransport::new());
    let tids = Rc::new(TidAllocator::new());

    let sma = Agent::builder(device.clone(), tp.clone())
        .qkey(QKEY_SMA)
        .tid_allocator(tids.clone())
        .create()
        .unwrap();
    let gma = Agent::builder(device, tp.clone())
        .tid_allocator(tids.clone())
        .create()
        .unwrap();
    assert_ne!(sma.qpn(), gma.qpn());

    let mad = Mad::new(mgmt_class::SUBN_LID_ROUTED, 1, method::GET, 0x0015);
    let a = sma.issue_request(&mad, None).unwrap();
    let b = gma.issue_request(&mad, None).unwrap();
    let c = sma.issue_request(&mad, None).unwrap();
    assert_eq!([a as u32, b as u32, c as u32], [1, 2, 3]);
    assert_eq!(tids.allocated(), 3);
}
