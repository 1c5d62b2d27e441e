use std::cell::{Cell, RefCell};
use std::rc::Weak;

use super::*;

const NODE_INFO: u16 = 0x0011;
const NODE_DESC: u16 = 0x0010;

/// Handlers answering `Get(NodeInfo)` over both SMP routing classes.
fn node_info_handlers() -> DispatchTable {
    let node_info = |device: &IbDevice, mad: &mut Mad| -> HandlerResult {
        let data = mad.smp_data_mut();
        data[0] = 1;
        data[1] = device.port();
        Ok(())
    };
    DispatchTable::new()
        .bind(
            DispatchKey::new(mgmt_class::SUBN_LID_ROUTED, 1, method::GET, NODE_INFO),
            method::GET_RESP,
            node_info,
        )
        .bind(
            DispatchKey::new(mgmt_class::SUBN_DIRECTED_ROUTE, 1, method::GET, NODE_INFO),
            method::GET_RESP,
            node_info,
        )
}

fn get_node_info(class: u8, tid: Tid) -> Mad {
    let mut mad = Mad::new(class, 1, method::GET, NODE_INFO);
    mad.set_tid(tid);
    mad
}

fn directed_route(hop_pointer: u8, hop_count: u8) -> Mad {
    let mut mad = get_node_info(mgmt_class::SUBN_DIRECTED_ROUTE, 0x1234);
    mad.set_hop_pointer(hop_pointer);
    mad.set_hop_count(hop_count);
    mad.set_dr_slid(0xffff);
    mad.set_dr_dlid(0xffff);
    mad
}

#[test]
fn handler_reply() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let req = get_node_info(mgmt_class::SUBN_LID_ROUTED, 0xdead_beef_0000_0001);

    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    bench.agent.progress();

    let (av, reply) = bench.take_sent_mads().pop().unwrap();
    assert_eq!(av.qpn, QPN_SMA);
    assert_eq!(av.qkey, QKEY_SMA);
    assert_eq!(av.lid, peer_sma().lid);
    assert_eq!(av.rate, RATE_2_5);

    assert_eq!(reply.tid(), req.tid());
    assert_eq!(reply.method(), method::GET_RESP);
    assert_eq!(reply.status(), status::OK);
    assert_eq!(&reply.smp_data()[..2], &[1, PORT]);
}

#[test]
fn reply_qkey_follows_destination_qp() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let req = get_node_info(mgmt_class::SUBN_LID_ROUTED, 7);

    let odd_peer = AddressVector {
        qpn: 0x99,
        qkey: 0x1111_2222,
        ..peer_gma()
    };
    assert!(bench.deliver(odd_peer, req.as_bytes()));
    bench.agent.progress();

    let (av, _) = bench.take_sent_mads().pop().unwrap();
    assert_eq!(av.qpn, 0x99);
    assert_eq!(av.qkey, QKEY_GMA);
}

#[test]
fn echo_round_trip() {
    let handlers = DispatchTable::new().bind(
        DispatchKey::new(mgmt_class::SUBN_ADM, 2, method::GET_RESP, NODE_DESC),
        method::NONE,
        swallow,
    );
    let bench = Bench::new(AgentConfig::default(), handlers);

    let req = Mad::new(mgmt_class::SUBN_ADM, 2, method::GET, NODE_DESC);
    let tids = (0..3)
        .map(|_| bench.agent.issue_request(&req, Some(peer_gma())).unwrap())
        .collect::<Vec<_>>();
    bench.agent.progress();

    // Echo back the middle one.
    let (_, mut echo) = bench.take_sent_mads().remove(1);
    assert_eq!(echo.tid(), tids[1]);
    echo.set_method(method::GET_RESP);
    echo.set_status(status::OK);
    assert!(bench.deliver(peer_gma(), echo.as_bytes()));
    bench.agent.progress();

    assert!(bench.agent.is_outstanding(tids[0]));
    assert!(!bench.agent.is_outstanding(tids[1]));
    assert!(bench.agent.is_outstanding(tids[2]));
    assert_eq!(bench.tp.sent_count(), 0);

    // A duplicate response changes nothing.
    assert!(bench.deliver(peer_gma(), echo.as_bytes()));
    bench.agent.progress();
    assert_eq!(bench.agent.outstanding(), 2);
}

#[test]
fn unknown_tid_leaves_registry() {
    let bench = Bench::with_defaults();
    let req = Mad::new(mgmt_class::SUBN_ADM, 2, method::GET, NODE_DESC);
    let tid = bench.agent.issue_request(&req, None).unwrap();

    let mut stray = req;
    stray.set_tid(tid + 1000);
    stray.set_method(method::GET_RESP);
    assert!(bench.deliver(peer_gma(), stray.as_bytes()));
    bench.agent.progress();

    assert!(bench.agent.is_outstanding(tid));
    assert_eq!(bench.agent.outstanding(), 1);
}

#[test]
fn directed_route_turnaround() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let req = directed_route(2, 2);

    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    bench.agent.progress();

    let (av, reply) = bench.take_sent_mads().pop().unwrap();
    assert_eq!(av.qkey, QKEY_SMA);
    assert_eq!(reply.method(), method::GET_RESP);
    assert_ne!(reply.status() & status::D_INBOUND, 0);
    assert_eq!(&reply.return_path()[..4], &[0, 0, PORT, 0]);
    assert!(reply.return_path()[3..].iter().all(|&hop| hop == 0));
    assert_eq!(reply.hop_pointer(), 2);
    assert_eq!(reply.smp_data()[1], PORT);
}

#[test]
fn directed_route_last_slot() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let last = (DR_PATH_HOPS - 1) as u8;

    assert!(bench.deliver(peer_sma(), directed_route(last, last).as_bytes()));
    bench.agent.progress();

    let (_, reply) = bench.take_sent_mads().pop().unwrap();
    assert_eq!(reply.return_path()[DR_PATH_HOPS - 1], PORT);
}

#[test]
fn directed_route_out_of_range() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let beyond = DR_PATH_HOPS as u8;

    assert!(bench.deliver(peer_sma(), directed_route(beyond, beyond).as_bytes()));
    assert!(bench.deliver(peer_sma(), directed_route(0xff, 0xff).as_bytes()));
    bench.agent.progress();
    assert_eq!(bench.tp.sent_count(), 0);
}

#[test]
fn directed_route_hop_mismatch() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());

    assert!(bench.deliver(peer_sma(), directed_route(1, 3).as_bytes()));
    bench.agent.progress();
    assert_eq!(bench.tp.sent_count(), 0);
}

#[test]
fn malformed_input_dropped() {
    let calls = Rc::new(Cell::new(0));
    let handlers = {
        let calls = calls.clone();
        DispatchTable::new().bind(
            DispatchKey::new(mgmt_class::SUBN_ADM, 2, method::GET_RESP, NODE_DESC),
            method::NONE,
            move |_, _| {
                calls.set(calls.get() + 1);
                Ok(())
            },
        )
    };
    let config = AgentConfig::new().with_num_recv_wqes(8);
    let bench = Bench::new(config, handlers);

    let req = Mad::new(mgmt_class::SUBN_ADM, 2, method::GET, NODE_DESC);
    let tid = bench.agent.issue_request(&req, None).unwrap();
    bench.agent.progress();
    let (_, mut resp) = bench.take_sent_mads().pop().unwrap();
    resp.set_method(method::GET_RESP);

    // Short, long, and empty payloads.
    assert!(bench.deliver(peer_gma(), &resp.as_bytes()[..MAD_SIZE - 1]));
    let mut long = resp.as_bytes().to_vec();
    long.push(0);
    assert!(bench.deliver(peer_gma(), &long));
    assert!(bench.deliver(peer_gma(), &[]));

    // Unsupported base version.
    let mut bad_version = resp;
    bad_version.set_base_version(2);
    assert!(bench.deliver(peer_gma(), bad_version.as_bytes()));

    // Receive error.
    assert!(bench
        .tp
        .deliver(bench.agent.qp(), peer_gma(), resp.as_bytes(), Err(CompletionError::LocalLength)));

    bench.agent.progress();
    assert_eq!(calls.get(), 0);
    assert!(bench.agent.is_outstanding(tid));
    assert_eq!(bench.tp.sent_count(), 0);

    // A well-formed copy still goes through.
    assert!(bench.deliver(peer_gma(), resp.as_bytes()));
    bench.agent.progress();
    assert_eq!(calls.get(), 1);
    assert!(!bench.agent.is_outstanding(tid));
}

#[test]
fn unsupported_gets_trap() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let mut req = Mad::new(mgmt_class::PERF, 1, method::GET, 0x0012);
    req.set_tid(77);

    assert!(bench.deliver(peer_gma(), req.as_bytes()));
    bench.agent.progress();

    let (av, trap) = bench.take_sent_mads().pop().unwrap();
    assert_eq!(av.qkey, QKEY_GMA);
    assert_eq!(trap.tid(), 77);
    assert_eq!(trap.method(), method::TRAP);
    assert_eq!(trap.status(), status::UNSUPPORTED_METHOD_ATTR);
}

#[test]
fn unsupported_silent_without_trap() {
    let config = AgentConfig::new().with_trap_unsupported(false);
    let bench = Bench::new(config, node_info_handlers());
    let req = Mad::new(mgmt_class::PERF, 1, method::GET, 0x0012);

    assert!(bench.deliver(peer_gma(), req.as_bytes()));
    bench.agent.progress();
    assert_eq!(bench.tp.sent_count(), 0);
}

#[test]
fn handler_status_in_reply() {
    let handlers = DispatchTable::new().bind(
        DispatchKey::new(mgmt_class::SUBN_LID_ROUTED, 1, method::SET, NODE_DESC),
        method::GET_RESP,
        |_, _| Err(status::INVALID_VALUE),
    );
    let bench = Bench::new(AgentConfig::default(), handlers);
    let req = Mad::new(mgmt_class::SUBN_LID_ROUTED, 1, method::SET, NODE_DESC);

    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    bench.agent.progress();

    let (_, reply) = bench.take_sent_mads().pop().unwrap();
    assert_eq!(reply.method(), method::GET_RESP);
    assert_eq!(reply.status(), status::INVALID_VALUE);
}

#[test]
fn reply_failure_is_not_retried() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let req = get_node_info(mgmt_class::SUBN_LID_ROUTED, 9);

    bench.tp.fail_next_sends(1);
    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    bench.agent.progress();
    bench.advance(Duration::from_secs(60));
    bench.agent.progress();
    assert_eq!(bench.tp.sent_count(), 0);
}

#[test]
fn receive_ring_refilled() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let qp = bench.agent.qp();
    let req = get_node_info(mgmt_class::SUBN_LID_ROUTED, 9);

    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    assert!(!bench.deliver(peer_sma(), req.as_bytes()));
    assert_eq!(bench.tp.recv_posted(qp), 0);

    bench.agent.progress();
    assert_eq!(bench.tp.recv_posted(qp), 2);
    assert_eq!(bench.tp.sent_count(), 2);
}

#[test]
fn handler_may_call_into_agent() {
    init_logger();
    let device = Rc::new(IbDevice::new(PORT));
    device.set_sm(SM_LID, 0);
    let tp = Rc::new(SimTransport::new());
    let (clock, _mock) = Clock::mock();

    let slot: Rc<RefCell<Weak<Agent<SimTransport>>>> = Rc::new(RefCell::new(Weak::new()));
    let seen = Rc::new(Cell::new(None));
    let handlers = {
        let (slot, seen) = (slot.clone(), seen.clone());
        DispatchTable::new().bind(
            DispatchKey::new(mgmt_class::SUBN_LID_ROUTED, 1, method::GET, NODE_INFO),
            method::GET_RESP,
            move |_: &IbDevice, mad: &mut Mad| -> HandlerResult {
                let agent = slot.borrow().upgrade().unwrap();
                let before = agent.outstanding();
                let req = Mad::new(mgmt_class::SUBN_ADM, 2, method::GET, NODE_DESC);
                let tid = agent.issue_request(&req, None).unwrap();
                // Nested event loop iterations are ignored.
                agent.progress();
                seen.set(Some((before, tid, agent.is_outstanding(tid))));
                mad.smp_data_mut()[0] = 1;
                Ok(())
            },
        )
    };

    let agent = Rc::new(
        Agent::builder(device, tp.clone())
            .handlers(handlers)
            .clock(clock)
            .create()
            .unwrap(),
    );
    *slot.borrow_mut() = Rc::downgrade(&agent);

    let first = agent
        .issue_request(&get_node_info(mgmt_class::SUBN_ADM, 0), Some(peer_gma()))
        .unwrap();
    let req = get_node_info(mgmt_class::SUBN_LID_ROUTED, 5);
    assert!(tp.deliver(agent.qp(), peer_sma(), req.as_bytes(), Ok(())));
    agent.progress();

    let (before, nested, outstanding) = seen.get().unwrap();
    assert_eq!(before, 1);
    assert!(outstanding);
    assert_eq!(agent.outstanding(), 2);
    assert!(agent.is_outstanding(first) && agent.is_outstanding(nested));

    // The reply, then both requests in TID order.
    let sent = tp
        .take_sent()
        .into_iter()
        .map(|sent| Mad::from_bytes(&sent.bytes).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].tid(), 5);
    assert_eq!(sent[0].method(), method::GET_RESP);
    assert_eq!(sent[1].tid(), first);
    assert_eq!(sent[2].tid(), nested);
}

#[test]
fn reply_buffer_travels_with_completion() {
    let bench = Bench::new(AgentConfig::default(), node_info_handlers());
    let qp = bench.agent.qp();
    let req = get_node_info(mgmt_class::SUBN_LID_ROUTED, 11);

    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    assert!(bench.deliver(peer_sma(), req.as_bytes()));
    bench.agent.progress();

    // Both receive buffers now sit in the send queue as replies.
    assert_eq!(bench.tp.in_flight(qp), 2);
    assert_eq!(bench.complete_sends(), 2);
    assert_eq!(bench.tp.in_flight(qp), 0);
    bench.agent.progress();

    let sent = bench.take_sent_mads();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, mad)| mad.tid() == 11));
}
