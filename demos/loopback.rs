//! Two management agents talking over a simulated fabric.
//!
//! A requester issues `Get(NodeDescription)` to a responder on the same
//! simulated transport. The loop below plays the fabric, moving every posted
//! send into the receive queue of the agent it is addressed to.

use ibgma::{mad::*, transport::sim::*, transport::*, *};
use simple_logger::SimpleLogger;
use std::rc::Rc;

const NODE_DESC: u16 = 0x0010;
const DESCRIPTION: &str = "ibgma loopback node";

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .unwrap();

    let tp = Rc::new(SimTransport::new());
    let tids = Rc::new(TidAllocator::new());

    // Responder.
    let responder_port = Rc::new(IbDevice::new(1));
    responder_port.set_lid(0x0002);
    let responder = Agent::builder(responder_port, tp.clone())
        .tid_allocator(tids.clone())
        .handlers(DispatchTable::new().bind(
            DispatchKey::new(mgmt_class::SUBN_ADM, 2, method::GET, NODE_DESC),
            method::GET_RESP,
            |_, mad| {
                let desc = DESCRIPTION.as_bytes();
                mad.data_mut()[..desc.len()].copy_from_slice(desc);
                Ok(())
            },
        ))
        .create()
        .unwrap();

    // Requester.
    let requester_port = Rc::new(IbDevice::new(1));
    requester_port.set_lid(0x0001);
    let requester = Agent::builder(requester_port, tp.clone())
        .tid_allocator(tids)
        .handlers(DispatchTable::new().bind(
            DispatchKey::new(mgmt_class::SUBN_ADM, 2, method::GET_RESP, NODE_DESC),
            method::NONE,
            |_, mad| {
                let text = mad.data().split(|&b| b == 0).next().unwrap_or_default();
                println!("node description: {}", String::from_utf8_lossy(text));
                Ok(())
            },
        ))
        .create()
        .unwrap();

    let req = Mad::new(mgmt_class::SUBN_ADM, 2, method::GET, NODE_DESC);
    let dst = AddressVector {
        qpn: responder.qpn(),
        qkey: QKEY_GMA,
        lid: 0x0002,
        ..Default::default()
    };
    let tid = requester.issue_request(&req, Some(dst)).unwrap();
    println!("issued TID {:#018x}", tid);

    while requester.is_outstanding(tid) {
        requester.progress();
        responder.progress();

        // Play the fabric.
        for sent in tp.take_sent() {
            tp.complete_sends(sent.qp, Ok(()));
            let (to, from) = if sent.av.qpn == responder.qpn() {
                (responder.qp(), requester.qpn())
            } else {
                (requester.qp(), responder.qpn())
            };
            let src = AddressVector {
                qpn: from,
                ..sent.av
            };
            tp.deliver(to, src, &sent.bytes, Ok(()));
        }
    }
    requester.progress();

    println!("TID {:#018x} completed", tid);
    requester.destroy();
    responder.destroy();
}
