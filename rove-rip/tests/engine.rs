//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use bytes::Bytes;
use chrono::Utc;
use rove_rip::auth::{AuthCfg, AuthCtx, AuthMethod};
use rove_rip::config::{InstanceCfg, PortCfg, SplitHorizon};
use rove_rip::instance::{Instance, InstanceChannelsTx};
use rove_rip::packet::{Command, PduVersion};
use rove_rip::port::{Port, PortUp};
use rove_rip::ripv2::packet::{Pdu, Rte, RteIpv4, RteZero};
use rove_rip::route::Metric;
use rove_rip::tasks::messages::ProtocolOutputMsg;
use rove_rip::tasks::messages::input::{
    InitialUpdateMsg, PeerPurgeMsg, PeerTimeoutMsg, ProtocolMsg,
    RouteGcTimeoutMsg, RouteTimeoutMsg, TriggeredUpdMsg,
    TriggeredUpdTimeoutMsg, UdpRxBufMsg, UpdateIntervalMsg,
};
use rove_rip::version::Ripv2;
use rove_utils::crypto::CryptoAlgo;
use rove_utils::ibus::{IbusMsg, IbusReceiver};
use rove_utils::keychain::{Key, Keychain, KeychainKey};
use rove_utils::southbound::{
    AddressFlags, AddressMsg, InterfaceFlags, InterfaceUpdateMsg,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::Receiver;

const RIP_PORT: u16 = 520;

struct TestNode {
    instance: Instance<Ripv2>,
    ibus_rx: IbusReceiver,
    _out_rx: Receiver<ProtocolOutputMsg<Ripv2>>,
}

//
// Helper functions.
//

fn build_node() -> TestNode {
    let (ibus_tx, ibus_rx) = mpsc::unbounded_channel();
    let (proto_input_tx, _proto_input_rx) =
        Instance::<Ripv2>::protocol_input_channels();
    let (out_tx, out_rx) = mpsc::channel(64);

    let tx = InstanceChannelsTx {
        ibus: ibus_tx,
        protocol_input: proto_input_tx,
        protocol_output: out_tx,
    };
    let mut instance =
        Instance::new("test".to_owned(), InstanceCfg::default(), tx);
    instance.update();

    TestNode {
        instance,
        ibus_rx,
        _out_rx: out_rx,
    }
}

fn add_port(node: &mut TestNode, ifname: &str, ifindex: u32, addr: &str) {
    node.instance
        .process_ibus_msg(IbusMsg::InterfaceUpd(InterfaceUpdateMsg {
            ifname: ifname.to_owned(),
            ifindex,
            mtu: 1500,
            flags: InterfaceFlags::OPERATIVE
                | InterfaceFlags::BROADCAST
                | InterfaceFlags::MULTICAST,
            mac_address: Default::default(),
        }));
    node.instance
        .process_ibus_msg(IbusMsg::InterfaceAddressAdd(AddressMsg {
            ifname: ifname.to_owned(),
            addr: addr.parse().unwrap(),
            flags: AddressFlags::empty(),
        }));
}

fn port_up<'a>(
    instance: &'a mut Instance<Ripv2>,
    ifname: &str,
) -> &'a mut PortUp<Ripv2> {
    instance
        .ports
        .arena
        .iter_mut()
        .find_map(|(_, port)| match port {
            Port::Up(port) if port.core.name == ifname => Some(port),
            _ => None,
        })
        .expect("port is not up")
}

fn port_cfg_mut<'a>(
    instance: &'a mut Instance<Ripv2>,
    ifname: &str,
) -> &'a mut PortCfg<Ripv2> {
    instance
        .ports
        .arena
        .iter_mut()
        .find_map(|(_, port)| match port {
            Port::Up(port) if port.core.name == ifname => {
                Some(&mut port.core.config)
            }
            Port::Down(port) if port.core.name == ifname => {
                Some(&mut port.core.config)
            }
            _ => None,
        })
        .expect("port not found")
}

fn recv_packet(node: &mut TestNode, src: &str, src_port: u16, data: Bytes) {
    let src = SocketAddrV4::new(src.parse().unwrap(), src_port);
    node.instance
        .process_protocol_msg(ProtocolMsg::UdpRxBuf(UdpRxBufMsg {
            src,
            data,
        }));
}

fn recv_response(node: &mut TestNode, src: &str, rtes: Vec<Rte>) {
    let pdu = Pdu::new(Command::Response, rtes);
    let data = pdu.encode(None).freeze();
    recv_packet(node, src, RIP_PORT, data);
}

fn route_rte(prefix: &str, metric: u8) -> Rte {
    Rte::Ipv4(RteIpv4 {
        tag: 0,
        prefix: prefix.parse().unwrap(),
        nexthop: None,
        metric: Metric::from(metric),
    })
}

// Drains a port's packet queue and returns the route entries of all queued
// Response PDUs.
fn drain_responses(port: &mut PortUp<Ripv2>) -> Vec<RteIpv4> {
    let mut rtes = vec![];
    while let Some(packet) = port.state.packet_queue.pop_head() {
        if packet.pdu.command == Command::Response {
            for rte in &packet.pdu.rtes {
                if let Rte::Ipv4(rte) = rte {
                    rtes.push(RteIpv4 {
                        tag: rte.tag,
                        prefix: rte.prefix,
                        nexthop: rte.nexthop,
                        metric: rte.metric,
                    });
                }
            }
        }
    }
    rtes
}

fn flush_queues(node: &mut TestNode, ifnames: &[&str]) {
    for ifname in ifnames {
        port_up(&mut node.instance, ifname)
            .state
            .packet_queue
            .flush();
    }
}

fn find_rte(rtes: &[RteIpv4], prefix: &str) -> Option<RteIpv4> {
    let prefix = prefix.parse().unwrap();
    rtes.iter()
        .find(|rte| rte.prefix == prefix)
        .map(|rte| RteIpv4 {
            tag: rte.tag,
            prefix: rte.prefix,
            nexthop: rte.nexthop,
            metric: rte.metric,
        })
}

//
// Tests.
//

#[tokio::test]
async fn learn_and_advertise() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");
    add_port(&mut node, "eth1", 3, "10.0.2.1/24");
    node.instance
        .process_protocol_msg(ProtocolMsg::InitialUpdate(InitialUpdateMsg {}));

    // Learn a route from a peer on eth0.
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 3)]);

    // The learned route carries the advertised metric plus the port cost,
    // with the peer as source and nexthop.
    let state = node.instance.state.as_ref().unwrap();
    let route = &state.routes[&"10.99.0.0/16".parse().unwrap()];
    assert_eq!(route.metric.get(), 4);
    assert_eq!(route.source, Some("10.0.1.5".parse().unwrap()));
    assert_eq!(route.nexthop, Some("10.0.1.5".parse().unwrap()));

    // The route was pushed towards the forwarding plane.
    let mut installed = false;
    while let Ok(msg) = node.ibus_rx.try_recv() {
        if let IbusMsg::RouteIpAdd(msg) = msg {
            assert_eq!(msg.prefix, "10.99.0.0/16".parse().unwrap());
            assert_eq!(msg.metric, 4);
            installed = true;
        }
    }
    assert!(installed);

    // On the learning port, poison reverse advertises the route back with
    // an infinite metric; on the other port it goes out at cost 4.
    flush_queues(&mut node, &["eth0", "eth1"]);
    node.instance.process_protocol_msg(ProtocolMsg::UpdateInterval(
        UpdateIntervalMsg {
            ifname: "eth0".to_owned(),
        },
    ));
    node.instance.process_protocol_msg(ProtocolMsg::UpdateInterval(
        UpdateIntervalMsg {
            ifname: "eth1".to_owned(),
        },
    ));

    let rtes = drain_responses(port_up(&mut node.instance, "eth0"));
    let rte = find_rte(&rtes, "10.99.0.0/16").unwrap();
    assert_eq!(rte.metric.get(), Metric::INFINITE);

    let rtes = drain_responses(port_up(&mut node.instance, "eth1"));
    let rte = find_rte(&rtes, "10.99.0.0/16").unwrap();
    assert_eq!(rte.metric.get(), 4);
}

#[tokio::test]
async fn metric_clamp() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");

    // A route arriving at metric 15 becomes infinite after the port cost is
    // added; infinite routes are never created.
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 15)]);
    let state = node.instance.state.as_ref().unwrap();
    assert!(!state.routes.contains_key(&"10.99.0.0/16".parse().unwrap()));

    // Metric 14 + cost 1 = 15: learned.
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 14)]);
    let state = node.instance.state.as_ref().unwrap();
    let route = &state.routes[&"10.99.0.0/16".parse().unwrap()];
    assert_eq!(route.metric.get(), 15);

    // The same peer re-advertising at metric 15 poisons the route; infinity
    // is absorbing and the route is withdrawn.
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 15)]);
    let state = node.instance.state.as_ref().unwrap();
    let route = &state.routes[&"10.99.0.0/16".parse().unwrap()];
    assert_eq!(route.metric.get(), Metric::INFINITE);

    let mut withdrawn = false;
    while let Ok(msg) = node.ibus_rx.try_recv() {
        if let IbusMsg::RouteIpDel(msg) = msg {
            assert_eq!(msg.prefix, "10.99.0.0/16".parse().unwrap());
            withdrawn = true;
        }
    }
    assert!(withdrawn);
}

#[tokio::test]
async fn split_horizon_simple() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");
    add_port(&mut node, "eth1", 3, "10.0.2.1/24");
    port_cfg_mut(&mut node.instance, "eth0").split_horizon =
        SplitHorizon::Simple;
    node.instance
        .process_protocol_msg(ProtocolMsg::InitialUpdate(InitialUpdateMsg {}));

    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 3)]);

    flush_queues(&mut node, &["eth0", "eth1"]);
    node.instance.process_protocol_msg(ProtocolMsg::UpdateInterval(
        UpdateIntervalMsg {
            ifname: "eth0".to_owned(),
        },
    ));
    node.instance.process_protocol_msg(ProtocolMsg::UpdateInterval(
        UpdateIntervalMsg {
            ifname: "eth1".to_owned(),
        },
    ));

    // Simple split horizon omits the route on the learning port entirely.
    let rtes = drain_responses(port_up(&mut node.instance, "eth0"));
    assert!(find_rte(&rtes, "10.99.0.0/16").is_none());

    let rtes = drain_responses(port_up(&mut node.instance, "eth1"));
    assert!(find_rte(&rtes, "10.99.0.0/16").is_some());
}

#[tokio::test]
async fn request_handling() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 3)]);
    flush_queues(&mut node, &["eth0"]);

    // A whole-table request from the RIP port triggers a full dump.
    let dump_request = Pdu::new(
        Command::Request,
        vec![Rte::Zero(RteZero {
            metric: Metric::from(Metric::INFINITE),
        })],
    );
    let data = dump_request.encode(None).freeze();
    recv_packet(&mut node, "10.0.1.6", RIP_PORT, data);

    let rtes = drain_responses(port_up(&mut node.instance, "eth0"));
    assert!(find_rte(&rtes, "10.99.0.0/16").is_some());

    // A specific query is answered with the route's metric, or infinity
    // for unknown prefixes.
    let query = Pdu::new(
        Command::Request,
        vec![
            route_rte("10.99.0.0/16", 1),
            route_rte("198.51.100.0/24", 1),
        ],
    );
    let data = query.encode(None).freeze();
    recv_packet(&mut node, "10.0.1.7", 5555, data);

    let rtes = drain_responses(port_up(&mut node.instance, "eth0"));
    assert_eq!(find_rte(&rtes, "10.99.0.0/16").unwrap().metric.get(), 4);
    assert_eq!(
        find_rte(&rtes, "198.51.100.0/24").unwrap().metric.get(),
        Metric::INFINITE
    );

    // Diagnostic queries are refused once non-RIP requests are disabled.
    port_cfg_mut(&mut node.instance, "eth0").accept_non_rip_requests = false;
    let query = Pdu::new(Command::Request, vec![route_rte("10.99.0.0/16", 1)]);
    let data = query.encode(None).freeze();
    recv_packet(&mut node, "10.0.1.7", 5555, data);
    assert!(
        port_up(&mut node.instance, "eth0")
            .state
            .packet_queue
            .is_empty()
    );
}

#[tokio::test]
async fn md5_replay_rejection() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");

    // Configure keyed-MD5 authentication on the port.
    let mut keychain = Keychain::new("test".to_owned());
    keychain.add_key(KeychainKey::new(Key::new(
        1,
        CryptoAlgo::Md5,
        b"HOLDFAST".to_vec(),
    )));
    port_cfg_mut(&mut node.instance, "eth0").auth =
        AuthCfg::Md5(keychain.clone());

    // Encode authenticated packets with sequence numbers 10, 11 and 12.
    let seqno = Arc::new(AtomicU32::new(10));
    let mut packets = vec![];
    for _ in 0..3 {
        let auth = AuthCtx {
            method: AuthMethod::Md5(&keychain),
            seqno: &seqno,
            now: Utc::now(),
        };
        let pdu =
            Pdu::new(Command::Response, vec![route_rte("10.99.0.0/16", 3)]);
        packets.push(pdu.encode(Some(&auth)).freeze());
    }

    recv_packet(&mut node, "10.0.1.5", RIP_PORT, packets[0].clone());
    recv_packet(&mut node, "10.0.1.5", RIP_PORT, packets[1].clone());
    recv_packet(&mut node, "10.0.1.5", RIP_PORT, packets[2].clone());

    // Replaying the second packet is rejected; the last accepted sequence
    // number is unchanged.
    recv_packet(&mut node, "10.0.1.5", RIP_PORT, packets[1].clone());

    let port = port_up(&mut node.instance, "eth0");
    assert_eq!(port.state.statistics.bad_auth_packets_rcvd, 1);
    let peer = &port.state.peers[&"10.0.1.5".parse().unwrap()];
    assert_eq!(peer.auth_seqno, 12);
}

#[tokio::test]
async fn triggered_update_sends_changed_routes_only() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");
    add_port(&mut node, "eth1", 3, "10.0.2.1/24");
    node.instance
        .process_protocol_msg(ProtocolMsg::InitialUpdate(InitialUpdateMsg {}));
    flush_queues(&mut node, &["eth0", "eth1"]);

    // First triggered update flushes everything marked changed and clears
    // the flags.
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 3)]);
    node.instance
        .process_protocol_msg(ProtocolMsg::TriggeredUpd(TriggeredUpdMsg {}));
    let rtes = drain_responses(port_up(&mut node.instance, "eth1"));
    assert!(find_rte(&rtes, "10.99.0.0/16").is_some());
    flush_queues(&mut node, &["eth0", "eth1"]);

    // While the hold-down runs, further triggers coalesce.
    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.77.0.0/16", 2)]);
    node.instance
        .process_protocol_msg(ProtocolMsg::TriggeredUpd(TriggeredUpdMsg {}));
    assert!(
        port_up(&mut node.instance, "eth1")
            .state
            .packet_queue
            .is_empty()
    );

    // The hold-down expiry flushes only the routes changed since the last
    // dump.
    node.instance.process_protocol_msg(ProtocolMsg::TriggeredUpdTimeout(
        TriggeredUpdTimeoutMsg {},
    ));
    let rtes = drain_responses(port_up(&mut node.instance, "eth1"));
    assert!(find_rte(&rtes, "10.77.0.0/16").is_some());
    assert!(find_rte(&rtes, "10.99.0.0/16").is_none());
}

#[tokio::test]
async fn peer_garbage_collection() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");
    let peer_addr = "10.0.1.5".parse().unwrap();

    recv_response(&mut node, "10.0.1.5", vec![route_rte("10.99.0.0/16", 3)]);

    // A peer that still contributes routes survives its timeout.
    node.instance
        .process_protocol_msg(ProtocolMsg::PeerTimeout(PeerTimeoutMsg {
            ifname: "eth0".to_owned(),
            addr: peer_addr,
        }));
    assert!(
        port_up(&mut node.instance, "eth0")
            .state
            .peers
            .contains_key(&peer_addr)
    );

    // Expire and flush the peer's only route.
    let prefix = "10.99.0.0/16".parse().unwrap();
    node.instance
        .process_protocol_msg(ProtocolMsg::RouteTimeout(RouteTimeoutMsg {
            prefix,
        }));
    node.instance.process_protocol_msg(ProtocolMsg::RouteGcTimeout(
        RouteGcTimeoutMsg { prefix },
    ));
    let state = node.instance.state.as_ref().unwrap();
    assert!(!state.routes.contains_key(&prefix));

    // Now the peer is collected, but its counters stay observable.
    node.instance
        .process_protocol_msg(ProtocolMsg::PeerTimeout(PeerTimeoutMsg {
            ifname: "eth0".to_owned(),
            addr: peer_addr,
        }));
    let port = port_up(&mut node.instance, "eth0");
    assert!(!port.state.peers.contains_key(&peer_addr));
    let retired = &port.state.retired_peers[&peer_addr];
    assert_eq!(retired.counters.responses_rcvd, 1);

    // Retention expiry drops the counters for good.
    node.instance
        .process_protocol_msg(ProtocolMsg::PeerPurge(PeerPurgeMsg {
            ifname: "eth0".to_owned(),
            addr: peer_addr,
        }));
    assert!(
        port_up(&mut node.instance, "eth0")
            .state
            .retired_peers
            .is_empty()
    );
}

#[tokio::test]
async fn own_address_routes_rejected() {
    let mut node = build_node();
    add_port(&mut node, "eth0", 2, "10.0.1.1/24");

    // Advertisements for our own address or an attached subnet's broadcast
    // address are counted and dropped.
    recv_response(
        &mut node,
        "10.0.1.5",
        vec![
            route_rte("10.0.1.1/32", 1),
            route_rte("10.0.1.255/32", 1),
            route_rte("10.99.0.0/16", 1),
        ],
    );

    let state = node.instance.state.as_ref().unwrap();
    assert!(!state.routes.contains_key(&"10.0.1.1/32".parse().unwrap()));
    assert!(!state.routes.contains_key(&"10.0.1.255/32".parse().unwrap()));
    assert!(state.routes.contains_key(&"10.99.0.0/16".parse().unwrap()));

    let port = port_up(&mut node.instance, "eth0");
    assert_eq!(port.state.statistics.bad_routes_rcvd, 2);
}
