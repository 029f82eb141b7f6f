//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use rove_fea::iftree::{
    IfTree, IfTreeAddr4, IfTreeAddr6, IfTreeInterface, IfTreeSink, IfTreeVif,
    NodeState,
};
use rove_utils::southbound::InterfaceFlags;

fn sample_tree() -> IfTree {
    let mut tree = IfTree::default();

    let iface = tree.add_interface("eth0");
    iface.mtu = Some(1500);
    iface.enabled = true;
    iface.flags = InterfaceFlags::OPERATIVE | InterfaceFlags::BROADCAST;
    let vif = iface.add_vif("eth0");
    vif.enabled = true;
    vif.add_addr4(
        "192.0.2.1".parse().unwrap(),
        24,
        Some("192.0.2.255".parse().unwrap()),
        None,
    );
    vif.add_addr6("2001:db8::1".parse().unwrap(), 64, None);
    tree.set_ifindex("eth0", Some(2));

    let iface = tree.add_interface("lo");
    iface.mtu = Some(65536);
    iface.flags = InterfaceFlags::LOOPBACK | InterfaceFlags::OPERATIVE;
    iface.add_vif("lo");
    tree.set_ifindex("lo", Some(1));

    tree
}

#[derive(Default)]
struct RecordingSink {
    events: Vec<String>,
}

impl IfTreeSink for RecordingSink {
    fn interface_update(&mut self, iface: &IfTreeInterface) {
        self.events.push(format!("if:{}", iface.ifname));
    }

    fn vif_update(&mut self, _iface: &IfTreeInterface, vif: &IfTreeVif) {
        self.events.push(format!("vif:{}", vif.vifname));
    }

    fn vifaddr4_update(
        &mut self,
        _iface: &IfTreeInterface,
        vif: &IfTreeVif,
        addr: &IfTreeAddr4,
    ) {
        self.events.push(format!("addr4:{}:{}", vif.vifname, addr.addr));
    }

    fn vifaddr6_update(
        &mut self,
        _iface: &IfTreeInterface,
        vif: &IfTreeVif,
        addr: &IfTreeAddr6,
    ) {
        self.events.push(format!("addr6:{}:{}", vif.vifname, addr.addr));
    }

    fn updates_completed(&mut self) {
        self.events.push("done".to_owned());
    }
}

#[test]
fn report_order_is_topological() {
    let tree = sample_tree();
    let mut sink = RecordingSink::default();
    tree.report_updates(&mut sink);

    let if_pos = |name: &str| {
        sink.events
            .iter()
            .position(|event| event == &format!("if:{name}"))
            .unwrap()
    };
    let vif_pos = sink
        .events
        .iter()
        .position(|event| event == "vif:eth0")
        .unwrap();
    let addr_pos = sink
        .events
        .iter()
        .position(|event| event.starts_with("addr4:eth0"))
        .unwrap();

    assert!(if_pos("eth0") < vif_pos);
    assert!(vif_pos < addr_pos);
    assert_eq!(sink.events.last().unwrap(), "done");
}

#[test]
fn finalize_collapses_states() {
    let mut tree = sample_tree();
    tree.finalize_state();

    let mut sink = RecordingSink::default();
    tree.report_updates(&mut sink);

    // Only the completion marker remains after finalization.
    assert_eq!(sink.events, vec!["done".to_owned()]);
}

#[test]
fn cascading_delete() {
    let mut tree = sample_tree();
    tree.finalize_state();

    tree.remove_interface("eth0");
    let mut sink = RecordingSink::default();
    tree.report_updates(&mut sink);
    assert!(sink.events.contains(&"if:eth0".to_owned()));
    assert!(sink.events.contains(&"vif:eth0".to_owned()));

    tree.finalize_state();
    assert!(tree.interface("eth0").is_none());
    assert!(tree.interface("lo").is_some());
}

#[test]
fn diff_roundtrip() {
    let mut t0 = sample_tree();
    t0.finalize_state();

    // A second tree with one interface changed, one added and one removed.
    let mut t1 = t0.clone();
    t1.remove_interface("lo");
    t1.finalize_state();
    t1.interface_mut("eth0").unwrap().mtu = Some(9000);
    let iface = t1.add_interface("eth1");
    iface.mtu = Some(1500);
    iface.add_vif("eth1");
    t1.set_ifindex("eth1", Some(3));
    t1.finalize_state();

    let forward = t0.diff(&t1);
    let mut walked = t0.clone();
    walked.apply(&forward);
    assert_eq!(walked, t1);

    let backward = t1.diff(&t0);
    walked.apply(&backward);
    assert_eq!(walked, t0);
}

#[test]
fn ifindex_map_consistency() {
    let mut tree = sample_tree();
    assert_eq!(tree.ifname_by_ifindex(2), Some("eth0"));

    tree.set_ifindex("eth0", Some(7));
    assert_eq!(tree.ifname_by_ifindex(7), Some("eth0"));
    assert_eq!(tree.ifname_by_ifindex(2), None);

    tree.remove_interface("eth0");
    assert_eq!(tree.ifname_by_ifindex(7), None);
}
