//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use rove_fea::fib::{Fib, FibChange, Fte, FteFlags};
use rove_fea::iftree::IfTree;
use rove_utils::protocol::Protocol;

fn test_tree() -> IfTree {
    let mut tree = IfTree::default();
    let iface = tree.add_interface("eth0");
    iface.enabled = true;
    iface.add_vif("eth0");
    tree.set_ifindex("eth0", Some(2));
    tree.add_interface("discard0").add_vif("discard0");
    tree.finalize_state();
    tree
}

fn rip_fte(net: &str, nexthop: &str, metric: u32) -> Fte {
    Fte::new(
        net.parse().unwrap(),
        Some(nexthop.parse().unwrap()),
        "eth0".to_owned(),
        "eth0".to_owned(),
        metric,
        120,
        Protocol::RIPV2,
        FteFlags::empty(),
    )
}

#[test]
fn add_and_lookup() {
    let tree = test_tree();
    let mut fib = Fib::new();

    fib.add_entry(rip_fte("10.0.0.0/8", "192.0.2.1", 2), &tree)
        .unwrap();
    fib.add_entry(rip_fte("10.1.0.0/16", "192.0.2.2", 3), &tree)
        .unwrap();

    // Longest-prefix match.
    let fte = fib
        .lookup_by_dest(&"10.1.2.3".parse().unwrap())
        .expect("missing route");
    assert_eq!(fte.net, "10.1.0.0/16".parse().unwrap());
    let fte = fib
        .lookup_by_dest(&"10.2.0.1".parse().unwrap())
        .expect("missing route");
    assert_eq!(fte.net, "10.0.0.0/8".parse().unwrap());

    // Exact match.
    assert!(fib.lookup_by_net(&"10.0.0.0/8".parse().unwrap()).is_some());
    assert!(fib.lookup_by_net(&"10.2.0.0/16".parse().unwrap()).is_none());
}

#[test]
fn idempotent_entry_ops() {
    let tree = test_tree();
    let mut fib = Fib::new();
    let mut updates = fib.subscribe();

    let fte = rip_fte("10.0.0.0/8", "192.0.2.1", 2);
    fib.add_entry(fte.clone(), &tree).unwrap();
    fib.add_entry(fte.clone(), &tree).unwrap();
    assert!(fib.lookup_by_net(&fte.net).is_some());

    // The second identical add produces no additional notification.
    assert_eq!(updates.try_recv().unwrap().change, FibChange::Added);
    assert!(updates.try_recv().is_err());

    fib.delete_entry(fte.net).unwrap();
    fib.delete_entry(fte.net).unwrap();
    assert!(fib.lookup_by_net(&fte.net).is_none());
    assert_eq!(updates.try_recv().unwrap().change, FibChange::Removed);
    assert!(updates.try_recv().is_err());

    // Deleting a prefix that was never installed is a success.
    fib.delete_entry("198.51.100.0/24".parse().unwrap())
        .unwrap();
}

#[test]
fn connected_routes_are_skipped() {
    let tree = test_tree();
    let mut fib = Fib::new();

    let mut fte = rip_fte("192.0.2.0/24", "192.0.2.1", 1);
    fte.flags.insert(FteFlags::CONNECTED);
    fib.add_entry(fte.clone(), &tree).unwrap();
    assert!(fib.lookup_by_net(&fte.net).is_none());
}

#[test]
fn unroutable_prefixes_are_refused() {
    let tree = test_tree();
    let mut fib = Fib::new();

    let fte = rip_fte("224.0.0.0/4", "192.0.2.1", 1);
    assert!(fib.add_entry(fte, &tree).is_err());
}

#[test]
fn unresolved_interface_is_refused() {
    let tree = test_tree();
    let mut fib = Fib::new();

    let mut fte = rip_fte("10.0.0.0/8", "192.0.2.1", 1);
    fte.ifname = "eth99".to_owned();
    assert!(fib.add_entry(fte, &tree).is_err());
}

#[test]
fn discard_routes_skip_resolution() {
    let tree = test_tree();
    let mut fib = Fib::new();
    fib.add_discard_interface("discard0");

    let mut fte = rip_fte("203.0.113.0/24", "192.0.2.1", 1);
    fte.ifname = "discard0".to_owned();
    fte.vifname = "discard0".to_owned();
    fte.nexthop = None;
    fib.add_entry(fte.clone(), &tree).unwrap();

    let installed = fib.lookup_by_net(&fte.net).unwrap();
    assert!(installed.flags.contains(FteFlags::DISCARD));
}

#[test]
fn set_table_replaces_owned_entries() {
    let tree = test_tree();
    let mut fib = Fib::new();

    fib.add_entry(rip_fte("10.0.0.0/8", "192.0.2.1", 2), &tree)
        .unwrap();
    fib.add_entry(rip_fte("172.16.0.0/12", "192.0.2.1", 2), &tree)
        .unwrap();

    let replacement = vec![
        rip_fte("10.0.0.0/8", "192.0.2.9", 4),
        rip_fte("198.51.100.0/24", "192.0.2.1", 1),
    ];
    fib.set_table(replacement, &tree).unwrap();

    assert!(fib.lookup_by_net(&"10.0.0.0/8".parse().unwrap()).is_some());
    assert!(
        fib.lookup_by_net(&"198.51.100.0/24".parse().unwrap())
            .is_some()
    );
    assert!(
        fib.lookup_by_net(&"172.16.0.0/12".parse().unwrap())
            .is_none()
    );
    let updated = fib.lookup_by_net(&"10.0.0.0/8".parse().unwrap()).unwrap();
    assert_eq!(updated.metric, 4);
}

#[test]
fn transaction_commit_applies_atomically() {
    let tree = test_tree();
    let mut fib = Fib::new();

    fib.add_entry(rip_fte("10.0.0.0/8", "192.0.2.1", 2), &tree)
        .unwrap();

    fib.start_transaction().unwrap();
    fib.add_entry(rip_fte("172.16.0.0/12", "192.0.2.2", 3), &tree)
        .unwrap();
    fib.delete_entry("10.0.0.0/8".parse().unwrap()).unwrap();

    // Nothing visible until commit.
    assert!(fib.lookup_by_net(&"10.0.0.0/8".parse().unwrap()).is_some());
    assert!(
        fib.lookup_by_net(&"172.16.0.0/12".parse().unwrap())
            .is_none()
    );

    fib.commit_transaction(&tree).unwrap();
    assert!(fib.lookup_by_net(&"10.0.0.0/8".parse().unwrap()).is_none());
    assert!(
        fib.lookup_by_net(&"172.16.0.0/12".parse().unwrap())
            .is_some()
    );
}

#[test]
fn transaction_abort_discards_ops() {
    let tree = test_tree();
    let mut fib = Fib::new();

    fib.start_transaction().unwrap();
    assert!(fib.start_transaction().is_err());
    fib.add_entry(rip_fte("10.0.0.0/8", "192.0.2.1", 2), &tree)
        .unwrap();
    fib.abort_transaction().unwrap();

    assert!(fib.lookup_by_net(&"10.0.0.0/8".parse().unwrap()).is_none());
    assert!(fib.abort_transaction().is_err());
}
