//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap, btree_map, hash_map};
use std::net::IpAddr;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use derive_new::new;
use ipnetwork::IpNetwork;
use prefix_trie::joint::map::JointPrefixMap;
use rove_utils::ibus::{IbusSender, IbusSubscriber};
use rove_utils::ip::{AddressFamily, IpAddrExt, IpNetworkExt};
use rove_utils::protocol::Protocol;
use rove_utils::southbound::{
    AddressFlags, AddressMsg, Nexthop, NexthopSpecial, RouteKeyMsg, RouteMsg,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::fib::{Fib, Fte, FteFlags};
use crate::ibus;
use crate::iftree::IfTree;
use crate::netlink;

#[derive(Debug)]
pub struct Rib {
    pub ip: JointPrefixMap<IpNetwork, BTreeMap<u32, Route>>,
    pub nht: HashMap<IpAddr, NhtEntry>,
    pub ip_update_queue: BTreeSet<IpNetwork>,
    pub update_queue_tx: UnboundedSender<()>,
    pub subscriptions: HashMap<usize, RedistributeSub>,
}

#[derive(Clone, Debug, new)]
pub struct Route {
    pub protocol: Protocol,
    pub distance: u32,
    pub metric: u32,
    pub tag: Option<u32>,
    pub nexthops: BTreeSet<Nexthop>,
    pub last_updated: DateTime<Utc>,
    pub flags: RouteFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const ACTIVE = 0x01;
        const REMOVED = 0x02;
    }
}

#[derive(Clone, Debug, Default)]
pub struct NhtEntry {
    pub metric: Option<u32>,
    pub subscriptions: HashMap<usize, IbusSender>,
}

#[derive(Debug)]
#[derive(new)]
pub struct RedistributeSub {
    pub protocols: BTreeSet<(AddressFamily, Protocol)>,
    pub tx: IbusSender,
}

// ===== impl Rib =====

impl Rib {
    pub(crate) fn new(update_queue_tx: UnboundedSender<()>) -> Self {
        Self {
            ip: Default::default(),
            nht: Default::default(),
            ip_update_queue: Default::default(),
            update_queue_tx,
            subscriptions: Default::default(),
        }
    }

    // Adds connected route to the RIB.
    pub(crate) fn connected_route_add(&mut self, ifindex: u32, msg: AddressMsg) {
        // Ignore unnumbered addresses.
        if msg.flags.contains(AddressFlags::UNNUMBERED) {
            return;
        }

        let prefix = msg.addr.apply_mask();
        let rib_prefix = self.prefix_entry(prefix);
        let distance = 0;
        let nexthop = Nexthop::Interface { ifindex };
        match rib_prefix.entry(distance) {
            btree_map::Entry::Vacant(v) => {
                // If the IP route does not exist, create a new entry.
                v.insert(Route::new(
                    Protocol::DIRECT,
                    distance,
                    0,
                    None,
                    [nexthop].into(),
                    Utc::now(),
                    RouteFlags::empty(),
                ));
            }
            btree_map::Entry::Occupied(o) => {
                let route = o.into_mut();

                // Update the existing IP route with the new information.
                route.last_updated = Utc::now();
                route.flags.remove(RouteFlags::REMOVED);
            }
        }

        // Add IP route to the update queue.
        self.ip_update_queue_add(prefix);
    }

    // Removes connected route from the RIB.
    pub(crate) fn connected_route_del(&mut self, msg: AddressMsg) {
        // Ignore unnumbered addresses.
        if msg.flags.contains(AddressFlags::UNNUMBERED) {
            return;
        }

        // Find IP route entry from the same advertising protocol.
        let prefix = msg.addr.apply_mask();
        let rib_prefix = self.prefix_entry(prefix);
        if let Some(route) = rib_prefix
            .values_mut()
            .find(|route| route.protocol == Protocol::DIRECT)
        {
            // Mark IP route as removed.
            route.flags.insert(RouteFlags::REMOVED);

            // Add IP route to the update queue.
            self.ip_update_queue_add(prefix);
        }
    }

    // Adds IP route to the RIB.
    pub(crate) fn ip_route_add(&mut self, msg: RouteMsg) {
        let rib_prefix = self.prefix_entry(msg.prefix);
        match rib_prefix.entry(msg.distance) {
            btree_map::Entry::Vacant(v) => {
                // If the IP route does not exist, create a new entry.
                v.insert(Route::new(
                    msg.protocol,
                    msg.distance,
                    msg.metric,
                    msg.tag,
                    msg.nexthops,
                    Utc::now(),
                    RouteFlags::empty(),
                ));
            }
            btree_map::Entry::Occupied(o) => {
                let route = o.into_mut();

                // Update the existing IP route with the new information.
                route.protocol = msg.protocol;
                route.metric = msg.metric;
                route.tag = msg.tag;
                route.nexthops = msg.nexthops;
                route.last_updated = Utc::now();
                route.flags.remove(RouteFlags::REMOVED);
            }
        }

        // Add IP route to the update queue.
        self.ip_update_queue_add(msg.prefix);
    }

    // Removes IP route from the RIB.
    pub(crate) fn ip_route_del(&mut self, msg: RouteKeyMsg) {
        let rib_prefix = self.prefix_entry(msg.prefix);

        // Find IP route entry from the same advertising protocol.
        if let Some(route) = rib_prefix
            .values_mut()
            .find(|route| route.protocol == msg.protocol)
        {
            // Mark IP route as removed.
            route.flags.insert(RouteFlags::REMOVED);

            // Add IP route to the update queue.
            self.ip_update_queue_add(msg.prefix);
        }
    }

    // Nexthop tracking registration.
    pub(crate) fn nht_add(&mut self, subscriber: IbusSubscriber, addr: IpAddr) {
        debug!(%addr, "nexthop tracking add");
        let metric = self.nht_evaluate(&addr);
        let nhte = self.nht.entry(addr).or_default();
        nhte.metric = metric;
        nhte.subscriptions.insert(subscriber.id, subscriber.tx);
        ibus::notify_nht_update(addr, nhte);
    }

    // Nexthop tracking unregistration.
    pub(crate) fn nht_del(&mut self, subscriber: IbusSubscriber, addr: IpAddr) {
        debug!(%addr, "nexthop tracking delete");
        if let hash_map::Entry::Occupied(mut o) = self.nht.entry(addr) {
            let nhte = o.get_mut();
            nhte.subscriptions.remove(&subscriber.id);
            if nhte.subscriptions.is_empty() {
                o.remove();
            }
        }
    }

    // Evaluates the reachability of the given nexthop address and returns
    // the metric of the route used to reach it.
    fn nht_evaluate(&self, addr: &IpAddr) -> Option<u32> {
        self.prefix_longest_match(addr).map(|route| route.metric)
    }

    // Processes routes present in the update queue: selects the best entry
    // per prefix, installs it through the FIB engine and republishes it to
    // redistribution subscribers.
    pub(crate) async fn process_rib_update_queue(
        &mut self,
        tree: &IfTree,
        fib: &mut Fib,
        netlink_handle: Option<&rtnetlink::Handle>,
    ) {
        while let Some(prefix) = self.ip_update_queue.pop_first() {
            let rib_prefix = self.ip.entry(prefix).or_default();

            // Find the protocol of the old best route, if one exists.
            let old_best_protocol = rib_prefix
                .values()
                .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                .map(|route| route.protocol);

            // Remove routes marked with the REMOVED flag.
            rib_prefix
                .retain(|_, route| !route.flags.contains(RouteFlags::REMOVED));

            // Select and (re)install the best route for this prefix.
            //
            // Entries are keyed by administrative distance, so the first one
            // is the winner; metric breaks ties only within one origin and
            // is already folded into that origin's single entry.
            for (idx, route) in rib_prefix.values_mut().enumerate() {
                if idx == 0 {
                    // Mark the route as the preferred one.
                    route.flags.insert(RouteFlags::ACTIVE);

                    let fte = route_to_fte(&prefix, route, tree);
                    let ifindex = if fte.ifname.is_empty() {
                        None
                    } else {
                        tree.interface(&fte.ifname)
                            .and_then(|iface| iface.ifindex)
                    };

                    // Install the route using the FIB engine.
                    if route.protocol != Protocol::DIRECT {
                        if let Err(error) = fib.add_entry(fte.clone(), tree) {
                            error.log();
                        } else if let Some(handle) = netlink_handle {
                            netlink::route_install(handle, &fte, ifindex)
                                .await;
                        }
                    }

                    // Notify protocol instances about the updated route.
                    for sub in self.subscriptions.values() {
                        ibus::notify_redistribute_add(sub, prefix, route);
                    }
                } else {
                    // Remove the preferred flag for other routes.
                    route.flags.remove(RouteFlags::ACTIVE);
                }
            }

            // Check if there are no routes left for this prefix.
            if rib_prefix.is_empty() {
                if let Some(protocol) = old_best_protocol {
                    // Uninstall the old best route.
                    if protocol != Protocol::DIRECT {
                        let iface_down = fib
                            .lookup_by_net(&prefix)
                            .and_then(|fte| tree.interface(&fte.ifname))
                            .is_some_and(|iface| !iface.enabled);
                        let _ = fib.delete_entry(prefix);
                        if let Some(handle) = netlink_handle {
                            netlink::route_uninstall(
                                handle, &prefix, protocol, iface_down,
                            )
                            .await;
                        }
                    }

                    // Notify protocol instances about the deleted route.
                    for sub in self.subscriptions.values() {
                        ibus::notify_redistribute_del(sub, prefix, protocol);
                    }
                }

                // Remove prefix entry from the RIB.
                self.ip.remove(&prefix);
            }
        }

        // Reevaluate all registered nexthops.
        let mut nht = std::mem::take(&mut self.nht);
        for (addr, nhte) in &mut nht {
            let new_metric = self.nht_evaluate(addr);
            if new_metric != nhte.metric {
                debug!(
                    %addr, old_metric = ?nhte.metric, ?new_metric,
                    "nexthop tracking update"
                );
                nhte.metric = new_metric;
                ibus::notify_nht_update(*addr, nhte);
            }
        }
        self.nht = nht;
    }

    // Returns RIB entry associated to the given IP prefix.
    fn prefix_entry(&mut self, prefix: IpNetwork) -> &mut BTreeMap<u32, Route> {
        self.ip.entry(prefix).or_default()
    }

    // Returns the longest matching route for the given IP address.
    pub(crate) fn prefix_longest_match(&self, addr: &IpAddr) -> Option<&Route> {
        let (_, lpm) = self.ip.get_lpm(&addr.to_host_prefix())?;
        lpm.values()
            .next()
            .filter(|route| route.flags.contains(RouteFlags::ACTIVE))
            .filter(|route| !route.flags.contains(RouteFlags::REMOVED))
    }

    // Adds IP route to the update queue.
    fn ip_update_queue_add(&mut self, prefix: IpNetwork) {
        self.ip_update_queue.insert(prefix);
        let _ = self.update_queue_tx.send(());
    }

    // Uninstall all routes installed by this process.
    pub(crate) async fn route_uninstall_all(
        &mut self,
        tree: &IfTree,
        fib: &mut Fib,
        netlink_handle: Option<&rtnetlink::Handle>,
    ) {
        for (prefix, rib_prefix) in &self.ip {
            if let Some(route) = rib_prefix
                .values()
                .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                .filter(|route| route.protocol != Protocol::DIRECT)
            {
                let iface_down = fib
                    .lookup_by_net(&prefix)
                    .and_then(|fte| tree.interface(&fte.ifname))
                    .is_some_and(|iface| !iface.enabled);
                if let Some(handle) = netlink_handle {
                    netlink::route_uninstall(
                        handle,
                        &prefix,
                        route.protocol,
                        iface_down,
                    )
                    .await;
                }
            }
        }
    }
}

// ===== helper functions =====

// Renders a RIB route into a forwarding table entry. ECMP is out of scope,
// so only the first nexthop is considered.
fn route_to_fte(prefix: &IpNetwork, route: &Route, tree: &IfTree) -> Fte {
    let mut nexthop_addr = None;
    let mut ifname = String::new();
    let mut flags = FteFlags::empty();

    match route.nexthops.first() {
        Some(Nexthop::Address { ifindex, addr }) => {
            nexthop_addr = Some(*addr);
            if let Some(name) = tree.ifname_by_ifindex(*ifindex) {
                ifname = name.to_owned();
            }
        }
        Some(Nexthop::Interface { ifindex }) => {
            if let Some(name) = tree.ifname_by_ifindex(*ifindex) {
                ifname = name.to_owned();
            }
        }
        Some(Nexthop::Special(NexthopSpecial::Blackhole)) => {
            flags.insert(FteFlags::DISCARD);
        }
        Some(Nexthop::Special(_)) | None => {
            flags.insert(FteFlags::UNRESOLVED);
        }
    }
    if route.protocol == Protocol::DIRECT {
        flags.insert(FteFlags::CONNECTED);
    }

    Fte::new(
        *prefix,
        nexthop_addr,
        ifname.clone(),
        ifname,
        route.metric,
        route.distance,
        route.protocol,
        flags,
    )
}
