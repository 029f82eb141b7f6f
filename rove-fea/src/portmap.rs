//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use rove_utils::ip::IpNetworkKind;

// Associates next-hop keys with dataplane port numbers.
//
// Four disjoint mappings are kept; lookups try them in declaration order
// and the first hit wins. Mutations are batched: observers hear about a
// whole batch at once through `commit_updates`.
#[derive(Debug, Default)]
pub struct NexthopPortMapper {
    if_map: BTreeMap<(String, String), u32>,
    ipv4_map: BTreeMap<Ipv4Addr, u32>,
    ipv6_map: BTreeMap<Ipv6Addr, u32>,
    net_map: BTreeMap<IpNetwork, u32>,
    observers: Vec<Box<dyn PortMapperObserver>>,
    dirty: bool,
}

// Observer of port mapping changes.
pub trait PortMapperObserver: std::fmt::Debug + Send {
    fn on_mapping_changed(&mut self, changed: bool);
}

// ===== impl NexthopPortMapper =====

impl NexthopPortMapper {
    pub fn new() -> NexthopPortMapper {
        Default::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn PortMapperObserver>) {
        self.observers.push(observer);
    }

    // Looks up the port for the given next-hop keys, trying the
    // interface/vif mapping, then the host address mappings, then the
    // prefix mapping.
    pub fn lookup_nexthop_interface(
        &self,
        ifname: &str,
        vifname: &str,
    ) -> Option<u32> {
        self.if_map
            .get(&(ifname.to_owned(), vifname.to_owned()))
            .copied()
    }

    pub fn lookup_nexthop_ipv4(&self, addr: &Ipv4Addr) -> Option<u32> {
        self.ipv4_map.get(addr).copied().or_else(|| {
            self.net_map
                .iter()
                .find(|(net, _)| net.contains((*addr).into()))
                .map(|(_, port)| *port)
        })
    }

    pub fn lookup_nexthop_ipv6(&self, addr: &Ipv6Addr) -> Option<u32> {
        self.ipv6_map.get(addr).copied().or_else(|| {
            self.net_map
                .iter()
                .find(|(net, _)| net.contains((*addr).into()))
                .map(|(_, port)| *port)
        })
    }

    pub fn add_interface(
        &mut self,
        ifname: &str,
        vifname: &str,
        port: u32,
    ) {
        self.if_map
            .insert((ifname.to_owned(), vifname.to_owned()), port);
        self.dirty = true;
    }

    pub fn remove_interface(&mut self, ifname: &str, vifname: &str) {
        if self
            .if_map
            .remove(&(ifname.to_owned(), vifname.to_owned()))
            .is_some()
        {
            self.dirty = true;
        }
    }

    pub fn add_ipv4(&mut self, addr: Ipv4Addr, port: u32) {
        self.ipv4_map.insert(addr, port);
        self.dirty = true;
    }

    pub fn remove_ipv4(&mut self, addr: &Ipv4Addr) {
        if self.ipv4_map.remove(addr).is_some() {
            self.dirty = true;
        }
    }

    pub fn add_ipv6(&mut self, addr: Ipv6Addr, port: u32) {
        self.ipv6_map.insert(addr, port);
        self.dirty = true;
    }

    pub fn remove_ipv6(&mut self, addr: &Ipv6Addr) {
        if self.ipv6_map.remove(addr).is_some() {
            self.dirty = true;
        }
    }

    pub fn add_subnet(&mut self, net: IpNetwork, port: u32) {
        self.net_map.insert(net, port);
        self.dirty = true;
    }

    pub fn remove_subnet(&mut self, net: &IpNetwork) {
        if self.net_map.remove(net).is_some() {
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        if !self.if_map.is_empty()
            || !self.ipv4_map.is_empty()
            || !self.ipv6_map.is_empty()
            || !self.net_map.is_empty()
        {
            self.dirty = true;
        }
        self.if_map.clear();
        self.ipv4_map.clear();
        self.ipv6_map.clear();
        self.net_map.clear();
    }

    // Tells the observers whether anything changed since the last commit,
    // exactly once per batch.
    pub fn commit_updates(&mut self) {
        let changed = self.dirty;
        self.dirty = false;
        for observer in self.observers.iter_mut() {
            observer.on_mapping_changed(changed);
        }
    }
}
