//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, Ipv6Addr};

use rove_utils::mac_addr::MacAddr;
use rove_utils::southbound::{AddressFlags, InterfaceFlags};
use serde::{Deserialize, Serialize};

// Lifecycle tag carried by every tree node. The tags record what changed
// since the last report pass and drive both update fan-out and diffing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NodeState {
    Created,
    #[default]
    NoChange,
    Changed,
    Deleted,
}

// Canonical in-memory model of the system's interfaces.
//
// The tree is a pure value type: mutations never touch the kernel, and two
// trees compare equal when their configuration payloads match, regardless of
// the lifecycle tags. The ifindex map is maintained atomically with the
// nodes it refers to.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct IfTree {
    interfaces: BTreeMap<String, IfTreeInterface>,
    ifindex_map: HashMap<u32, String>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct IfTreeInterface {
    pub ifname: String,
    pub ifindex: Option<u32>,
    pub mac: MacAddr,
    pub mtu: Option<u32>,
    pub flags: InterfaceFlags,
    pub no_carrier: bool,
    pub enabled: bool,
    pub state: NodeState,
    pub vifs: BTreeMap<String, IfTreeVif>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct IfTreeVif {
    pub vifname: String,
    pub ifindex: Option<u32>,
    pub flags: InterfaceFlags,
    pub enabled: bool,
    pub state: NodeState,
    pub addrs4: BTreeMap<Ipv4Addr, IfTreeAddr4>,
    pub addrs6: BTreeMap<Ipv6Addr, IfTreeAddr6>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct IfTreeAddr4 {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
    // Set when the parent vif is broadcast-capable.
    pub broadcast: Option<Ipv4Addr>,
    // Set when the parent vif is point-to-point.
    pub peer: Option<Ipv4Addr>,
    pub enabled: bool,
    pub flags: AddressFlags,
    pub state: NodeState,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct IfTreeAddr6 {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    pub peer: Option<Ipv6Addr>,
    pub enabled: bool,
    pub flags: AddressFlags,
    pub state: NodeState,
}

// Receiver of one wave of tree updates, invoked in topological order:
// interfaces before their vifs before their addresses, terminated by
// `updates_completed`.
pub trait IfTreeSink {
    fn interface_update(&mut self, iface: &IfTreeInterface);
    fn vif_update(&mut self, iface: &IfTreeInterface, vif: &IfTreeVif);
    fn vifaddr4_update(
        &mut self,
        iface: &IfTreeInterface,
        vif: &IfTreeVif,
        addr: &IfTreeAddr4,
    );
    fn vifaddr6_update(
        &mut self,
        iface: &IfTreeInterface,
        vif: &IfTreeVif,
        addr: &IfTreeAddr6,
    );
    fn updates_completed(&mut self);
}

// ===== impl IfTree =====

impl IfTree {
    // Adds an interface, or revives a previously deleted entry.
    pub fn add_interface(&mut self, ifname: &str) -> &mut IfTreeInterface {
        let iface = self
            .interfaces
            .entry(ifname.to_owned())
            .or_insert_with(|| IfTreeInterface::new(ifname.to_owned()));
        if iface.state == NodeState::Deleted {
            iface.state = NodeState::Changed;
        }
        iface
    }

    // Marks an interface and all of its children as deleted.
    pub fn remove_interface(&mut self, ifname: &str) -> bool {
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return false;
        };

        iface.state = NodeState::Deleted;
        for vif in iface.vifs.values_mut() {
            vif.state = NodeState::Deleted;
            for addr in vif.addrs4.values_mut() {
                addr.state = NodeState::Deleted;
            }
            for addr in vif.addrs6.values_mut() {
                addr.state = NodeState::Deleted;
            }
        }
        if let Some(ifindex) = iface.ifindex {
            self.ifindex_map.remove(&ifindex);
        }

        true
    }

    // Updates an interface's ifindex, keeping the reverse map in sync.
    pub fn set_ifindex(&mut self, ifname: &str, ifindex: Option<u32>) {
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };

        if let Some(old_ifindex) = iface.ifindex {
            self.ifindex_map.remove(&old_ifindex);
        }
        iface.ifindex = ifindex;
        for vif in iface.vifs.values_mut() {
            vif.ifindex = ifindex;
        }
        if let Some(ifindex) = ifindex {
            self.ifindex_map.insert(ifindex, ifname.to_owned());
        }
    }

    pub fn interface(&self, ifname: &str) -> Option<&IfTreeInterface> {
        self.interfaces
            .get(ifname)
            .filter(|iface| iface.state != NodeState::Deleted)
    }

    pub fn interface_mut(
        &mut self,
        ifname: &str,
    ) -> Option<&mut IfTreeInterface> {
        self.interfaces
            .get_mut(ifname)
            .filter(|iface| iface.state != NodeState::Deleted)
    }

    pub fn interface_by_ifindex(
        &self,
        ifindex: u32,
    ) -> Option<&IfTreeInterface> {
        self.ifindex_map
            .get(&ifindex)
            .and_then(|ifname| self.interface(ifname))
    }

    pub fn ifname_by_ifindex(&self, ifindex: u32) -> Option<&str> {
        self.ifindex_map.get(&ifindex).map(String::as_str)
    }

    pub fn vif(&self, ifname: &str, vifname: &str) -> Option<&IfTreeVif> {
        self.interface(ifname)
            .and_then(|iface| iface.vifs.get(vifname))
            .filter(|vif| vif.state != NodeState::Deleted)
    }

    pub fn vif_mut(
        &mut self,
        ifname: &str,
        vifname: &str,
    ) -> Option<&mut IfTreeVif> {
        self.interface_mut(ifname)
            .and_then(|iface| iface.vifs.get_mut(vifname))
            .filter(|vif| vif.state != NodeState::Deleted)
    }

    // Returns an iterator visiting all live interfaces, ordered by name.
    pub fn interfaces(&self) -> impl Iterator<Item = &'_ IfTreeInterface> + '_ {
        self.interfaces
            .values()
            .filter(|iface| iface.state != NodeState::Deleted)
    }

    // Walks the changed portion of the tree, invoking the sink for every
    // node that isn't tagged NoChange. Parents are visited before children
    // so consumers can build their own hierarchies incrementally.
    pub fn report_updates(&self, sink: &mut dyn IfTreeSink) {
        for iface in self.interfaces.values() {
            if iface.state != NodeState::NoChange {
                sink.interface_update(iface);
            }
            for vif in iface.vifs.values() {
                if vif.state != NodeState::NoChange {
                    sink.vif_update(iface, vif);
                }
                for addr in vif.addrs4.values() {
                    if addr.state != NodeState::NoChange {
                        sink.vifaddr4_update(iface, vif, addr);
                    }
                }
                for addr in vif.addrs6.values() {
                    if addr.state != NodeState::NoChange {
                        sink.vifaddr6_update(iface, vif, addr);
                    }
                }
            }
        }
        sink.updates_completed();
    }

    // Collapses the lifecycle tags after a report pass: deleted subtrees are
    // dropped and every surviving node becomes NoChange.
    pub fn finalize_state(&mut self) {
        self.interfaces
            .retain(|_, iface| iface.state != NodeState::Deleted);
        for iface in self.interfaces.values_mut() {
            iface.state = NodeState::NoChange;
            iface.vifs.retain(|_, vif| vif.state != NodeState::Deleted);
            for vif in iface.vifs.values_mut() {
                vif.state = NodeState::NoChange;
                vif.addrs4
                    .retain(|_, addr| addr.state != NodeState::Deleted);
                vif.addrs6
                    .retain(|_, addr| addr.state != NodeState::Deleted);
                for addr in vif.addrs4.values_mut() {
                    addr.state = NodeState::NoChange;
                }
                for addr in vif.addrs6.values_mut() {
                    addr.state = NodeState::NoChange;
                }
            }
        }
    }

    // Computes the transition from `self` to `target` as a tree whose
    // lifecycle tags describe the required operations: nodes only present in
    // `target` come out Created, differing nodes Changed, and nodes only
    // present in `self` Deleted.
    pub fn diff(&self, target: &IfTree) -> IfTree {
        let mut diff = target.clone();

        for iface in diff.interfaces.values_mut() {
            match self.interfaces.get(&iface.ifname) {
                Some(old_iface) => {
                    iface.state = if iface.payload_eq(old_iface) {
                        NodeState::NoChange
                    } else {
                        NodeState::Changed
                    };
                    iface.diff_children(old_iface);
                }
                None => iface.mark_subtree(NodeState::Created),
            }
        }

        // Nodes present only in the old tree are scheduled for deletion.
        for old_iface in self.interfaces.values() {
            if !diff.interfaces.contains_key(&old_iface.ifname) {
                let mut iface = old_iface.clone();
                iface.mark_subtree(NodeState::Deleted);
                diff.interfaces.insert(iface.ifname.clone(), iface);
            } else {
                let iface = diff.interfaces.get_mut(&old_iface.ifname).unwrap();
                iface.diff_deletions(old_iface);
            }
        }

        diff
    }

    // Applies a diff produced by `IfTree::diff`, after which the tree is
    // finalized and structurally equal to the diff's target.
    pub fn apply(&mut self, diff: &IfTree) {
        for iface in diff.interfaces.values() {
            match iface.state {
                NodeState::Deleted => {
                    self.remove_interface(&iface.ifname);
                }
                _ => {
                    let mut new_iface = iface.clone();
                    new_iface.apply_children();
                    if let Some(ifindex) = new_iface.ifindex {
                        self.ifindex_map
                            .insert(ifindex, new_iface.ifname.clone());
                    }
                    self.interfaces
                        .insert(new_iface.ifname.clone(), new_iface);
                }
            }
        }
        self.finalize_state();
    }
}

impl PartialEq for IfTree {
    fn eq(&self, other: &Self) -> bool {
        // Structural equality ignores lifecycle tags and deleted subtrees.
        let mut a = self.clone();
        let mut b = other.clone();
        a.finalize_state();
        b.finalize_state();
        a.interfaces.len() == b.interfaces.len()
            && a.interfaces.iter().all(|(ifname, ia)| {
                b.interfaces.get(ifname).is_some_and(|ib| {
                    ia.payload_eq(ib)
                        && ia.vifs.len() == ib.vifs.len()
                        && ia.vifs.iter().all(|(vifname, va)| {
                            ib.vifs.get(vifname).is_some_and(|vb| {
                                va.payload_eq(vb)
                                    && va.addrs4 == vb.addrs4
                                    && va.addrs6 == vb.addrs6
                            })
                        })
                })
            })
    }
}

impl Eq for IfTree {}

// ===== impl IfTreeInterface =====

impl IfTreeInterface {
    fn new(ifname: String) -> IfTreeInterface {
        IfTreeInterface {
            ifname,
            ifindex: None,
            mac: Default::default(),
            mtu: None,
            flags: Default::default(),
            no_carrier: false,
            enabled: false,
            state: NodeState::Created,
            vifs: Default::default(),
        }
    }

    // Adds a vif, inheriting the parent's ifindex.
    pub fn add_vif(&mut self, vifname: &str) -> &mut IfTreeVif {
        let ifindex = self.ifindex;
        let vif = self
            .vifs
            .entry(vifname.to_owned())
            .or_insert_with(|| IfTreeVif::new(vifname.to_owned(), ifindex));
        if vif.state == NodeState::Deleted {
            vif.state = NodeState::Changed;
        }
        vif
    }

    pub fn remove_vif(&mut self, vifname: &str) -> bool {
        let Some(vif) = self.vifs.get_mut(vifname) else {
            return false;
        };

        vif.state = NodeState::Deleted;
        for addr in vif.addrs4.values_mut() {
            addr.state = NodeState::Deleted;
        }
        for addr in vif.addrs6.values_mut() {
            addr.state = NodeState::Deleted;
        }

        true
    }

    pub fn is_loopback(&self) -> bool {
        self.flags.contains(InterfaceFlags::LOOPBACK)
    }

    // Returns true if any vif or address below this interface carries a
    // lifecycle tag other than NoChange.
    pub fn has_changed_children(&self) -> bool {
        self.vifs.values().any(|vif| {
            vif.state != NodeState::NoChange
                || vif
                    .addrs4
                    .values()
                    .any(|addr| addr.state != NodeState::NoChange)
                || vif
                    .addrs6
                    .values()
                    .any(|addr| addr.state != NodeState::NoChange)
        })
    }

    pub fn is_operative(&self) -> bool {
        self.flags.contains(InterfaceFlags::OPERATIVE) && !self.no_carrier
    }

    // Compares the configuration payload, ignoring lifecycle tags and
    // children.
    fn payload_eq(&self, other: &Self) -> bool {
        self.ifname == other.ifname
            && self.ifindex == other.ifindex
            && self.mac == other.mac
            && self.mtu == other.mtu
            && self.flags == other.flags
            && self.no_carrier == other.no_carrier
            && self.enabled == other.enabled
    }

    fn mark_subtree(&mut self, state: NodeState) {
        self.state = state;
        for vif in self.vifs.values_mut() {
            vif.state = state;
            for addr in vif.addrs4.values_mut() {
                addr.state = state;
            }
            for addr in vif.addrs6.values_mut() {
                addr.state = state;
            }
        }
    }

    fn diff_children(&mut self, old: &Self) {
        for vif in self.vifs.values_mut() {
            match old.vifs.get(&vif.vifname) {
                Some(old_vif) => {
                    vif.state = if vif.payload_eq(old_vif) {
                        NodeState::NoChange
                    } else {
                        NodeState::Changed
                    };
                    vif.diff_addrs(old_vif);
                }
                None => {
                    vif.state = NodeState::Created;
                    for addr in vif.addrs4.values_mut() {
                        addr.state = NodeState::Created;
                    }
                    for addr in vif.addrs6.values_mut() {
                        addr.state = NodeState::Created;
                    }
                }
            }
        }
    }

    fn diff_deletions(&mut self, old: &Self) {
        for old_vif in old.vifs.values() {
            match self.vifs.get_mut(&old_vif.vifname) {
                Some(vif) => vif.diff_addr_deletions(old_vif),
                None => {
                    let mut vif = old_vif.clone();
                    vif.state = NodeState::Deleted;
                    for addr in vif.addrs4.values_mut() {
                        addr.state = NodeState::Deleted;
                    }
                    for addr in vif.addrs6.values_mut() {
                        addr.state = NodeState::Deleted;
                    }
                    self.vifs.insert(vif.vifname.clone(), vif);
                }
            }
        }
    }

    fn apply_children(&mut self) {
        self.vifs.retain(|_, vif| vif.state != NodeState::Deleted);
        for vif in self.vifs.values_mut() {
            vif.addrs4
                .retain(|_, addr| addr.state != NodeState::Deleted);
            vif.addrs6
                .retain(|_, addr| addr.state != NodeState::Deleted);
        }
    }
}

// ===== impl IfTreeVif =====

impl IfTreeVif {
    fn new(vifname: String, ifindex: Option<u32>) -> IfTreeVif {
        IfTreeVif {
            vifname,
            ifindex,
            flags: Default::default(),
            enabled: false,
            state: NodeState::Created,
            addrs4: Default::default(),
            addrs6: Default::default(),
        }
    }

    // Adds an IPv4 address. The broadcast address must lie in the derived
    // subnet and is only meaningful on broadcast-capable vifs; a peer
    // address is only meaningful on point-to-point vifs.
    pub fn add_addr4(
        &mut self,
        addr: Ipv4Addr,
        prefix_len: u8,
        broadcast: Option<Ipv4Addr>,
        peer: Option<Ipv4Addr>,
    ) -> &mut IfTreeAddr4 {
        let entry = self.addrs4.entry(addr).or_insert(IfTreeAddr4 {
            addr,
            prefix_len,
            broadcast,
            peer,
            enabled: true,
            flags: Default::default(),
            state: NodeState::Created,
        });
        if entry.state != NodeState::Created {
            entry.state = NodeState::Changed;
        }
        entry.prefix_len = prefix_len;
        entry.broadcast = broadcast;
        entry.peer = peer;
        entry
    }

    pub fn remove_addr4(&mut self, addr: &Ipv4Addr) -> bool {
        match self.addrs4.get_mut(addr) {
            Some(entry) => {
                entry.state = NodeState::Deleted;
                true
            }
            None => false,
        }
    }

    pub fn add_addr6(
        &mut self,
        addr: Ipv6Addr,
        prefix_len: u8,
        peer: Option<Ipv6Addr>,
    ) -> &mut IfTreeAddr6 {
        let entry = self.addrs6.entry(addr).or_insert(IfTreeAddr6 {
            addr,
            prefix_len,
            peer,
            enabled: true,
            flags: Default::default(),
            state: NodeState::Created,
        });
        if entry.state != NodeState::Created {
            entry.state = NodeState::Changed;
        }
        entry.prefix_len = prefix_len;
        entry.peer = peer;
        entry
    }

    pub fn remove_addr6(&mut self, addr: &Ipv6Addr) -> bool {
        match self.addrs6.get_mut(addr) {
            Some(entry) => {
                entry.state = NodeState::Deleted;
                true
            }
            None => false,
        }
    }

    fn payload_eq(&self, other: &Self) -> bool {
        self.vifname == other.vifname
            && self.ifindex == other.ifindex
            && self.flags == other.flags
            && self.enabled == other.enabled
    }

    fn diff_addrs(&mut self, old: &Self) {
        for addr in self.addrs4.values_mut() {
            addr.state = match old.addrs4.get(&addr.addr) {
                Some(old_addr) if addr == old_addr => NodeState::NoChange,
                Some(_) => NodeState::Changed,
                None => NodeState::Created,
            };
        }
        for addr in self.addrs6.values_mut() {
            addr.state = match old.addrs6.get(&addr.addr) {
                Some(old_addr) if addr == old_addr => NodeState::NoChange,
                Some(_) => NodeState::Changed,
                None => NodeState::Created,
            };
        }
    }

    fn diff_addr_deletions(&mut self, old: &Self) {
        for old_addr in old.addrs4.values() {
            if !self.addrs4.contains_key(&old_addr.addr) {
                let mut addr = old_addr.clone();
                addr.state = NodeState::Deleted;
                self.addrs4.insert(addr.addr, addr);
            }
        }
        for old_addr in old.addrs6.values() {
            if !self.addrs6.contains_key(&old_addr.addr) {
                let mut addr = old_addr.clone();
                addr.state = NodeState::Deleted;
                self.addrs6.insert(addr.addr, addr);
            }
        }
    }
}

// ===== impl IfTreeAddr4 =====

impl IfTreeAddr4 {
    pub fn network(&self) -> ipnetwork::Ipv4Network {
        ipnetwork::Ipv4Network::new(self.addr, self.prefix_len).unwrap()
    }
}

impl PartialEq for IfTreeAddr4 {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.prefix_len == other.prefix_len
            && self.broadcast == other.broadcast
            && self.peer == other.peer
            && self.enabled == other.enabled
            && self.flags == other.flags
    }
}

impl Eq for IfTreeAddr4 {}

// ===== impl IfTreeAddr6 =====

impl IfTreeAddr6 {
    pub fn network(&self) -> ipnetwork::Ipv6Network {
        ipnetwork::Ipv6Network::new(self.addr, self.prefix_len).unwrap()
    }
}

impl PartialEq for IfTreeAddr6 {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.prefix_len == other.prefix_len
            && self.peer == other.peer
            && self.enabled == other.enabled
            && self.flags == other.flags
    }
}

impl Eq for IfTreeAddr6 {}
