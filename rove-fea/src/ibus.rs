//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use rove_utils::ibus::{IbusMsg, IbusSender};
use rove_utils::ip::IpNetworkKind;
use rove_utils::protocol::Protocol;
use rove_utils::southbound::{
    AddressFlags, AddressMsg, InterfaceUpdateMsg, RouteKeyMsg, RouteMsg,
};

use crate::Master;
use crate::iftree::{
    IfTreeAddr4, IfTreeAddr6, IfTreeInterface, IfTreeSink, IfTreeVif,
    NodeState,
};
use crate::rib::{NhtEntry, RedistributeSub, Route};

// Renders tree update waves into ibus notifications for the subscribed
// protocol instances.
pub(crate) struct IbusUpdateSink<'a> {
    pub subscriptions: &'a [IbusSender],
}

// ===== impl IbusUpdateSink =====

impl IfTreeSink for IbusUpdateSink<'_> {
    fn interface_update(&mut self, iface: &IfTreeInterface) {
        let msg = match iface.state {
            NodeState::Deleted => IbusMsg::InterfaceDel(iface.ifname.clone()),
            _ => IbusMsg::InterfaceUpd(InterfaceUpdateMsg {
                ifname: iface.ifname.clone(),
                ifindex: iface.ifindex.unwrap_or(0),
                mtu: iface.mtu.unwrap_or(0),
                flags: iface.flags,
                mac_address: iface.mac,
            }),
        };
        for tx in self.subscriptions {
            let _ = tx.send(msg.clone());
        }
    }

    fn vif_update(&mut self, _iface: &IfTreeInterface, _vif: &IfTreeVif) {
        // Vifs are folded into their parent interface notification.
    }

    fn vifaddr4_update(
        &mut self,
        iface: &IfTreeInterface,
        _vif: &IfTreeVif,
        addr: &IfTreeAddr4,
    ) {
        let msg = AddressMsg {
            ifname: iface.ifname.clone(),
            addr: addr.network().into(),
            flags: AddressFlags::default(),
        };
        let msg = match addr.state {
            NodeState::Deleted => IbusMsg::InterfaceAddressDel(msg),
            _ => IbusMsg::InterfaceAddressAdd(msg),
        };
        for tx in self.subscriptions {
            let _ = tx.send(msg.clone());
        }
    }

    fn vifaddr6_update(
        &mut self,
        iface: &IfTreeInterface,
        _vif: &IfTreeVif,
        addr: &IfTreeAddr6,
    ) {
        let msg = AddressMsg {
            ifname: iface.ifname.clone(),
            addr: addr.network().into(),
            flags: AddressFlags::default(),
        };
        let msg = match addr.state {
            NodeState::Deleted => IbusMsg::InterfaceAddressDel(msg),
            _ => IbusMsg::InterfaceAddressAdd(msg),
        };
        for tx in self.subscriptions {
            let _ = tx.send(msg.clone());
        }
    }

    fn updates_completed(&mut self) {
        for tx in self.subscriptions {
            let _ = tx.send(IbusMsg::InterfaceUpdatesComplete);
        }
    }
}

// ===== global functions =====

pub(crate) async fn process_msg(master: &mut Master, msg: IbusMsg) {
    match msg {
        // Interface update subscription.
        IbusMsg::InterfaceSub { subscriber, .. } => {
            if let Some(subscriber) = subscriber {
                // Replay the current tree state to the new subscriber.
                let mut sink = IbusUpdateSink {
                    subscriptions: std::slice::from_ref(&subscriber.tx),
                };
                replay_tree(&master.tree, &mut sink);
                master
                    .interface_subscriptions
                    .insert(subscriber.id, subscriber.tx);
            }
        }
        IbusMsg::RouteIpAdd(msg) => {
            // Add route to the RIB. Connected routes enter through the
            // interface tree, not through this channel.
            master.rib.ip_route_add(msg);
        }
        IbusMsg::RouteIpDel(msg) => {
            // Remove route from the RIB.
            master.rib.ip_route_del(msg);
        }
        IbusMsg::RouteRedistributeSub {
            subscriber,
            protocol,
            af,
        } => {
            if let Some(subscriber) = subscriber {
                let protocols = match af {
                    Some(af) => [(af, protocol)].into(),
                    None => [
                        (rove_utils::ip::AddressFamily::Ipv4, protocol),
                        (rove_utils::ip::AddressFamily::Ipv6, protocol),
                    ]
                    .into(),
                };
                master.rib.subscriptions.insert(
                    subscriber.id,
                    RedistributeSub::new(protocols, subscriber.tx),
                );
            }
        }
        IbusMsg::NexthopTrack { subscriber, addr } => {
            if let Some(subscriber) = subscriber {
                master.rib.nht_add(subscriber, addr);
            }
        }
        IbusMsg::NexthopUntrack { subscriber, addr } => {
            if let Some(subscriber) = subscriber {
                master.rib.nht_del(subscriber, addr);
            }
        }
        IbusMsg::Disconnect { subscriber } => {
            if let Some(subscriber) = subscriber {
                master.interface_subscriptions.remove(&subscriber.id);
                master.rib.subscriptions.remove(&subscriber.id);
            }
        }
        // Ignore other events.
        _ => {}
    }
}

// Sends route redistribute update notification.
pub(crate) fn notify_redistribute_add(
    sub: &RedistributeSub,
    prefix: IpNetwork,
    route: &Route,
) {
    if !sub
        .protocols
        .contains(&(prefix.address_family(), route.protocol))
    {
        return;
    }

    let msg = RouteMsg {
        protocol: route.protocol,
        prefix,
        distance: route.distance,
        metric: route.metric,
        tag: route.tag,
        nexthops: route.nexthops.clone(),
    };
    let msg = IbusMsg::RouteRedistributeAdd(msg);
    let _ = sub.tx.send(msg);
}

// Sends route redistribute delete notification.
pub(crate) fn notify_redistribute_del(
    sub: &RedistributeSub,
    prefix: IpNetwork,
    protocol: Protocol,
) {
    if !sub
        .protocols
        .contains(&(prefix.address_family(), protocol))
    {
        return;
    }

    let msg = IbusMsg::RouteRedistributeDel(RouteKeyMsg { protocol, prefix });
    let _ = sub.tx.send(msg);
}

// Sends nexthop tracking update notification.
pub(crate) fn notify_nht_update(addr: IpAddr, nhte: &NhtEntry) {
    let msg = IbusMsg::NexthopUpd {
        addr,
        metric: nhte.metric,
    };
    for tx in nhte.subscriptions.values() {
        let _ = tx.send(msg.clone());
    }
}

// ===== helper functions =====

// Replays the full tree as one update wave.
fn replay_tree(tree: &crate::iftree::IfTree, sink: &mut IbusUpdateSink<'_>) {
    for iface in tree.interfaces() {
        sink.interface_update(iface);
        for vif in iface.vifs.values() {
            for addr in vif.addrs4.values() {
                sink.vifaddr4_update(iface, vif, addr);
            }
            for addr in vif.addrs6.values() {
                sink.vifaddr6_update(iface, vif, addr);
            }
        }
    }
    sink.updates_completed();
}

