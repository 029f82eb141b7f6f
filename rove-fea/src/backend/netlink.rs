//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use capctl::caps::CapState;
use futures::TryStreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use ipnetwork::IpNetwork;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_sys::AsyncSocket;
use netlink_packet_route::constants::{
    AF_INET, AF_INET6, ARPHRD_LOOPBACK, IFF_BROADCAST, IFF_MULTICAST,
    IFF_POINTOPOINT, IFF_RUNNING, IFF_UP, RTNLGRP_IPV4_IFADDR,
    RTNLGRP_IPV4_ROUTE, RTNLGRP_IPV6_IFADDR, RTNLGRP_IPV6_ROUTE,
    RTNLGRP_LINK, RTN_BLACKHOLE, RTPROT_STATIC,
};
use netlink_packet_route::rtnl::RtnlMessage;
use netlink_packet_route::{AddressMessage, LinkMessage, RouteMessage};
use rove_utils::protocol::Protocol;
use netlink_sys::SocketAddr;
use rove_utils::ip::IpAddrKind;
use rove_utils::southbound::InterfaceFlags;
use rtnetlink::{Handle, new_connection};
use tracing::{error, trace};

use crate::backend::ConfigErrorReporter;
use crate::error::Error;
use crate::fib::{FibChange, FibUpdate, Fte, FteFlags};
use crate::iftree::{IfTree, NodeState};

// Route protocol type used by this process, as seen in RTM_NEWROUTE.
const RTPROT_RIP: u8 = 189;

pub type NetlinkMonitor =
    UnboundedReceiver<(NetlinkMessage<RtnlMessage>, SocketAddr)>;

// Linux data plane backend.
//
// One rtnetlink connection serves requests; a second one, bound to the
// link and address multicast groups, observes asynchronous kernel changes.
#[derive(Debug)]
pub struct NetlinkBackend {
    pub handle: Handle,
    monitor: Option<NetlinkMonitor>,
}

// ===== impl NetlinkBackend =====

impl NetlinkBackend {
    pub fn init() -> NetlinkBackend {
        // Create netlink socket.
        let (conn, handle, _) =
            new_connection().expect("Failed to create netlink socket");

        // Spawn the netlink connection on a separate thread with permanent
        // elevated capabilities.
        std::thread::spawn(|| {
            // Raise capabilities.
            let mut caps = CapState::get_current().unwrap();
            caps.effective = caps.permitted;
            if let Err(error) = caps.set_current() {
                error!("failed to update current capabilities: {}", error);
            }

            // Serve requests initiated by the netlink handle.
            futures::executor::block_on(conn)
        });

        // Start netlink monitor.
        let (mut conn, _, monitor) =
            new_connection().expect("Failed to create netlink socket");
        let groups = [
            RTNLGRP_LINK,
            RTNLGRP_IPV4_IFADDR,
            RTNLGRP_IPV6_IFADDR,
            RTNLGRP_IPV4_ROUTE,
            RTNLGRP_IPV6_ROUTE,
        ]
        .iter()
        .map(|group| 1 << (group - 1))
        .fold(0, std::ops::BitOr::bitor);
        let addr = SocketAddr::new(0, groups);
        conn.socket_mut()
            .socket_mut()
            .bind(&addr)
            .expect("Failed to bind netlink socket");
        tokio::spawn(conn);

        NetlinkBackend {
            handle,
            monitor: Some(monitor),
        }
    }

    pub fn probe(&self) -> bool {
        cfg!(target_os = "linux")
    }

    // Hands the monitor receiver to the event loop. The backend keeps the
    // request handle.
    pub fn take_monitor(&mut self) -> Option<NetlinkMonitor> {
        self.monitor.take()
    }

    // Performs a full interface and address dump into the tree.
    pub async fn pull_config(
        &mut self,
        tree: &mut IfTree,
    ) -> Result<(), Error> {
        let mut seen = BTreeSet::new();

        // Fetch interface information.
        let mut links = self.handle.link().get().execute();
        while let Some(msg) = links
            .try_next()
            .await
            .map_err(|error| Error::NetlinkError(error.to_string()))?
        {
            if let Some(ifname) = process_newlink_msg(tree, msg) {
                seen.insert(ifname);
            }
        }

        // Fetch address information.
        let mut addresses = self.handle.address().get().execute();
        while let Some(msg) = addresses
            .try_next()
            .await
            .map_err(|error| Error::NetlinkError(error.to_string()))?
        {
            process_newaddr_msg(tree, msg);
        }

        // Interfaces that vanished between pulls show up as stale
        // descriptors; synthesize deletions for them.
        let stale = tree
            .interfaces()
            .map(|iface| iface.ifname.clone())
            .filter(|ifname| !seen.contains(ifname))
            .collect::<Vec<_>>();
        for ifname in stale {
            tree.remove_interface(&ifname);
        }

        Ok(())
    }

    // Applies a configuration diff to the kernel. Only flags, MTU, MAC and
    // addresses are mutated; interfaces themselves are never created or
    // destroyed here.
    pub async fn push_config(
        &mut self,
        diff: &IfTree,
        reporter: &mut ConfigErrorReporter,
    ) {
        for iface in diff.interfaces() {
            if iface.state == NodeState::NoChange && !iface.has_changed_children()
            {
                continue;
            }
            let Some(ifindex) = iface.ifindex else {
                reporter.log_error(format!(
                    "interface {} has no ifindex",
                    iface.ifname
                ));
                continue;
            };

            if iface.state == NodeState::Changed
                || iface.state == NodeState::Created
            {
                self.admin_status_change(ifindex, iface.enabled, reporter)
                    .await;
                if let Some(mtu) = iface.mtu {
                    self.mtu_change(ifindex, mtu, reporter).await;
                }
                if !iface.mac.is_unspecified() {
                    self.mac_change(ifindex, &iface.mac.as_bytes(), reporter)
                        .await;
                }
            }

            for vif in iface.vifs.values() {
                for addr in vif.addrs4.values() {
                    let prefix = IpAddr::V4(addr.addr);
                    match addr.state {
                        NodeState::Created => {
                            self.addr_install(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                        }
                        NodeState::Deleted => {
                            self.addr_uninstall(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                        }
                        NodeState::Changed => {
                            self.addr_uninstall(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                            self.addr_install(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                        }
                        NodeState::NoChange => (),
                    }
                }
                for addr in vif.addrs6.values() {
                    let prefix = IpAddr::V6(addr.addr);
                    match addr.state {
                        NodeState::Created => {
                            self.addr_install(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                        }
                        NodeState::Deleted => {
                            self.addr_uninstall(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                        }
                        NodeState::Changed => {
                            self.addr_uninstall(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                            self.addr_install(
                                ifindex,
                                prefix,
                                addr.prefix_len,
                                reporter,
                            )
                            .await;
                        }
                        NodeState::NoChange => (),
                    }
                }
            }
        }
    }

    async fn admin_status_change(
        &self,
        ifindex: u32,
        enabled: bool,
        reporter: &mut ConfigErrorReporter,
    ) {
        let request = self.handle.link().set(ifindex);
        let request = if enabled {
            request.up()
        } else {
            request.down()
        };
        if let Err(error) = request.execute().await {
            reporter.log_error(format!(
                "failed to change admin status of ifindex {ifindex}: {error}"
            ));
        }
    }

    async fn mtu_change(
        &self,
        ifindex: u32,
        mtu: u32,
        reporter: &mut ConfigErrorReporter,
    ) {
        let request = self.handle.link().set(ifindex).mtu(mtu);
        if let Err(error) = request.execute().await {
            reporter.log_error(format!(
                "failed to change MTU of ifindex {ifindex}: {error}"
            ));
        }
    }

    async fn mac_change(
        &self,
        ifindex: u32,
        mac: &[u8; 6],
        reporter: &mut ConfigErrorReporter,
    ) {
        let request = self.handle.link().set(ifindex).address(mac.to_vec());
        if let Err(error) = request.execute().await {
            reporter.log_error(format!(
                "failed to change MAC address of ifindex {ifindex}: {error}"
            ));
        }
    }

    async fn addr_install(
        &self,
        ifindex: u32,
        addr: IpAddr,
        prefix_len: u8,
        reporter: &mut ConfigErrorReporter,
    ) {
        let request = self.handle.address().add(ifindex, addr, prefix_len);
        if let Err(error) = request.execute().await {
            reporter.log_error(format!(
                "failed to install address {addr}/{prefix_len}: {error}"
            ));
        }
    }

    async fn addr_uninstall(
        &self,
        ifindex: u32,
        addr: IpAddr,
        prefix_len: u8,
        reporter: &mut ConfigErrorReporter,
    ) {
        let mut request = self.handle.address().add(ifindex, addr, prefix_len);
        let request = self.handle.address().del(request.message_mut().clone());
        if let Err(error) = request.execute().await {
            reporter.log_error(format!(
                "failed to uninstall address {addr}/{prefix_len}: {error}"
            ));
        }
    }
}

// ===== global functions =====

// Parses one asynchronous kernel event. Link and address events mutate the
// interface tree; route events come back as forwarding-table updates in
// kernel order.
pub(crate) fn process_event(
    tree: &mut IfTree,
    msg: NetlinkMessage<RtnlMessage>,
) -> Option<FibUpdate> {
    if let NetlinkPayload::InnerMessage(msg) = msg.payload {
        match msg {
            RtnlMessage::NewLink(msg) => {
                process_newlink_msg(tree, msg);
            }
            RtnlMessage::DelLink(msg) => {
                process_dellink_msg(tree, msg);
            }
            RtnlMessage::NewAddress(msg) => {
                process_newaddr_msg(tree, msg);
            }
            RtnlMessage::DelAddress(msg) => {
                process_deladdr_msg(tree, msg);
            }
            RtnlMessage::NewRoute(msg) => {
                return process_route_msg(tree, msg, FibChange::Added);
            }
            RtnlMessage::DelRoute(msg) => {
                return process_route_msg(tree, msg, FibChange::Removed);
            }
            _ => (),
        }
    }

    None
}

fn process_route_msg(
    tree: &IfTree,
    msg: RouteMessage,
    change: FibChange,
) -> Option<FibUpdate> {
    use netlink_packet_route::route::nlas::Nla;

    trace!(?msg, "received route message");

    let family = msg.header.address_family as u16;
    let prefix_len = msg.header.destination_prefix_length;
    let mut dest = None;
    let mut gateway = None;
    let mut oif = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::Destination(bytes) => dest = parse_raw_addr(family, bytes),
            Nla::Gateway(bytes) => gateway = parse_raw_addr(family, bytes),
            Nla::Oif(ifindex) => oif = Some(ifindex),
            _ => (),
        }
    }
    let dest = dest?;
    let net = IpNetwork::new(dest, prefix_len).ok()?;

    let mut flags = FteFlags::empty();
    if msg.header.kind == RTN_BLACKHOLE {
        flags.insert(FteFlags::DISCARD);
    }
    let protocol = match msg.header.protocol {
        RTPROT_RIP => Protocol::RIPV2,
        RTPROT_STATIC => Protocol::STATIC,
        _ => Protocol::DIRECT,
    };
    let ifname = oif
        .and_then(|ifindex| tree.ifname_by_ifindex(ifindex))
        .unwrap_or_default()
        .to_owned();

    let fte = Fte::new(
        net,
        gateway,
        ifname.clone(),
        ifname,
        0,
        0,
        protocol,
        flags,
    );
    Some(FibUpdate { change, fte })
}

fn process_newlink_msg(tree: &mut IfTree, msg: LinkMessage) -> Option<String> {
    use netlink_packet_route::link::nlas::Nla;

    trace!(?msg, "received RTM_NEWLINK message");

    // Fetch interface attributes.
    let ifindex = msg.header.index;
    let mut ifname = None;
    let mut mtu = None;
    let mut mac = [0u8; 6];

    let mut flags = InterfaceFlags::empty();
    if msg.header.link_layer_type == ARPHRD_LOOPBACK {
        flags.insert(InterfaceFlags::LOOPBACK);
    }
    if msg.header.flags & IFF_RUNNING != 0 {
        flags.insert(InterfaceFlags::OPERATIVE);
    }
    if msg.header.flags & IFF_BROADCAST != 0 {
        flags.insert(InterfaceFlags::BROADCAST);
    }
    if msg.header.flags & IFF_POINTOPOINT != 0 {
        flags.insert(InterfaceFlags::POINTOPOINT);
    }
    if msg.header.flags & IFF_MULTICAST != 0 {
        flags.insert(InterfaceFlags::MULTICAST);
    }
    let enabled = msg.header.flags & IFF_UP != 0;
    let no_carrier = enabled && msg.header.flags & IFF_RUNNING == 0;

    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::IfName(nla_ifname) => ifname = Some(nla_ifname),
            Nla::Mtu(nla_mtu) => mtu = Some(nla_mtu),
            Nla::Address(addr) => {
                mac = addr.try_into().unwrap_or([0u8; 6]);
            }
            _ => (),
        }
    }
    let (Some(ifname), Some(mtu)) = (ifname, mtu) else {
        return None;
    };

    // Add or update the interface. The Linux model maps each link to a
    // single vif of the same name.
    let mac = mac.into();
    let iface = tree.add_interface(&ifname);
    let changed = iface.mtu != Some(mtu)
        || iface.flags != flags
        || iface.no_carrier != no_carrier
        || iface.enabled != enabled
        || iface.mac != mac;
    if changed && iface.state == NodeState::NoChange {
        iface.state = NodeState::Changed;
    }
    iface.mtu = Some(mtu);
    iface.flags = flags;
    iface.no_carrier = no_carrier;
    iface.enabled = enabled;
    iface.mac = mac;
    let vif = iface.add_vif(&ifname);
    if changed && vif.state == NodeState::NoChange {
        vif.state = NodeState::Changed;
    }
    vif.flags = flags;
    vif.enabled = enabled;
    tree.set_ifindex(&ifname, Some(ifindex));

    Some(ifname)
}

fn process_dellink_msg(tree: &mut IfTree, msg: LinkMessage) {
    trace!(?msg, "received RTM_DELLINK message");

    let ifindex = msg.header.index;
    if let Some(ifname) = tree.ifname_by_ifindex(ifindex).map(str::to_owned) {
        tree.remove_interface(&ifname);
    }
}

fn process_newaddr_msg(tree: &mut IfTree, msg: AddressMessage) {
    trace!(?msg, "received RTM_NEWADDR message");

    let Some((ifname, local, peer, broadcast, prefix_len)) =
        parse_addr_msg(tree, msg)
    else {
        return;
    };
    let Some(vif) = tree.vif_mut(&ifname, &ifname) else {
        return;
    };

    let ptp = vif.flags.contains(InterfaceFlags::POINTOPOINT);
    match local {
        IpAddr::V4(addr) => {
            let peer = peer.and_then(Ipv4Addr::get).filter(|_| ptp);
            let broadcast = broadcast.and_then(Ipv4Addr::get).filter(|_| !ptp);
            vif.add_addr4(addr, prefix_len, broadcast, peer);
        }
        IpAddr::V6(addr) => {
            let peer = peer.and_then(Ipv6Addr::get).filter(|_| ptp);
            vif.add_addr6(addr, prefix_len, peer);
        }
    }
}

fn process_deladdr_msg(tree: &mut IfTree, msg: AddressMessage) {
    trace!(?msg, "received RTM_DELADDR message");

    let Some((ifname, local, _, _, _)) = parse_addr_msg(tree, msg) else {
        return;
    };
    let Some(vif) = tree.vif_mut(&ifname, &ifname) else {
        return;
    };

    match local {
        IpAddr::V4(addr) => {
            vif.remove_addr4(&addr);
        }
        IpAddr::V6(addr) => {
            vif.remove_addr6(&addr);
        }
    }
}

fn parse_addr_msg(
    tree: &IfTree,
    msg: AddressMessage,
) -> Option<(String, IpAddr, Option<IpAddr>, Option<IpAddr>, u8)> {
    use netlink_packet_route::address::nlas::Nla;

    let ifindex = msg.header.index;
    let family = msg.header.family as u16;
    let prefix_len = msg.header.prefix_len;
    let mut local = None;
    let mut address = None;
    let mut broadcast = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::Local(bytes) => local = parse_raw_addr(family, bytes),
            Nla::Address(bytes) => address = parse_raw_addr(family, bytes),
            Nla::Broadcast(bytes) => {
                broadcast = parse_raw_addr(family, bytes)
            }
            _ => (),
        }
    }

    // On point-to-point links IFA_ADDRESS is the peer; elsewhere it
    // duplicates IFA_LOCAL.
    let local = local.or(address)?;
    let peer = address.filter(|address| *address != local);

    let ifname = tree.ifname_by_ifindex(ifindex)?.to_owned();
    Some((ifname, local, peer, broadcast, prefix_len))
}

fn parse_raw_addr(family: u16, bytes: Vec<u8>) -> Option<IpAddr> {
    match family {
        AF_INET => {
            let addr: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(addr)))
        }
        AF_INET6 => {
            let addr: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(addr)))
        }
        _ => None,
    }
}
