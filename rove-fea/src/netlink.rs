//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use netlink_packet_route::constants::RTN_BLACKHOLE;
use rove_utils::protocol::Protocol;
use rtnetlink::Handle;
use std::net::IpAddr;
use tracing::{debug, error};

use crate::fib::{Fte, FteFlags};

// Route protocol types as defined in the rtnetlink.h kernel header.
const NETLINK_PROTO_UNSPEC: u8 = 0;
const NETLINK_PROTO_RIP: u8 = 189;

fn netlink_protocol(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::RIPV2 | Protocol::RIPNG => NETLINK_PROTO_RIP,
        _ => NETLINK_PROTO_UNSPEC,
    }
}

// Installs one forwarding entry into the kernel FIB.
pub(crate) async fn route_install(handle: &Handle, fte: &Fte, ifindex: Option<u32>) {
    // Create netlink request.
    let mut request = handle.route().add();

    // Set route protocol.
    let protocol = netlink_protocol(fte.protocol);
    request = request.protocol(protocol);

    match &fte.net {
        IpNetwork::V4(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v4()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix());

            if fte.flags.contains(FteFlags::DISCARD) {
                // Blackhole entries carry no nexthop.
                request.message_mut().header.kind = RTN_BLACKHOLE;
            } else {
                if let Some(IpAddr::V4(nexthop)) = fte.nexthop {
                    request = request.gateway(nexthop);
                }
                if let Some(ifindex) = ifindex {
                    request = request.output_interface(ifindex);
                }
            }

            // Execute request.
            if let Err(error) = request.execute().await {
                error!(prefix = %fte.net, %error, "failed to install route");
            }
        }
        IpNetwork::V6(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v6()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix());

            if fte.flags.contains(FteFlags::DISCARD) {
                request.message_mut().header.kind = RTN_BLACKHOLE;
            } else {
                if let Some(IpAddr::V6(nexthop)) = fte.nexthop {
                    request = request.gateway(nexthop);
                }
                if let Some(ifindex) = ifindex {
                    request = request.output_interface(ifindex);
                }
            }

            // Execute request.
            if let Err(error) = request.execute().await {
                error!(prefix = %fte.net, %error, "failed to install route");
            }
        }
    }
}

// Uninstalls one forwarding entry from the kernel FIB.
//
// ESRCH means the kernel already removed the route; that is expected when
// the outgoing interface went administratively down and is treated as
// success in that case.
pub(crate) async fn route_uninstall(
    handle: &Handle,
    prefix: &IpNetwork,
    protocol: Protocol,
    iface_down: bool,
) {
    // Create netlink request.
    let mut request = handle.route().add();

    // Set route protocol.
    let protocol = netlink_protocol(protocol);
    request = request.protocol(protocol);

    let result = match prefix {
        IpNetwork::V4(prefix) => {
            let mut request = request
                .v4()
                .destination_prefix(prefix.ip(), prefix.prefix());
            let request = handle.route().del(request.message_mut().clone());
            request.execute().await
        }
        IpNetwork::V6(prefix) => {
            let mut request = request
                .v6()
                .destination_prefix(prefix.ip(), prefix.prefix());
            let request = handle.route().del(request.message_mut().clone());
            request.execute().await
        }
    };

    match result {
        Ok(()) => (),
        Err(rtnetlink::Error::NetlinkError(msg))
            if msg.code == -libc::ESRCH && iface_down =>
        {
            debug!(%prefix, "route already gone from the kernel");
        }
        Err(error) => {
            error!(%prefix, %error, "failed to uninstall route");
        }
    }
}
