//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use rove_utils::capabilities;
use rove_utils::socket::{SocketExt, TTL_MAX, UdpSocket, UdpSocketExt};

use crate::network::NetworkVersion;
use crate::version::Ripng;

// RIPng multicast address.
static RIPNG_MCAST_ADDR: Lazy<Ipv6Addr> =
    Lazy::new(|| Ipv6Addr::from_str("FF02::9").unwrap());
static RIPNG_MCAST_SOCKADDR: Lazy<SocketAddr> = Lazy::new(|| {
    SocketAddr::new(IpAddr::V6(*RIPNG_MCAST_ADDR), Ripng::UDP_PORT)
});

const SOCKET_RCVBUF_SIZE: i32 = 256 * 1024;

// ===== impl Ripng =====

impl NetworkVersion<Self> for Ripng {
    const UDP_PORT: u16 = 521;

    fn socket(ifname: &str) -> Result<UdpSocket, std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            let sockaddr =
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, Self::UDP_PORT));
            let socket =
                capabilities::raise(|| UdpSocket::bind_reuseaddr(sockaddr))?;
            capabilities::raise(|| {
                socket.bind_device(Some(ifname.as_bytes()))
            })?;
            socket.set_multicast_loop_v6(false)?;
            socket.set_ipv6_multicast_hopcount(TTL_MAX)?;
            socket.set_ipv6_unicast_hops(TTL_MAX)?;
            socket.set_ipv6_tclass(libc::IPTOS_PREC_INTERNETCONTROL)?;
            socket.set_so_rcvbuf(SOCKET_RCVBUF_SIZE)?;
            Ok(socket)
        }
        #[cfg(feature = "testing")]
        {
            Ok(UdpSocket::default())
        }
    }

    fn join_multicast(
        socket: &UdpSocket,
        ifindex: u32,
    ) -> Result<(), std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            socket.join_multicast_ifindex_v6(&RIPNG_MCAST_ADDR, ifindex)
        }
        #[cfg(feature = "testing")]
        {
            Ok(())
        }
    }

    fn leave_multicast(
        socket: &UdpSocket,
        ifindex: u32,
    ) -> Result<(), std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            socket.leave_multicast_ifindex_v6(&RIPNG_MCAST_ADDR, ifindex)
        }
        #[cfg(feature = "testing")]
        {
            Ok(())
        }
    }

    fn set_multicast_ifindex(
        socket: &UdpSocket,
        ifindex: u32,
    ) -> Result<(), std::io::Error> {
        #[cfg(not(feature = "testing"))]
        {
            socket.set_multicast_ifindex_v6(ifindex)
        }
        #[cfg(feature = "testing")]
        {
            Ok(())
        }
    }

    fn multicast_sockaddr() -> &'static SocketAddr {
        &RIPNG_MCAST_SOCKADDR
    }
}
