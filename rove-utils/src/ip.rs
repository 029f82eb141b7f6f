//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6,
};

use ipnetwork::{IpNetwork, IpNetworkError, Ipv4Network, Ipv6Network};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Address family.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns length of the IP address in bytes.
    fn length(&self) -> usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IP address into a host prefix network.
    fn to_host_prefix(&self) -> IpNetwork;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Returns true if the address lies in the reserved class E block.
    fn is_class_e(&self) -> bool;

    // Converts this IPv4 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv4Network;

    // Derives the classful prefix length (A/B/C) from the leading octet.
    fn classful_prefixlen(&self) -> Option<u8>;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IPv6 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv6Network;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> IpNetwork;

    // Returns true if this is a routable network.
    fn is_routable(&self) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;

    // Returns true if this is a routable network.
    fn is_routable(&self) -> bool;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv6Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;

    // Returns true if this is a routable network.
    fn is_routable(&self) -> bool;
}

pub trait IpAddrKind:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpAddr>
{
    fn address_family(&self) -> AddressFamily;

    fn get(addr: IpAddr) -> Option<Self>;

    fn is_usable(&self) -> bool;

    fn is_multicast(&self) -> bool;

    fn is_linklocal_unicast(&self) -> bool;
}

pub trait IpNetworkKind<I: IpAddrKind>:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpNetwork>
{
    fn new(addr: I, prefix: u8) -> Result<Self, IpNetworkError>;

    fn default(af: AddressFamily) -> Self;

    fn address_family(&self) -> AddressFamily;

    fn get(prefix: IpNetwork) -> Option<Self>;

    fn contains(&self, ip: I) -> bool;

    fn ip(&self) -> I;

    fn mask(&self) -> I;

    fn prefixlen(&self) -> u8;

    #[must_use]
    fn apply_mask(&self) -> Self;

    // Returns the subnet's directed broadcast address, where the address
    // family has one.
    fn broadcast_addr(&self) -> Option<I>;

    fn is_default(&self) -> bool;

    fn is_routable(&self) -> bool;
}

pub trait SocketAddrKind<I: IpAddrKind>:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + tokio::net::ToSocketAddrs
    + Into<SocketAddr>
{
    fn new(ip: I, port: u16) -> Self;

    fn get(sockaddr: SocketAddr) -> Option<Self>;

    fn ip(&self) -> &I;

    fn port(&self) -> u16;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => Ipv4Addr::LENGTH,
            AddressFamily::Ipv6 => Ipv6Addr::LENGTH,
        }
    }

    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => Ipv4Network::MAX_PREFIXLEN,
            AddressFamily::Ipv6 => Ipv6Network::MAX_PREFIXLEN,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn length(&self) -> usize {
        match self {
            IpAddr::V4(_) => Ipv4Addr::LENGTH,
            IpAddr::V6(_) => Ipv6Addr::LENGTH,
        }
    }

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> IpNetwork {
        match self {
            IpAddr::V4(addr) => addr.to_host_prefix().into(),
            IpAddr::V6(addr) => addr.to_host_prefix().into(),
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl IpAddrKind for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn get(addr: IpAddr) -> Option<Self> {
        Some(addr)
    }

    fn is_usable(&self) -> bool {
        IpAddrExt::is_usable(self)
    }

    fn is_multicast(&self) -> bool {
        IpAddr::is_multicast(self)
    }

    fn is_linklocal_unicast(&self) -> bool {
        match self {
            IpAddr::V4(addr) => addr.is_link_local(),
            IpAddr::V6(addr) => addr.is_unicast_link_local(),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }

    fn is_class_e(&self) -> bool {
        self.octets()[0] >= 240 && !self.is_broadcast()
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Ipv4Network::MAX_PREFIXLEN).unwrap()
    }

    fn classful_prefixlen(&self) -> Option<u8> {
        match self.octets()[0] {
            0..=127 => Some(8),
            128..=191 => Some(16),
            192..=223 => Some(24),
            // Class D and E addresses have no classful mask.
            _ => None,
        }
    }
}

impl IpAddrKind for Ipv4Addr {
    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V4(addr) => Some(addr),
            _ => None,
        }
    }

    fn is_usable(&self) -> bool {
        Ipv4AddrExt::is_usable(self)
    }

    fn is_multicast(&self) -> bool {
        Ipv4Addr::is_multicast(self)
    }

    fn is_linklocal_unicast(&self) -> bool {
        self.is_link_local()
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv6Network {
        Ipv6Network::new(*self, Ipv6Network::MAX_PREFIXLEN).unwrap()
    }
}

impl IpAddrKind for Ipv6Addr {
    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(addr: IpAddr) -> Option<Self> {
        match addr {
            IpAddr::V6(addr) => Some(addr),
            _ => None,
        }
    }

    fn is_usable(&self) -> bool {
        Ipv6AddrExt::is_usable(self)
    }

    fn is_multicast(&self) -> bool {
        Ipv6Addr::is_multicast(self)
    }

    fn is_linklocal_unicast(&self) -> bool {
        self.is_unicast_link_local()
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(prefix) => {
                IpNetwork::V4(Ipv4NetworkExt::apply_mask(prefix))
            }
            IpNetwork::V6(prefix) => {
                IpNetwork::V6(Ipv6NetworkExt::apply_mask(prefix))
            }
        }
    }

    fn is_routable(&self) -> bool {
        match self {
            IpNetwork::V4(prefix) => Ipv4NetworkExt::is_routable(prefix),
            IpNetwork::V6(prefix) => Ipv6NetworkExt::is_routable(prefix),
        }
    }
}

impl IpNetworkKind<IpAddr> for IpNetwork {
    fn new(addr: IpAddr, prefix: u8) -> Result<Self, IpNetworkError> {
        IpNetwork::new(addr, prefix)
    }

    fn default(af: AddressFamily) -> Self {
        IpNetwork::new(IpAddr::unspecified(af), 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        Some(prefix)
    }

    fn contains(&self, ip: IpAddr) -> bool {
        IpNetwork::contains(self, ip)
    }

    fn ip(&self) -> IpAddr {
        IpNetwork::ip(self)
    }

    fn mask(&self) -> IpAddr {
        IpNetwork::mask(self)
    }

    fn prefixlen(&self) -> u8 {
        IpNetwork::prefix(self)
    }

    fn apply_mask(&self) -> Self {
        IpNetworkExt::apply_mask(self)
    }

    fn broadcast_addr(&self) -> Option<IpAddr> {
        match self {
            IpNetwork::V4(prefix) => {
                IpNetworkKind::broadcast_addr(prefix).map(IpAddr::V4)
            }
            IpNetwork::V6(_) => None,
        }
    }

    fn is_default(&self) -> bool {
        self.prefix() == 0 && self.ip().is_unspecified()
    }

    fn is_routable(&self) -> bool {
        IpNetworkExt::is_routable(self)
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_broadcast()
            && !self.ip().is_loopback()
            && !self.ip().is_multicast()
            // Addresses in the 240.0.0.0/4 block are reserved.
            && self.ip().octets()[0] < 240
    }
}

impl IpNetworkKind<Ipv4Addr> for Ipv4Network {
    fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv4Network::new(addr, prefix)
    }

    fn default(_af: AddressFamily) -> Self {
        Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        match prefix {
            IpNetwork::V4(prefix) => Some(prefix),
            _ => None,
        }
    }

    fn contains(&self, ip: Ipv4Addr) -> bool {
        Ipv4Network::contains(*self, ip)
    }

    fn ip(&self) -> Ipv4Addr {
        Ipv4Network::ip(*self)
    }

    fn mask(&self) -> Ipv4Addr {
        Ipv4Network::mask(*self)
    }

    fn prefixlen(&self) -> u8 {
        Ipv4Network::prefix(*self)
    }

    fn apply_mask(&self) -> Self {
        Ipv4NetworkExt::apply_mask(self)
    }

    fn broadcast_addr(&self) -> Option<Ipv4Addr> {
        Some(self.broadcast())
    }

    fn is_default(&self) -> bool {
        self.prefix() == 0 && self.ip().is_unspecified()
    }

    fn is_routable(&self) -> bool {
        Ipv4NetworkExt::is_routable(self)
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn apply_mask(&self) -> Ipv6Network {
        Ipv6Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn is_routable(&self) -> bool {
        !self.ip().is_loopback()
            && !self.ip().is_multicast()
            && !self.ip().is_unicast_link_local()
    }
}

impl IpNetworkKind<Ipv6Addr> for Ipv6Network {
    fn new(addr: Ipv6Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv6Network::new(addr, prefix)
    }

    fn default(_af: AddressFamily) -> Self {
        Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0).unwrap()
    }

    fn address_family(&self) -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(prefix: IpNetwork) -> Option<Self> {
        match prefix {
            IpNetwork::V6(prefix) => Some(prefix),
            _ => None,
        }
    }

    fn contains(&self, ip: Ipv6Addr) -> bool {
        Ipv6Network::contains(self, ip)
    }

    fn ip(&self) -> Ipv6Addr {
        Ipv6Network::ip(self)
    }

    fn mask(&self) -> Ipv6Addr {
        Ipv6Network::mask(self)
    }

    fn prefixlen(&self) -> u8 {
        Ipv6Network::prefix(self)
    }

    fn apply_mask(&self) -> Self {
        Ipv6NetworkExt::apply_mask(self)
    }

    fn broadcast_addr(&self) -> Option<Ipv6Addr> {
        None
    }

    fn is_default(&self) -> bool {
        self.prefix() == 0 && self.ip().is_unspecified()
    }

    fn is_routable(&self) -> bool {
        Ipv6NetworkExt::is_routable(self)
    }
}

// ===== impl SocketAddrV4 =====

impl SocketAddrKind<Ipv4Addr> for SocketAddrV4 {
    fn new(ip: Ipv4Addr, port: u16) -> Self {
        SocketAddrV4::new(ip, port)
    }

    fn get(sockaddr: SocketAddr) -> Option<Self> {
        match sockaddr {
            SocketAddr::V4(sockaddr) => Some(sockaddr),
            _ => None,
        }
    }

    fn ip(&self) -> &Ipv4Addr {
        self.ip()
    }

    fn port(&self) -> u16 {
        self.port()
    }
}

// ===== impl SocketAddrV6 =====

impl SocketAddrKind<Ipv6Addr> for SocketAddrV6 {
    fn new(ip: Ipv6Addr, port: u16) -> Self {
        SocketAddrV6::new(ip, port, 0, 0)
    }

    fn get(sockaddr: SocketAddr) -> Option<Self> {
        match sockaddr {
            SocketAddr::V6(sockaddr) => Some(sockaddr),
            _ => None,
        }
    }

    fn ip(&self) -> &Ipv6Addr {
        self.ip()
    }

    fn port(&self) -> u16 {
        self.port()
    }
}
