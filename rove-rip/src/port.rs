//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use generational_arena::{Arena, Index};
use rand::Rng;
use rove_utils::UnboundedSender;
use rove_utils::ip::{IpNetworkKind, SocketAddrKind};
use rove_utils::socket::UdpSocket;
use rove_utils::southbound::InterfaceFlags;
use rove_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc;

use crate::auth::{AuthCfg, AuthCtx};
use crate::config::PortCfg;
use crate::debug::{Debug, PortInactiveReason};
use crate::error::{Error, IoError};
use crate::instance::{InstanceUpView, InstanceChannelsTx};
use crate::network::SendDestination;
use crate::packet_queue::PacketQueue;
use crate::peer::{Peer, RetiredPeer};
use crate::tasks;
use crate::tasks::messages::output::UdpTxMsg;
use crate::version::Version;
use crate::output;

pub type PortIndex = Index;
pub type PortUp<V> = PortCommon<V, PortState<V>>;
pub type PortDown<V> = PortCommon<V, PortStateDown>;

// Per-interface protocol state machine.
//
// A port is Up when it is administratively enabled, the underlying
// interface is operative and addressed, and its sockets are open. The
// Transitioning variant only exists to allow in-place state changes.
#[derive(Debug)]
pub enum Port<V: Version> {
    Up(PortUp<V>),
    Down(PortDown<V>),
    Transitioning,
}

#[derive(Debug)]
pub struct PortCommon<V: Version, State> {
    // Port state-independent data.
    pub core: PortCore<V>,
    // Port state-dependent data.
    pub state: State,
}

#[derive(Debug)]
pub struct PortCore<V: Version> {
    pub name: String,
    pub system: PortSys<V>,
    pub config: PortCfg<V>,
}

#[derive(Debug)]
pub struct PortSys<V: Version> {
    pub flags: InterfaceFlags,
    pub ifindex: Option<u32>,
    pub mtu: Option<u32>,
    pub addr_list: BTreeSet<V::IpNetwork>,
}

#[derive(Debug)]
pub struct PortState<V: Version> {
    // UDP socket and Tx/Rx tasks.
    pub net: Option<PortNet<V>>,
    // Message statistics.
    pub statistics: MessageStatistics,
    // Remote speakers heard on this port.
    pub peers: BTreeMap<V::IpAddr, Peer<V>>,
    // Collected peers whose counters are still observable.
    pub retired_peers: BTreeMap<V::IpAddr, RetiredPeer>,
    // Outbound packets awaiting transmission.
    pub packet_queue: PacketQueue<V>,
    // Whether a transmission is in flight.
    pub tx_pending: bool,
    // Jittered unsolicited update timer.
    pub update_interval_task: Option<TimeoutTask>,
    // Whole-table request timer, armed while the peer set is empty.
    pub table_request_task: Option<IntervalTask>,
    // Authentication key lifetime timer.
    pub key_transition_task: Option<TimeoutTask>,
    // Time of the last reply to a diagnostic table query.
    pub last_query_reply: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct PortStateDown();

#[derive(Debug)]
pub struct PortNet<V: Version> {
    // UDP socket.
    pub socket: Arc<UdpSocket>,
    // UDP Tx/Rx tasks.
    _udp_tx_task: Task<()>,
    _udp_rx_task: Task<()>,
    // UDP Tx output channel.
    pub udp_txp: UnboundedSender<UdpTxMsg<V>>,
}

// Inbound and outbound statistic counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub discontinuity_time: Option<DateTime<Utc>>,
    pub bad_packets_rcvd: u32,
    pub bad_auth_packets_rcvd: u32,
    pub bad_routes_rcvd: u32,
    pub updates_sent: u32,
}

#[derive(Debug)]
pub struct Ports<V: Version> {
    pub arena: Arena<Port<V>>,
    name_tree: BTreeMap<String, PortIndex>,
    ifindex_tree: HashMap<u32, PortIndex>,
}

// RIP version-specific code.
pub trait PortVersion<V: Version> {
    // Return a mutable reference to the port corresponding to the given
    // packet source.
    fn get_port_by_source(
        ports: &mut Ports<V>,
        source: V::SocketAddr,
    ) -> Option<(PortIndex, &mut Port<V>)>;
}

// ===== impl Port =====

impl<V> Port<V>
where
    V: Version,
{
    fn new(name: String) -> Port<V> {
        Debug::<V>::PortCreate(&name).log();

        Port::Down(PortDown {
            core: PortCore {
                name,
                system: PortSys::default(),
                config: PortCfg::default(),
            },
            state: PortStateDown(),
        })
    }

    // Checks if the port needs to be started or stopped in response to a
    // configuration or interface event.
    pub(crate) fn update(&mut self, instance: &mut InstanceUpView<'_, V>) {
        match self.is_ready() {
            Ok(()) if !self.is_active() => {
                self.start(instance);
            }
            Err(reason) if self.is_active() => {
                self.stop(instance, reason);
            }
            _ => (),
        }
    }

    // Starts RIP operation on this port.
    fn start(&mut self, instance: &mut InstanceUpView<'_, V>) {
        let port = match std::mem::replace(self, Port::Transitioning) {
            Port::Down(port) => port,
            _ => unreachable!(),
        };
        match port.start(instance) {
            Ok(port) => {
                *self = Port::Up(port);
            }
            Err((port, error)) => {
                Error::<V>::PortStartError(port.core.name.clone(), error)
                    .log();
                *self = Port::Down(port);
            }
        }
    }

    // Stops RIP operation on this port.
    pub(crate) fn stop(
        &mut self,
        instance: &mut InstanceUpView<'_, V>,
        reason: PortInactiveReason,
    ) {
        if !self.is_active() {
            return;
        }

        let port = match std::mem::replace(self, Port::Transitioning) {
            Port::Up(port) => port,
            _ => unreachable!(),
        };
        *self = Port::Down(port.stop(instance, reason));
    }

    // Checks if RIP is operational on this port.
    pub(crate) fn is_active(&self) -> bool {
        matches!(self, Port::Up(_))
    }

    // Returns whether the port is ready for RIP operation.
    fn is_ready(&self) -> Result<(), PortInactiveReason> {
        if !self.core().config.enabled {
            return Err(PortInactiveReason::AdminDown);
        }

        if !self.core().system.flags.contains(InterfaceFlags::OPERATIVE) {
            return Err(PortInactiveReason::OperationalDown);
        }

        if self.core().system.ifindex.is_none() {
            return Err(PortInactiveReason::MissingIfindex);
        }

        if self.core().system.addr_list.is_empty() {
            return Err(PortInactiveReason::MissingIpAddress);
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn core(&self) -> &PortCore<V> {
        match self {
            Port::Up(port) => &port.core,
            Port::Down(port) => &port.core,
            Port::Transitioning => unreachable!(),
        }
    }

    #[inline]
    pub(crate) fn core_mut(&mut self) -> &mut PortCore<V> {
        match self {
            Port::Up(port) => &mut port.core,
            Port::Down(port) => &mut port.core,
            Port::Transitioning => unreachable!(),
        }
    }

    pub(crate) fn as_up(&mut self) -> Option<&mut PortUp<V>> {
        match self {
            Port::Up(port) => Some(port),
            _ => None,
        }
    }
}

// ===== impl PortCommon =====

// Active RIP port.
impl<V> PortCommon<V, PortState<V>>
where
    V: Version,
{
    fn stop(
        mut self,
        instance: &mut InstanceUpView<'_, V>,
        reason: PortInactiveReason,
    ) -> PortCommon<V, PortStateDown> {
        Debug::<V>::PortStop(&self.core.name, reason).log();

        // Invalidate all routes that go through this port.
        for route in instance
            .state
            .routes
            .values_mut()
            .filter(|route| route.ifindex == self.core.system.ifindex.unwrap())
        {
            route.invalidate(instance.config.flush_interval, instance.tx);
        }

        // Leave the multicast group before the socket goes away.
        if let Some(net) = &self.state.net {
            self.core.system.leave_multicast(&net.socket);
        }
        self.state.packet_queue.flush();

        PortCommon::<V, PortStateDown> {
            core: self.core,
            state: PortStateDown(),
        }
    }

    pub(crate) fn is_passive(&self) -> bool {
        self.core.system.flags.contains(InterfaceFlags::LOOPBACK)
            || self.core.config.passive
    }

    // Builds the authentication context used to encode or decode one
    // packet.
    pub(crate) fn auth<'a>(
        &'a self,
        seqno: &'a Arc<std::sync::atomic::AtomicU32>,
    ) -> Option<AuthCtx<'a>> {
        self.core.config.auth.method().map(|method| AuthCtx {
            method,
            seqno,
            now: Utc::now(),
        })
    }

    // Runs the passed closure once for each one of the valid port
    // destinations (multicast and unicast).
    pub(crate) fn with_destinations<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut PortUp<V>, SendDestination<V::SocketAddr>),
    {
        // Multicast dst.
        let dst = SendDestination::Multicast(self.core.system.ifindex.unwrap());
        f(self, dst);

        // Unicast destinations (explicit neighbors).
        let explicit_neighbors =
            std::mem::take(&mut self.core.config.explicit_neighbors);
        for nbr_addr in &explicit_neighbors {
            if self.core.system.contains_addr(nbr_addr) {
                let sockaddr = V::SocketAddr::new(*nbr_addr, V::UDP_PORT);
                let dst = SendDestination::Unicast(sockaddr);
                f(self, dst);
            }
        }
        self.core.config.explicit_neighbors = explicit_neighbors;
    }

    // Forwards the head of the packet queue to the transmit task, one
    // packet at a time. The head is popped on send completion.
    pub(crate) fn pump_packet_queue(&mut self) {
        if self.state.tx_pending {
            return;
        }
        let Some(net) = &self.state.net else {
            return;
        };
        if let Some(head) = self.state.packet_queue.head() {
            let msg = UdpTxMsg {
                dst: head.dst,
                buf: head.buf.clone(),
            };
            if net.udp_txp.send(msg).is_ok() {
                self.state.tx_pending = true;
            }
        }
    }

    pub(crate) fn tx_done(&mut self) {
        self.state.tx_pending = false;
        self.state.packet_queue.pop_head();
        self.pump_packet_queue();
    }

    // Re-arms the unsolicited update timer with a fresh random interval.
    pub(crate) fn schedule_update_interval(
        &mut self,
        instance: &InstanceUpView<'_, V>,
    ) {
        if self.is_passive() {
            self.state.update_interval_task = None;
            return;
        }

        let interval = rand::rng().random_range(
            instance.config.unsolicited_min..=instance.config.unsolicited_max,
        );
        let task = tasks::update_interval(
            &self.core.name,
            Duration::from_secs(interval.into()),
            &instance.tx.protocol_input.update_interval,
        );
        self.state.update_interval_task = Some(task);
    }

    // The table-request timer runs only while no peer has been heard.
    pub(crate) fn sync_table_request_timer(
        &mut self,
        instance: &InstanceUpView<'_, V>,
    ) {
        let period = instance.config.table_request_period;
        if period == 0 || !self.state.peers.is_empty() || self.is_passive() {
            self.state.table_request_task = None;
            return;
        }
        if self.state.table_request_task.is_none() {
            let task = tasks::table_request(
                &self.core.name,
                Duration::from_secs(period.into()),
                &instance.tx.protocol_input.table_request,
            );
            self.state.table_request_task = Some(task);
        }
    }

    // Schedules a wakeup at the next authentication key lifetime boundary.
    pub(crate) fn schedule_key_transition(
        &mut self,
        instance: &InstanceUpView<'_, V>,
    ) {
        self.state.key_transition_task = None;
        if let AuthCfg::Md5(keychain) = &self.core.config.auth
            && let Some((_, _, when)) = keychain.next_transition(Utc::now())
        {
            let delay = (when - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(0));
            let task = tasks::key_transition(
                &self.core.name,
                delay,
                &instance.tx.protocol_input.key_transition,
            );
            self.state.key_transition_task = Some(task);
        }
    }
}

// Inactive RIP port.
impl<V> PortCommon<V, PortStateDown>
where
    V: Version,
{
    #[allow(clippy::result_large_err)]
    fn start(
        self,
        instance: &mut InstanceUpView<'_, V>,
    ) -> Result<PortCommon<V, PortState<V>>, (Self, IoError)> {
        Debug::<V>::PortStart(&self.core.name).log();

        let mut port = PortCommon {
            core: self.core,
            state: PortState {
                net: None,
                statistics: Default::default(),
                peers: Default::default(),
                retired_peers: Default::default(),
                packet_queue: PacketQueue::new(),
                tx_pending: false,
                update_interval_task: None,
                table_request_task: None,
                key_transition_task: None,
                last_query_reply: None,
            },
        };

        // Start network Tx/Rx tasks.
        if !port.core.system.flags.contains(InterfaceFlags::LOOPBACK) {
            let net = match PortNet::new(&port.core.name, instance.tx) {
                Ok(net) => net,
                Err(error) => {
                    let port = PortCommon {
                        core: port.core,
                        state: PortStateDown(),
                    };
                    return Err((port, error));
                }
            };
            port.core.system.join_multicast(&net.socket);
            port.state.net = Some(net);
        }

        // Request the entire routing table from the attached networks.
        if !port.is_passive() {
            port.with_destinations(|port, destination| {
                output::send_request(instance, port, destination);
            });
        }

        // Start output timers.
        port.schedule_update_interval(instance);
        port.sync_table_request_timer(instance);
        port.schedule_key_transition(instance);

        Ok(port)
    }
}

// ===== impl PortNet =====

impl<V> PortNet<V>
where
    V: Version,
{
    fn new(
        ifname: &str,
        instance_tx: &InstanceChannelsTx<V>,
    ) -> Result<Self, IoError> {
        // Create UDP socket.
        let socket = V::socket(ifname)
            .map_err(IoError::UdpSocketError)
            .map(Arc::new)?;

        // Start UDP Tx/Rx tasks.
        let (udp_txp, udp_txc) = mpsc::unbounded_channel();
        let udp_tx_task = tasks::udp_tx(
            &socket,
            ifname,
            udp_txc,
            &instance_tx.protocol_input.udp_tx_done,
            #[cfg(feature = "testing")]
            &instance_tx.protocol_output,
        );
        let udp_rx_task =
            tasks::udp_rx(&socket, &instance_tx.protocol_input.udp_buf_rx);

        Ok(PortNet {
            socket,
            _udp_tx_task: udp_tx_task,
            _udp_rx_task: udp_rx_task,
            udp_txp,
        })
    }
}

// ===== impl PortSys =====

impl<V> PortSys<V>
where
    V: Version,
{
    // Checks if the port shares a subnet with the given IP address.
    pub(crate) fn contains_addr(&self, addr: &V::IpAddr) -> bool {
        self.addr_list.iter().any(|local| local.contains(*addr))
    }

    // Checks if the given address is one of the port's own addresses.
    pub(crate) fn is_own_addr(&self, addr: &V::IpAddr) -> bool {
        self.addr_list.iter().any(|local| local.ip() == *addr)
    }

    // Checks if the given address is the directed broadcast address of one
    // of the port's subnets.
    pub(crate) fn is_broadcast_addr(&self, addr: &V::IpAddr) -> bool {
        self.addr_list
            .iter()
            .any(|local| local.broadcast_addr() == Some(*addr))
    }

    pub(crate) fn join_multicast(&self, socket: &UdpSocket) {
        if let Err(error) = V::join_multicast(socket, self.ifindex.unwrap()) {
            IoError::UdpMulticastJoinError(error).log();
        }
    }

    pub(crate) fn leave_multicast(&self, socket: &UdpSocket) {
        if let Err(error) = V::leave_multicast(socket, self.ifindex.unwrap()) {
            IoError::UdpMulticastLeaveError(error).log();
        }
    }
}

impl<V> Default for PortSys<V>
where
    V: Version,
{
    fn default() -> PortSys<V> {
        PortSys {
            flags: Default::default(),
            ifindex: None,
            mtu: None,
            addr_list: Default::default(),
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update_discontinuity_time(&mut self) {
        self.discontinuity_time = Some(Utc::now());
    }
}

// ===== impl Ports =====

impl<V> Ports<V>
where
    V: Version,
{
    pub(crate) fn add(&mut self, ifname: &str) -> (PortIndex, &mut Port<V>) {
        // Check for existing entry first.
        if let Some(port_idx) = self.name_tree.get(ifname).copied() {
            let port = &mut self.arena[port_idx];
            return (port_idx, port);
        }

        // Create and insert port into the arena.
        let port = Port::new(ifname.to_owned());
        let port_idx = self.arena.insert(port);

        // Link port to different collections.
        let port = &mut self.arena[port_idx];
        self.name_tree.insert(port.core().name.clone(), port_idx);

        (port_idx, port)
    }

    pub(crate) fn delete(&mut self, port_idx: PortIndex) {
        let port = &mut self.arena[port_idx];

        Debug::<V>::PortDelete(&port.core().name).log();

        // Unlink port from different collections.
        self.name_tree.remove(&port.core().name);
        if let Some(ifindex) = port.core().system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }

        // Remove port from the arena.
        self.arena.remove(port_idx);
    }

    pub(crate) fn update_ifindex(
        &mut self,
        ifname: &str,
        ifindex: Option<u32>,
    ) -> Option<(PortIndex, &mut Port<V>)> {
        let port_idx = self.name_tree.get(ifname).copied()?;
        let port = &mut self.arena[port_idx];

        // Update port ifindex.
        if let Some(ifindex) = port.core().system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }
        port.core_mut().system.ifindex = ifindex;
        if let Some(ifindex) = ifindex {
            self.ifindex_tree.insert(ifindex, port_idx);
        }

        Some((port_idx, port))
    }

    // Returns a mutable reference to the port corresponding to the given
    // name.
    pub(crate) fn get_mut_by_name(
        &mut self,
        ifname: &str,
    ) -> Option<(PortIndex, &mut Port<V>)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |port_idx| (port_idx, &mut self.arena[port_idx]))
    }

    // Returns a reference to the port corresponding to the given ifindex.
    pub fn get_by_ifindex(
        &self,
        ifindex: u32,
    ) -> Option<(PortIndex, &Port<V>)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(|port_idx| (port_idx, &self.arena[port_idx]))
    }

    // Returns a mutable reference to the port corresponding to the given
    // ifindex.
    pub(crate) fn get_mut_by_ifindex(
        &mut self,
        ifindex: u32,
    ) -> Option<(PortIndex, &mut Port<V>)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(move |port_idx| (port_idx, &mut self.arena[port_idx]))
    }

    // Returns an iterator visiting all ports.
    //
    // Ports are ordered by their names.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Port<V>> + '_ {
        self.name_tree.values().map(|port_idx| &self.arena[*port_idx])
    }

    // Returns an iterator visiting all ports with mutable references.
    //
    // Order of iteration is not defined.
    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &'_ mut Port<V>> + '_ {
        self.arena.iter_mut().map(|(_, port)| port)
    }
}

impl<V> Default for Ports<V>
where
    V: Version,
{
    fn default() -> Ports<V> {
        Ports {
            arena: Arena::new(),
            name_tree: Default::default(),
            ifindex_tree: Default::default(),
        }
    }
}

impl<V> std::ops::Index<PortIndex> for Ports<V>
where
    V: Version,
{
    type Output = Port<V>;

    fn index(&self, index: PortIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl<V> std::ops::IndexMut<PortIndex> for Ports<V>
where
    V: Version,
{
    fn index_mut(&mut self, index: PortIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== PortVersion implementations =====

impl PortVersion<crate::version::Ripv2> for crate::version::Ripv2 {
    // RIPv2 messages are matched to the port whose subnet contains the
    // source address.
    fn get_port_by_source(
        ports: &mut Ports<crate::version::Ripv2>,
        source: std::net::SocketAddrV4,
    ) -> Option<(PortIndex, &mut Port<crate::version::Ripv2>)> {
        let port_idx = ports.arena.iter().find_map(|(port_idx, port)| {
            match port {
                Port::Up(port)
                    if port.core.system.contains_addr(source.ip()) =>
                {
                    Some(port_idx)
                }
                _ => None,
            }
        })?;
        Some((port_idx, &mut ports.arena[port_idx]))
    }
}

impl PortVersion<crate::version::Ripng> for crate::version::Ripng {
    // RIPng messages arrive from link-local sources; the scope identifier
    // names the receiving interface.
    fn get_port_by_source(
        ports: &mut Ports<crate::version::Ripng>,
        source: std::net::SocketAddrV6,
    ) -> Option<(PortIndex, &mut Port<crate::version::Ripng>)> {
        ports.get_mut_by_ifindex(source.scope_id())
    }
}
