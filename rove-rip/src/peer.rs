//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, btree_map};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rove_utils::Sender;
use rove_utils::task::TimeoutTask;

use crate::debug::Debug;
use crate::tasks;
use crate::tasks::messages::input::{PeerPurgeMsg, PeerTimeoutMsg};
use crate::version::Version;

// Seconds a retired peer's counters stay visible after collection.
pub const RETIRED_RETENTION: u16 = 180;

// A remote RIP speaker heard on one port.
//
// RIP has no sessions to maintain, but tracking packet sources is needed
// for authentication replay state and is valuable for monitoring.
#[derive(Debug)]
pub struct Peer<V: Version> {
    // Peer's source address.
    pub addr: V::IpAddr,
    // Peer's source UDP port.
    pub udp_port: u16,
    // Time when the most recent packet was received from this peer.
    pub last_active: DateTime<Utc>,
    // Message counters.
    pub counters: PeerCounters,
    // Last accepted authentication sequence number.
    pub auth_seqno: u32,
    // Peer's timeout (refreshed whenever a packet is received).
    pub timeout_task: TimeoutTask,
}

#[derive(Clone, Debug, Default)]
pub struct PeerCounters {
    pub requests_rcvd: u32,
    pub responses_rcvd: u32,
    pub bad_packets_rcvd: u32,
    pub bad_routes_rcvd: u32,
}

// Counters of a garbage-collected peer, retained for a grace period so
// operational tooling can still observe them.
#[derive(Debug)]
pub struct RetiredPeer {
    pub counters: PeerCounters,
    pub retired_at: DateTime<Utc>,
    _purge_task: TimeoutTask,
}

// ===== impl Peer =====

impl<V> Peer<V>
where
    V: Version,
{
    fn new(
        ifname: &str,
        addr: V::IpAddr,
        udp_port: u16,
        timeout: u16,
        peer_timeoutp: &Sender<PeerTimeoutMsg<V>>,
    ) -> Peer<V> {
        Debug::<V>::PeerCreate(&addr).log();

        let timeout = Duration::from_secs(timeout.into());
        let timeout_task =
            tasks::peer_timeout::<V>(ifname, addr, timeout, peer_timeoutp);

        Peer {
            addr,
            udp_port,
            last_active: Utc::now(),
            counters: Default::default(),
            auth_seqno: 0,
            timeout_task,
        }
    }

    pub(crate) fn timeout_reset(&mut self, timeout: u16) {
        let timeout = Duration::from_secs(timeout.into());
        self.timeout_task.reset(timeout);
    }
}

// ===== impl RetiredPeer =====

impl RetiredPeer {
    pub(crate) fn new<V>(
        ifname: &str,
        addr: V::IpAddr,
        counters: PeerCounters,
        peer_purgep: &Sender<PeerPurgeMsg<V>>,
    ) -> RetiredPeer
    where
        V: Version,
    {
        Debug::<V>::PeerRetire(&addr).log();

        let timeout = Duration::from_secs(RETIRED_RETENTION.into());
        let purge_task =
            tasks::peer_purge::<V>(ifname, addr, timeout, peer_purgep);

        RetiredPeer {
            counters,
            retired_at: Utc::now(),
            _purge_task: purge_task,
        }
    }
}

// ===== global functions =====

// Finds or creates the peer for an incoming packet.
//
// The returned flag tells whether the peer should be treated as new for
// authentication purposes: either it was just created, or it has been idle
// for longer than the route invalid interval, in which case its replay
// state starts over.
pub(crate) fn update<'a, V>(
    peers: &'a mut BTreeMap<V::IpAddr, Peer<V>>,
    ifname: &str,
    addr: V::IpAddr,
    udp_port: u16,
    timeout: u16,
    peer_timeoutp: &Sender<PeerTimeoutMsg<V>>,
) -> (&'a mut Peer<V>, bool)
where
    V: Version,
{
    match peers.entry(addr) {
        btree_map::Entry::Occupied(o) => {
            let peer = o.into_mut();

            let idle_threshold = TimeDelta::seconds(timeout.into());
            let is_new = Utc::now() - peer.last_active > idle_threshold;

            // Update last activity and reset the timeout.
            peer.last_active = Utc::now();
            peer.timeout_reset(timeout);
            peer.udp_port = udp_port;

            (peer, is_new)
        }
        btree_map::Entry::Vacant(v) => {
            // Add new peer.
            let peer =
                Peer::new(ifname, addr, udp_port, timeout, peer_timeoutp);
            (v.insert(peer), true)
        }
    }
}
