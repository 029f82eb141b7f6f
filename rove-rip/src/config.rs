//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use crate::auth::AuthCfg;
use crate::version::Version;

// Instance-wide configuration and timer defaults.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    // Administrative distance of learned routes.
    pub distance: u8,
    // Seconds without a refresh before a route expires.
    pub invalid_interval: u16,
    // Seconds an expired route lingers before deletion.
    pub flush_interval: u16,
    // Bounds of the randomized unsolicited update interval.
    pub unsolicited_min: u16,
    pub unsolicited_max: u16,
    // Bounds of the triggered update hold-down.
    pub triggered_min: u16,
    pub triggered_max: u16,
    // Seconds between whole-table requests while no peer has been learned.
    // Zero disables re-requests; the request sent on activation remains.
    pub table_request_period: u16,
    // Minimum spacing between replies to diagnostic table queries.
    pub interquery_delay_ms: u32,
}

// Per-interface configuration.
#[derive(Clone, Debug)]
pub struct PortCfg<V: Version> {
    pub enabled: bool,
    // Cost added to the metric of received routes.
    pub cost: u8,
    pub split_horizon: SplitHorizon,
    // Whether to originate updates at all.
    pub advertise: bool,
    pub advertise_default_route: bool,
    pub accept_default_route: bool,
    // A passive port processes input but never transmits.
    pub passive: bool,
    // Whether to answer table queries from non-RIP source ports.
    pub accept_non_rip_requests: bool,
    pub auth: AuthCfg,
    // Additional unicast destinations.
    pub explicit_neighbors: BTreeSet<V::IpAddr>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SplitHorizon {
    Disabled,
    Simple,
    PoisonReverse,
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            distance: 120,
            invalid_interval: 180,
            flush_interval: 120,
            unsolicited_min: 25,
            unsolicited_max: 35,
            triggered_min: 1,
            triggered_max: 5,
            table_request_period: 30,
            interquery_delay_ms: 100,
        }
    }
}

// ===== impl PortCfg =====

impl<V> Default for PortCfg<V>
where
    V: Version,
{
    fn default() -> PortCfg<V> {
        PortCfg {
            enabled: true,
            cost: 1,
            split_horizon: SplitHorizon::PoisonReverse,
            advertise: true,
            advertise_default_route: true,
            accept_default_route: true,
            passive: false,
            accept_non_rip_requests: true,
            auth: AuthCfg::None,
            explicit_neighbors: Default::default(),
        }
    }
}
