//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::route::Metric;
use crate::version::Version;

// RIP debug messages.
#[derive(Debug)]
pub enum Debug<'a, V: Version> {
    InstanceCreate,
    InstanceDelete,
    InstanceStart,
    InstanceStop(InstanceInactiveReason),
    PortCreate(&'a str),
    PortDelete(&'a str),
    PortStart(&'a str),
    PortStop(&'a str, PortInactiveReason),
    InitialUpdate,
    UpdateInterval(&'a str),
    TriggeredUpdate,
    TableRequest(&'a str),
    PduRx(&'a str, &'a V::IpAddr, &'a V::Pdu),
    PduTx(&'a str, &'a V::Pdu),
    PeerCreate(&'a V::IpAddr),
    PeerTimeout(&'a V::IpAddr),
    PeerRetire(&'a V::IpAddr),
    KeyExpiry(&'a str, u8),
    RouteCreate(&'a V::IpNetwork, &'a Option<V::IpAddr>, &'a Metric),
    RouteUpdate(&'a V::IpNetwork, &'a Option<V::IpAddr>, &'a Metric),
    RouteTimeout(&'a V::IpNetwork),
    RouteGcTimeout(&'a V::IpNetwork),
    RouteInvalidate(&'a V::IpNetwork),
}

// Reason why a RIP instance is inactive.
#[derive(Debug)]
pub enum InstanceInactiveReason {
    AdminDown,
}

// Reason why RIP is inactive on a port.
#[derive(Debug)]
pub enum PortInactiveReason {
    InstanceDown,
    AdminDown,
    OperationalDown,
    MissingIfindex,
    MissingIpAddress,
}

// ===== impl Debug =====

impl<V> Debug<'_, V>
where
    V: Version,
{
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate
            | Debug::InstanceDelete
            | Debug::InstanceStart => {
                debug!("{}", self);
            }
            Debug::InstanceStop(reason) => {
                debug!(%reason, "{}", self);
            }
            Debug::PortCreate(name)
            | Debug::PortDelete(name)
            | Debug::PortStart(name)
            | Debug::TableRequest(name)
            | Debug::UpdateInterval(name) => {
                debug_span!("port", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::PortStop(name, reason) => {
                debug_span!("port", %name).in_scope(|| {
                    debug!(%reason, "{}", self);
                });
            }
            Debug::InitialUpdate | Debug::TriggeredUpdate => {
                debug!("{}", self);
            }
            Debug::PduRx(port, source, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input", %port, %source).in_scope(|| {
                        let data = serde_json::to_string(&pdu).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::PduTx(port, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output", %port).in_scope(|| {
                        let data = serde_json::to_string(&pdu).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::PeerCreate(addr)
            | Debug::PeerTimeout(addr)
            | Debug::PeerRetire(addr) => {
                debug!(address = %addr, "{}", self);
            }
            Debug::KeyExpiry(port, key_id) => {
                debug_span!("port", name = %port).in_scope(|| {
                    debug!(%key_id, "{}", self);
                });
            }
            Debug::RouteCreate(prefix, source, metric)
            | Debug::RouteUpdate(prefix, source, metric) => {
                let source = if let Some(source) = source {
                    source.to_string()
                } else {
                    "local".to_owned()
                };
                debug!(%prefix, %source, metric = %metric.get(), "{}", self);
            }
            Debug::RouteTimeout(prefix)
            | Debug::RouteGcTimeout(prefix)
            | Debug::RouteInvalidate(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl<V> std::fmt::Display for Debug<'_, V>
where
    V: Version,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceDelete => {
                write!(f, "instance deleted")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop(..) => {
                write!(f, "stopping instance")
            }
            Debug::PortCreate(..) => {
                write!(f, "port created")
            }
            Debug::PortDelete(..) => {
                write!(f, "port deleted")
            }
            Debug::PortStart(..) => {
                write!(f, "starting port")
            }
            Debug::PortStop(..) => {
                write!(f, "stopping port")
            }
            Debug::InitialUpdate => {
                write!(f, "initial update")
            }
            Debug::UpdateInterval(..) => {
                write!(f, "unsolicited update")
            }
            Debug::TriggeredUpdate => {
                write!(f, "triggered update")
            }
            Debug::TableRequest(..) => {
                write!(f, "requesting full routing table")
            }
            Debug::PduRx(..) | Debug::PduTx(..) => {
                write!(f, "pdu")
            }
            Debug::PeerCreate(..) => {
                write!(f, "peer created")
            }
            Debug::PeerTimeout(..) => {
                write!(f, "peer timed out")
            }
            Debug::PeerRetire(..) => {
                write!(f, "peer retired")
            }
            Debug::KeyExpiry(..) => {
                write!(f, "authentication key expired")
            }
            Debug::RouteCreate(..) => {
                write!(f, "route created")
            }
            Debug::RouteUpdate(..) => {
                write!(f, "route updated")
            }
            Debug::RouteTimeout(..) => {
                write!(f, "route timed out")
            }
            Debug::RouteGcTimeout(..) => {
                write!(f, "route deleted")
            }
            Debug::RouteInvalidate(..) => {
                write!(f, "route invalidated")
            }
        }
    }
}

// ===== impl InstanceInactiveReason =====

impl std::fmt::Display for InstanceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceInactiveReason::AdminDown => {
                write!(f, "administrative status down")
            }
        }
    }
}

// ===== impl PortInactiveReason =====

impl std::fmt::Display for PortInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortInactiveReason::InstanceDown => {
                write!(f, "RIP instance down")
            }
            PortInactiveReason::AdminDown => {
                write!(f, "administrative status down")
            }
            PortInactiveReason::OperationalDown => {
                write!(f, "operational status down")
            }
            PortInactiveReason::MissingIfindex => {
                write!(f, "missing ifindex")
            }
            PortInactiveReason::MissingIpAddress => {
                write!(f, "missing IP address")
            }
        }
    }
}
