//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use rove_utils::ibus::{IbusMsg, IbusSender};
use rove_utils::southbound::{Nexthop, RouteKeyMsg, RouteMsg};

use crate::route::{Route, RouteType};
use crate::version::Version;

// Requests installation of a learned route into the forwarding plane.
pub(crate) fn route_install<V>(
    ibus_tx: &IbusSender,
    route: &Route<V>,
    distance: u8,
) where
    V: Version,
{
    // Only learned routes are installed; connected and redistributed
    // routes already live in the RIB.
    if route.route_type != RouteType::Rip {
        return;
    }

    let msg = RouteMsg {
        protocol: V::PROTOCOL,
        prefix: route.prefix.into(),
        distance: distance.into(),
        metric: route.metric.get().into(),
        tag: Some(route.tag.into()),
        nexthops: [Nexthop::Address {
            ifindex: route.ifindex,
            addr: route.nexthop.unwrap().into(),
        }]
        .into(),
    };
    let _ = ibus_tx.send(IbusMsg::RouteIpAdd(msg));
}

// Requests withdrawal of a learned route from the forwarding plane.
pub(crate) fn route_uninstall<V>(ibus_tx: &IbusSender, route: &Route<V>)
where
    V: Version,
{
    if route.route_type != RouteType::Rip {
        return;
    }

    let msg = RouteKeyMsg {
        protocol: V::PROTOCOL,
        prefix: route.prefix.into(),
    };
    let _ = ibus_tx.send(IbusMsg::RouteIpDel(msg));
}
