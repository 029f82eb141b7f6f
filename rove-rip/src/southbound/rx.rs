//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use rove_utils::ip::IpNetworkKind;
use rove_utils::protocol::Protocol;
use rove_utils::southbound::{
    AddressFlags, AddressMsg, InterfaceUpdateMsg, Nexthop, RouteKeyMsg,
    RouteMsg,
};

use crate::instance::{Instance, InstanceUpView};
use crate::port::{Port, PortUp};
use crate::route::{Metric, Route, RouteFlags, RouteType};
use crate::version::Version;

// ===== helper functions =====

fn connected_route_add<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &PortUp<V>,
    addr: &V::IpNetwork,
) where
    V: Version,
{
    if !addr.is_routable() {
        return;
    }

    // Withdraw a previously learned route for the same prefix (if any).
    let prefix = addr.apply_mask();
    if let Some(route) = instance.state.routes.get(&prefix) {
        crate::southbound::tx::route_uninstall(&instance.tx.ibus, route);
    }

    // Add new connected route.
    let metric = Metric::from(port.core.config.cost.max(1));
    let route = Route::new(
        prefix,
        port.core.system.ifindex.unwrap(),
        None,
        metric,
        0,
        RouteType::Connected,
    );
    instance.state.routes.insert(prefix, route);

    // Signal the output process to trigger an update.
    instance.tx.protocol_input.trigger_update();
}

fn connected_route_invalidate<V>(
    instance: &mut InstanceUpView<'_, V>,
    addr: &V::IpNetwork,
) where
    V: Version,
{
    if !addr.is_routable() {
        return;
    }

    let prefix = addr.apply_mask();
    let flush_interval = instance.config.flush_interval;
    if let Some(route) = instance.state.routes.get_mut(&prefix) {
        route.invalidate(flush_interval, instance.tx);
    }
}

// ===== global functions =====

pub(crate) fn process_iface_update<V>(
    instance: &mut Instance<V>,
    msg: InterfaceUpdateMsg,
) where
    V: Version,
{
    // Create the port on first sight of the interface.
    instance.ports.add(&msg.ifname);
    if let Some((_, port)) =
        instance.ports.update_ifindex(&msg.ifname, Some(msg.ifindex))
    {
        port.core_mut().system.mtu = Some(msg.mtu);
        port.core_mut().system.flags = msg.flags;
    }

    let Some((mut instance, ports)) = instance.as_up() else {
        return;
    };
    let Some((_, port)) = ports.get_mut_by_name(&msg.ifname) else {
        return;
    };
    port.update(&mut instance);

    // Add connected routes.
    if let Port::Up(port) = port {
        let addr_list = port.core.system.addr_list.clone();
        for addr in &addr_list {
            connected_route_add(&mut instance, port, addr);
        }
    }
}

pub(crate) fn process_iface_delete<V>(instance: &mut Instance<V>, ifname: String)
where
    V: Version,
{
    {
        let Some((mut instance, ports)) = instance.as_up() else {
            return;
        };
        if let Some((_, port)) = ports.get_mut_by_name(&ifname) {
            port.stop(
                &mut instance,
                crate::debug::PortInactiveReason::OperationalDown,
            );
        }
    }

    if let Some((port_idx, _)) = instance.ports.get_mut_by_name(&ifname) {
        instance.ports.delete(port_idx);
    }
}

pub(crate) fn process_addr_add<V>(instance: &mut Instance<V>, msg: AddressMsg)
where
    V: Version,
{
    let Some(addr) = V::IpNetwork::get(msg.addr) else {
        return;
    };

    // Ignore unnumbered addresses.
    if msg.flags.contains(AddressFlags::UNNUMBERED) {
        return;
    }

    let Some((mut instance, ports)) = instance.as_up() else {
        return;
    };
    let Some((_, port)) = ports.get_mut_by_name(&msg.ifname) else {
        return;
    };

    // Add address.
    if !port.core_mut().system.addr_list.insert(addr) {
        return;
    }

    // Check if RIP needs to be activated on this port.
    port.update(&mut instance);

    // Add connected route.
    if let Port::Up(port) = port {
        connected_route_add(&mut instance, port, &addr);
    }
}

pub(crate) fn process_addr_del<V>(instance: &mut Instance<V>, msg: AddressMsg)
where
    V: Version,
{
    let Some(addr) = V::IpNetwork::get(msg.addr) else {
        return;
    };

    // Ignore unnumbered addresses.
    if msg.flags.contains(AddressFlags::UNNUMBERED) {
        return;
    }

    let Some((mut instance, ports)) = instance.as_up() else {
        return;
    };
    let Some((_, port)) = ports.get_mut_by_name(&msg.ifname) else {
        return;
    };

    // Remove address.
    if !port.core_mut().system.addr_list.remove(&addr) {
        return;
    }

    // Invalidate connected route.
    if port.is_active() {
        connected_route_invalidate(&mut instance, &addr);
    }

    // Check if RIP needs to be deactivated on this port.
    port.update(&mut instance);
}

// Routes redistributed from other origins are advertised with a metric of
// one; they are already installed in the forwarding plane.
pub(crate) fn process_redistribute_add<V>(
    instance: &mut Instance<V>,
    msg: RouteMsg,
) where
    V: Version,
{
    // Never redistribute our own routes back into the protocol.
    if msg.protocol == V::PROTOCOL {
        return;
    }
    let Some(prefix) = V::IpNetwork::get(msg.prefix) else {
        return;
    };
    let Some((instance, _)) = instance.as_up() else {
        return;
    };

    let route_type = match msg.protocol {
        Protocol::STATIC => RouteType::Static,
        _ => RouteType::Redistributed,
    };
    let ifindex = msg
        .nexthops
        .first()
        .and_then(|nexthop| match nexthop {
            Nexthop::Address { ifindex, .. }
            | Nexthop::Interface { ifindex } => Some(*ifindex),
            _ => None,
        })
        .unwrap_or(0);

    let mut route = Route::new(
        prefix,
        ifindex,
        None,
        Metric::from(1),
        msg.tag.unwrap_or(0) as u16,
        route_type,
    );
    route.flags.insert(RouteFlags::CHANGED);
    instance.state.routes.insert(prefix, route);

    // Signal the output process to trigger an update.
    instance.tx.protocol_input.trigger_update();
}

pub(crate) fn process_redistribute_del<V>(
    instance: &mut Instance<V>,
    msg: RouteKeyMsg,
) where
    V: Version,
{
    let Some(prefix) = V::IpNetwork::get(msg.prefix) else {
        return;
    };
    let Some((instance, _)) = instance.as_up() else {
        return;
    };
    let flush_interval = instance.config.flush_interval;

    if let Some(route) = instance.state.routes.get_mut(&prefix)
        && matches!(
            route.route_type,
            RouteType::Static | RouteType::Redistributed
        )
    {
        // Poison the withdrawn origin and let garbage collection remove it.
        route.metric.set_infinite();
        route.flags.insert(RouteFlags::CHANGED);
        route.garbage_collection_start(
            flush_interval,
            &instance.tx.protocol_input.route_gc_timeout,
        );
        instance.tx.protocol_input.trigger_update();
    }
}
