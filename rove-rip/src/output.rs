//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use itertools::Itertools;
use rand::Rng;
use rove_utils::ip::IpNetworkKind;

use crate::auth::AuthCfg;
use crate::debug::Debug;
use crate::config::SplitHorizon;
use crate::instance::InstanceUpView;
use crate::network::SendDestination;
use crate::packet::{Command, PduVersion, RteVersion};
use crate::packet_queue::QueuedPacket;
use crate::port::{PortUp, Ports};
use crate::route::{RouteFlags, RouteType};
use crate::tasks;
use crate::version::Version;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseType {
    Normal,
    Triggered,
}

// ===== global functions =====

pub(crate) fn send_pdu<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &mut PortUp<V>,
    dst: SendDestination<V::SocketAddr>,
    pdu: V::Pdu,
) where
    V: Version,
{
    // Log PDU being sent.
    Debug::<V>::PduTx(&port.core.name, &pdu).log();

    // Update instance statistics.
    instance.state.statistics.update(pdu.command(), true);

    // Update port statistics.
    if pdu.command() == Command::Response {
        port.state.statistics.updates_sent += 1;
        port.state.statistics.update_discontinuity_time();
    }

    // Encode under the port's outbound authentication rules, then hand the
    // wire packet to the queue.
    let buf = {
        let auth = port.auth(&instance.state.auth_seqno);
        pdu.encode(auth.as_ref()).freeze()
    };
    port.state.packet_queue.enqueue(QueuedPacket { dst, pdu, buf });
    port.pump_packet_queue();
}

pub(crate) fn send_request<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &mut PortUp<V>,
    dst: SendDestination<V::SocketAddr>,
) where
    V: Version,
{
    // Do not send RIP packets on passive ports.
    if port.is_passive() {
        return;
    }

    // Send request to send the entire routing table.
    let pdu = V::Pdu::new_dump_request();
    send_pdu(instance, port, dst, pdu);
}

pub(crate) fn send_response<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &mut PortUp<V>,
    dst: SendDestination<V::SocketAddr>,
    response_type: ResponseType,
) where
    V: Version,
{
    // Do not send RIP packets on passive or non-advertising ports.
    if port.is_passive() || !port.core.config.advertise {
        return;
    }

    // Build Response PDU.
    let mut rtes = vec![];
    for route in instance.state.routes.values() {
        let mut metric = route.metric;

        // Skip unchanged routes for triggered updates.
        if response_type == ResponseType::Triggered
            && !route.flags.contains(RouteFlags::CHANGED)
        {
            continue;
        }

        // The default route is poisoned, not omitted, when the port isn't
        // allowed to originate it.
        if route.prefix.is_default()
            && !port.core.config.advertise_default_route
        {
            metric.set_infinite();
        }

        // Split-horizon processing.
        if route.route_type == RouteType::Rip {
            let suppress =
                route.ifindex == port.core.system.ifindex.unwrap();

            match port.core.config.split_horizon {
                SplitHorizon::Disabled => (),
                SplitHorizon::Simple => {
                    if suppress {
                        continue;
                    }
                }
                SplitHorizon::PoisonReverse => {
                    if suppress {
                        metric.set_infinite()
                    }
                }
            }
        }

        // Append RTE.
        let rte = <V::Pdu as PduVersion<_, _, _>>::Rte::new_route(
            route.prefix,
            None,
            metric,
            route.tag,
        );
        rtes.push(rte);
    }

    // Nothing to send.
    if rtes.is_empty() {
        return;
    }

    // Send as many PDUs as necessary.
    let auth = !matches!(port.core.config.auth, AuthCfg::None);
    let max_entries =
        V::Pdu::max_entries(port.core.system.mtu.unwrap(), auth);
    for rtes in rtes
        .into_iter()
        .chunks(max_entries)
        .into_iter()
        .map(|chunk| chunk.collect())
    {
        let pdu = V::Pdu::new(Command::Response, rtes);
        send_pdu(instance, port, dst, pdu);
    }
}

// Sends a response to each of the port's destinations.
pub(crate) fn send_response_port<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &mut PortUp<V>,
    response_type: ResponseType,
) where
    V: Version,
{
    port.with_destinations(|port, dst| {
        send_response(instance, port, dst, response_type);
    });
}

pub(crate) fn triggered_update<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
) where
    V: Version,
{
    Debug::<V>::TriggeredUpdate.log();

    // Send changed routes on every active port.
    for port in ports.iter_mut() {
        if let Some(port) = port.as_up() {
            send_response_port(instance, port, ResponseType::Triggered);
        }
    }
    instance.state.pending_trigger_upd = false;

    // Clear the route change flags.
    for route in instance.state.routes.values_mut() {
        route.flags.remove(RouteFlags::CHANGED);
    }

    // Start the triggered update hold-down; further triggers coalesce
    // until it expires.
    let timeout = rand::rng().random_range(
        instance.config.triggered_min..=instance.config.triggered_max,
    );
    let triggered_upd_timeout_task = tasks::triggered_upd_timeout(
        Duration::from_secs(timeout.into()),
        &instance.tx.protocol_input.triggered_upd_timeout,
    );
    instance.state.triggered_upd_timeout_task =
        Some(triggered_upd_timeout_task);
}

pub(crate) fn cancel_triggered_update<V>(instance: &mut InstanceUpView<'_, V>)
where
    V: Version,
{
    instance.state.triggered_upd_timeout_task = None;
    instance.state.pending_trigger_upd = false;
}
