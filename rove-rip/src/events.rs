//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::btree_map;

use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use rove_utils::ip::{IpNetworkKind, SocketAddrKind};

use crate::auth::{self, AuthCfg};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::network::SendDestination;
use crate::output::{self, ResponseType};
use crate::packet::{Command, DecodeErrorVersion, PduVersion, RteRouteVersion, RteVersion};
use crate::peer;
use crate::port::{PortUp, Ports};
use crate::route::{Metric, Route, RouteFlags, RouteType};
use crate::version::Version;

// ===== UDP packet receipt =====

pub fn process_pdu<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
    src: V::SocketAddr,
    data: Bytes,
) where
    V: Version,
{
    // Lookup port.
    let Some((_, port)) = V::get_port_by_source(ports, src) else {
        return;
    };
    let Some(port) = port.as_up() else {
        return;
    };

    // Ignore our own packets looped back by the network.
    if port.core.system.is_own_addr(src.ip()) {
        return;
    }

    // Messages from source ports other than the RIP port are diagnostic
    // queries, honored only when configured to.
    let from_rip_port = src.port() == V::UDP_PORT;
    if !from_rip_port && !port.core.config.accept_non_rip_requests {
        return;
    }

    // Decode the packet under the port's authentication rules.
    let pdu = {
        let auth = port.auth(&instance.state.auth_seqno);
        V::Pdu::decode(&data, auth.as_ref())
    };

    match pdu {
        Ok(mut pdu) => {
            // Log received PDU.
            Debug::<V>::PduRx(&port.core.name, src.ip(), &pdu).log();

            if from_rip_port {
                let (peer, is_new_peer) = peer::update(
                    &mut port.state.peers,
                    &port.core.name,
                    *src.ip(),
                    src.port(),
                    instance.config.invalid_interval,
                    &instance.tx.protocol_input.peer_timeout,
                );

                if let Some(auth_seqno) = pdu.auth_seqno() {
                    // Sequence number validation protects against replay
                    // attacks. A new peer (or one idle past the invalid
                    // interval) starts over, so its first packet may carry
                    // any sequence number, including zero.
                    if !is_new_peer
                        && !auth::seqno_acceptable(peer.auth_seqno, auth_seqno)
                    {
                        Error::<V>::UdpPduAuthInvalidSeqno(src, auth_seqno)
                            .log();

                        peer.counters.bad_packets_rcvd += 1;
                        port.state.statistics.bad_auth_packets_rcvd += 1;
                        port.state.statistics.update_discontinuity_time();
                        return;
                    }

                    // Record the last accepted sequence number.
                    peer.auth_seqno = auth_seqno;
                }

                match pdu.command() {
                    Command::Request => peer.counters.requests_rcvd += 1,
                    Command::Response => peer.counters.responses_rcvd += 1,
                }
            }

            // Update statistics.
            instance.state.statistics.update(pdu.command(), false);
            let rte_errors = pdu.rte_errors();
            let error_count = rte_errors.len() as u32;
            if error_count > 0 {
                for rte_error in rte_errors {
                    Error::<V>::UdpPduDecodeError(rte_error).log();
                }
                port.state.statistics.bad_routes_rcvd += error_count;
                port.state.statistics.update_discontinuity_time();
                if let Some(peer) = port.state.peers.get_mut(src.ip()) {
                    peer.counters.bad_routes_rcvd += error_count;
                }
            }

            // The first peer cancels the whole-table request timer.
            port.sync_table_request_timer(instance);

            match pdu.command() {
                Command::Request => {
                    process_pdu_request(instance, port, src, pdu, from_rip_port);
                }
                Command::Response => {
                    process_pdu_response(instance, port, src, pdu);
                }
            }
        }
        Err(error) => {
            let is_auth_error = error.is_auth_error();
            if is_auth_error {
                // The first packet's details are logged; the counter
                // tracks the rest.
                if port.state.statistics.bad_auth_packets_rcvd == 0 {
                    Error::<V>::UdpPduAuthError(src, error).log();
                }
                port.state.statistics.bad_auth_packets_rcvd += 1;
            } else {
                Error::<V>::UdpPduDecodeError(error).log();
                port.state.statistics.bad_packets_rcvd += 1;
            }
            port.state.statistics.update_discontinuity_time();

            if from_rip_port
                && let Some(peer) = port.state.peers.get_mut(src.ip())
            {
                peer.counters.bad_packets_rcvd += 1;
            }
        }
    }
}

fn process_pdu_request<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &mut PortUp<V>,
    src: V::SocketAddr,
    mut pdu: V::Pdu,
    from_rip_port: bool,
) where
    V: Version,
{
    // Ignore requests received on passive ports.
    if port.is_passive() {
        return;
    }

    // If there are no entries, no response is given.
    if pdu.rtes().is_empty() {
        return;
    }

    // Check if it's a request to send the entire routing table.
    if pdu.is_dump_request() {
        if from_rip_port {
            // A restarted router wants the table right away; dump it to
            // the port's regular destinations.
            output::send_response_port(instance, port, ResponseType::Normal);
        } else {
            // Diagnostic query: reply to the querying endpoint, but not
            // more often than the inter-query gate allows.
            let now = Utc::now();
            let gate =
                TimeDelta::milliseconds(instance.config.interquery_delay_ms.into());
            if let Some(last) = port.state.last_query_reply
                && now - last < gate
            {
                return;
            }
            port.state.last_query_reply = Some(now);

            let dst = SendDestination::Unicast(src);
            output::send_response(instance, port, dst, ResponseType::Normal);
        }
    } else {
        // Examine the list of RTEs in the Request one by one. For each
        // entry, look up the destination in the routing table and put that
        // route's metric in the metric field of the RTE, or infinity when
        // there is no matching route. Once all the entries have been filled
        // in, change the command from Request to Response and send the
        // datagram back to the requester.
        for rte in pdu.rtes_mut() {
            if let Some(rte) = rte.as_route_mut() {
                let metric = if let Some(route) =
                    instance.state.routes.get(rte.prefix())
                {
                    // Do not perform split-horizon.
                    route.metric
                } else {
                    Metric::from(Metric::INFINITE)
                };
                rte.set_metric(metric);
            }
        }
        pdu.set_command(Command::Response);
        let dst = SendDestination::Unicast(src);
        output::send_pdu(instance, port, dst, pdu);
    }
}

// A Response can be received for one of several different reasons:
//
// - response to a specific query
// - regular update (unsolicited response)
// - triggered update caused by a route change
//
// Processing is the same no matter why the Response was generated.
fn process_pdu_response<V>(
    instance: &mut InstanceUpView<'_, V>,
    port: &mut PortUp<V>,
    src: V::SocketAddr,
    pdu: V::Pdu,
) where
    V: Version,
{
    let invalid_interval = instance.config.invalid_interval;
    let flush_interval = instance.config.flush_interval;
    let distance = instance.config.distance;

    // The Response must be ignored if it is not from the RIP port.
    if src.port() != V::UDP_PORT {
        return;
    }

    // Iterate over all RTEs.
    let mut ripng_nexthop = None;
    for rte in pdu.rtes() {
        let source = Some(*src.ip());

        // Process RIPng nexthop RTE.
        if let Some(rte_nexthop) = rte.as_nexthop() {
            // The advertised nexthop applies to all following route RTEs
            // until the end of the message or until another next hop RTE is
            // encountered.
            ripng_nexthop = rte_nexthop;
            continue;
        }

        // Proceed to process normal route RTEs.
        let Some(rte) = rte.as_route() else {
            continue;
        };

        // Routes describing the receiver's own addresses or the directed
        // broadcast of an attached subnet are nonsense; drop and count
        // them.
        let target = rte.prefix().ip();
        if port.core.system.is_own_addr(&target)
            || port.core.system.is_broadcast_addr(&target)
        {
            port.state.statistics.bad_routes_rcvd += 1;
            port.state.statistics.update_discontinuity_time();
            continue;
        }

        // Inbound default route filtering.
        if rte.prefix().is_default()
            && !port.core.config.accept_default_route
        {
            continue;
        }

        // Update the metric by adding the cost of the network on which the
        // message arrived.
        let mut metric = rte.metric();
        metric.add_cost(port.core.config.cost);

        // Use nexthop from the nexthop field (RIPv2) or nexthop RTE
        // (RIPng) if it's present. Otherwise, use the source of the RIP
        // advertisement. An advertised nexthop outside the receiving
        // subnet, or pointing back at us, falls back to the source too.
        let mut nexthop = *src.ip();
        if let Some(rte_nexthop) = rte.nexthop()
            && port.core.system.contains_addr(rte_nexthop)
            && !port.core.system.is_own_addr(rte_nexthop)
        {
            nexthop = *rte_nexthop;
        }
        if let Some(rte_nexthop) = ripng_nexthop {
            nexthop = *rte_nexthop;
        }
        let nexthop = Some(nexthop);

        // Check if the route already exists in the routing table.
        match instance.state.routes.entry(*rte.prefix()) {
            btree_map::Entry::Occupied(mut o) => {
                let route = o.get_mut();

                // Update route in the following cases:
                // * New metric is lower
                // * Same peer, but different metric, nexthop or tag
                if metric.get() < route.metric.get()
                    || (source == route.source
                        && (metric != route.metric
                            || nexthop != route.nexthop
                            || rte.tag() != route.tag))
                {
                    Debug::<V>::RouteUpdate(&route.prefix, &source, &metric)
                        .log();

                    let old_metric = route.metric;

                    // Update route.
                    route.ifindex = port.core.system.ifindex.unwrap();
                    route.source = source;
                    route.nexthop = nexthop;
                    route.metric = metric;
                    route.rcvd_metric = Some(rte.metric());
                    route.tag = rte.tag();
                    route.flags.insert(RouteFlags::CHANGED);

                    // Signal the output process to trigger an update.
                    instance.tx.protocol_input.trigger_update();

                    if !metric.is_infinite() {
                        // Install route.
                        crate::southbound::tx::route_install(
                            &instance.tx.ibus,
                            route,
                            distance,
                        );
                    } else if !old_metric.is_infinite() {
                        // Withdraw route.
                        crate::southbound::tx::route_uninstall(
                            &instance.tx.ibus,
                            route,
                        );

                        route.garbage_collection_start(
                            flush_interval,
                            &instance.tx.protocol_input.route_gc_timeout,
                        );
                    }
                }

                // Reinitialize the route timeout.
                if source == route.source && !metric.is_infinite() {
                    route.timeout_reset(
                        invalid_interval,
                        &instance.tx.protocol_input.route_timeout,
                    );
                    route.garbage_collection_stop();
                }
            }
            btree_map::Entry::Vacant(v) => {
                if metric.is_infinite() {
                    continue;
                }

                // Create new route.
                let mut route = Route::new(
                    *rte.prefix(),
                    port.core.system.ifindex.unwrap(),
                    source,
                    metric,
                    rte.tag(),
                    RouteType::Rip,
                );
                route.nexthop = nexthop;
                route.rcvd_metric = Some(rte.metric());

                // Set route timeout.
                route.timeout_reset(
                    invalid_interval,
                    &instance.tx.protocol_input.route_timeout,
                );

                // Signal the output process to trigger an update.
                instance.tx.protocol_input.trigger_update();

                // Install route.
                crate::southbound::tx::route_install(
                    &instance.tx.ibus,
                    &route,
                    distance,
                );

                // Add route.
                v.insert(route);
            }
        }
    }
}

// ===== UDP transmit completion =====

pub fn process_tx_done<V>(ports: &mut Ports<V>, ifname: &str)
where
    V: Version,
{
    if let Some((_, port)) = ports.get_mut_by_name(ifname)
        && let Some(port) = port.as_up()
    {
        port.tx_done();
    }
}

// ===== instance initial update =====

pub fn process_initial_update<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
) where
    V: Version,
{
    Debug::<V>::InitialUpdate.log();
    instance.state.initial_update_task = None;
    for port in ports.iter_mut() {
        if let Some(port) = port.as_up() {
            output::send_response_port(instance, port, ResponseType::Normal);
        }
    }
}

// ===== port update interval =====

pub fn process_update_interval<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
    ifname: &str,
) where
    V: Version,
{
    Debug::<V>::UpdateInterval(ifname).log();

    // A pending triggered update is fast-forwarded rather than left to race
    // with the full dump.
    if instance.state.pending_trigger_upd {
        output::triggered_update(instance, ports);
    }

    let Some((_, port)) = ports.get_mut_by_name(ifname) else {
        return;
    };
    let Some(port) = port.as_up() else {
        return;
    };

    output::send_response_port(instance, port, ResponseType::Normal);

    // Re-arm with a fresh random interval.
    port.schedule_update_interval(instance);
}

// ===== instance triggered update =====

pub fn process_triggered_update<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
) where
    V: Version,
{
    // Don't generate triggered updates before the initial update is sent.
    if instance.state.initial_update_task.is_some() {
        return;
    }

    // Wait until the triggered update hold-down expires.
    if instance.state.triggered_upd_timeout_task.is_some() {
        instance.state.pending_trigger_upd = true;
        return;
    }

    output::triggered_update(instance, ports);
}

// ===== instance triggered update timeout =====

pub fn process_triggered_update_timeout<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
) where
    V: Version,
{
    if instance.state.pending_trigger_upd {
        output::triggered_update(instance, ports);
    }

    output::cancel_triggered_update(instance);
}

// ===== port table request timer =====

pub fn process_table_request<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
    ifname: &str,
) where
    V: Version,
{
    let Some((_, port)) = ports.get_mut_by_name(ifname) else {
        return;
    };
    let Some(port) = port.as_up() else {
        return;
    };

    // The timer only matters while the port hasn't heard from anyone.
    if !port.state.peers.is_empty() {
        port.sync_table_request_timer(instance);
        return;
    }

    Debug::<V>::TableRequest(ifname).log();
    port.with_destinations(|port, dst| {
        output::send_request(instance, port, dst);
    });
}

// ===== peer timeout =====

pub fn process_peer_timeout<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
    ifname: &str,
    addr: V::IpAddr,
) where
    V: Version,
{
    let Some((_, port)) = ports.get_mut_by_name(ifname) else {
        return;
    };
    let Some(port) = port.as_up() else {
        return;
    };

    Debug::<V>::PeerTimeout(&addr).log();

    // A peer that still contributes routes is only a GC candidate once its
    // routes have been flushed; keep it around until then.
    let has_routes = instance
        .state
        .routes
        .values()
        .any(|route| route.source == Some(addr));
    if has_routes {
        if let Some(peer) = port.state.peers.get_mut(&addr) {
            peer.timeout_reset(instance.config.invalid_interval);
        }
        return;
    }

    // Collect the peer, retaining its counters for a grace period.
    if let Some(peer) = port.state.peers.remove(&addr) {
        let retired = crate::peer::RetiredPeer::new::<V>(
            ifname,
            addr,
            peer.counters,
            &instance.tx.protocol_input.peer_purge,
        );
        port.state.retired_peers.insert(addr, retired);
    }
    port.sync_table_request_timer(instance);
}

// ===== retired peer purge =====

pub fn process_peer_purge<V>(
    ports: &mut Ports<V>,
    ifname: &str,
    addr: V::IpAddr,
) where
    V: Version,
{
    if let Some((_, port)) = ports.get_mut_by_name(ifname)
        && let Some(port) = port.as_up()
    {
        port.state.retired_peers.remove(&addr);
    }
}

// ===== route timeout =====

pub fn process_route_timeout<V>(
    instance: &mut InstanceUpView<'_, V>,
    prefix: V::IpNetwork,
) where
    V: Version,
{
    let Some(route) = instance.state.routes.get_mut(&prefix) else {
        return;
    };

    Debug::<V>::RouteTimeout(&prefix).log();
    route.invalidate(instance.config.flush_interval, instance.tx);
}

// ===== route garbage-collection timeout =====

pub fn process_route_gc_timeout<V>(
    instance: &mut InstanceUpView<'_, V>,
    prefix: V::IpNetwork,
) where
    V: Version,
{
    let Some(route) = instance.state.routes.get(&prefix) else {
        return;
    };
    if route.garbage_collect_task.is_none() {
        return;
    }

    Debug::<V>::RouteGcTimeout(&prefix).log();
    instance.state.routes.remove(&prefix);
}

// ===== authentication key transition =====

pub fn process_key_transition<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
    ifname: &str,
) where
    V: Version,
{
    let Some((_, port)) = ports.get_mut_by_name(ifname) else {
        return;
    };
    let Some(port) = port.as_up() else {
        return;
    };

    if let AuthCfg::Md5(keychain) = &mut port.core.config.auth {
        let now = Utc::now();
        let expired = keychain
            .keys
            .values()
            .filter(|key| {
                !key.persistent
                    && key
                        .send_lifetime
                        .end
                        .is_some_and(|end| end <= now)
            })
            .map(|key| key.data.id)
            .collect::<Vec<_>>();
        for key_id in expired {
            Debug::<V>::KeyExpiry(ifname, key_id).log();
            keychain.key_stop(key_id, now);
        }
    }

    // Schedule the next lifetime boundary.
    port.schedule_key_transition(instance);
}
