//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rove_utils::ibus::{IbusMsg, IbusReceiver, IbusSender, IbusSubscriber};
use rove_utils::task::TimeoutTask;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver, UnboundedSender};

use crate::config::InstanceCfg;
use crate::debug::{Debug, InstanceInactiveReason, PortInactiveReason};
use crate::error::Error;
use crate::packet::Command;
use crate::port::Ports;
use crate::route::Route;
use crate::tasks;
use crate::tasks::messages::input::{
    InitialUpdateMsg, KeyTransitionMsg, PeerPurgeMsg, PeerTimeoutMsg,
    RouteGcTimeoutMsg, RouteTimeoutMsg, TableRequestMsg, TriggeredUpdMsg,
    TriggeredUpdTimeoutMsg, UdpRxBufMsg, UdpTxDoneMsg, UpdateIntervalMsg,
};
use crate::tasks::messages::ProtocolInputMsg;
#[cfg(feature = "testing")]
use crate::tasks::messages::ProtocolOutputMsg;
use crate::version::Version;
use crate::{events, southbound};

#[derive(Debug)]
pub struct Instance<V: Version> {
    // Instance name.
    pub name: String,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState<V>>,
    // Instance ports.
    pub ports: Ports<V>,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx<V>,
}

#[derive(Debug)]
pub struct InstanceState<V: Version> {
    // Initial update task.
    pub initial_update_task: Option<TimeoutTask>,
    // Triggered update information.
    pub triggered_upd_timeout_task: Option<TimeoutTask>,
    pub pending_trigger_upd: bool,
    // RIP routing table.
    pub routes: BTreeMap<V::IpNetwork, Route<V>>,
    // Message statistics.
    pub statistics: MessageStatistics,
    // Authentication non-decreasing sequence number.
    pub auth_seqno: Arc<AtomicU32>,
}

// Inbound and outbound statistic counters.
#[derive(Debug, Default)]
pub struct MessageStatistics {
    pub discontinuity_time: Option<DateTime<Utc>>,
    pub requests_rcvd: u32,
    pub requests_sent: u32,
    pub responses_rcvd: u32,
    pub responses_sent: u32,
}

pub struct InstanceUpView<'a, V: Version> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState<V>,
    pub tx: &'a InstanceChannelsTx<V>,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx<V: Version> {
    // Channel to the forwarding engine.
    pub ibus: IbusSender,
    // Protocol input channels.
    pub protocol_input: ProtocolInputChannelsTx<V>,
    // Protocol output channel (testing only).
    #[cfg(feature = "testing")]
    pub protocol_output: Sender<ProtocolOutputMsg<V>>,
}

#[derive(Debug)]
pub struct InstanceChannelsRx<V: Version> {
    // Notifications from the forwarding engine.
    pub ibus: IbusReceiver,
    // Protocol input channels.
    pub protocol_input: ProtocolInputChannelsRx<V>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx<V: Version> {
    // UDP Rx event.
    pub udp_buf_rx: Sender<UdpRxBufMsg<V>>,
    // UDP Tx completion event.
    pub udp_tx_done: Sender<UdpTxDoneMsg>,
    // Initial update.
    pub initial_update: Sender<InitialUpdateMsg>,
    // Per-port unsolicited update timer.
    pub update_interval: Sender<UpdateIntervalMsg>,
    // Triggered update event.
    pub triggered_upd: UnboundedSender<TriggeredUpdMsg>,
    // Triggered update timeout event.
    pub triggered_upd_timeout: Sender<TriggeredUpdTimeoutMsg>,
    // Whole-table request timer.
    pub table_request: Sender<TableRequestMsg>,
    // Peer timeout event.
    pub peer_timeout: Sender<PeerTimeoutMsg<V>>,
    // Retired peer purge event.
    pub peer_purge: Sender<PeerPurgeMsg<V>>,
    // Route timeout event.
    pub route_timeout: Sender<RouteTimeoutMsg<V>>,
    // Route garbage-collection event.
    pub route_gc_timeout: Sender<RouteGcTimeoutMsg<V>>,
    // Authentication key transition event.
    pub key_transition: Sender<KeyTransitionMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx<V: Version> {
    pub udp_buf_rx: Receiver<UdpRxBufMsg<V>>,
    pub udp_tx_done: Receiver<UdpTxDoneMsg>,
    pub initial_update: Receiver<InitialUpdateMsg>,
    pub update_interval: Receiver<UpdateIntervalMsg>,
    pub triggered_upd: UnboundedReceiver<TriggeredUpdMsg>,
    pub triggered_upd_timeout: Receiver<TriggeredUpdTimeoutMsg>,
    pub table_request: Receiver<TableRequestMsg>,
    pub peer_timeout: Receiver<PeerTimeoutMsg<V>>,
    pub peer_purge: Receiver<PeerPurgeMsg<V>>,
    pub route_timeout: Receiver<RouteTimeoutMsg<V>>,
    pub route_gc_timeout: Receiver<RouteGcTimeoutMsg<V>>,
    pub key_transition: Receiver<KeyTransitionMsg>,
}

// ===== impl Instance =====

impl<V> Instance<V>
where
    V: Version,
{
    pub fn new(
        name: String,
        config: InstanceCfg,
        tx: InstanceChannelsTx<V>,
    ) -> Instance<V> {
        Debug::<V>::InstanceCreate.log();

        Instance {
            name,
            config,
            state: None,
            ports: Default::default(),
            tx,
        }
    }

    // Checks if the instance needs to be started or stopped in response to
    // a configuration or interface event.
    pub fn update(&mut self) {
        match self.is_ready() {
            Ok(()) if !self.is_active() => {
                self.start();
            }
            Err(reason) if self.is_active() => {
                self.stop(reason);
            }
            _ => (),
        }
    }

    fn start(&mut self) {
        Debug::<V>::InstanceStart.log();

        let state = InstanceState::new(&self.tx);
        self.state = Some(state);
        let (mut instance, ports) = self.as_up().unwrap();

        // Try to start ports.
        for port in ports.iter_mut() {
            port.update(&mut instance);
        }
    }

    fn stop(&mut self, reason: InstanceInactiveReason) {
        if !self.is_active() {
            return;
        }

        Debug::<V>::InstanceStop(reason).log();

        // Stop ports.
        let (mut instance, ports) = self.as_up().unwrap();
        for port in ports.iter_mut() {
            port.stop(&mut instance, PortInactiveReason::InstanceDown);
        }
        self.state = None;
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // Returns whether the instance is ready for RIP operation.
    //
    // As of now there's nothing that can deactivate a configured RIP
    // instance other than unconfiguration.
    fn is_ready(&self) -> Result<(), InstanceInactiveReason> {
        Ok(())
    }

    // Returns a view struct for the instance if it's operational.
    pub fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_, V>, &mut Ports<V>)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.ports))
        } else {
            None
        }
    }

    pub fn shutdown(mut self) {
        // Ensure instance is disabled before exiting.
        self.stop(InstanceInactiveReason::AdminDown);
        Debug::<V>::InstanceDelete.log();
    }

    pub fn process_ibus_msg(&mut self, msg: IbusMsg) {
        match msg {
            // Interface update notification.
            IbusMsg::InterfaceUpd(msg) => {
                southbound::rx::process_iface_update(self, msg);
            }
            // Interface delete notification.
            IbusMsg::InterfaceDel(ifname) => {
                southbound::rx::process_iface_delete(self, ifname);
            }
            // Interface address addition notification.
            IbusMsg::InterfaceAddressAdd(msg) => {
                southbound::rx::process_addr_add(self, msg);
            }
            // Interface address delete notification.
            IbusMsg::InterfaceAddressDel(msg) => {
                southbound::rx::process_addr_del(self, msg);
            }
            // Route redistribution notifications.
            IbusMsg::RouteRedistributeAdd(msg) => {
                southbound::rx::process_redistribute_add(self, msg);
            }
            IbusMsg::RouteRedistributeDel(msg) => {
                southbound::rx::process_redistribute_del(self, msg);
            }
            // Ignore other events.
            _ => {}
        }
    }

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg<V>) {
        // Ignore event if the instance isn't active.
        let Some((mut instance, ports)) = self.as_up() else {
            return;
        };

        if let Err(error) = process_protocol_msg(&mut instance, ports, msg) {
            error.log();
        }
    }

    pub fn protocol_input_channels()
    -> (ProtocolInputChannelsTx<V>, ProtocolInputChannelsRx<V>) {
        let (udp_buf_rxp, udp_buf_rxc) = mpsc::channel(4);
        let (udp_tx_donep, udp_tx_donec) = mpsc::channel(4);
        let (initial_updatep, initial_updatec) = mpsc::channel(4);
        let (update_intervalp, update_intervalc) = mpsc::channel(4);
        let (triggered_updp, triggered_updc) = mpsc::unbounded_channel();
        let (triggered_upd_timeoutp, triggered_upd_timeoutc) =
            mpsc::channel(4);
        let (table_requestp, table_requestc) = mpsc::channel(4);
        let (peer_timeoutp, peer_timeoutc) = mpsc::channel(4);
        let (peer_purgep, peer_purgec) = mpsc::channel(4);
        let (route_timeoutp, route_timeoutc) = mpsc::channel(4);
        let (route_gc_timeoutp, route_gc_timeoutc) = mpsc::channel(4);
        let (key_transitionp, key_transitionc) = mpsc::channel(4);

        let tx = ProtocolInputChannelsTx {
            udp_buf_rx: udp_buf_rxp,
            udp_tx_done: udp_tx_donep,
            initial_update: initial_updatep,
            update_interval: update_intervalp,
            triggered_upd: triggered_updp,
            triggered_upd_timeout: triggered_upd_timeoutp,
            table_request: table_requestp,
            peer_timeout: peer_timeoutp,
            peer_purge: peer_purgep,
            route_timeout: route_timeoutp,
            route_gc_timeout: route_gc_timeoutp,
            key_transition: key_transitionp,
        };
        let rx = ProtocolInputChannelsRx {
            udp_buf_rx: udp_buf_rxc,
            udp_tx_done: udp_tx_donec,
            initial_update: initial_updatec,
            update_interval: update_intervalc,
            triggered_upd: triggered_updc,
            triggered_upd_timeout: triggered_upd_timeoutc,
            table_request: table_requestc,
            peer_timeout: peer_timeoutc,
            peer_purge: peer_purgec,
            route_timeout: route_timeoutc,
            route_gc_timeout: route_gc_timeoutc,
            key_transition: key_transitionc,
        };

        (tx, rx)
    }

    // Instance event loop: events are serialized through one task, so no
    // locking is needed anywhere in the protocol logic.
    pub async fn run(mut self, mut rx: InstanceChannelsRx<V>) {
        loop {
            tokio::select! {
                msg = rx.ibus.recv() => {
                    match msg {
                        Some(msg) => self.process_ibus_msg(msg),
                        // The forwarding engine is gone; request clean
                        // shutdown rather than spinning.
                        None => break,
                    }
                }
                Some(msg) = rx.protocol_input.recv() => {
                    self.process_protocol_msg(msg);
                }
            }
        }

        self.shutdown();
    }
}

// ===== impl InstanceState =====

impl<V> InstanceState<V>
where
    V: Version,
{
    fn new(tx: &InstanceChannelsTx<V>) -> InstanceState<V> {
        // Start initial update timeout task.
        let initial_update_task =
            tasks::initial_update(&tx.protocol_input.initial_update);

        InstanceState {
            initial_update_task: Some(initial_update_task),
            triggered_upd_timeout_task: None,
            pending_trigger_upd: false,
            routes: Default::default(),
            statistics: Default::default(),
            // Initialize the authentication sequence number as the number
            // of seconds since the Unix epoch. This makes successful
            // replays of packets from a restarted instance unlikely.
            auth_seqno: Arc::new(
                (SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("Time went backwards")
                    .as_secs() as u32)
                    .into(),
            ),
        }
    }
}

// ===== impl MessageStatistics =====

impl MessageStatistics {
    pub(crate) fn update(&mut self, command: Command, sent: bool) {
        self.discontinuity_time = Some(Utc::now());
        match (command, sent) {
            (Command::Request, false) => self.requests_rcvd += 1,
            (Command::Request, true) => self.requests_sent += 1,
            (Command::Response, false) => self.responses_rcvd += 1,
            (Command::Response, true) => self.responses_sent += 1,
        }
    }
}

// ===== impl ProtocolInputChannelsTx =====

impl<V> ProtocolInputChannelsTx<V>
where
    V: Version,
{
    pub(crate) fn trigger_update(&self) {
        let _ = self.triggered_upd.send(TriggeredUpdMsg {});
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl<V> ProtocolInputChannelsRx<V>
where
    V: Version,
{
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg<V>> {
        tokio::select! {
            msg = self.udp_buf_rx.recv() => {
                msg.map(ProtocolInputMsg::UdpRxBuf)
            }
            msg = self.udp_tx_done.recv() => {
                msg.map(ProtocolInputMsg::UdpTxDone)
            }
            msg = self.initial_update.recv() => {
                msg.map(ProtocolInputMsg::InitialUpdate)
            }
            msg = self.update_interval.recv() => {
                msg.map(ProtocolInputMsg::UpdateInterval)
            }
            msg = self.triggered_upd.recv() => {
                msg.map(ProtocolInputMsg::TriggeredUpd)
            }
            msg = self.triggered_upd_timeout.recv() => {
                msg.map(ProtocolInputMsg::TriggeredUpdTimeout)
            }
            msg = self.table_request.recv() => {
                msg.map(ProtocolInputMsg::TableRequest)
            }
            msg = self.peer_timeout.recv() => {
                msg.map(ProtocolInputMsg::PeerTimeout)
            }
            msg = self.peer_purge.recv() => {
                msg.map(ProtocolInputMsg::PeerPurge)
            }
            msg = self.route_timeout.recv() => {
                msg.map(ProtocolInputMsg::RouteTimeout)
            }
            msg = self.route_gc_timeout.recv() => {
                msg.map(ProtocolInputMsg::RouteGcTimeout)
            }
            msg = self.key_transition.recv() => {
                msg.map(ProtocolInputMsg::KeyTransition)
            }
        }
    }
}

// ===== helper functions =====

fn process_protocol_msg<V>(
    instance: &mut InstanceUpView<'_, V>,
    ports: &mut Ports<V>,
    msg: ProtocolInputMsg<V>,
) -> Result<(), Error<V>>
where
    V: Version,
{
    match msg {
        // Received UDP packet.
        ProtocolInputMsg::UdpRxBuf(msg) => {
            events::process_pdu(instance, ports, msg.src, msg.data);
        }
        // One packet transmission has completed.
        ProtocolInputMsg::UdpTxDone(msg) => {
            events::process_tx_done(ports, &msg.ifname);
        }
        // Initial update.
        ProtocolInputMsg::InitialUpdate(_msg) => {
            events::process_initial_update(instance, ports);
        }
        // Port's unsolicited update timer fired.
        ProtocolInputMsg::UpdateInterval(msg) => {
            events::process_update_interval(instance, ports, &msg.ifname);
        }
        // Signal to send triggered update.
        ProtocolInputMsg::TriggeredUpd(_msg) => {
            events::process_triggered_update(instance, ports);
        }
        // Triggered update timeout has expired.
        ProtocolInputMsg::TriggeredUpdTimeout(_msg) => {
            events::process_triggered_update_timeout(instance, ports);
        }
        // Whole-table request timer fired.
        ProtocolInputMsg::TableRequest(msg) => {
            events::process_table_request(instance, ports, &msg.ifname);
        }
        // Peer's timeout has expired.
        ProtocolInputMsg::PeerTimeout(msg) => {
            events::process_peer_timeout(
                instance, ports, &msg.ifname, msg.addr,
            );
        }
        // Retired peer's retention has expired.
        ProtocolInputMsg::PeerPurge(msg) => {
            events::process_peer_purge(ports, &msg.ifname, msg.addr);
        }
        // Route's timeout has expired.
        ProtocolInputMsg::RouteTimeout(msg) => {
            events::process_route_timeout(instance, msg.prefix);
        }
        // Route's garbage-collection timeout has expired.
        ProtocolInputMsg::RouteGcTimeout(msg) => {
            events::process_route_gc_timeout(instance, msg.prefix);
        }
        // Authentication key crossed a lifetime boundary.
        ProtocolInputMsg::KeyTransition(msg) => {
            events::process_key_transition(instance, ports, &msg.ifname);
        }
    }

    Ok(())
}

// ===== global functions =====

// Starts a RIP instance connected to the forwarding engine, returning a
// handle to its internal bus address.
pub fn spawn<V>(
    name: String,
    config: InstanceCfg,
    fea_tx: IbusSender,
    #[cfg(feature = "testing")] protocol_output: Sender<ProtocolOutputMsg<V>>,
) -> IbusSender
where
    V: Version,
{
    let (ibus_instance_tx, ibus_instance_rx) = mpsc::unbounded_channel();
    let (proto_input_tx, proto_input_rx) = Instance::protocol_input_channels();

    // Subscribe to interface updates and route redistribution.
    let subscriber = IbusSubscriber::new(ibus_instance_tx.clone());
    let _ = fea_tx.send(IbusMsg::InterfaceSub {
        subscriber: Some(subscriber.clone()),
        af: Some(V::ADDRESS_FAMILY),
    });
    let _ = fea_tx.send(IbusMsg::RouteRedistributeSub {
        subscriber: Some(subscriber),
        protocol: rove_utils::protocol::Protocol::STATIC,
        af: Some(V::ADDRESS_FAMILY),
    });

    let tx = InstanceChannelsTx {
        ibus: fea_tx,
        protocol_input: proto_input_tx,
        #[cfg(feature = "testing")]
        protocol_output,
    };
    let rx = InstanceChannelsRx {
        ibus: ibus_instance_rx,
        protocol_input: proto_input_rx,
    };

    let mut instance = Instance::<V>::new(name, config, tx);
    instance.update();

    let ibus_tx = ibus_instance_tx.clone();
    tokio::spawn(async move {
        instance.run(rx).await;
    });

    ibus_tx
}
