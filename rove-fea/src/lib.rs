//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod backend;
pub mod error;
pub mod fib;
mod ibus;
pub mod iftree;
mod netlink;
pub mod portmap;
pub mod rib;

use std::collections::HashMap;

use futures::StreamExt;
use rove_utils::ibus::{IbusReceiver, IbusSender};
use rove_utils::southbound::{AddressFlags, AddressMsg};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::Instrument;

use crate::backend::netlink::{NetlinkBackend, NetlinkMonitor};
use crate::backend::{
    BackendRegistry, BackendSelection, ConfigErrorReporter, DataPlane,
};
use crate::error::Error;
use crate::fib::Fib;
use crate::ibus::IbusUpdateSink;
use crate::iftree::{IfTree, NodeState};
use crate::portmap::NexthopPortMapper;
use crate::rib::Rib;

// The forwarding engine abstraction master.
//
// Owns the canonical interface tree, the data plane backends, the FIB and
// the RIB. All mutations are serialized through one event loop.
pub struct Master {
    // Internal bus Tx channel (handed to subscribers).
    pub ibus_tx: IbusSender,
    // Canonical interface tree (pulled system state).
    pub tree: IfTree,
    // Desired interface configuration.
    pub config: IfTree,
    // Probed data plane backends.
    pub backends: BackendRegistry,
    // Forwarding table engine.
    pub fib: Fib,
    // Routing information base.
    pub rib: Rib,
    // Nexthop-to-dataplane-port associations.
    pub portmap: NexthopPortMapper,
    // Interface update subscriptions.
    pub interface_subscriptions: HashMap<usize, IbusSender>,
}

// Receive-side channels for the master event loop.
pub struct MasterChannels {
    pub ibus_rx: IbusReceiver,
    pub rib_update_queue_rx: UnboundedReceiver<()>,
    pub monitor: Option<NetlinkMonitor>,
}

// ===== impl Master =====

impl Master {
    pub fn new(
        selection: BackendSelection,
    ) -> Result<(Master, MasterChannels), Error> {
        let (ibus_tx, ibus_rx) = mpsc::unbounded_channel();
        let (update_queue_tx, update_queue_rx) = mpsc::unbounded_channel();

        // Probe the compiled-in backends. The dummy backend always comes
        // first so a platform backend wins the primary slot when present.
        let mut candidates =
            vec![DataPlane::Dummy(backend::dummy::DummyBackend::new())];
        #[cfg(not(feature = "testing"))]
        if cfg!(target_os = "linux") {
            candidates.push(DataPlane::Netlink(NetlinkBackend::init()));
        }
        let mut backends = BackendRegistry::select(candidates, selection)?;

        let monitor = match &mut backends.primary {
            DataPlane::Netlink(backend) => backend.take_monitor(),
            DataPlane::Dummy(_) => None,
        };

        let master = Master {
            ibus_tx,
            tree: Default::default(),
            config: Default::default(),
            backends,
            fib: Fib::new(),
            rib: Rib::new(update_queue_tx),
            portmap: NexthopPortMapper::new(),
            interface_subscriptions: Default::default(),
        };
        let channels = MasterChannels {
            ibus_rx,
            rib_update_queue_rx: update_queue_rx,
            monitor,
        };

        Ok((master, channels))
    }

    pub async fn run(&mut self, mut channels: MasterChannels) {
        // Prime the tree with the platform's current state.
        if let Err(error) = self.pull_and_report().await {
            error.log();
        }

        loop {
            tokio::select! {
                Some(msg) = channels.ibus_rx.recv() => {
                    ibus::process_msg(self, msg).await;
                }
                Some(_) = channels.rib_update_queue_rx.recv() => {
                    self.process_rib_update_queue().await;
                }
                Some((msg, _)) = monitor_recv(&mut channels.monitor) => {
                    match backend::netlink::process_event(&mut self.tree, msg) {
                        Some(update) => self.fib.external_update(update),
                        None => self.process_tree_updates(),
                    }
                }
            }
        }
    }

    // Re-reads the full platform state and fans resulting updates out to
    // subscribers.
    pub async fn pull_and_report(&mut self) -> Result<(), Error> {
        self.backends.primary.pull_config(&mut self.tree).await?;
        self.process_tree_updates();
        Ok(())
    }

    // Pushes the desired configuration to the primary and all secondary
    // backends, returning the accumulated error report.
    pub async fn push_config(&mut self) -> ConfigErrorReporter {
        let mut reporter = ConfigErrorReporter::default();
        self.backends
            .primary
            .push_config(&self.tree, &self.config, &mut reporter)
            .await;
        for backend in &mut self.backends.secondary {
            backend
                .push_config(&self.tree, &self.config, &mut reporter)
                .await;
        }
        reporter
    }

    // Delivers one wave of tree updates: connected routes into the RIB,
    // then notifications to subscribers, then the tree's lifecycle tags are
    // collapsed.
    pub fn process_tree_updates(&mut self) {
        // Maintain connected routes.
        for iface in self.tree.interfaces() {
            let Some(ifindex) = iface.ifindex else {
                continue;
            };
            for vif in iface.vifs.values() {
                let addr_msg = |addr: ipnetwork::IpNetwork| AddressMsg {
                    ifname: iface.ifname.clone(),
                    addr,
                    flags: AddressFlags::default(),
                };
                for addr in vif.addrs4.values() {
                    match addr.state {
                        NodeState::Created | NodeState::Changed => {
                            self.rib.connected_route_add(
                                ifindex,
                                addr_msg(addr.network().into()),
                            );
                        }
                        NodeState::Deleted => {
                            self.rib.connected_route_del(
                                addr_msg(addr.network().into()),
                            );
                        }
                        NodeState::NoChange => (),
                    }
                }
                for addr in vif.addrs6.values() {
                    match addr.state {
                        NodeState::Created | NodeState::Changed => {
                            self.rib.connected_route_add(
                                ifindex,
                                addr_msg(addr.network().into()),
                            );
                        }
                        NodeState::Deleted => {
                            self.rib.connected_route_del(
                                addr_msg(addr.network().into()),
                            );
                        }
                        NodeState::NoChange => (),
                    }
                }
            }
        }

        // Notify subscribers.
        let subscriptions = self
            .interface_subscriptions
            .values()
            .cloned()
            .collect::<Vec<_>>();
        let mut sink = IbusUpdateSink {
            subscriptions: &subscriptions,
        };
        self.tree.report_updates(&mut sink);
        self.tree.finalize_state();
    }

    // Processes pending best-route recomputations.
    pub async fn process_rib_update_queue(&mut self) {
        let Master {
            rib,
            tree,
            fib,
            backends,
            ..
        } = self;
        let handle = match &backends.primary {
            DataPlane::Netlink(backend) => Some(&backend.handle),
            DataPlane::Dummy(_) => None,
        };
        rib.process_rib_update_queue(tree, fib, handle).await;
    }

    // Uninstalls all owned forwarding state before shutdown.
    pub async fn shutdown(&mut self) {
        let Master {
            rib,
            tree,
            fib,
            backends,
            ..
        } = self;
        let handle = match &backends.primary {
            DataPlane::Netlink(backend) => Some(&backend.handle),
            DataPlane::Dummy(_) => None,
        };
        rib.route_uninstall_all(tree, fib, handle).await;
    }
}

// ===== global functions =====

// Starts the FEA master on its own task and returns the bus address other
// subsystems use to reach it.
pub fn start(selection: BackendSelection) -> Result<IbusSender, Error> {
    let (mut master, channels) = Master::new(selection)?;
    let ibus_tx = master.ibus_tx.clone();

    tokio::spawn(
        async move {
            master.run(channels).await;
        }
        .instrument(tracing::debug_span!("fea")),
    );

    Ok(ibus_tx)
}

// ===== helper functions =====

async fn monitor_recv(
    monitor: &mut Option<NetlinkMonitor>,
) -> Option<(
    netlink_packet_core::NetlinkMessage<
        netlink_packet_route::rtnl::RtnlMessage,
    >,
    netlink_sys::SocketAddr,
)> {
    match monitor {
        Some(monitor) => monitor.next().await,
        None => std::future::pending().await,
    }
}
