//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use rove_utils::socket::UdpSocket;
use rove_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tracing::{Instrument, debug_span};

use crate::network;
use crate::version::Version;

//
// RIP tasks diagram:
//
//                                 +--------------+
//                  udp_rx (Nx) -> |              |
//             udp_tx_done (Nx) -> |              |
//        initial_update (0/1x) -> |              |
//         update_interval (Nx) -> |              |
//         triggered_upd (0/1x) -> |              |
// triggered_upd_timeout (0/1x) -> |   instance   | -> (Nx) udp_tx
//           table_request (Nx) -> |              |
//            peer_timeout (Nx) -> |              |
//           route_timeout (Nx) -> |              |
//        route_gc_timeout (Nx) -> |              |
//          key_transition (Nx) -> |              |
//                                 +--------------+
//                          ibus_tx (1x) | ^ (1x) ibus_rx
//                                       | |
//                                       V |
//                                 +--------------+
//                                 |     ibus     |
//                                 +--------------+
//

// RIP inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    use crate::version::Version;

    // Type aliases.
    pub type ProtocolInputMsg<V> = input::ProtocolMsg<V>;
    pub type ProtocolOutputMsg<V> = output::ProtocolMsg<V>;

    // Input messages (child task -> main task).
    pub mod input {
        use bytes::Bytes;

        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub enum ProtocolMsg<V: Version> {
            UdpRxBuf(UdpRxBufMsg<V>),
            UdpTxDone(UdpTxDoneMsg),
            InitialUpdate(InitialUpdateMsg),
            UpdateInterval(UpdateIntervalMsg),
            TriggeredUpd(TriggeredUpdMsg),
            TriggeredUpdTimeout(TriggeredUpdTimeoutMsg),
            TableRequest(TableRequestMsg),
            PeerTimeout(PeerTimeoutMsg<V>),
            PeerPurge(PeerPurgeMsg<V>),
            RouteTimeout(RouteTimeoutMsg<V>),
            RouteGcTimeout(RouteGcTimeoutMsg<V>),
            KeyTransition(KeyTransitionMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct UdpRxBufMsg<V: Version> {
            pub src: V::SocketAddr,
            pub data: Bytes,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UdpTxDoneMsg {
            pub ifname: String,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct InitialUpdateMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UpdateIntervalMsg {
            pub ifname: String,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TriggeredUpdMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TriggeredUpdTimeoutMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TableRequestMsg {
            pub ifname: String,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct PeerTimeoutMsg<V: Version> {
            pub ifname: String,
            pub addr: V::IpAddr,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct PeerPurgeMsg<V: Version> {
            pub ifname: String,
            pub addr: V::IpAddr,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct RouteTimeoutMsg<V: Version> {
            pub prefix: V::IpNetwork,
        }

        #[derive(Debug, Deserialize, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct RouteGcTimeoutMsg<V: Version> {
            pub prefix: V::IpNetwork,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct KeyTransitionMsg {
            pub ifname: String,
        }
    }

    // Output messages (main task -> child task).
    pub mod output {
        use bytes::Bytes;

        use super::*;
        use crate::network::SendDestination;

        #[derive(Debug, Serialize)]
        #[serde(bound = "V: Version")]
        pub enum ProtocolMsg<V: Version> {
            UdpTx(UdpTxMsg<V>),
        }

        #[derive(Debug, Serialize)]
        #[serde(bound = "V: Version")]
        pub struct UdpTxMsg<V: Version> {
            pub dst: SendDestination<V::SocketAddr>,
            pub buf: Bytes,
        }
    }
}

// ===== RIP tasks =====

// UDP Rx task.
pub(crate) fn udp_rx<V>(
    socket: &Arc<UdpSocket>,
    udp_buf_rxp: &Sender<messages::input::UdpRxBufMsg<V>>,
) -> Task<()>
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("network");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("input");
        let _span2_guard = span2.enter();

        let socket = socket.clone();
        let udp_buf_rxp = udp_buf_rxp.clone();

        Task::spawn_supervised(move || {
            let socket = socket.clone();
            let udp_buf_rxp = udp_buf_rxp.clone();
            async move {
                let _ = network::read_loop(socket, udp_buf_rxp).await;
            }
            .in_current_span()
        })
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// UDP Tx task.
#[allow(unused_mut)]
pub(crate) fn udp_tx<V>(
    socket: &Arc<UdpSocket>,
    ifname: &str,
    mut udp_txc: UnboundedReceiver<messages::output::UdpTxMsg<V>>,
    udp_tx_donep: &Sender<messages::input::UdpTxDoneMsg>,
    #[cfg(feature = "testing")] proto_output_tx: &Sender<
        messages::ProtocolOutputMsg<V>,
    >,
) -> Task<()>
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let span1 = debug_span!("network");
        let _span1_guard = span1.enter();
        let span2 = debug_span!("output");
        let _span2_guard = span2.enter();

        let socket = socket.clone();
        let ifname = ifname.to_owned();
        let udp_tx_donep = udp_tx_donep.clone();
        Task::spawn(
            async move {
                network::write_loop(socket, ifname, udp_txc, udp_tx_donep)
                    .await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        let ifname = ifname.to_owned();
        let udp_tx_donep = udp_tx_donep.clone();
        let proto_output_tx = proto_output_tx.clone();
        Task::spawn(async move {
            // Relay messages to the test framework, completing each
            // transmission immediately.
            while let Some(msg) = udp_txc.recv().await {
                let msg = messages::ProtocolOutputMsg::UdpTx(msg);
                let _ = proto_output_tx.send(msg).await;
                let done = messages::input::UdpTxDoneMsg {
                    ifname: ifname.clone(),
                };
                let _ = udp_tx_donep.send(done).await;
            }
        })
    }
}

// Initial RIP update.
pub(crate) fn initial_update(
    initial_updatep: &Sender<messages::input::InitialUpdateMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        // The initial RIP update needs to be delayed for a few seconds to
        // give time for all connected routes to be received from the
        // forwarding engine.
        let timeout = Duration::from_secs(2);
        let initial_updatep = initial_updatep.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::InitialUpdateMsg {};
            let _ = initial_updatep.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Jittered unsolicited update timer for one port. The handler re-arms it
// with a fresh random interval after every dump.
pub(crate) fn update_interval(
    ifname: &str,
    timeout: Duration,
    update_intervalp: &Sender<messages::input::UpdateIntervalMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let ifname = ifname.to_owned();
        let update_intervalp = update_intervalp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::UpdateIntervalMsg { ifname };
            let _ = update_intervalp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Triggered update timeout.
pub(crate) fn triggered_upd_timeout(
    timeout: Duration,
    triggered_upd_timeoutp: &Sender<messages::input::TriggeredUpdTimeoutMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let triggered_upd_timeoutp = triggered_upd_timeoutp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::TriggeredUpdTimeoutMsg {};
            let _ = triggered_upd_timeoutp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Whole-table request timer, armed only while a port has no peers.
pub(crate) fn table_request(
    ifname: &str,
    period: Duration,
    table_requestp: &Sender<messages::input::TableRequestMsg>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let ifname = ifname.to_owned();
        let table_requestp = table_requestp.clone();
        IntervalTask::new(period, move || {
            let ifname = ifname.clone();
            let table_requestp = table_requestp.clone();
            async move {
                let msg = messages::input::TableRequestMsg { ifname };
                let _ = table_requestp.send(msg).await;
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

// Peer timeout task.
pub(crate) fn peer_timeout<V>(
    ifname: &str,
    addr: V::IpAddr,
    timeout: Duration,
    peer_timeoutp: &Sender<messages::input::PeerTimeoutMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let ifname = ifname.to_owned();
        let peer_timeoutp = peer_timeoutp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::PeerTimeoutMsg { ifname, addr };
            let _ = peer_timeoutp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Retired peer purge task.
pub(crate) fn peer_purge<V>(
    ifname: &str,
    addr: V::IpAddr,
    timeout: Duration,
    peer_purgep: &Sender<messages::input::PeerPurgeMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let ifname = ifname.to_owned();
        let peer_purgep = peer_purgep.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::PeerPurgeMsg { ifname, addr };
            let _ = peer_purgep.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Route timeout task.
pub(crate) fn route_timeout<V>(
    prefix: V::IpNetwork,
    timeout: Duration,
    route_timeoutp: &Sender<messages::input::RouteTimeoutMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let route_timeoutp = route_timeoutp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::RouteTimeoutMsg { prefix };
            let _ = route_timeoutp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Route garbage-collection timeout task.
pub(crate) fn route_gc_timeout<V>(
    prefix: V::IpNetwork,
    timeout: Duration,
    route_gc_timeoutp: &Sender<messages::input::RouteGcTimeoutMsg<V>>,
) -> TimeoutTask
where
    V: Version,
{
    #[cfg(not(feature = "testing"))]
    {
        let route_gc_timeoutp = route_gc_timeoutp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::RouteGcTimeoutMsg { prefix };
            let _ = route_gc_timeoutp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Authentication key lifetime transition task.
pub(crate) fn key_transition(
    ifname: &str,
    timeout: Duration,
    key_transitionp: &Sender<messages::input::KeyTransitionMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let ifname = ifname.to_owned();
        let key_transitionp = key_transitionp.clone();
        TimeoutTask::new(timeout, move || async move {
            let msg = messages::input::KeyTransitionMsg { ifname };
            let _ = key_transitionp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}
