//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rove_utils::ip::{IpAddrKind, SocketAddrKind};
use rove_utils::socket::UdpSocket;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};

use crate::error::{Error, IoError};
use crate::tasks::messages::input::{UdpRxBufMsg, UdpTxDoneMsg};
use crate::tasks::messages::output::UdpTxMsg;
use crate::version::Version;

// Where to send one outbound packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SendDestination<S> {
    Multicast(u32),
    Unicast(S),
}

// RIP version-specific code.
pub trait NetworkVersion<V: Version> {
    const UDP_PORT: u16;

    // Create a RIP socket bound to the given interface.
    fn socket(ifname: &str) -> Result<UdpSocket, std::io::Error>;

    // Join the RIP multicast group.
    fn join_multicast(
        socket: &UdpSocket,
        ifindex: u32,
    ) -> Result<(), std::io::Error>;

    // Leave the RIP multicast group.
    fn leave_multicast(
        socket: &UdpSocket,
        ifindex: u32,
    ) -> Result<(), std::io::Error>;

    // Select the outgoing interface for multicast transmission.
    fn set_multicast_ifindex(
        socket: &UdpSocket,
        ifindex: u32,
    ) -> Result<(), std::io::Error>;

    // Return RIP multicast address.
    fn multicast_sockaddr() -> &'static SocketAddr;
}

// ===== global functions =====

#[cfg(not(feature = "testing"))]
pub(crate) async fn send_packet<V>(
    socket: &UdpSocket,
    msg: UdpTxMsg<V>,
) -> Result<(), std::io::Error>
where
    V: Version,
{
    match msg.dst {
        SendDestination::Multicast(ifindex) => {
            V::set_multicast_ifindex(socket, ifindex)?;
            socket.send_to(&msg.buf, V::multicast_sockaddr()).await?;
        }
        SendDestination::Unicast(sockaddr) => {
            socket.send_to(&msg.buf, sockaddr).await?;
        }
    }

    Ok(())
}

// Transmits queued packets one at a time, reporting each completion back to
// the main task so the port's packet queue advances in order.
#[cfg(not(feature = "testing"))]
pub(crate) async fn write_loop<V>(
    socket: Arc<UdpSocket>,
    ifname: String,
    mut udp_txc: UnboundedReceiver<UdpTxMsg<V>>,
    udp_tx_donep: Sender<UdpTxDoneMsg>,
) where
    V: Version,
{
    while let Some(msg) = udp_txc.recv().await {
        if let Err(error) = send_packet::<V>(&socket, msg).await {
            IoError::UdpSendError(error).log();
        }
        let done = UdpTxDoneMsg {
            ifname: ifname.clone(),
        };
        if udp_tx_donep.send(done).await.is_err() {
            break;
        }
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop<V>(
    socket: Arc<UdpSocket>,
    udp_buf_rxp: Sender<UdpRxBufMsg<V>>,
) -> Result<(), SendError<UdpRxBufMsg<V>>>
where
    V: Version,
{
    let mut buf = [0; 16384];

    loop {
        // Receive data from the network.
        let (num_bytes, src) = match socket.recv_from(&mut buf).await {
            Ok((num_bytes, src)) => (num_bytes, src),
            Err(error) => {
                IoError::UdpRecvError(error).log();
                continue;
            }
        };

        // Validate packet's source address.
        let src = V::SocketAddr::get(src).unwrap();
        let src_ip = *src.ip();
        if !src_ip.is_usable() {
            Error::<V>::UdpInvalidSourceAddr(src_ip).log();
            continue;
        }

        // Hand the raw buffer to the main task, which owns the
        // authentication state needed to decode it.
        let msg = UdpRxBufMsg {
            src,
            data: Bytes::copy_from_slice(&buf[0..num_bytes]),
        };
        udp_buf_rxp.send(msg).await?;
    }
}
