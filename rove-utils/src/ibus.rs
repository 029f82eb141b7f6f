//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::ip::AddressFamily;
use crate::protocol::Protocol;
use crate::southbound::{AddressMsg, InterfaceUpdateMsg, RouteKeyMsg, RouteMsg};

// Useful type definition(s).
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

static NEXT_SUBSCRIBER_ID: AtomicUsize = AtomicUsize::new(1);

/// Subscriber to [`IbusMsg`] messages.
#[derive(Clone, Debug)]
pub struct IbusSubscriber {
    /// Unique identifier for the subscriber.
    pub id: usize,
    /// Channel for sending messages to the subscriber.
    pub tx: IbusSender,
}

/// Internal bus message for communication among the platform components.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    /// Request a subscription to interface update notifications.
    ///
    /// The subscriber may filter updates by address family.
    InterfaceSub {
        #[serde(skip)]
        subscriber: Option<IbusSubscriber>,
        af: Option<AddressFamily>,
    },
    /// Interface update notification.
    InterfaceUpd(InterfaceUpdateMsg),
    /// Interface delete notification.
    InterfaceDel(String),
    /// Interface address addition notification.
    InterfaceAddressAdd(AddressMsg),
    /// Interface address delete notification.
    InterfaceAddressDel(AddressMsg),
    /// End of a wave of interface update notifications. Consumers may batch
    /// work until this marker arrives.
    InterfaceUpdatesComplete,
    /// Request to install an IP route.
    RouteIpAdd(RouteMsg),
    /// Request to uninstall an IP route.
    RouteIpDel(RouteKeyMsg),
    /// Request a subscription to route redistribution notifications.
    RouteRedistributeSub {
        #[serde(skip)]
        subscriber: Option<IbusSubscriber>,
        protocol: Protocol,
        af: Option<AddressFamily>,
    },
    /// Route redistribution update notification.
    RouteRedistributeAdd(RouteMsg),
    /// Route redistribution delete notification.
    RouteRedistributeDel(RouteKeyMsg),
    /// Nexthop tracking registration.
    NexthopTrack {
        #[serde(skip)]
        subscriber: Option<IbusSubscriber>,
        addr: IpAddr,
    },
    /// Nexthop tracking unregistration.
    NexthopUntrack {
        #[serde(skip)]
        subscriber: Option<IbusSubscriber>,
        addr: IpAddr,
    },
    /// Nexthop tracking update.
    NexthopUpd { addr: IpAddr, metric: Option<u32> },
    /// Cancel all of the subscriber's subscriptions.
    Disconnect {
        #[serde(skip)]
        subscriber: Option<IbusSubscriber>,
    },
}

// ===== impl IbusSubscriber =====

impl IbusSubscriber {
    pub fn new(tx: IbusSender) -> Self {
        IbusSubscriber {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }
}
