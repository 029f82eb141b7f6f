//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use tracing::{error, warn};

// FEA errors.
#[derive(Debug)]
pub enum Error {
    NoUsableBackend,
    InterfaceNotFound(String),
    UnroutablePrefix(IpNetwork),
    UnresolvedNexthop(IpNetwork),
    TransactionInProgress,
    NoTransactionInProgress,
    TransactionTooBig(usize),
    NetlinkError(String),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::NoUsableBackend => {
                error!("{}", self);
            }
            Error::InterfaceNotFound(ifname) => {
                warn!(%ifname, "{}", self);
            }
            Error::UnroutablePrefix(prefix)
            | Error::UnresolvedNexthop(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::TransactionInProgress
            | Error::NoTransactionInProgress => {
                warn!("{}", self);
            }
            Error::TransactionTooBig(size) => {
                warn!(%size, "{}", self);
            }
            Error::NetlinkError(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoUsableBackend => {
                write!(f, "no usable data plane backend")
            }
            Error::InterfaceNotFound(..) => {
                write!(f, "interface not found")
            }
            Error::UnroutablePrefix(..) => {
                write!(f, "prefix is not routable")
            }
            Error::UnresolvedNexthop(..) => {
                write!(f, "nexthop interface could not be resolved")
            }
            Error::TransactionInProgress => {
                write!(f, "transaction already in progress")
            }
            Error::NoTransactionInProgress => {
                write!(f, "no transaction in progress")
            }
            Error::TransactionTooBig(..) => {
                write!(f, "too many operations in transaction")
            }
            Error::NetlinkError(..) => {
                write!(f, "netlink request failed")
            }
        }
    }
}

impl std::error::Error for Error {}
