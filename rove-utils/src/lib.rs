//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod bytes;
pub mod capabilities;
pub mod crypto;
pub mod ibus;
pub mod ip;
pub mod keychain;
pub mod mac_addr;
pub mod protocol;
pub mod socket;
pub mod southbound;
pub mod task;

pub use tokio::sync::mpsc::{
    Receiver, Sender, UnboundedReceiver, UnboundedSender,
};
