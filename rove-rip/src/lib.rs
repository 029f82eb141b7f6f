//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod auth;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod network;
pub mod output;
pub mod packet;
pub mod packet_queue;
pub mod peer;
pub mod port;
pub mod ripng;
pub mod ripv2;
pub mod route;
pub mod southbound;
pub mod tasks;
pub mod version;
