//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

pub mod network;
pub mod packet;
