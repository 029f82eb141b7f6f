//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

pub mod rx;
pub mod tx;
