//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

mod ripng;
mod ripv2;
