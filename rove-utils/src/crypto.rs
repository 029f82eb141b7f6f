//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum CryptoAlgo {
    ClearText,
    Md5,
}

// ===== impl CryptoAlgo =====

impl CryptoAlgo {
    pub fn digest_size(&self) -> u8 {
        match self {
            CryptoAlgo::ClearText => 0,
            CryptoAlgo::Md5 => 16,
        }
    }
}

impl std::fmt::Display for CryptoAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoAlgo::ClearText => write!(f, "cleartext"),
            CryptoAlgo::Md5 => write!(f, "md5"),
        }
    }
}
