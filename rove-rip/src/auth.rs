//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use rove_utils::keychain::Keychain;

// The length of a RIPv2 plaintext password or MD5 secret on the wire.
pub const AUTH_KEY_LEN: usize = 16;

// Authentication configuration of one port.
#[derive(Clone, Debug, Default)]
pub enum AuthCfg {
    #[default]
    None,
    Plaintext(String),
    Md5(Keychain),
}

// Authentication context borrowed from a port for the duration of one
// encode or decode operation.
//
// Key validity is evaluated against `now`, so tests can drive the key
// chain through its lifecycle without touching the wall clock.
#[derive(Debug)]
pub struct AuthCtx<'a> {
    pub method: AuthMethod<'a>,
    // Non-decreasing sequence number (only used for encoding packets).
    pub seqno: &'a Arc<AtomicU32>,
    pub now: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AuthMethod<'a> {
    Plaintext(&'a str),
    Md5(&'a Keychain),
}

// ===== impl AuthCfg =====

impl AuthCfg {
    pub(crate) fn method<'a>(&'a self) -> Option<AuthMethod<'a>> {
        match self {
            AuthCfg::None => None,
            AuthCfg::Plaintext(password) => {
                Some(AuthMethod::Plaintext(password))
            }
            AuthCfg::Md5(keychain) => Some(AuthMethod::Md5(keychain)),
        }
    }
}

// ===== global functions =====

// Checks whether a received sequence number advances past the last accepted
// one, modulo 2^31. A number that went backwards by more than 2^31 is a
// replay.
pub(crate) fn seqno_acceptable(last: u32, new: u32) -> bool {
    let delta = new.wrapping_sub(last);
    delta != 0 && delta < 1 << 31
}

// Zero-pads (or truncates) a secret to its on-wire length.
pub(crate) fn pad_key(key: &[u8]) -> [u8; AUTH_KEY_LEN] {
    let mut padded = [0; AUTH_KEY_LEN];
    let len = key.len().min(AUTH_KEY_LEN);
    padded[..len].copy_from_slice(&key[..len]);
    padded
}

// Computes the keyed-MD5 digest over the packet bytes followed by the
// padded secret.
pub(crate) fn md5_digest(data: &[u8], key: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.update(pad_key(key));
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqno_window() {
        // Strictly increasing sequence numbers are accepted.
        assert!(seqno_acceptable(10, 11));
        assert!(seqno_acceptable(10, 12));
        // Repeats and regressions are not.
        assert!(!seqno_acceptable(12, 12));
        assert!(!seqno_acceptable(12, 11));
        // Wrap-around within the window is fine.
        assert!(seqno_acceptable(u32::MAX, 0));
        assert!(seqno_acceptable(u32::MAX - 10, 5));
        // A jump of 2^31 or more reads as a replay.
        assert!(!seqno_acceptable(0, 1 << 31));
        assert!(!seqno_acceptable(5, 4));
    }

    #[test]
    fn key_padding() {
        assert_eq!(&pad_key(b"HOLDFAST")[..8], b"HOLDFAST");
        assert_eq!(pad_key(b"HOLDFAST")[8..], [0; 8]);
        let long = [7u8; 32];
        assert_eq!(pad_key(&long), [7u8; 16]);
    }
}
