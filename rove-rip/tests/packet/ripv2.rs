//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::atomic::AtomicU32;
use std::sync::{Arc, LazyLock as Lazy};

use chrono::Utc;
use rove_rip::auth::{AuthCtx, AuthMethod};
use rove_rip::packet::{Command, PduVersion};
use rove_rip::ripv2::packet::{
    DecodeError, DecodeResult, Pdu, Rte, RteIpv4, RteZero,
};
use rove_rip::route::Metric;
use rove_utils::crypto::CryptoAlgo;
use rove_utils::keychain::{Key, Keychain, KeychainKey};

//
// Helper functions.
//

fn test_encode_pdu(bytes_expected: &[u8], pdu: &DecodeResult<Pdu>) {
    let bytes_actual = pdu.as_ref().unwrap().encode(None);
    assert_eq!(bytes_expected, bytes_actual);
}

fn test_decode_pdu(bytes: &[u8], pdu_expected: &DecodeResult<Pdu>) {
    let pdu_actual = Pdu::decode(bytes, None);
    assert_eq!(*pdu_expected, pdu_actual);
}

fn test_keychain(key_id: u8, secret: &str) -> Keychain {
    let mut keychain = Keychain::new("test".to_owned());
    keychain.add_key(KeychainKey::new(Key::new(
        key_id,
        CryptoAlgo::Md5,
        secret.as_bytes().to_vec(),
    )));
    keychain
}

//
// Test PDUs.
//

static REQUEST1: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x10,
        ],
        Ok(Pdu {
            command: Command::Request,
            version: 2,
            rtes: vec![Rte::Zero(RteZero {
                metric: Metric::from(Metric::INFINITE),
            })],
            rte_errors: vec![],
            auth_seqno: None,
            auth_key_id: None,
        }),
    )
});

static RESPONSE1: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x02,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x03, 0x00, 0xff,
            0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03,
            0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x04, 0x00, 0xff, 0xff, 0xff,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 2,
            rtes: vec![
                Rte::Ipv4(RteIpv4 {
                    tag: 0,
                    prefix: "10.0.2.0/24".parse().unwrap(),
                    nexthop: None,
                    metric: Metric::from(1),
                }),
                Rte::Ipv4(RteIpv4 {
                    tag: 0,
                    prefix: "10.0.3.0/24".parse().unwrap(),
                    nexthop: None,
                    metric: Metric::from(3),
                }),
                Rte::Ipv4(RteIpv4 {
                    tag: 0,
                    prefix: "10.0.4.0/24".parse().unwrap(),
                    nexthop: None,
                    metric: Metric::from(2),
                }),
            ],
            rte_errors: vec![],
            auth_seqno: None,
            auth_key_id: None,
        }),
    )
});

static RESPONSE2: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x02,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00,
        ],
        Err(DecodeError::InvalidVersion(1)),
    )
});

static RESPONSE3: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x03, 0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x02,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00,
        ],
        Err(DecodeError::InvalidCommand(3)),
    )
});

static RESPONSE4: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x0a, 0x00, 0x02,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x7f, 0x00, 0x00, 0x01, 0xff,
            0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03,
            0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x03, 0x00, 0xff, 0xff, 0xff,
            0x00, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x02,
            0x00, 0x00, 0x0a, 0x00, 0x04, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 2,
            rtes: vec![],
            rte_errors: vec![
                DecodeError::InvalidRteAddressFamily(1),
                DecodeError::InvalidRtePrefix(
                    "127.0.0.1".parse().unwrap(),
                    "255.255.255.255".parse().unwrap(),
                ),
                DecodeError::InvalidRteNexthop("127.0.0.1".parse().unwrap()),
                DecodeError::InvalidRteMetric(20),
            ],
            auth_seqno: None,
            auth_key_id: None,
        }),
    )
});

// Pre-RIPv2 advertisements carrying zero masks fall back to the classful
// mask; class D space is rejected outright.
static RESPONSE5: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0a, 0x01, 0x02,
            0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0xc0, 0xa8, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
            0x00, 0x02, 0x00, 0x00, 0xe0, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 2,
            rtes: vec![
                Rte::Ipv4(RteIpv4 {
                    tag: 0,
                    prefix: "10.0.0.0/8".parse().unwrap(),
                    nexthop: None,
                    metric: Metric::from(1),
                }),
                Rte::Ipv4(RteIpv4 {
                    tag: 0,
                    prefix: "192.168.1.0/24".parse().unwrap(),
                    nexthop: None,
                    metric: Metric::from(1),
                }),
            ],
            rte_errors: vec![DecodeError::InvalidRtePrefix(
                "224.0.0.1".parse().unwrap(),
                "0.0.0.0".parse().unwrap(),
            )],
            auth_seqno: None,
            auth_key_id: None,
        }),
    )
});

// Plaintext authentication: the first slot carries the zero-padded
// password.
static RESPONSE6: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x00, 0xff, 0xff, 0x00, 0x02, 0x53, 0x45, 0x43,
            0x52, 0x45, 0x54, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0a, 0x00, 0x02, 0x00, 0xff,
            0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 2,
            rtes: vec![Rte::Ipv4(RteIpv4 {
                tag: 0,
                prefix: "10.0.2.0/24".parse().unwrap(),
                nexthop: None,
                metric: Metric::from(1),
            })],
            rte_errors: vec![],
            auth_seqno: None,
            auth_key_id: None,
        }),
    )
});

//
// Tests.
//

#[test]
fn test_encode_request1() {
    let (ref bytes, ref pdu) = *REQUEST1;
    test_encode_pdu(bytes, pdu);
}

#[test]
fn test_decode_request1() {
    let (ref bytes, ref pdu) = *REQUEST1;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_encode_response1() {
    let (ref bytes, ref pdu) = *RESPONSE1;
    test_encode_pdu(bytes, pdu);
}

#[test]
fn test_decode_response1() {
    let (ref bytes, ref pdu) = *RESPONSE1;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_decode_response2() {
    let (ref bytes, ref pdu) = *RESPONSE2;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_decode_response3() {
    let (ref bytes, ref pdu) = *RESPONSE3;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_decode_response4() {
    let (ref bytes, ref pdu) = *RESPONSE4;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_decode_response5_classful() {
    let (ref bytes, ref pdu) = *RESPONSE5;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_decode_response6_plaintext() {
    let (ref bytes, ref pdu) = *RESPONSE6;
    let auth = AuthCtx {
        method: AuthMethod::Plaintext("SECRET"),
        seqno: &Arc::new(AtomicU32::new(0)),
        now: Utc::now(),
    };
    let pdu_actual = Pdu::decode(bytes, Some(&auth));
    assert_eq!(*pdu, pdu_actual);
}

#[test]
fn test_encode_response6_plaintext() {
    let (ref bytes, ref pdu) = *RESPONSE6;
    let auth = AuthCtx {
        method: AuthMethod::Plaintext("SECRET"),
        seqno: &Arc::new(AtomicU32::new(0)),
        now: Utc::now(),
    };
    let bytes_actual = pdu.as_ref().unwrap().encode(Some(&auth));
    assert_eq!(*bytes, bytes_actual);
}

#[test]
fn test_decode_plaintext_password_mismatch() {
    let (ref bytes, _) = *RESPONSE6;
    let auth = AuthCtx {
        method: AuthMethod::Plaintext("WRONG"),
        seqno: &Arc::new(AtomicU32::new(0)),
        now: Utc::now(),
    };
    assert_eq!(Pdu::decode(bytes, Some(&auth)), Err(DecodeError::AuthError));
}

#[test]
fn test_decode_auth_type_mismatch() {
    // An authenticated packet arriving at an unauthenticated port, and vice
    // versa, is discarded.
    let (ref plain_bytes, _) = *RESPONSE6;
    assert_eq!(
        Pdu::decode(plain_bytes, None),
        Err(DecodeError::AuthTypeMismatch)
    );

    let (ref clear_bytes, _) = *RESPONSE1;
    let auth = AuthCtx {
        method: AuthMethod::Plaintext("SECRET"),
        seqno: &Arc::new(AtomicU32::new(0)),
        now: Utc::now(),
    };
    assert_eq!(
        Pdu::decode(clear_bytes, Some(&auth)),
        Err(DecodeError::AuthTypeMismatch)
    );
}

#[test]
fn test_md5_roundtrip() {
    let keychain = test_keychain(3, "HOLDFAST");
    let seqno = Arc::new(AtomicU32::new(69));
    let now = Utc::now();
    let auth = AuthCtx {
        method: AuthMethod::Md5(&keychain),
        seqno: &seqno,
        now,
    };

    let pdu = Pdu::new(
        Command::Response,
        vec![
            Rte::Ipv4(RteIpv4 {
                tag: 0,
                prefix: "10.0.1.0/24".parse().unwrap(),
                nexthop: None,
                metric: Metric::from(1),
            }),
            Rte::Ipv4(RteIpv4 {
                tag: 0,
                prefix: "10.0.2.0/24".parse().unwrap(),
                nexthop: None,
                metric: Metric::from(2),
            }),
        ],
    );
    let bytes = pdu.encode(Some(&auth));

    // Header + auth entry + 2 routes + trailer.
    assert_eq!(bytes.len(), 4 + 20 + 2 * 20 + 20);

    let decoded = Pdu::decode(&bytes, Some(&auth)).unwrap();
    assert_eq!(decoded.rtes, pdu.rtes);
    assert_eq!(decoded.auth_seqno, Some(69));
    assert_eq!(decoded.auth_key_id, Some(3));
}

#[test]
fn test_md5_corrupted_digest() {
    let keychain = test_keychain(1, "HOLDFAST");
    let seqno = Arc::new(AtomicU32::new(0));
    let auth = AuthCtx {
        method: AuthMethod::Md5(&keychain),
        seqno: &seqno,
        now: Utc::now(),
    };

    let pdu = Pdu::new(
        Command::Response,
        vec![Rte::Ipv4(RteIpv4 {
            tag: 0,
            prefix: "10.0.1.0/24".parse().unwrap(),
            nexthop: None,
            metric: Metric::from(1),
        })],
    );
    let mut bytes = pdu.encode(Some(&auth));

    // Flip one digest bit.
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    assert_eq!(
        Pdu::decode(&bytes, Some(&auth)),
        Err(DecodeError::AuthError)
    );
}

#[test]
fn test_md5_unknown_key() {
    let keychain_tx = test_keychain(2, "HOLDFAST");
    let seqno = Arc::new(AtomicU32::new(0));
    let auth_tx = AuthCtx {
        method: AuthMethod::Md5(&keychain_tx),
        seqno: &seqno,
        now: Utc::now(),
    };

    let pdu = Pdu::new(
        Command::Response,
        vec![Rte::Ipv4(RteIpv4 {
            tag: 0,
            prefix: "10.0.1.0/24".parse().unwrap(),
            nexthop: None,
            metric: Metric::from(1),
        })],
    );
    let bytes = pdu.encode(Some(&auth_tx));

    // The receiver only knows key 1.
    let keychain_rx = test_keychain(1, "HOLDFAST");
    let auth_rx = AuthCtx {
        method: AuthMethod::Md5(&keychain_rx),
        seqno: &seqno,
        now: Utc::now(),
    };
    assert_eq!(
        Pdu::decode(&bytes, Some(&auth_rx)),
        Err(DecodeError::AuthKeyInvalid(2))
    );
}
