//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use rove_rip::packet::{Command, PduVersion};
use rove_rip::ripng::packet::{
    DecodeError, DecodeResult, Pdu, Rte, RteIpv6, RteNexthop,
};
use rove_rip::route::Metric;

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

//
// Test PDUs.
//

static REQUEST1: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x10,
        ],
        Ok(Pdu {
            command: Command::Request,
            version: 1,
            rtes: vec![Rte::Ipv6(RteIpv6 {
                prefix: "::/0".parse().unwrap(),
                tag: 0,
                metric: Metric::from(Metric::INFINITE),
            })],
            rte_errors: vec![],
        }),
    )
});

static RESPONSE1: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x00, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x40, 0x01, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x02,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 1,
            rtes: vec![
                Rte::Ipv6(RteIpv6 {
                    prefix: "2001:db8:1::/64".parse().unwrap(),
                    tag: 0,
                    metric: Metric::from(1),
                }),
                Rte::Ipv6(RteIpv6 {
                    prefix: "2001:db8:2::/64".parse().unwrap(),
                    tag: 0,
                    metric: Metric::from(2),
                }),
            ],
            rte_errors: vec![],
        }),
    )
});

// A next-hop RTE (metric 0xFF) carrying a link-local address, followed by a
// route it applies to.
static RESPONSE2: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x00, 0xfe, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0xff, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x01,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 1,
            rtes: vec![
                Rte::Nexthop(RteNexthop {
                    addr: Some("fe80::1".parse().unwrap()),
                }),
                Rte::Ipv6(RteIpv6 {
                    prefix: "2001:db8:1::/64".parse().unwrap(),
                    tag: 0,
                    metric: Metric::from(1),
                }),
            ],
            rte_errors: vec![],
        }),
    )
});

// A next-hop RTE must carry a link-local (or unspecified) address; other
// RTE errors are collected without discarding the PDU.
static RESPONSE3: Lazy<(Vec<u8>, DecodeResult<Pdu>)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x00, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x00, 0xff, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x81, 0x01,
            0x20, 0x01, 0x0d, 0xb8, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x14,
        ],
        Ok(Pdu {
            command: Command::Response,
            version: 1,
            rtes: vec![],
            rte_errors: vec![
                DecodeError::InvalidRteNexthop(
                    "2001:db8:1::1".parse().unwrap(),
                ),
                DecodeError::InvalidRtePrefixLength(129),
                DecodeError::InvalidRteMetric(20),
            ],
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
fn test_request1_is_dump_request() {
    let (_, ref pdu) = *REQUEST1;
    assert!(pdu.as_ref().unwrap().is_dump_request());
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
fn test_encode_response2() {
    let (ref bytes, ref pdu) = *RESPONSE2;
    test_encode_pdu(bytes, pdu);
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
fn test_max_entries() {
    // RFC 2080 formula on a standard Ethernet MTU.
    assert_eq!(<Pdu as PduVersion<_, _, _>>::max_entries(1500, false), 72);
}
