//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use maplit::btreeset;
use ospf_core::packet::error::DecodeError;
use ospf_core::packet::lsa::*;
use ospf_core::packet::*;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual = Packet::decode(&mut buf).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(&mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
    assert!(lsa_actual.is_checksum_valid());
}

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0xf6, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x03, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
            },
            network_mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
            hello_interval: 3,
            options: Options::E,
            priority: 1,
            dead_interval: 36,
            dr: None,
            bdr: None,
            neighbors: btreeset![Ipv4Addr::from_str("1.1.1.1").unwrap()],
        }),
    )
});

static DBDESC1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x48, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xd8, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x05, 0xdc, 0x42, 0x00, 0x4e, 0xb8, 0x8f, 0x2e, 0x00,
            0x03, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x80, 0x00, 0x00, 0x02, 0x48, 0xd6, 0x00, 0x30, 0x00, 0x03, 0x02,
            0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00,
            0x00, 0x01, 0xfc, 0xff, 0x00, 0x24,
        ],
        Packet::DbDesc(DbDesc {
            hdr: PacketHdr {
                pkt_type: PacketType::DbDesc,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
            },
            mtu: 1500,
            options: Options::E | Options::O,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no: 1320718126,
            lsa_hdrs: vec![
                LsaHdr {
                    age: 3,
                    options: Options::E,
                    lsa_type: LsaTypeCode::Router.into(),
                    lsa_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    seq_no: 0x80000002,
                    cksum: 0x48d6,
                    length: 48,
                },
                LsaHdr {
                    age: 3,
                    options: Options::E,
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    lsa_id: Ipv4Addr::from_str("172.16.1.0").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0xfcff,
                    length: 36,
                },
            ],
        }),
    )
});

static LSREQUEST1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x03, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x46, 0xab, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x05, 0xac, 0x10, 0x01, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::LsRequest(LsRequest {
            hdr: PacketHdr {
                pkt_type: PacketType::LsRequest,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
            },
            entries: vec![
                LsaKey {
                    lsa_type: LsaTypeCode::Router.into(),
                    adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    lsa_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                },
                LsaKey {
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    adv_rtr: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    lsa_id: Ipv4Addr::from_str("172.16.1.0").unwrap(),
                },
            ],
        }),
    )
});

static LSUPDATE1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x78, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x40, 0xa1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x31, 0x02, 0x01, 0x02,
            0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x02,
            0x37, 0xf4, 0x00, 0x24, 0x01, 0x00, 0x00, 0x01, 0x0a, 0x00, 0x01,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x03, 0x00, 0x00, 0x0a, 0x00, 0x31,
            0x02, 0x03, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0xd2, 0x7a, 0x00, 0x1c, 0xff, 0xff, 0xff, 0xff,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x31, 0x02, 0x03, 0x0a, 0x00, 0x02,
            0x00, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0xfa, 0x44,
            0x00, 0x1c, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x0a,
        ],
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr {
                pkt_type: PacketType::LsUpdate,
                router_id: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
            },
            lsas: vec![
                Lsa::new(
                    49,
                    Options::E,
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    0x80000002,
                    LsaBody::Router(LsaRouter {
                        flags: LsaRouterFlags::B,
                        links: vec![LsaRouterLink::new(
                            LsaRouterLinkType::StubNetwork,
                            Ipv4Addr::from_str("10.0.1.0").unwrap(),
                            Ipv4Addr::from_str("255.255.255.0").unwrap(),
                            10,
                        )],
                    }),
                ),
                Lsa::new(
                    49,
                    Options::E,
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    0x80000001,
                    LsaBody::SummaryNetwork(LsaSummary {
                        mask: Ipv4Addr::from_str("255.255.255.255").unwrap(),
                        metric: 0,
                    }),
                ),
                Lsa::new(
                    49,
                    Options::E,
                    Ipv4Addr::from_str("10.0.2.0").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    0x80000001,
                    LsaBody::SummaryNetwork(LsaSummary {
                        mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                        metric: 10,
                    }),
                ),
            ],
        }),
    )
});

static LSUPDATE2: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x7c, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x7a, 0xf8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x02, 0x02, 0x0a,
            0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01,
            0x52, 0xeb, 0x00, 0x20, 0xff, 0xff, 0xff, 0x00, 0x01, 0x01, 0x01,
            0x01, 0x02, 0x02, 0x02, 0x02, 0x00, 0x01, 0x02, 0x04, 0x03, 0x03,
            0x03, 0x03, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0x5f,
            0xd4, 0x00, 0x1c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14,
            0x00, 0x01, 0x02, 0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01,
            0x01, 0x80, 0x00, 0x00, 0x01, 0xfc, 0xff, 0x00, 0x24, 0xff, 0xff,
            0xff, 0x00, 0x80, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ],
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr {
                pkt_type: PacketType::LsUpdate,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.0").unwrap(),
            },
            lsas: vec![LSA2.1.clone(), LSA3.1.clone(), LSA4.1.clone()],
        }),
    )
});

static LSACK1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x05, 0x00, 0x54, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xa0, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x03, 0x03, 0x03, 0x03, 0x02,
            0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0x09, 0x36, 0x00, 0x1c,
            0x00, 0x01, 0x02, 0x03, 0x0a, 0x00, 0x03, 0x00, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x54, 0xdf, 0x00, 0x1c, 0x00, 0x01,
            0x02, 0x03, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0x49, 0xe9, 0x00, 0x1c,
        ],
        Packet::LsAck(LsAck {
            hdr: PacketHdr {
                pkt_type: PacketType::LsAck,
                router_id: Ipv4Addr::from_str("1.1.1.1").unwrap(),
                area_id: Ipv4Addr::from_str("0.0.0.1").unwrap(),
            },
            lsa_hdrs: vec![
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: Ipv4Addr::from_str("3.3.3.3").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0x0936,
                    length: 28,
                },
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: Ipv4Addr::from_str("10.0.3.0").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0x54df,
                    length: 28,
                },
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: Ipv4Addr::from_str("10.0.4.0").unwrap(),
                    adv_rtr: Ipv4Addr::from_str("2.2.2.2").unwrap(),
                    seq_no: 0x80000001,
                    cksum: 0x49e9,
                    length: 28,
                },
            ],
        }),
    )
});

// LS Update carrying an LSA of unknown type (10) followed by an
// ASBR-Summary-LSA.
static LSUPDATE_UNKNOWN_LSA: Lazy<Vec<u8>> = Lazy::new(|| {
    vec![
        0x02, 0x04, 0x00, 0x54, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00,
        0x2f, 0x6e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x42, 0x0a, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0x1a, 0xf6, 0x00, 0x1c,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x04,
        0x03, 0x03, 0x03, 0x03, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01,
        0x5f, 0xd4, 0x00, 0x1c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14,
    ]
});

//
// Test LSAs.
//

static LSA1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x31, 0x02, 0x01, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x02, 0x37, 0xf4, 0x00, 0x24, 0x01, 0x00,
            0x00, 0x01, 0x0a, 0x00, 0x01, 0x00, 0xff, 0xff, 0xff, 0x00, 0x03,
            0x00, 0x00, 0x0a,
        ],
        Lsa::new(
            49,
            Options::E,
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            0x80000002,
            LsaBody::Router(LsaRouter {
                flags: LsaRouterFlags::B,
                links: vec![LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    Ipv4Addr::from_str("10.0.1.0").unwrap(),
                    Ipv4Addr::from_str("255.255.255.0").unwrap(),
                    10,
                )],
            }),
        ),
    )
});

static LSA2: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x02, 0x0a, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x80, 0x00, 0x00, 0x01, 0x52, 0xeb, 0x00, 0x20, 0xff, 0xff,
            0xff, 0x00, 0x01, 0x01, 0x01, 0x01, 0x02, 0x02, 0x02, 0x02,
        ],
        Lsa::new(
            1,
            Options::E,
            Ipv4Addr::from_str("10.0.1.1").unwrap(),
            Ipv4Addr::from_str("1.1.1.1").unwrap(),
            0x80000001,
            LsaBody::Network(LsaNetwork {
                mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                attached_rtrs: btreeset![
                    Ipv4Addr::from_str("1.1.1.1").unwrap(),
                    Ipv4Addr::from_str("2.2.2.2").unwrap(),
                ],
            }),
        ),
    )
});

static LSA3: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x04, 0x03, 0x03, 0x03, 0x03, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x5f, 0xd4, 0x00, 0x1c, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x14,
        ],
        Lsa::new(
            1,
            Options::E,
            Ipv4Addr::from_str("3.3.3.3").unwrap(),
            Ipv4Addr::from_str("2.2.2.2").unwrap(),
            0x80000001,
            LsaBody::SummaryRouter(LsaSummary {
                mask: Ipv4Addr::UNSPECIFIED,
                metric: 20,
            }),
        ),
    )
});

static LSA4: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01,
            0x01, 0x80, 0x00, 0x00, 0x01, 0xfc, 0xff, 0x00, 0x24, 0xff, 0xff,
            0xff, 0x00, 0x80, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ],
        Lsa::new(
            1,
            Options::E,
            Ipv4Addr::from_str("172.16.1.0").unwrap(),
            Ipv4Addr::from_str("1.1.1.1").unwrap(),
            0x80000001,
            LsaBody::AsExternal(LsaAsExternal {
                mask: Ipv4Addr::from_str("255.255.255.0").unwrap(),
                flags: LsaAsExternalFlags::E,
                metric: 20,
                fwd_addr: None,
                tag: 0,
            }),
        ),
    )
});

//
// Tests.
//

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_encode_packet(bytes, hello);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_decode_packet(bytes, hello);
}

#[test]
fn test_encode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_encode_packet(bytes, dbdesc);
}

#[test]
fn test_decode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_decode_packet(bytes, dbdesc);
}

#[test]
fn test_encode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_encode_packet(bytes, request);
}

#[test]
fn test_decode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_decode_packet(bytes, request);
}

#[test]
fn test_encode_lsupdate1() {
    let (ref bytes, ref lsupdate) = *LSUPDATE1;
    test_encode_packet(bytes, lsupdate);
}

#[test]
fn test_decode_lsupdate1() {
    let (ref bytes, ref lsupdate) = *LSUPDATE1;
    test_decode_packet(bytes, lsupdate);
}

#[test]
fn test_encode_lsupdate2() {
    let (ref bytes, ref lsupdate) = *LSUPDATE2;
    test_encode_packet(bytes, lsupdate);
}

#[test]
fn test_decode_lsupdate2() {
    let (ref bytes, ref lsupdate) = *LSUPDATE2;
    test_decode_packet(bytes, lsupdate);
}

#[test]
fn test_encode_lsack1() {
    let (ref bytes, ref lsack) = *LSACK1;
    test_encode_packet(bytes, lsack);
}

#[test]
fn test_decode_lsack1() {
    let (ref bytes, ref lsack) = *LSACK1;
    test_decode_packet(bytes, lsack);
}

#[test]
fn test_encode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa2() {
    let (ref bytes, ref lsa) = *LSA2;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa2() {
    let (ref bytes, ref lsa) = *LSA2;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa3() {
    let (ref bytes, ref lsa) = *LSA3;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa3() {
    let (ref bytes, ref lsa) = *LSA3;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa4() {
    let (ref bytes, ref lsa) = *LSA4;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa4() {
    let (ref bytes, ref lsa) = *LSA4;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsupdate_unknown_lsa() {
    let mut buf = Bytes::copy_from_slice(&LSUPDATE_UNKNOWN_LSA);
    let packet = Packet::decode(&mut buf).unwrap();
    let Packet::LsUpdate(lsupdate) = packet else {
        panic!("unexpected packet type");
    };
    assert_eq!(lsupdate.lsas, vec![LSA3.1.clone()]);
}

#[test]
fn test_decode_unknown_lsa() {
    let mut buf = Bytes::copy_from_slice(&LSUPDATE_UNKNOWN_LSA[28..56]);
    assert_eq!(Lsa::decode(&mut buf), Err(DecodeError::UnknownLsaType(10)));
}

#[test]
fn test_decode_lsrequest_wide_type() {
    // First entry with LS type 0x00000101, checksum adjusted accordingly.
    let mut bytes = LSREQUEST1.0.clone();
    bytes[26] = 0x01;
    bytes[12] = 0x45;
    let mut buf = Bytes::from(bytes);
    assert_eq!(
        Packet::decode(&mut buf),
        Err(DecodeError::UnknownLsRequestType(0x101))
    );
}

#[test]
fn test_packet_checksum_byte_flip() {
    for (bytes, _) in
        [&*HELLO1, &*DBDESC1, &*LSREQUEST1, &*LSUPDATE1, &*LSACK1]
    {
        for i in 0..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;
            let mut buf = Bytes::from(corrupted);
            assert!(Packet::decode(&mut buf).is_err(), "byte {i}");
        }
    }
}

#[test]
fn test_lsa_checksum_byte_flip() {
    for (bytes, _) in [&*LSA1, &*LSA2, &*LSA3, &*LSA4] {
        // The Age field isn't covered by the checksum.
        for i in 2..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;
            let mut buf = Bytes::from(corrupted);
            let rejected = match Lsa::decode(&mut buf) {
                Ok(lsa) => !lsa.is_checksum_valid(),
                Err(_) => true,
            };
            assert!(rejected, "byte {i}");
        }
    }
}

#[test]
fn test_packet_truncation() {
    for (bytes, _) in
        [&*HELLO1, &*DBDESC1, &*LSREQUEST1, &*LSUPDATE1, &*LSACK1]
    {
        for len in 0..bytes.len() {
            let mut buf = Bytes::copy_from_slice(&bytes[..len]);
            assert!(Packet::decode(&mut buf).is_err(), "length {len}");
        }
    }
}

#[test]
fn test_lsa_truncation() {
    for (bytes, _) in [&*LSA1, &*LSA2, &*LSA3, &*LSA4] {
        for len in 0..bytes.len() {
            let mut buf = Bytes::copy_from_slice(&bytes[..len]);
            assert!(Lsa::decode(&mut buf).is_err(), "length {len}");
        }
    }
}
