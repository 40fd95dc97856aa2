//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod lsa;

use std::cell::{RefCell, RefMut};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospf_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use ospf_utils::ip::Ipv4AddrExt;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey, LsaType};

// OSPFv2 Options field.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-1
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u8 {
        const E = 0x02;
        const MC = 0x04;
        const NP = 0x08;
        const DC = 0x20;
        const O = 0x40;
    }
}

// Database Description flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct DbDescFlags: u8 {
        const MS = 0x01;
        const M = 0x02;
        const I = 0x04;
    }
}

// OSPF Packet Type.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-3
#[derive(Clone, Copy, Debug, Eq, Hash, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 0x01,
    DbDesc = 0x02,
    LsRequest = 0x03,
    LsUpdate = 0x04,
    LsAck = 0x05,
}

// OSPFv2 authentication type. Only Null authentication is supported.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthType {
    Null = 0x00,
    Simple = 0x01,
    Cryptographic = 0x02,
}

// OSPF packet.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Hello(Hello),
    DbDesc(DbDesc),
    LsRequest(LsRequest),
    LsUpdate(LsUpdate),
    LsAck(LsAck),
}

//
// OSPFv2 packet header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Version #   |     Type      |         Packet length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Router ID                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           Area ID                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |             AuType            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

//
// OSPFv2 Hello packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Network Mask                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         HelloInterval         |    Options    |    Rtr Pri    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     RouterDeadInterval                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Designated Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Backup Designated Router                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Neighbor                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: Options,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

//
// OSPFv2 Database Description packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Interface MTU         |    Options    |0|0|0|0|0|I|M|MS
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     DD sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +-                      An LSA Header                          -+
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DbDesc {
    pub hdr: PacketHdr,
    pub mtu: u16,
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

//
// OSPFv2 Link State Request packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          LS type                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Link State ID                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsRequest {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey>,
}

//
// OSPFv2 Link State Update packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            # LSAs                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             LSAs                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa>,
}

//
// OSPFv2 Link State Acknowledgment packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +-                         An LSA Header                       -+
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// ===== impl Packet =====

impl Packet {
    // Decodes OSPF packet from a bytes buffer.
    //
    // The checksum is verified before anything else, so that corruption of
    // any header field is reported as a checksum failure.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.len() < PacketHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        PacketHdr::verify_cksum(buf.as_ref())?;

        // Decode the packet header.
        let buf_len = buf.len();
        let (hdr, pkt_len) = PacketHdr::decode(buf)?;
        if pkt_len as usize != buf_len {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        // Decode the packet body.
        let packet = match hdr.pkt_type {
            PacketType::Hello => Packet::Hello(Hello::decode(hdr, buf)?),
            PacketType::DbDesc => Packet::DbDesc(DbDesc::decode(hdr, buf)?),
            PacketType::LsRequest => {
                Packet::LsRequest(LsRequest::decode(hdr, buf)?)
            }
            PacketType::LsUpdate => {
                Packet::LsUpdate(LsUpdate::decode(hdr, buf)?)
            }
            PacketType::LsAck => Packet::LsAck(LsAck::decode(hdr, buf)?),
        };

        Ok(packet)
    }

    // Encodes OSPF packet into a bytes buffer.
    pub fn encode(&self) -> Bytes {
        match self {
            Packet::Hello(pkt) => pkt.encode(),
            Packet::DbDesc(pkt) => pkt.encode(),
            Packet::LsRequest(pkt) => pkt.encode(),
            Packet::LsUpdate(pkt) => pkt.encode(),
            Packet::LsAck(pkt) => pkt.encode(),
        }
    }

    // Returns a reference to the packet header.
    pub fn hdr(&self) -> &PacketHdr {
        match self {
            Packet::Hello(pkt) => &pkt.hdr,
            Packet::DbDesc(pkt) => &pkt.hdr,
            Packet::LsRequest(pkt) => &pkt.hdr,
            Packet::LsUpdate(pkt) => &pkt.hdr,
            Packet::LsAck(pkt) => &pkt.hdr,
        }
    }
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const VERSION: u8 = 2;
    pub const LENGTH: u16 = 24;
    pub const CKSUM_RANGE: std::ops::Range<usize> = 12..14;

    pub fn new(
        pkt_type: PacketType,
        router_id: Ipv4Addr,
        area_id: Ipv4Addr,
    ) -> PacketHdr {
        PacketHdr {
            pkt_type,
            router_id,
            area_id,
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<(Self, u16)> {
        // Parse version.
        let version = buf.get_u8();
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        // Parse packet type.
        let pkt_type = buf.get_u8();
        let pkt_type = PacketType::from_u8(pkt_type)
            .ok_or(DecodeError::UnknownPacketType(pkt_type))?;

        // Parse and validate message length.
        let pkt_len = buf.get_u16();
        if pkt_len < Self::LENGTH {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        // Parse Router-ID.
        let router_id = buf.get_ipv4();
        if !router_id.is_usable() {
            return Err(DecodeError::InvalidRouterId(router_id));
        }

        // Parse Area ID.
        let area_id = buf.get_ipv4();

        // Parse checksum (already verified).
        let _cksum = buf.get_u16();

        // Parse authentication type and data.
        let au_type = buf.get_u16();
        if AuthType::from_u16(au_type) != Some(AuthType::Null) {
            return Err(DecodeError::UnsupportedAuthType(au_type));
        }
        let _ = buf.get_u64();

        Ok((
            PacketHdr {
                pkt_type,
                router_id,
                area_id,
            },
            pkt_len,
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(Self::VERSION);
        buf.put_u8(self.pkt_type as u8);
        // The length will be initialized later.
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        // The checksum will be computed later.
        buf.put_u16(0);
        buf.put_u16(AuthType::Null as u16);
        buf.put_u64(0);
    }

    fn update_cksum(buf: &mut BytesMut) {
        let mut cksum = Checksum::new();
        cksum.add_bytes(buf);
        buf[Self::CKSUM_RANGE].copy_from_slice(&cksum.checksum());
    }

    // The checksum covers the entire packet, the authentication field
    // included.
    fn verify_cksum(data: &[u8]) -> DecodeResult<()> {
        let mut cksum = Checksum::new();
        cksum.add_bytes(data);
        if cksum.checksum() != [0; 2] {
            return Err(DecodeError::InvalidChecksum);
        }

        Ok(())
    }
}

// ===== impl Hello =====

impl Hello {
    pub const BASE_LENGTH: u16 = 20;

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        let network_mask = buf.get_ipv4();
        let hello_interval = buf.get_u16();
        // Ignore unknown options.
        let options = Options::from_bits_truncate(buf.get_u8());
        let priority = buf.get_u8();
        let dead_interval = buf.get_u32();
        let dr = buf.get_opt_ipv4();
        let bdr = buf.get_opt_ipv4();

        // Parse list of neighbors.
        let mut neighbors = BTreeSet::new();
        let nbrs_cnt = buf.remaining() / 4;
        for _ in 0..nbrs_cnt {
            neighbors.insert(buf.get_ipv4());
        }

        Ok(Hello {
            hdr,
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = packet_encode_start(buf, &self.hdr);

            buf.put_ipv4(&self.network_mask);
            buf.put_u16(self.hello_interval);
            buf.put_u8(self.options.bits());
            buf.put_u8(self.priority);
            buf.put_u32(self.dead_interval);
            buf.put_opt_ipv4(&self.dr);
            buf.put_opt_ipv4(&self.bdr);
            for nbr in &self.neighbors {
                buf.put_ipv4(nbr);
            }

            packet_encode_end(buf)
        })
    }
}

// ===== impl DbDesc =====

impl DbDesc {
    pub const BASE_LENGTH: u16 = 8;

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        let mtu = buf.get_u16();
        let options = Options::from_bits_truncate(buf.get_u8());
        let dd_flags = DbDescFlags::from_bits_truncate(buf.get_u8());
        let dd_seq_no = buf.get_u32();

        // Parse list of LSA headers.
        let mut lsa_hdrs = vec![];
        let lsa_hdrs_cnt = buf.remaining() / LsaHdr::LENGTH as usize;
        for _ in 0..lsa_hdrs_cnt {
            lsa_hdrs.push(LsaHdr::decode(buf)?);
        }

        Ok(DbDesc {
            hdr,
            mtu,
            options,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = packet_encode_start(buf, &self.hdr);

            buf.put_u16(self.mtu);
            buf.put_u8(self.options.bits());
            buf.put_u8(self.dd_flags.bits());
            buf.put_u32(self.dd_seq_no);
            for lsa_hdr in &self.lsa_hdrs {
                lsa_hdr.encode(&mut buf);
            }

            packet_encode_end(buf)
        })
    }
}

// ===== impl LsRequest =====

impl LsRequest {
    pub const ENTRY_LENGTH: u16 = 12;

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut entries = vec![];
        let entries_cnt = buf.remaining() / Self::ENTRY_LENGTH as usize;
        for _ in 0..entries_cnt {
            // The LS type is carried in a 32-bit field.
            let lsa_type = buf.get_u32();
            let lsa_type = u8::try_from(lsa_type)
                .map_err(|_| DecodeError::UnknownLsRequestType(lsa_type))?;
            let lsa_type = LsaType(lsa_type);
            let lsa_id = buf.get_ipv4();
            let adv_rtr = buf.get_ipv4();
            entries.push(LsaKey::new(lsa_type, adv_rtr, lsa_id));
        }

        Ok(LsRequest { hdr, entries })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = packet_encode_start(buf, &self.hdr);

            for entry in &self.entries {
                buf.put_u32(entry.lsa_type.0 as u32);
                buf.put_ipv4(&entry.lsa_id);
                buf.put_ipv4(&entry.adv_rtr);
            }

            packet_encode_end(buf)
        })
    }
}

// ===== impl LsUpdate =====

impl LsUpdate {
    pub const BASE_LENGTH: u16 = 4;

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        // Parse list of LSAs. LSAs of unknown type are skipped individually.
        let mut lsas = vec![];
        let lsas_cnt = buf.get_u32();
        for _ in 0..lsas_cnt {
            match Lsa::decode(buf) {
                Ok(lsa) => lsas.push(lsa),
                Err(DecodeError::UnknownLsaType(_)) => continue,
                Err(error) => return Err(error),
            }
        }

        Ok(LsUpdate { hdr, lsas })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = packet_encode_start(buf, &self.hdr);

            buf.put_u32(self.lsas.len() as u32);
            for lsa in &self.lsas {
                buf.put_slice(&lsa.raw);
            }

            packet_encode_end(buf)
        })
    }
}

// ===== impl LsAck =====

impl LsAck {
    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut lsa_hdrs = vec![];
        let lsa_hdrs_cnt = buf.remaining() / LsaHdr::LENGTH as usize;
        for _ in 0..lsa_hdrs_cnt {
            lsa_hdrs.push(LsaHdr::decode(buf)?);
        }

        Ok(LsAck { hdr, lsa_hdrs })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = packet_encode_start(buf, &self.hdr);

            for lsa_hdr in &self.lsa_hdrs {
                lsa_hdr.encode(&mut buf);
            }

            packet_encode_end(buf)
        })
    }
}

// ===== helper functions =====

fn packet_encode_start<'a>(
    buf: &'a RefCell<BytesMut>,
    hdr: &PacketHdr,
) -> RefMut<'a, BytesMut> {
    let mut buf = buf.borrow_mut();
    buf.clear();
    hdr.encode(&mut buf);
    buf
}

fn packet_encode_end(mut buf: RefMut<'_, BytesMut>) -> Bytes {
    // Initialize packet length.
    let pkt_len = buf.len() as u16;
    buf[2..4].copy_from_slice(&pkt_len.to_be_bytes());

    // The checksum is always the last thing written.
    PacketHdr::update_cksum(&mut buf);

    buf.clone().freeze()
}
