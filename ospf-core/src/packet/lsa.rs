//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospf_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_MAX_AGE, LSA_RESERVED_SEQ_NO};
use crate::packet::Options;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};

// OSPF LSA.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    // LSA raw bytes.
    #[serde(default, skip_serializing)]
    pub raw: Bytes,
    // LSA header.
    pub hdr: LsaHdr,
    // LSA body.
    pub body: LsaBody,
    // Time the LSA was created or received. When combined with the Age field
    // in the LSA header, the actual LSA age can be determined.
    #[serde(skip)]
    pub base_time: Option<Instant>,
}

// OSPF LSA key. It serves both as a global LSA identifier and as a key to
// store LSAs in an LSDB.
//
// Changing the order of the fields changes the LSDB iteration order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

// OSPF LSA flooding scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaScope {
    Area,
    As,
    Unknown,
}

// OSPF LSA type, as seen on the wire.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

// OSPF LSA type code.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-5
#[derive(Clone, Copy, Debug, Eq, Ord, FromPrimitive, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
}

//
// OSPF LSA header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            LS age             |    Options    |    LS type    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Link State ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     LS sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         LS checksum           |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// OSPF LSA body. Every LSA type this router understands has its own variant;
// LSAs of any other type never make it past decoding.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
}

//
// OSPF Router-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    0    |V|E|B|        0      |            # links            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Link ID                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Link Data                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |     # TOS     |            metric             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |      TOS      |        0      |          TOS  metric          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

// OSPFv2 Router Properties Registry.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-11
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
    }
}

// OSPFv2 Router LSA Link Type.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-7
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 0x01,
    TransitNetwork = 0x02,
    StubNetwork = 0x03,
    VirtualLink = 0x04,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
    #[new(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tos_metrics: Vec<LsaTosMetric>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaTosMetric {
    pub tos: u8,
    pub metric: u16,
}

//
// OSPF Network-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Network Mask                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Attached Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

//
// OSPF Summary-LSA (types 3 and 4).
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Network Mask                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |      0        |                  metric                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

//
// OSPF AS-External-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Network Mask                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |E|     0       |                  metric                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Forwarding address                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      External Route Tag                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// ===== impl Lsa =====

impl Lsa {
    // LSA maximum length.
    //
    // Opt for a conservative value to avoid packet fragmentation even in
    // low-MTU links.
    pub const MAX_LENGTH: usize = 1024;

    pub fn new(
        age: u16,
        options: Options,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Self {
        // The length and checksum are filled in by the encoder.
        let hdr = LsaHdr {
            age,
            options,
            lsa_type: body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        };

        let mut lsa = Lsa {
            raw: Default::default(),
            hdr,
            body,
            base_time: lsa_base_time(),
        };
        lsa.encode();
        lsa
    }

    // Returns the current LSA age.
    pub fn age(&self) -> u16 {
        match self.base_time {
            Some(base_time) => {
                let elapsed = u16::try_from(base_time.elapsed().as_secs())
                    .unwrap_or(u16::MAX);
                std::cmp::min(
                    self.hdr.age.saturating_add(elapsed),
                    LSA_MAX_AGE,
                )
            }
            None => self.hdr.age,
        }
    }

    // Returns the LSA header with its current age.
    pub fn current_hdr(&self) -> LsaHdr {
        LsaHdr {
            age: self.age(),
            ..self.hdr
        }
    }

    // Updates the LSA age. The age field isn't covered by the checksum, so
    // only the first two raw bytes need to be rewritten.
    pub fn set_age(&mut self, age: u16) {
        self.hdr.age = age;

        let mut raw = BytesMut::from(self.raw.as_ref());
        raw[0..2].copy_from_slice(&age.to_be_bytes());
        self.raw = raw.freeze();

        self.base_time = lsa_base_time();
    }

    // Sets the LSA age to MaxAge.
    pub fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    // Decodes LSA from a bytes buffer.
    //
    // LSAs of unknown type are rejected with `DecodeError::UnknownLsaType`,
    // after advancing the buffer past them.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let buf_orig = buf.clone();
        let hdr = LsaHdr::decode(buf)?;
        if hdr.length < LsaHdr::LENGTH {
            return Err(DecodeError::InvalidLsaLength);
        }
        let lsa_body_len = (hdr.length - LsaHdr::LENGTH) as usize;
        if buf.remaining() < lsa_body_len {
            return Err(DecodeError::InvalidLsaLength);
        }
        let mut buf_lsa = buf.copy_to_bytes(lsa_body_len);

        let body = LsaBody::decode(hdr.lsa_type, &mut buf_lsa)?;

        Ok(Lsa {
            raw: buf_orig.slice(0..hdr.length as usize),
            hdr,
            body,
            base_time: lsa_base_time(),
        })
    }

    // Encodes the LSA, refreshing its length, checksum and raw bytes.
    pub fn encode(&mut self) {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            self.body.encode(&mut buf);

            // Rewrite LSA length.
            let lsa_len = buf.len() as u16;
            buf[18..20].copy_from_slice(&lsa_len.to_be_bytes());
            self.hdr.length = lsa_len;

            // Compute LSA checksum over everything but the Age field.
            buf[16..18].copy_from_slice(&[0, 0]);
            let cksum = Self::checksum(&buf[2..(lsa_len as usize)]);
            buf[16..18].copy_from_slice(&cksum);
            self.hdr.cksum = u16::from_be_bytes(cksum);

            self.raw = buf.clone().freeze();
        });
    }

    pub fn validate(&self) -> Result<(), LsaValidationError> {
        if self.hdr.age > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }
        self.body.validate(&self.hdr)
    }

    // Checks the Fletcher checksum of the received bytes.
    pub fn is_checksum_valid(&self) -> bool {
        let length = self.hdr.length as usize;
        if length < LsaHdr::LENGTH as usize || self.raw.len() < length {
            return false;
        }

        fletcher::calc_fletcher16(&self.raw[2..length]) == 0
    }

    // ISO 8473 Fletcher checksum, placed so that the sum over the whole LSA
    // (minus the Age field) is zero.
    fn checksum(data: &[u8]) -> [u8; 2] {
        let checksum = fletcher::calc_fletcher16(data);
        let mut checkbyte0 = (checksum & 0x00FF) as i32;
        let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

        // Adjust checksum value using scaling factor.
        let sop = data.len() as u16 - 15;
        let mut x = (sop as i32 * checkbyte0 - checkbyte1) % 255;
        if x <= 0 {
            x += 255;
        }
        checkbyte1 = 510 - checkbyte0 - x;
        if checkbyte1 > 255 {
            checkbyte1 -= 255;
        }
        checkbyte0 = x;
        [checkbyte0 as u8, checkbyte1 as u8]
    }
}

// ===== impl LsaType =====

impl LsaType {
    pub fn type_code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }

    pub fn scope(&self) -> LsaScope {
        match self.type_code() {
            Some(
                LsaTypeCode::Router
                | LsaTypeCode::Network
                | LsaTypeCode::SummaryNetwork
                | LsaTypeCode::SummaryRouter,
            ) => LsaScope::Area,
            Some(LsaTypeCode::AsExternal) => LsaScope::As,
            None => LsaScope::Unknown,
        }
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }

        let age = buf.get_u16();
        let options = Options::from_bits_truncate(buf.get_u8());
        let lsa_type = LsaType(buf.get_u8());
        let lsa_id = buf.get_ipv4();
        let adv_rtr = buf.get_ipv4();
        let seq_no = buf.get_u32();
        let cksum = buf.get_u16();
        let length = buf.get_u16();

        Ok(LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum,
            length,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub fn key(&self) -> LsaKey {
        LsaKey::new(self.lsa_type, self.adv_rtr, self.lsa_id)
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    fn decode(lsa_type: LsaType, buf: &mut Bytes) -> DecodeResult<Self> {
        let body = match lsa_type.type_code() {
            Some(LsaTypeCode::Router) => {
                LsaBody::Router(LsaRouter::decode(buf)?)
            }
            Some(LsaTypeCode::Network) => {
                LsaBody::Network(LsaNetwork::decode(buf)?)
            }
            Some(LsaTypeCode::SummaryNetwork) => {
                LsaBody::SummaryNetwork(LsaSummary::decode(buf)?)
            }
            Some(LsaTypeCode::SummaryRouter) => {
                LsaBody::SummaryRouter(LsaSummary::decode(buf)?)
            }
            Some(LsaTypeCode::AsExternal) => {
                LsaBody::AsExternal(LsaAsExternal::decode(buf)?)
            }
            None => return Err(DecodeError::UnknownLsaType(lsa_type.0)),
        };

        Ok(body)
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(lsa) => lsa.encode(buf),
            LsaBody::Network(lsa) => lsa.encode(buf),
            LsaBody::SummaryNetwork(lsa) => lsa.encode(buf),
            LsaBody::SummaryRouter(lsa) => lsa.encode(buf),
            LsaBody::AsExternal(lsa) => lsa.encode(buf),
        }
    }

    pub fn lsa_type(&self) -> LsaType {
        match self {
            LsaBody::Router(_) => LsaTypeCode::Router.into(),
            LsaBody::Network(_) => LsaTypeCode::Network.into(),
            LsaBody::SummaryNetwork(_) => LsaTypeCode::SummaryNetwork.into(),
            LsaBody::SummaryRouter(_) => LsaTypeCode::SummaryRouter.into(),
            LsaBody::AsExternal(_) => LsaTypeCode::AsExternal.into(),
        }
    }

    fn validate(&self, hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        match self {
            LsaBody::Router(lsa) => lsa.validate(hdr),
            _ => Ok(()),
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    pub const BASE_LENGTH: u16 = 4;
    pub const LINK_LENGTH: u16 = 12;
    pub const TOS_LENGTH: u16 = 4;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let flags = LsaRouterFlags::from_bits_truncate(buf.get_u8());
        let _ = buf.get_u8();
        let links_cnt = buf.get_u16();

        let mut links = vec![];
        for _ in 0..links_cnt {
            if buf.remaining() < Self::LINK_LENGTH as usize {
                return Err(DecodeError::InvalidLsaLength);
            }
            let link_id = buf.get_ipv4();
            let link_data = buf.get_ipv4();
            let link_type = buf.get_u8();
            let link_type = LsaRouterLinkType::from_u8(link_type)
                .ok_or(DecodeError::UnknownRouterLinkType(link_type))?;
            let num_tos = buf.get_u8();
            let metric = buf.get_u16();

            let tos_len = num_tos as usize * Self::TOS_LENGTH as usize;
            if buf.remaining() < tos_len {
                return Err(DecodeError::InvalidLsaLength);
            }
            let mut link =
                LsaRouterLink::new(link_type, link_id, link_data, metric);
            for _ in 0..num_tos {
                let tos = buf.get_u8();
                let _ = buf.get_u8();
                let metric = buf.get_u16();
                link.tos_metrics.push(LsaTosMetric::new(tos, metric));
            }
            links.push(link);
        }

        Ok(LsaRouter { flags, links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            buf.put_ipv4(&link.link_id);
            buf.put_ipv4(&link.link_data);
            buf.put_u8(link.link_type as u8);
            buf.put_u8(link.tos_metrics.len() as u8);
            buf.put_u16(link.metric);
            for tos in &link.tos_metrics {
                buf.put_u8(tos.tos);
                buf.put_u8(0);
                buf.put_u16(tos.metric);
            }
        }
    }

    fn validate(&self, hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        // The Router-LSA's advertising router and LSA-ID must be equal.
        if hdr.adv_rtr != hdr.lsa_id {
            return Err(LsaValidationError::RouterLsaIdMismatch);
        }

        Ok(())
    }
}

// ===== impl LsaNetwork =====

impl LsaNetwork {
    pub const BASE_LENGTH: u16 = 4;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let mask = buf.get_ipv4();

        let mut attached_rtrs = BTreeSet::new();
        let rtrs_cnt = buf.remaining() / 4;
        for _ in 0..rtrs_cnt {
            attached_rtrs.insert(buf.get_ipv4());
        }

        Ok(LsaNetwork {
            mask,
            attached_rtrs,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        for rtr in &self.attached_rtrs {
            buf.put_ipv4(rtr);
        }
    }
}

// ===== impl LsaSummary =====

impl LsaSummary {
    pub const BASE_LENGTH: u16 = 8;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let mask = buf.get_ipv4();
        let _ = buf.get_u8();
        let metric = buf.get_u24();
        // Ignore deprecated TOS metrics.

        Ok(LsaSummary { mask, metric })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(0);
        buf.put_u24(self.metric);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    pub const BASE_LENGTH: u16 = 16;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::BASE_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        let mask = buf.get_ipv4();
        let flags = LsaAsExternalFlags::from_bits_truncate(buf.get_u8());
        let metric = buf.get_u24();
        let fwd_addr = buf.get_opt_ipv4();
        let tag = buf.get_u32();
        // Ignore deprecated TOS-specific information.

        Ok(LsaAsExternal {
            mask,
            flags,
            metric,
            fwd_addr,
            tag,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(self.flags.bits());
        buf.put_u24(self.metric);
        buf.put_opt_ipv4(&self.fwd_addr);
        buf.put_u32(self.tag);
    }
}

// ===== helper functions =====

fn lsa_base_time() -> Option<Instant> {
    #[cfg(not(feature = "testing"))]
    {
        Some(Instant::now())
    }
    #[cfg(feature = "testing")]
    {
        None
    }
}
