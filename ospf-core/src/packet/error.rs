//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// OSPF decode errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    InvalidIpHdrLength(u16),
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidLength(u16),
    InvalidChecksum,
    InvalidRouterId(Ipv4Addr),
    UnsupportedAuthType(u16),
    InvalidLsaLength,
    UnknownLsaType(u8),
    UnknownLsRequestType(u32),
    UnknownRouterLinkType(u8),
}

// OSPF LSA validation errors.
//
// Unlike decode errors, these only cause the offending LSA to be discarded
// and not the whole LS Update packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaValidationError {
    InvalidChecksum,
    InvalidLsaAge,
    InvalidLsaSeqNo,
    RouterLsaIdMismatch,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidIpHdrLength(length) => {
                write!(f, "invalid IP header length: {length}")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid packet version: {version}")
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type: {pkt_type}")
            }
            DecodeError::InvalidLength(pkt_len) => {
                write!(f, "invalid packet length: {pkt_len}")
            }
            DecodeError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            DecodeError::InvalidRouterId(router_id) => {
                write!(f, "invalid router-id: {router_id}")
            }
            DecodeError::UnsupportedAuthType(au_type) => {
                write!(f, "unsupported authentication type: {au_type}")
            }
            DecodeError::InvalidLsaLength => {
                write!(f, "invalid LSA length")
            }
            DecodeError::UnknownLsaType(lsa_type) => {
                write!(f, "unknown LSA type: {lsa_type}")
            }
            DecodeError::UnknownLsRequestType(lsa_type) => {
                write!(f, "unknown LS request type: {lsa_type:#x}")
            }
            DecodeError::UnknownRouterLinkType(link_type) => {
                write!(f, "unknown link type: {link_type}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== impl LsaValidationError =====

impl std::fmt::Display for LsaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaValidationError::InvalidChecksum => {
                write!(f, "invalid LSA checksum")
            }
            LsaValidationError::InvalidLsaAge => {
                write!(f, "invalid LSA age")
            }
            LsaValidationError::InvalidLsaSeqNo => {
                write!(f, "invalid LSA sequence number")
            }
            LsaValidationError::RouterLsaIdMismatch => {
                write!(
                    f,
                    "Router-LSA's advertising router and LSA-ID are not equal"
                )
            }
        }
    }
}

impl std::error::Error for LsaValidationError {}
