//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{error, warn, warn_span};

use crate::neighbor::nsm;
use crate::network::MulticastAddr;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;

// OSPF errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    UnknownArea(Ipv4Addr),
    QueueFull(&'static str),
    // Packet input
    InvalidSrcAddr(Ipv4Addr),
    InvalidDstAddr(Ipv4Addr),
    IfindexMismatch(u32, u32),
    PacketDecodeError(DecodeError),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    InterfaceCfgError(String, Ipv4Addr, PacketType, InterfaceCfgError),
    DbDescReject(Ipv4Addr, nsm::State),
    // Other
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    InterfaceStartError(String, IoError),
    InvariantViolation(&'static str),
}

// OSPF I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(MulticastAddr, std::io::Error),
    MulticastLeaveError(MulticastAddr, std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    RecvMissingAncillaryData,
    SendError(std::io::Error),
}

// OSPF interface configuration errors, detected while processing Hello and
// Database Description packets.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    ExternalRoutingCapabilityMismatch(bool),
    MtuMismatch(u16),
    DuplicateRouterId(Ipv4Addr),
}

// OSPF configuration errors, returned when building an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    InvalidRouterId(Ipv4Addr),
    StubBackbone,
    UnknownInterface(String),
    InterfaceNoAddress(String),
    DuplicateInterface(String),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::UnknownArea(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::QueueFull(queue) => {
                warn!(%queue, "{}", self);
            }
            Error::InvalidSrcAddr(addr) | Error::InvalidDstAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::IfindexMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            Error::PacketDecodeError(error) => {
                warn!(%error, "{}", self);
            }
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self);
            }
            Error::InterfaceCfgError(iface, source, pkt_type, error) => {
                warn_span!("interface", name = %iface, %source, ?pkt_type)
                    .in_scope(|| {
                        error.log();
                    })
            }
            Error::DbDescReject(router_id, state) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn!(?state, "{}", self);
                })
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn_span!("fsm").in_scope(|| {
                        warn!(?state, ?event, "{}", self);
                    })
                })
            }
            Error::InterfaceStartError(name, error) => {
                error!(%name, error = %with_source(error), "{}", self);
            }
            Error::InvariantViolation(what) => {
                error!(%what, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::UnknownArea(..) => {
                write!(f, "area not found")
            }
            Error::QueueFull(..) => {
                write!(f, "message queue full, dropping message")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::InvalidDstAddr(..) => {
                write!(f, "invalid destination address")
            }
            Error::IfindexMismatch(..) => {
                write!(f, "packet received on a different interface")
            }
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::InterfaceCfgError(_, _, _, error) => error.fmt(f),
            Error::DbDescReject(..) => {
                write!(f, "database description packet rejected")
            }
            Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
            Error::InvariantViolation(..) => {
                write!(f, "internal invariant violated")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PacketDecodeError(error) => Some(error),
            Error::InterfaceCfgError(_, _, _, error) => Some(error),
            Error::InterfaceStartError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::PacketDecodeError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::SocketError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::MulticastJoinError(addr, error)
            | IoError::MulticastLeaveError(addr, error) => {
                warn!(?addr, error = %with_source(error), "{}", self);
            }
            IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::RecvMissingSourceAddr
            | IoError::RecvMissingAncillaryData => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create raw IP socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::MulticastLeaveError(..) => {
                write!(f, "failed to leave multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive IP packet")
            }
            IoError::RecvMissingSourceAddr => {
                write!(
                    f,
                    "failed to retrieve source address from received packet"
                )
            }
            IoError::RecvMissingAncillaryData => {
                write!(
                    f,
                    "failed to retrieve ancillary data from received packet"
                )
            }
            IoError::SendError(..) => {
                write!(f, "failed to send IP packet")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(_, error)
            | IoError::MulticastLeaveError(_, error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl InterfaceCfgError =====

impl InterfaceCfgError {
    pub fn log(&self) {
        match self {
            InterfaceCfgError::AreaIdMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloMaskMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::DeadIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(e_bit) => {
                warn!(%e_bit, "{}", self);
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                warn!(%mtu, "{}", self);
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                warn!(%router_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(..) => {
                write!(f, "area ID mismatch")
            }
            InterfaceCfgError::HelloMaskMismatch(..) => {
                write!(f, "network mask mismatch")
            }
            InterfaceCfgError::HelloIntervalMismatch(..) => {
                write!(f, "hello interval mismatch")
            }
            InterfaceCfgError::DeadIntervalMismatch(..) => {
                write!(f, "dead interval mismatch")
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(..) => {
                write!(f, "external routing capability mismatch")
            }
            InterfaceCfgError::MtuMismatch(..) => {
                write!(f, "MTU mismatch")
            }
            InterfaceCfgError::DuplicateRouterId(..) => {
                write!(f, "duplicate Router ID")
            }
        }
    }
}

impl std::error::Error for InterfaceCfgError {}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidRouterId(router_id) => {
                write!(f, "invalid router-id: {router_id}")
            }
            ConfigError::StubBackbone => {
                write!(f, "the backbone area (0.0.0.0) can't be a stub area")
            }
            ConfigError::UnknownInterface(name) => {
                write!(f, "interface not found in the system: {name}")
            }
            ConfigError::InterfaceNoAddress(name) => {
                write!(f, "interface has no IPv4 address: {name}")
            }
            ConfigError::DuplicateInterface(name) => {
                write!(f, "interface configured more than once: {name}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
