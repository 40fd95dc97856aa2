//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::LsaHdr;

// OSPF debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceCreate,
    InstanceStart,
    InstanceStop,
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(&'a str, &'a Ipv4Addr, &'a Ipv4Addr, &'a Packet),
    PacketTx(u32, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    // Flooding
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr, &'a LsaValidationError),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    LsaFlood(&'a str, &'a LsaHdr),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaRefresh,
}

// Reason why a SeqNoMismatch event was generated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate
            | Debug::InstanceStart
            | Debug::InstanceStop
            | Debug::LsaRefresh => {
                // Parent span(s): ospf-instance
                debug!("{}", self);
            }
            Debug::InterfaceCreate(name)
            | Debug::InterfaceStart(name)
            | Debug::InterfaceStop(name) => {
                // Parent span(s): ospf-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                // Parent span(s): ospf-instance:interface
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NsmEvent(router_id, state, event) => {
                // Parent span(s): ospf-instance:interface
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    })
                })
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                // Parent span(s): ospf-instance:interface
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                })
            }
            Debug::PacketRx(ifname, src, dst, packet) => {
                // Parent span(s): ospf-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data =
                            serde_json::to_string(&packet).unwrap_or_default();
                        debug!(
                            interface = %ifname, %src, %dst, %data, "{}", self
                        );
                    })
                })
            }
            Debug::PacketTx(ifindex, addr, packet) => {
                // Parent span(s): ospf-instance:network:output
                let data = serde_json::to_string(&packet).unwrap_or_default();
                debug!(%ifindex, %addr, %data, "{}", self);
            }
            Debug::PacketRxIgnore(router_id, state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, "{}", self);
                })
            }
            Debug::QuestionableAck(router_id, lsa_hdr)
            | Debug::LsaMinArrivalDiscard(router_id, lsa_hdr)
            | Debug::LsaSelfOriginated(router_id, lsa_hdr) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaDiscard(router_id, lsa_hdr, error) => {
                debug_span!("neighbor", %router_id, %error).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaFlood(name, lsa_hdr) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaInstall(lsa_hdr) | Debug::LsaOriginate(lsa_hdr) => {
                // Parent span(s): ospf-instance
                debug!(?lsa_hdr, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => {
                write!(f, "packet")
            }
            Debug::PacketRxIgnore(..) => {
                write!(
                    f,
                    "ignoring packet received from a non-adjacent neighbor"
                )
            }
            Debug::QuestionableAck(..) => {
                write!(f, "received questionable ack")
            }
            Debug::LsaDiscard(..) => {
                write!(f, "discarding LSA")
            }
            Debug::LsaMinArrivalDiscard(..) => {
                write!(f, "discarding LSA due to the MinLSArrival check")
            }
            Debug::LsaSelfOriginated(..) => {
                write!(f, "received self-originated LSA")
            }
            Debug::LsaFlood(..) => {
                write!(f, "flooding LSA")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaRefresh => {
                write!(f, "refreshing self-originated LSAs")
            }
        }
    }
}

// ===== impl SeqNoMismatchReason =====

impl std::fmt::Display for SeqNoMismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeqNoMismatchReason::InconsistentFlags => {
                write!(f, "inconsistent flags")
            }
            SeqNoMismatchReason::InconsistentOptions => {
                write!(f, "inconsistent options")
            }
            SeqNoMismatchReason::InconsistentSeqNo => {
                write!(f, "inconsistent sequence number")
            }
            SeqNoMismatchReason::UnexpectedDbDesc => {
                write!(f, "unexpected database description packet")
            }
            SeqNoMismatchReason::InvalidLsaType => {
                write!(f, "invalid LSA type")
            }
        }
    }
}
