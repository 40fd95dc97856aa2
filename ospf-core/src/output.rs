//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use itertools::Itertools;
use smallvec::smallvec;

use crate::interface::{Interface, InterfaceType};
use crate::lsdb;
use crate::neighbor::{Neighbor, NeighborEnv, nsm};
use crate::network::{MulticastAddr, SendDestination};
use crate::packet::lsa::{Lsa, LsaHdr};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Packet, PacketHdr,
    PacketType,
};
use crate::tasks::messages::NetTxPacketMsg;

// IPv4 header length, without options.
const IPV4_HDR_LENGTH: u16 = 20;

// ===== Hello Packets =====

pub(crate) fn send_hello(iface: &Interface) {
    // Initialize source and destination address.
    let src = iface.system.addr.ip();
    let dst = SendDestination::new(
        iface.system.ifindex,
        smallvec![MulticastAddr::AllSpfRtrs.addr()],
    );

    // List the neighbors we've recently seen Hellos from.
    let neighbors = iface
        .state
        .neighbors
        .values()
        .filter(|nbr| nbr.state >= nsm::State::Init)
        .map(|nbr| nbr.router_id)
        .collect();

    // The network mask is only meaningful on multi-access networks.
    let network_mask = match iface.config.if_type {
        InterfaceType::PointToPoint | InterfaceType::VirtualLink => {
            Ipv4Addr::UNSPECIFIED
        }
        _ => iface.system.addr.mask(),
    };

    // Generate Hello packet.
    let hdr =
        PacketHdr::new(PacketType::Hello, iface.router_id, iface.area.area_id);
    let packet = Packet::Hello(Hello {
        hdr,
        network_mask,
        hello_interval: iface.config.hello_interval,
        options: iface.area.options(),
        priority: iface.config.priority,
        dead_interval: iface.config.dead_interval,
        dr: iface.state.dr,
        bdr: iface.state.bdr,
        neighbors,
    });

    // Enqueue packet for network transmission.
    iface.send_packet(NetTxPacketMsg { packet, src, dst });
}

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc(nbr: &mut Neighbor, env: &NeighborEnv) {
    // Initialize source and destination address.
    let src = env.system.addr.ip();
    let dst = send_dest_nbr(nbr, env);

    // Calculate maximum packet size.
    let max_size = max_packet_size(env.system.mtu)
        .saturating_sub(PacketHdr::LENGTH + DbDesc::BASE_LENGTH);

    // Append as many LSA headers as possible while on the Exchange state.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    while total + LsaHdr::LENGTH <= max_size {
        match nbr.lists.db_summary.pop_first() {
            Some((_, lsa)) => {
                total += LsaHdr::LENGTH;

                // Update LSA age.
                let mut lsa_hdr = lsa.hdr;
                lsa_hdr.age = lsa.age();
                lsa_hdrs.push(lsa_hdr);
            }
            None => break,
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I) && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let hdr =
        PacketHdr::new(PacketType::DbDesc, env.router_id, env.area.area_id);
    let packet = Packet::DbDesc(DbDesc {
        hdr,
        mtu: env.system.mtu,
        options: env.area.options(),
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Enqueue packet for network transmission.
    let msg = NetTxPacketMsg { packet, src, dst };
    nbr.last_sent_dbdesc = Some(msg.clone());
    env.send_packet(msg);

    // Start retransmission interval in two cases:
    // * The router is master
    // * When sending the initial database description packet
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(env);
    }
}

pub(crate) fn rxmt_dbdesc(nbr: &Neighbor, env: &NeighborEnv) {
    if let Some(msg) = &nbr.last_sent_dbdesc {
        env.send_packet(msg.clone());
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq(nbr: &mut Neighbor, env: &NeighborEnv) {
    // Calculate maximum packet size.
    let max_size =
        max_packet_size(env.system.mtu).saturating_sub(PacketHdr::LENGTH);

    // Append as many LS Request Entries as possible in a single packet.
    let mut total = 0;
    while total + LsRequest::ENTRY_LENGTH <= max_size {
        match nbr.lists.ls_request.pop_first() {
            Some((lsa_key, lsa_hdr)) => {
                nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
                total += LsRequest::ENTRY_LENGTH;
            }
            None => break,
        }
    }

    rxmt_lsreq(nbr, env);

    // Start retransmission interval.
    nbr.rxmt_lsreq_start(env);
}

pub(crate) fn rxmt_lsreq(nbr: &Neighbor, env: &NeighborEnv) {
    // Initialize source and destination address.
    let src = env.system.addr.ip();
    let dst = send_dest_nbr(nbr, env);

    // Generate Link State Request packet.
    let hdr =
        PacketHdr::new(PacketType::LsRequest, env.router_id, env.area.area_id);
    let entries = nbr.lists.ls_request_pending.keys().copied().collect();
    let packet = Packet::LsRequest(LsRequest { hdr, entries });

    // Enqueue packet for network transmission.
    env.send_packet(NetTxPacketMsg { packet, src, dst });
}

// ===== LS Update Packets =====

// Sends the LSAs enqueued for transmission to the given neighbor.
pub(crate) fn send_lsupd_nbr(nbr: &mut Neighbor, env: &NeighborEnv) {
    let src = env.system.addr.ip();
    let dst = send_dest_nbr(nbr, env);

    let lsas = std::mem::take(&mut nbr.lists.ls_update).into_values();
    for packet in ls_update_packets(
        env.router_id,
        env.area.area_id,
        env.system.mtu,
        env.config.transmit_delay,
        lsas,
    ) {
        env.send_packet(NetTxPacketMsg {
            packet,
            src,
            dst: dst.clone(),
        });
    }
}

// Sends the LSAs enqueued for flooding out the given interface.
pub(crate) fn send_lsupd(iface: &mut Interface) {
    let src = iface.system.addr.ip();
    let dst = send_dest_iface(iface);

    let lsas = std::mem::take(&mut iface.state.ls_update_list).into_values();
    for packet in ls_update_packets(
        iface.router_id,
        iface.area.area_id,
        iface.system.mtu,
        iface.config.transmit_delay,
        lsas,
    ) {
        iface.send_packet(NetTxPacketMsg {
            packet,
            src,
            dst: dst.clone(),
        });
    }
}

pub(crate) fn rxmt_lsupd(nbr: &Neighbor, env: &NeighborEnv) {
    // Initialize source and destination address.
    let src = env.system.addr.ip();
    let dst = send_dest_nbr(nbr, env);

    // Calculate maximum packet size.
    let max_size = usize::from(
        max_packet_size(env.system.mtu)
            .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH),
    );

    // Append as many LSAs as possible in a single packet.
    let mut total = 0;
    let mut lsas = vec![];
    for lsa in nbr.lists.ls_rxmt.values() {
        // If a single LSA is bigger than the maximum packet size, there's
        // nothing we can do other than relying on IP-level fragmentation.
        let length = usize::from(lsa.hdr.length);
        if !lsas.is_empty() && total + length > max_size {
            break;
        }
        total += length;
        lsas.push(lsa_for_transmission(lsa, env.config.transmit_delay));
    }
    if lsas.is_empty() {
        return;
    }

    // Generate Link State Update packet.
    let hdr =
        PacketHdr::new(PacketType::LsUpdate, env.router_id, env.area.area_id);
    let packet = Packet::LsUpdate(LsUpdate { hdr, lsas });

    // Enqueue packet for network transmission.
    env.send_packet(NetTxPacketMsg { packet, src, dst });
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    env: &NeighborEnv,
    lsa_hdr: &LsaHdr,
) {
    // Initialize source and destination address.
    let src = env.system.addr.ip();
    let dst = send_dest_nbr(nbr, env);

    // Generate Link State Ack packet.
    let hdr =
        PacketHdr::new(PacketType::LsAck, env.router_id, env.area.area_id);
    let packet = Packet::LsAck(LsAck {
        hdr,
        lsa_hdrs: vec![*lsa_hdr],
    });

    // Enqueue packet for network transmission.
    env.send_packet(NetTxPacketMsg { packet, src, dst });
}

pub(crate) fn send_lsack_delayed(iface: &mut Interface) {
    // Initialize source and destination address(es).
    let src = iface.system.addr.ip();
    let dst = send_dest_iface(iface);

    // Calculate maximum packet size.
    let max_size =
        max_packet_size(iface.system.mtu).saturating_sub(PacketHdr::LENGTH);
    let max_hdrs = usize::from(max_size / LsaHdr::LENGTH).max(1);

    // Send as many LS Acks as necessary.
    let ls_ack_list = std::mem::take(&mut iface.state.ls_ack_list);
    for chunk in &ls_ack_list.into_values().chunks(max_hdrs) {
        let hdr = PacketHdr::new(
            PacketType::LsAck,
            iface.router_id,
            iface.area.area_id,
        );
        let packet = Packet::LsAck(LsAck {
            hdr,
            lsa_hdrs: chunk.collect(),
        });

        iface.send_packet(NetTxPacketMsg {
            packet,
            src,
            dst: dst.clone(),
        });
    }
}

// ===== helper functions =====

// Maximum size of an OSPF packet sent on an interface of the given MTU.
fn max_packet_size(mtu: u16) -> u16 {
    mtu.saturating_sub(IPV4_HDR_LENGTH)
}

// Splits the given LSAs into as many LS Update packets as necessary.
fn ls_update_packets(
    router_id: Ipv4Addr,
    area_id: Ipv4Addr,
    mtu: u16,
    transmit_delay: u16,
    lsas: impl Iterator<Item = Arc<Lsa>>,
) -> Vec<Packet> {
    let max_size = usize::from(
        max_packet_size(mtu)
            .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH),
    );

    let mut packets = vec![];
    let mut total = 0;
    let mut batch = vec![];
    for lsa in lsas {
        // If a single LSA is bigger than the maximum packet size, there's
        // nothing we can do other than relying on IP-level fragmentation.
        let length = usize::from(lsa.hdr.length);
        if !batch.is_empty() && total + length > max_size {
            let hdr = PacketHdr::new(PacketType::LsUpdate, router_id, area_id);
            let lsas = std::mem::take(&mut batch);
            packets.push(Packet::LsUpdate(LsUpdate { hdr, lsas }));
            total = 0;
        }
        total += length;
        batch.push(lsa_for_transmission(&lsa, transmit_delay));
    }
    if !batch.is_empty() {
        let hdr = PacketHdr::new(PacketType::LsUpdate, router_id, area_id);
        packets.push(Packet::LsUpdate(LsUpdate { hdr, lsas: batch }));
    }

    packets
}

// Returns a copy of the LSA with its age updated for transmission.
fn lsa_for_transmission(lsa: &Arc<Lsa>, transmit_delay: u16) -> Lsa {
    let mut lsa = (**lsa).clone();
    let age = std::cmp::min(
        lsa.age().saturating_add(transmit_delay),
        lsdb::LSA_MAX_AGE,
    );
    lsa.set_age(age);
    lsa
}

// Returns destination used to send a packet directly to the given neighbor.
fn send_dest_nbr(nbr: &Neighbor, env: &NeighborEnv) -> SendDestination {
    let addr = if env.config.if_type == InterfaceType::PointToPoint {
        MulticastAddr::AllSpfRtrs.addr()
    } else {
        nbr.src
    };
    SendDestination::new(env.system.ifindex, smallvec![addr])
}

// Returns a destination used to send a packet to all adjacent neighbors
// associated with the given interface.
fn send_dest_iface(iface: &Interface) -> SendDestination {
    let addrs = match iface.config.if_type {
        InterfaceType::PointToPoint
        | InterfaceType::Broadcast
        | InterfaceType::VirtualLink => {
            smallvec![MulticastAddr::AllSpfRtrs.addr()]
        }
        InterfaceType::NonBroadcast | InterfaceType::PointToMultipoint => {
            // On non-broadcast networks, separate LS Update and delayed LS Ack
            // packets must be sent, as unicasts, to each adjacent neighbor.
            iface
                .state
                .neighbors
                .values()
                .filter(|nbr| nbr.state >= nsm::State::Exchange)
                .map(|nbr| nbr.src)
                .collect()
        }
    };
    SendDestination::new(iface.system.ifindex, addrs)
}
