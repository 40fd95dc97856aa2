//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::sync::Arc;

use crate::debug::{Debug, SeqNoMismatchReason};
use crate::error::{Error, InterfaceCfgError};
use crate::lsdb::{self, LsaEntryFlags, lsa_compare};
use crate::neighbor::{LastDbDesc, Neighbor, NeighborEnv, NeighborNotif, nsm};
use crate::output;
use crate::packet::lsa::{Lsa, LsaTypeCode};
use crate::packet::{
    DbDesc, DbDescFlags, LsAck, LsRequest, LsUpdate, Packet, PacketType,
};
use crate::tasks;
use crate::tasks::messages::{HelloRcvdMsg, NeighborPacketMsg};

// ===== Hello packet (neighbor side) =====

// Processes a Hello packet that passed all the interface checks.
pub fn process_hello(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    hello: HelloRcvdMsg,
) {
    // Update neighbor's source address.
    //
    // This can only change on point-to-point interfaces (for the other
    // interface types, an address change results in a different neighbor).
    nbr.src = hello.src;
    nbr.options = nbr.options.or(Some(hello.options));
    if env.config.if_type.is_broadcast_or_nbma() {
        nbr.priority = hello.priority;
        nbr.dr = hello.dr;
        nbr.bdr = hello.bdr;
    }

    // Trigger the HelloReceived event.
    if let Err(error) = nbr.fsm(env, nsm::Event::HelloRcvd) {
        error.log();
    }

    // Trigger the 1-WayReceived or the 2-WayReceived event.
    let event = if hello.two_way {
        nsm::Event::TwoWayRcvd
    } else {
        nsm::Event::OneWayRcvd
    };
    if let Err(error) = nbr.fsm(env, event) {
        error.log();
    }
}

// ===== Non-Hello packets =====

pub fn process_packet(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    msg: NeighborPacketMsg,
) -> Result<(), Error> {
    match msg.packet {
        Packet::Hello(_) => Err(Error::InvariantViolation(
            "Hello packet dispatched to neighbor task",
        )),
        Packet::DbDesc(pkt) => process_packet_dbdesc(nbr, env, msg.src, pkt),
        Packet::LsRequest(pkt) => process_packet_lsreq(nbr, env, pkt),
        Packet::LsUpdate(pkt) => process_packet_lsupd(nbr, env, pkt),
        Packet::LsAck(pkt) => process_packet_lsack(nbr, pkt),
    }
}

fn process_packet_dbdesc(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    src: std::net::Ipv4Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    // MTU mismatch check.
    if dbdesc.mtu > env.system.mtu {
        return Err(Error::InterfaceCfgError(
            env.config.name.clone(),
            src,
            PacketType::DbDesc,
            InterfaceCfgError::MtuMismatch(dbdesc.mtu),
        ));
    }

    // Further processing depends on the neighbor's state.
    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            if nbr.state == nsm::State::Init {
                nbr.fsm(env, nsm::Event::TwoWayRcvd)?;
                if nbr.state != nsm::State::ExStart {
                    return Ok(());
                }
                // Fall through to the ExStart case.
            }

            if dbdesc
                .dd_flags
                .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
                && dbdesc.lsa_hdrs.is_empty()
                && dbdesc.hdr.router_id > env.router_id
            {
                // Set the master/slave bit to slave, and set the neighbor data
                // structure's DD sequence number to that specified by the
                // master.
                nbr.dd_flags.remove(DbDescFlags::MS);
                nbr.dd_seq_no = dbdesc.dd_seq_no;
            } else if !dbdesc
                .dd_flags
                .intersects(DbDescFlags::I | DbDescFlags::MS)
                && dbdesc.dd_seq_no == nbr.dd_seq_no
                && dbdesc.hdr.router_id < env.router_id
            {
                // In this case the router is Master.
            } else {
                // Ignore the packet.
                return Ok(());
            }

            nbr.options = Some(dbdesc.options);
            nbr.fsm(env, nsm::Event::NegotiationDone)?;

            // The master's response to the initial packet is only an
            // acknowledgment. Its headers are processed below.
        }
        nsm::State::Exchange => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(
                dbdesc.options,
                dbdesc.dd_flags,
                dbdesc.dd_seq_no,
            ) {
                // The slave needs to retransmit the last Database Description
                // packet that it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, env);
                }

                return Ok(());
            }

            // Sanity checks.
            let last_rcvd_dbdesc = nbr.last_rcvd_dbdesc;
            let ms_changed = last_rcvd_dbdesc.is_some_and(|last| {
                dbdesc.dd_flags.contains(DbDescFlags::MS)
                    != last.dd_flags.contains(DbDescFlags::MS)
            });
            if dbdesc.dd_flags.contains(DbDescFlags::I) || ms_changed {
                let reason = SeqNoMismatchReason::InconsistentFlags;
                return nbr.fsm(env, nsm::Event::SeqNoMismatch(reason));
            }
            if last_rcvd_dbdesc
                .is_some_and(|last| last.options != dbdesc.options)
            {
                let reason = SeqNoMismatchReason::InconsistentOptions;
                return nbr.fsm(env, nsm::Event::SeqNoMismatch(reason));
            }
            if (nbr.dd_flags.contains(DbDescFlags::MS)
                && dbdesc.dd_seq_no != nbr.dd_seq_no)
                || (!nbr.dd_flags.contains(DbDescFlags::MS)
                    && dbdesc.dd_seq_no != nbr.dd_seq_no.wrapping_add(1))
            {
                let reason = SeqNoMismatchReason::InconsistentSeqNo;
                return nbr.fsm(env, nsm::Event::SeqNoMismatch(reason));
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(
                dbdesc.options,
                dbdesc.dd_flags,
                dbdesc.dd_seq_no,
            ) {
                // The slave must respond to duplicates by repeating the last
                // Database Description packet that it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, env);
                }

                return Ok(());
            }

            let reason = SeqNoMismatchReason::UnexpectedDbDesc;
            return nbr.fsm(env, nsm::Event::SeqNoMismatch(reason));
        }
    }

    // If we got this far it means the packet was accepted. Stop the
    // retransmission interval in case it's active.
    nbr.rxmt_dbdesc_stop();

    // Now iterate over all LSA headers.
    for lsa_hdr in &dbdesc.lsa_hdrs {
        // Check if the LSA is valid for this area.
        if !env.area.lsa_type_is_valid(lsa_hdr.lsa_type) {
            let reason = SeqNoMismatchReason::InvalidLsaType;
            return nbr.fsm(env, nsm::Event::SeqNoMismatch(reason));
        }

        // RFC 5243 says:
        // "If the Database summary list contains an instance of the LSA that is
        // the same as or less recent than the listed LSA, the LSA is removed
        // from the Database summary list".
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) =
            nbr.lists.db_summary.entry(lsa_key)
            && lsa_compare(&o.get().current_hdr(), lsa_hdr)
                != Ordering::Greater
        {
            o.remove();
        }

        // Put the LSA on the Link state request list if it's not present on the
        // LSDB, or if the local copy is less recent than the received one.
        if let Some(lsa) = env.lsdb.get(env.area.area_id, &lsa_key)
            && lsa_compare(&lsa.current_hdr(), lsa_hdr) != Ordering::Less
        {
            continue;
        }
        nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
    }

    // Start sending Link State Request packets.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, env);
    }

    // Further processing depends on whether the router is master or slave.
    let mut exchange_done = false;
    if nbr.dd_flags.contains(DbDescFlags::MS) {
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        } else {
            output::send_dbdesc(nbr, env);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;

        output::send_dbdesc(nbr, env);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        }
    }

    // Save last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc {
        options: dbdesc.options,
        dd_flags: dbdesc.dd_flags,
        dd_seq_no: dbdesc.dd_seq_no,
    });

    if exchange_done {
        nbr.fsm(env, nsm::Event::ExchangeDone)?;

        // The slave must wait RouterDeadInterval seconds before freeing the
        // last Database Description packet. Reception of a Database Description
        // packet from the master after this interval will generate a
        // SeqNumberMismatch neighbor event.
        if !nbr.dd_flags.contains(DbDescFlags::MS) {
            let dbdesc_free_timer = tasks::dbdesc_free_timer(env);
            nbr.tasks.dbdesc_free_timer = Some(dbdesc_free_timer);
        }
    }

    Ok(())
}

fn process_packet_lsreq(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    ls_req: LsRequest,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Iterate over all request entries.
    for lsa_key in &ls_req.entries {
        if let Some(lsa) = env.lsdb.get(env.area.area_id, lsa_key) {
            // Copy LSA for transmission to the neighbor.
            nbr.lists.ls_update.insert(*lsa_key, lsa);
        } else {
            // Something has gone wrong with the Database Exchange process.
            return nbr.fsm(env, nsm::Event::BadLsReq);
        }
    }

    // Send the requested LSAs.
    if !nbr.lists.ls_update.is_empty() {
        output::send_lsupd_nbr(nbr, env);
    }

    Ok(())
}

fn process_packet_lsupd(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    ls_upd: LsUpdate,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Process all LSAs contained in the packet.
    for lsa in ls_upd.lsas {
        let stop = process_packet_lsupd_lsa(nbr, env, lsa)?;
        if stop {
            break;
        }
    }

    Ok(())
}

// Processes a single LSA of a Link State Update packet (RFC 2328 Section 13).
// Returns whether the rest of the packet must be ignored.
fn process_packet_lsupd_lsa(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    lsa: Lsa,
) -> Result<bool, Error> {
    // (1) Validate the LSA (not only the checksum as specified by the RFC).
    if let Err(error) = lsa.validate() {
        Debug::LsaDiscard(nbr.router_id, &lsa.hdr, &error).log();
        return Ok(false);
    }

    // (2-3) AS-external LSAs aren't accepted in stub areas.
    if lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::AsExternal)
        && !env.area.external_routing_capability()
    {
        return Ok(false);
    }

    // (5) Find the instance of this LSA that is currently contained in the
    // router's link state database.
    let lsa_key = lsa.hdr.key();
    let lse = env.lsdb.get_entry(env.area.area_id, &lsa_key);

    // (4) If the LSA's LS age is equal to MaxAge, and there is currently no
    // instance of the LSA in the router's link state database, and the
    // neighbor isn't exchanging its database.
    if lsa.hdr.is_maxage()
        && lse.is_none()
        && !matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    {
        output::send_lsack_direct(nbr, env, &lsa.hdr);
        return Ok(false);
    }

    // (5 cont.) There is no database copy, or the received LSA is more
    // recent than the database copy.
    let lsa_cmp = lse
        .as_ref()
        .map(|lse| lsa_compare(&lse.data.current_hdr(), &lsa.hdr));
    if matches!(lsa_cmp, None | Some(Ordering::Less)) {
        // (5.a) MinLSArrival check.
        if let Some(lse) = &lse
            && lsdb::lsa_min_arrival_check(lse)
        {
            Debug::LsaMinArrivalDiscard(nbr.router_id, &lsa.hdr).log();
            return Ok(false);
        }

        // (5.d) Install the new LSA in the link state database (replacing
        // the current database copy).
        let lsa = Arc::new(lsa);
        env.lsdb
            .set(env.area.area_id, lsa.clone(), LsaEntryFlags::RECEIVED)?;

        // The new LSA might satisfy one of this neighbor's requests.
        if nbr.state != nsm::State::Full {
            nbr.ls_request_check(env, &lsa.hdr);
        }

        // (5.b) Flood the new LSA out some subset of the router's interfaces.
        // Old copies are removed from the retransmission lists as part of the
        // flooding procedure. Delayed acks are scheduled by the receiving
        // interface once the flooding outcome is known.
        nbr.notify(NeighborNotif::Flood(lsa.clone()));

        // (5.f) Check if this is a self-originated LSA.
        if lsa.hdr.adv_rtr == env.router_id {
            Debug::LsaSelfOriginated(nbr.router_id, &lsa.hdr).log();
            nbr.notify(NeighborNotif::SelfOriginatedLsaRcvd(lsa));
        }

        return Ok(false);
    }

    // (6) If there is an instance of the LSA on the sending neighbor's Link
    // state request list, an error has occurred in the Database Exchange
    // process.
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        // Restart the Database Exchange process.
        nbr.fsm(env, nsm::Event::BadLsReq)?;

        // Stop processing the Link State Update packet.
        return Ok(true);
    }

    let Some(lse) = lse else {
        return Err(Error::InvariantViolation("missing LSDB copy"));
    };

    // (7) Check if the received LSA is the same instance as the database
    // copy (i.e., neither one is more recent).
    if lsa_cmp == Some(Ordering::Equal) {
        // Check if this LSA can be handled as an implied acknowledgment.
        if nbr.lists.ls_rxmt.remove(&lsa_key).is_some() {
            nbr.rxmt_lsupd_stop_check();
        } else {
            output::send_lsack_direct(nbr, env, &lsa.hdr);
        }

        return Ok(false);
    }

    // (8) The database copy is more recent.
    //
    // If the database copy has LS age equal to MaxAge and LS sequence
    // number equal to MaxSequenceNumber, simply discard the received LSA
    // without acknowledging it.
    if lse.data.age() == lsdb::LSA_MAX_AGE
        && lse.data.hdr.seq_no == lsdb::LSA_MAX_SEQ_NO
    {
        return Ok(false);
    }
    if !lsdb::lsa_min_arrival_check(&lse) {
        // Send the database copy back to the sending neighbor, encapsulated
        // within a Link State Update Packet.
        nbr.lists.ls_update.insert(lsa_key, lse.data);
        output::send_lsupd_nbr(nbr, env);
    } else {
        Debug::LsaMinArrivalDiscard(nbr.router_id, &lsa.hdr).log();
    }

    Ok(false)
}

fn process_packet_lsack(
    nbr: &mut Neighbor,
    ls_ack: LsAck,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Iterate over all LSA headers.
    for lsa_hdr in &ls_ack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        {
            if lsa_compare(&o.get().current_hdr(), lsa_hdr) == Ordering::Equal
            {
                o.remove();
                nbr.rxmt_lsupd_stop_check();
            } else {
                Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
            }
        }
    }

    Ok(())
}
