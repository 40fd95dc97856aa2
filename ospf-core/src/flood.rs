//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ospf_utils::Sender;
use ospf_utils::task::Task;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::area::Area;
use crate::debug::Debug;
use crate::interface::InterfaceType;
use crate::lsdb::lsa_compare;
use crate::neighbor::{Neighbor, NeighborEnv, NeighborKey, nsm};
use crate::packet::lsa::{Lsa, LsaScope};
use crate::tasks::messages::{
    FloodOutMsg, FloodSource, InterfaceFloodMsg, NeighborEventMsg,
    NeighborFloodMsg,
};

// Interface as seen by the flooding procedure.
#[derive(Clone, Debug)]
pub struct FloodInterface {
    pub name: String,
    pub area: Area,
    pub if_type: InterfaceType,
    pub flood_tx: Sender<InterfaceFloodMsg>,
}

// What an interface does with an LSA once all of its neighbors were examined.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FloodOutAction {
    // The LSA isn't sent out the interface.
    Skip,
    // The LSA is queued for transmission. `flooded_back` tells whether the
    // LSA goes back out the interface it was received on.
    Send { flooded_back: bool },
}

// ===== global functions =====

// Checks whether an LSA of the given scope, installed in the given area,
// must be flooded out an interface.
pub fn interface_is_eligible(
    lsa_scope: LsaScope,
    lsa_area_id: Ipv4Addr,
    iface_area: &Area,
    if_type: InterfaceType,
) -> bool {
    match lsa_scope {
        // AS-external LSAs are flooded throughout all non-stub areas, but
        // never over virtual links.
        LsaScope::As => {
            iface_area.external_routing_capability()
                && if_type != InterfaceType::VirtualLink
        }
        // Area-scoped LSAs are flooded throughout their area. Virtual links
        // belong to the backbone.
        LsaScope::Area => {
            iface_area.area_id == lsa_area_id
                && (if_type != InterfaceType::VirtualLink
                    || iface_area.is_backbone())
        }
        LsaScope::Unknown => false,
    }
}

// Returns the interfaces an LSA must be flooded out of.
pub fn eligible_interfaces<'a>(
    ifaces: &'a [FloodInterface],
    lsa_area_id: Ipv4Addr,
    lsa: &Lsa,
) -> impl Iterator<Item = &'a FloodInterface> + 'a {
    let lsa_scope = lsa.hdr.lsa_type.scope();
    ifaces.iter().filter(move |iface| {
        interface_is_eligible(
            lsa_scope,
            lsa_area_id,
            &iface.area,
            iface.if_type,
        )
    })
}

// Examines a neighbor for flooding (RFC 2328 Section 13.3, step 1). Returns
// whether the LSA was added to the neighbor's retransmission list.
pub fn flood_neighbor(
    nbr: &mut Neighbor,
    env: &NeighborEnv,
    lsa: &Arc<Lsa>,
    is_src: bool,
) -> bool {
    let lsa_key = lsa.hdr.key();

    // 1.a) Skip neighbors in a lesser state than Exchange.
    if nbr.state < nsm::State::Exchange {
        return false;
    }

    // Remove older instances of the LSA from the retransmission list.
    if let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        && lsa_compare(&o.get().current_hdr(), &lsa.hdr) == Ordering::Less
    {
        o.remove();
        nbr.rxmt_lsupd_stop_check();
    }

    // 1.b) Handle adjacencies that are not full.
    if nbr.state != nsm::State::Full {
        match nbr.ls_request_check(env, &lsa.hdr) {
            // The requested instance is more recent.
            Some(Ordering::Less) => return false,
            // Examine the next neighbor if the two copies are the same
            // instance.
            Some(Ordering::Equal) => return false,
            _ => (),
        }
    }

    // 1.c) If the new LSA was received from this neighbor, examine the
    // next neighbor.
    if is_src {
        return false;
    }

    // 1.d) Add LSA to the neighbor's rxmt list (or update the old version).
    nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
    nbr.rxmt_lsupd_start_check(env);
    true
}

// Decides whether an LSA must be sent out an interface
// (RFC 2328 Section 13.3, steps 2 to 5).
pub fn flood_out_action(
    msg: &FloodOutMsg,
    dr: Option<Ipv4Addr>,
    bdr: Option<Ipv4Addr>,
) -> FloodOutAction {
    // 2) If the LSA was NOT added to any of the Link state retransmission
    // lists, there is no need to flood the LSA out the interface.
    if !msg.rxmt_added {
        return FloodOutAction::Skip;
    }

    if let Some(src) = &msg.src {
        // 3) If the new LSA was received on this interface, and it was
        // received from either the DR or the BDR, chances are that all the
        // neighbors have received the LSA already.
        if let NeighborKey::Addr(addr) = src
            && (dr == Some(*addr) || bdr == Some(*addr))
        {
            return FloodOutAction::Skip;
        }

        return FloodOutAction::Send { flooded_back: true };
    }

    FloodOutAction::Send {
        flooded_back: false,
    }
}

// Floods an LSA in a task of its own. The task is never awaited.
pub(crate) fn flood_task(
    ifaces: Vec<FloodInterface>,
    area_id: Ipv4Addr,
    lsa: Arc<Lsa>,
    src: Option<FloodSource>,
) {
    let mut task = Task::spawn(
        async move {
            flood(&ifaces, area_id, lsa, src).await;
        }
        .in_current_span(),
    );
    task.detach();
}

// Floods an LSA out all eligible interfaces (RFC 2328 Section 13.3). Each
// interface is asked for its neighbors, and each neighbor examines the LSA in
// its own task.
pub async fn flood(
    ifaces: &[FloodInterface],
    area_id: Ipv4Addr,
    lsa: Arc<Lsa>,
    src: Option<FloodSource>,
) {
    for iface in eligible_interfaces(ifaces, area_id, &lsa) {
        Debug::LsaFlood(&iface.name, &lsa.hdr).log();

        // Get the interface's neighbors.
        let (nbrs_tx, nbrs_rx) = oneshot::channel();
        if iface
            .flood_tx
            .send(InterfaceFloodMsg::Neighbors(nbrs_tx))
            .await
            .is_err()
        {
            continue;
        }
        let Ok(nbrs) = nbrs_rx.await else {
            continue;
        };

        // Examine each neighbor. Neighbors that didn't start the database
        // exchange yet will describe the LSA in their database summary.
        let src_nbr = src
            .as_ref()
            .filter(|src| src.ifname == iface.name)
            .map(|src| src.nbr_key);
        let mut rxmt_added = false;
        for nbr in nbrs
            .into_iter()
            .filter(|nbr| nbr.state >= nsm::State::ExStart)
        {
            let (reply_tx, reply_rx) = oneshot::channel();
            let msg = NeighborEventMsg::Flood(NeighborFloodMsg {
                lsa: lsa.clone(),
                is_src: src_nbr == Some(nbr.nbr_key),
                reply: reply_tx,
            });
            if nbr.event_tx.send(msg).await.is_err() {
                continue;
            }
            rxmt_added |= reply_rx.await.unwrap_or(false);
        }

        // Let the interface send the LSA and schedule acknowledgments.
        if rxmt_added || src_nbr.is_some() {
            let msg = InterfaceFloodMsg::FloodOut(FloodOutMsg {
                lsa: lsa.clone(),
                rxmt_added,
                src: src_nbr,
            });
            let _ = iface.flood_tx.send(msg).await;
        }
    }
}
