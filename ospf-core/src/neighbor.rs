//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use nsm::{Event, State};
use ospf_utils::task::{IntervalTask, TimeoutTask};
use ospf_utils::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::area::Area;
use crate::config::{InterfaceCfg, InterfaceSys};
use crate::debug::Debug;
use crate::error::Error;
use crate::interface::InterfaceType;
use crate::lsdb::{Lsdb, lsa_compare};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDescFlags, Options};
use crate::tasks::messages::{
    FloodRequestMsg, FloodSource, InstanceMsg, NbrStateMsg, NeighborEventMsg,
    NeighborPacketMsg, NetTxPacketMsg, RxmtPacketType, SelfOriginatedLsaMsg,
};
use crate::{events, flood, output, tasks};

#[derive(Debug)]
pub struct Neighbor {
    pub key: NeighborKey,
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub priority: u8,
    pub state: State,

    pub options: Option<Options>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub first_adj_attempt: bool,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<NetTxPacketMsg>,

    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
    notifications: Vec<NeighborNotif>,
}

// Neighbor identifier within an interface.
//
// Neighbors on point-to-point links and virtual links are identified by
// their Router ID. On all other network types they're identified by the IP
// source address of their packets.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum NeighborKey {
    RouterId(Ipv4Addr),
    Addr(Ipv4Addr),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LastDbDesc {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSA headers enqueued for transmission in Database Description packets.
    pub db_summary: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs that need to be received from this neighbor.
    pub ls_request: BTreeMap<LsaKey, LsaHdr>,
    // LSAs that were requested but not received yet.
    pub ls_request_pending: BTreeMap<LsaKey, LsaHdr>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub dbdesc_free_timer: Option<TimeoutTask>,
    rxmt_dbdesc: Option<IntervalTask>,
    rxmt_lsreq: Option<IntervalTask>,
    rxmt_lsupd: Option<IntervalTask>,
}

// Side effects of the neighbor's processing that must reach other tasks.
#[derive(Clone, Debug)]
pub enum NeighborNotif {
    StateChange {
        old_state: State,
        new_state: State,
        event: Event,
    },
    Flood(Arc<Lsa>),
    SelfOriginatedLsaRcvd(Arc<Lsa>),
}

// Interface data shared by all neighbors of an interface.
#[derive(Clone, Debug)]
pub struct NeighborEnv {
    pub router_id: Ipv4Addr,
    pub area: Area,
    pub config: InterfaceCfg,
    pub system: InterfaceSys,
    pub lsdb: Arc<Lsdb>,
    pub net_tx: Sender<NetTxPacketMsg>,
    // Neighbor's own event queue, used by its timers.
    pub event_tx: Sender<NeighborEventMsg>,
}

// Channels connecting a neighbor task to the rest of the system.
#[derive(Debug)]
pub struct NeighborChannels {
    pub event_rx: Receiver<NeighborEventMsg>,
    pub packet_rx: Receiver<NeighborPacketMsg>,
    pub shutdown_rx: oneshot::Receiver<()>,
    pub iface_tx: Sender<NbrStateMsg>,
    pub instance_tx: Sender<InstanceMsg>,
}

// Neighbor state machine.
pub mod nsm {
    use serde::{Deserialize, Serialize};

    use crate::debug::SeqNoMismatchReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub fn new(
        key: NeighborKey,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        Neighbor {
            key,
            router_id,
            src,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no: 0,
            first_adj_attempt: true,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            lists: Default::default(),
            tasks: Default::default(),
            notifications: Default::default(),
        }
    }

    pub fn fsm(
        &mut self,
        env: &NeighborEnv,
        event: Event,
    ) -> Result<(), Error> {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let new_state = match (self.state, &event) {
            // NSM (state, event) -> (Action, new state)
            (_, Event::Kill | Event::LinkDown | Event::InactivityTimer) => {
                self.reset_adjacency();
                self.tasks.inactivity_timer = None;
                Some(State::Down)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::ExStart | State::Exchange | State::Loading | State::Full,
                Event::SeqNoMismatch(_) | Event::BadLsReq,
            ) => {
                self.reset_adjacency();
                self.adjacency_start(env);
                Some(State::ExStart)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::OneWayRcvd,
            ) => {
                self.reset_adjacency();
                Some(State::Attempt)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::ExStart | State::Exchange | State::Loading | State::Full,
                Event::AdjOk,
            ) => {
                if env.config.if_type.need_adjacency() {
                    None
                } else {
                    self.reset_adjacency();
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::Down, Event::Start)
                if env.config.if_type == InterfaceType::NonBroadcast =>
            {
                self.inactivity_timer_reset(env);
                Some(State::Attempt)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Down | State::Attempt, Event::HelloRcvd) => {
                self.inactivity_timer_reset(env);
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Init
                | State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::HelloRcvd,
            ) => {
                self.inactivity_timer_reset(env);
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::OneWayRcvd) => {
                // No action required.
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::TwoWayRcvd)
            | (State::TwoWay, Event::AdjOk) => {
                if env.config.if_type.need_adjacency() {
                    self.adjacency_start(env);
                    Some(State::ExStart)
                } else {
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::TwoWayRcvd,
            ) => {
                // No action required.
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::ExStart, Event::NegotiationDone) => {
                // List the contents of the entire LSDB in the summary list.
                for lsa in env.lsdb.summary_lsas(
                    env.area.area_id,
                    env.area.external_routing_capability(),
                ) {
                    let lsa_key = lsa.hdr.key();
                    if lsa.current_hdr().is_maxage() {
                        self.lists.ls_rxmt.insert(lsa_key, lsa);
                    } else {
                        self.lists.db_summary.insert(lsa_key, lsa);
                    }
                }
                self.rxmt_lsupd_start_check(env);

                // The next Database Description packet is sent once the
                // packet that concluded the negotiation is processed.
                self.dd_flags.remove(DbDescFlags::I);
                Some(State::Exchange)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Exchange, Event::ExchangeDone) => {
                if self.lists.ls_request_pending.is_empty()
                    && self.lists.ls_request.is_empty()
                {
                    Some(State::Full)
                } else {
                    // Wait for outstanding LS Requests to be responded.
                    if self.lists.ls_request_pending.is_empty() {
                        output::send_lsreq(self, env);
                    }
                    Some(State::Loading)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::Loading, Event::LoadingDone) => {
                // No action required.
                Some(State::Full)
            }
            // Catch-all wildcard.
            _ => {
                return Err(Error::NsmUnexpectedEvent(
                    self.router_id,
                    self.state,
                    event,
                ));
            }
        };

        // Check for FSM state change. A neighbor going down always reports
        // it, as that's the signal for its removal.
        if let Some(new_state) = new_state
            && (new_state != self.state || new_state == State::Down)
        {
            self.fsm_state_change(event, new_state);
        }

        Ok(())
    }

    fn fsm_state_change(&mut self, event: Event, new_state: State) {
        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();

        self.notifications.push(NeighborNotif::StateChange {
            old_state: self.state,
            new_state,
            event,
        });
        self.state = new_state;
    }

    // Takes the pending notifications, leaving the queue empty.
    pub fn take_notifications(&mut self) -> Vec<NeighborNotif> {
        std::mem::take(&mut self.notifications)
    }

    pub(crate) fn notify(&mut self, notif: NeighborNotif) {
        self.notifications.push(notif);
    }

    // Starts (or restarts) the database exchange as master.
    fn adjacency_start(&mut self, env: &NeighborEnv) {
        if self.first_adj_attempt {
            self.dd_seq_no = initial_dd_seq_no(self.router_id);
            self.first_adj_attempt = false;
        }
        self.dd_seq_no = self.dd_seq_no.wrapping_add(1);
        self.dd_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
        output::send_dbdesc(self, env);
    }

    pub(crate) fn loading_done_check(&mut self, env: &NeighborEnv) {
        // Check if all pending LSA requests were received.
        if !self.lists.ls_request_pending.is_empty() {
            return;
        }

        // Stop the LS Request rxmt task.
        self.rxmt_lsreq_stop();

        // Check if there are new LSAs to request.
        if !self.lists.ls_request.is_empty() {
            output::send_lsreq(self, env);
        } else if self.state == State::Loading {
            // Database loading has completed.
            if let Err(error) = self.fsm(env, Event::LoadingDone) {
                error.log();
            }
        }
    }

    // Examines the link state request lists for an instance of the given LSA.
    // Requests for the same or an older instance are removed. Returns how the
    // LSA compares to the requested instance, if one was found.
    pub(crate) fn ls_request_check(
        &mut self,
        env: &NeighborEnv,
        lsa_hdr: &LsaHdr,
    ) -> Option<Ordering> {
        let lsa_key = lsa_hdr.key();
        let req_hdr = self
            .lists
            .ls_request
            .get(&lsa_key)
            .or_else(|| self.lists.ls_request_pending.get(&lsa_key))?;

        let cmp = lsa_compare(lsa_hdr, req_hdr);
        if cmp != Ordering::Less {
            self.lists.ls_request.remove(&lsa_key);
            self.lists.ls_request_pending.remove(&lsa_key);

            // Check if the neighbor can transition to Full.
            self.loading_done_check(env);
        }

        Some(cmp)
    }

    fn reset_adjacency(&mut self) {
        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
        self.tasks.dbdesc_free_timer = None;
        self.tasks.rxmt_dbdesc = None;
        self.tasks.rxmt_lsreq = None;
        self.tasks.rxmt_lsupd = None;
    }

    pub(crate) fn dbdesc_is_dup(
        &self,
        options: Options,
        dd_flags: DbDescFlags,
        dd_seq_no: u32,
    ) -> bool {
        self.last_rcvd_dbdesc.is_some_and(|last| {
            last.options == options
                && last.dd_flags == dd_flags
                && last.dd_seq_no == dd_seq_no
        })
    }

    fn inactivity_timer_reset(&mut self, env: &NeighborEnv) {
        if let Some(inactivity_timer) = self.tasks.inactivity_timer.as_mut() {
            inactivity_timer.reset(None);
        } else {
            let task = tasks::nsm_inactivity_timer(env);
            self.tasks.inactivity_timer = Some(task);
        }
    }

    pub(crate) fn rxmt_dbdesc_start(&mut self, env: &NeighborEnv) {
        let task = tasks::packet_rxmt_interval(env, RxmtPacketType::DbDesc);
        self.tasks.rxmt_dbdesc = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_stop(&mut self) {
        self.tasks.rxmt_dbdesc = None;
    }

    pub(crate) fn rxmt_lsreq_start(&mut self, env: &NeighborEnv) {
        let task = tasks::packet_rxmt_interval(env, RxmtPacketType::LsRequest);
        self.tasks.rxmt_lsreq = Some(task);
    }

    fn rxmt_lsreq_stop(&mut self) {
        self.tasks.rxmt_lsreq = None;
    }

    pub(crate) fn rxmt_lsupd_start_check(&mut self, env: &NeighborEnv) {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            let task =
                tasks::packet_rxmt_interval(env, RxmtPacketType::LsUpdate);
            self.tasks.rxmt_lsupd = Some(task);
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(&mut self) {
        if self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_some() {
            self.tasks.rxmt_lsupd = None;
        }
    }

    pub fn process_event(&mut self, env: &NeighborEnv, msg: NeighborEventMsg) {
        match msg {
            NeighborEventMsg::Hello(hello) => {
                events::process_hello(self, env, hello);
            }
            NeighborEventMsg::Nsm(event) => {
                if let Err(error) = self.fsm(env, event) {
                    error.log();
                }
            }
            NeighborEventMsg::RxmtInterval(packet_type) => match packet_type {
                RxmtPacketType::DbDesc => output::rxmt_dbdesc(self, env),
                RxmtPacketType::LsRequest => output::rxmt_lsreq(self, env),
                RxmtPacketType::LsUpdate => output::rxmt_lsupd(self, env),
            },
            NeighborEventMsg::DbDescFree => {
                // Free last sent/received Database Description packets.
                self.tasks.dbdesc_free_timer = None;
                self.last_rcvd_dbdesc = None;
                self.last_sent_dbdesc = None;
            }
            NeighborEventMsg::Flood(msg) => {
                let rxmt_added =
                    flood::flood_neighbor(self, env, &msg.lsa, msg.is_src);
                let _ = msg.reply.send(rxmt_added);
            }
        }
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== impl NeighborKey =====

impl NeighborKey {
    pub fn new(
        if_type: InterfaceType,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> NeighborKey {
        match if_type {
            InterfaceType::PointToPoint | InterfaceType::VirtualLink => {
                NeighborKey::RouterId(router_id)
            }
            InterfaceType::Broadcast
            | InterfaceType::NonBroadcast
            | InterfaceType::PointToMultipoint => NeighborKey::Addr(src),
        }
    }
}

impl std::fmt::Display for NeighborKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NeighborKey::RouterId(router_id) => {
                write!(f, "router-id {router_id}")
            }
            NeighborKey::Addr(addr) => write!(f, "address {addr}"),
        }
    }
}

// ===== impl NeighborEnv =====

impl NeighborEnv {
    // Enqueues a packet for transmission without blocking.
    pub(crate) fn send_packet(&self, msg: NetTxPacketMsg) {
        if self.net_tx.try_send(msg).is_err() {
            Error::QueueFull("network tx").log();
        }
    }
}

// ===== neighbor task =====

pub(crate) async fn run(
    mut nbr: Neighbor,
    env: NeighborEnv,
    mut channels: NeighborChannels,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut channels.shutdown_rx => return,
            Some(msg) = channels.event_rx.recv() => {
                nbr.process_event(&env, msg);
            }
            Some(msg) = channels.packet_rx.recv() => {
                if let Err(error) =
                    events::process_packet(&mut nbr, &env, msg)
                {
                    error.log();
                }
            }
            else => return,
        }

        // Deliver notifications to the interface and instance tasks.
        for notif in nbr.take_notifications() {
            let removed = matches!(
                notif,
                NeighborNotif::StateChange {
                    new_state: State::Down,
                    ..
                }
            );
            if !deliver_notification(&nbr, &env, &mut channels, notif).await
            {
                return;
            }
            if removed {
                return;
            }
        }
    }
}

// Delivers a single notification. Returns false if the neighbor was shut
// down in the meantime.
async fn deliver_notification(
    nbr: &Neighbor,
    env: &NeighborEnv,
    channels: &mut NeighborChannels,
    notif: NeighborNotif,
) -> bool {
    match notif {
        NeighborNotif::StateChange {
            old_state,
            new_state,
            ..
        } => {
            let msg = NbrStateMsg {
                ifname: env.config.name.clone(),
                area_id: env.area.area_id,
                nbr_key: nbr.key,
                router_id: nbr.router_id,
                src: nbr.src,
                old_state,
                new_state,
            };
            let shutdown_rx = &mut channels.shutdown_rx;
            send_or_shutdown(
                &channels.instance_tx,
                InstanceMsg::NbrState(msg.clone()),
                shutdown_rx,
            )
            .await
                && send_or_shutdown(&channels.iface_tx, msg, shutdown_rx).await
        }
        NeighborNotif::Flood(lsa) => {
            let msg = InstanceMsg::Flood(FloodRequestMsg {
                area_id: env.area.area_id,
                lsa,
                src: Some(FloodSource {
                    ifname: env.config.name.clone(),
                    nbr_key: nbr.key,
                }),
            });
            send_or_shutdown(
                &channels.instance_tx,
                msg,
                &mut channels.shutdown_rx,
            )
            .await
        }
        NeighborNotif::SelfOriginatedLsaRcvd(lsa) => {
            let msg = InstanceMsg::SelfOriginatedLsaRcvd(SelfOriginatedLsaMsg {
                area_id: env.area.area_id,
                lsa,
            });
            send_or_shutdown(
                &channels.instance_tx,
                msg,
                &mut channels.shutdown_rx,
            )
            .await
        }
    }
}

async fn send_or_shutdown<T>(
    tx: &Sender<T>,
    msg: T,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx => false,
        result = tx.send(msg) => result.is_ok(),
    }
}

// ===== helper functions =====

// Initial DD sequence number, used on the first adjacency attempt.
fn initial_dd_seq_no(router_id: Ipv4Addr) -> u32 {
    #[cfg(not(feature = "deterministic"))]
    {
        let _ = router_id;
        chrono::Utc::now().timestamp() as u32
    }
    #[cfg(feature = "deterministic")]
    {
        // Fixed value for deterministic test results.
        router_id.into()
    }
}
