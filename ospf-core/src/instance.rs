//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use ospf_utils::task::{IntervalTask, Task};
use ospf_utils::{Receiver, Sender};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug_span};

use crate::area::{Area, AreaInterface};
use crate::config::{InstanceCfg, InterfaceCfg, InterfaceSys};
use crate::debug::Debug;
use crate::error::{ConfigError, Error};
use crate::flood::{self, FloodInterface};
use crate::interface::{CHANNEL_SIZE, Interface, InterfaceHandle, InterfaceRx};
use crate::lsdb::{LSA_INIT_SEQ_NO, LSA_MAX_SEQ_NO, LsaEntryFlags, Lsdb};
use crate::neighbor::{NeighborKey, nsm};
use crate::packet::lsa::{Lsa, LsaBody, LsaKey, LsaType, LsaTypeCode};
use crate::tasks;
use crate::tasks::messages::{
    FloodRequestMsg, InstanceMsg, InstanceQuery, NbrStateMsg,
    SelfOriginatedLsaMsg,
};

// OSPF instance, validated and ready to be started.
#[derive(Debug)]
pub struct Instance {
    pub router_id: Ipv4Addr,
    pub areas: BTreeMap<Ipv4Addr, Area>,
    pub interfaces: Vec<Interface>,
    pub lsdb: Arc<Lsdb>,
    interfaces_rx: Vec<InterfaceRx>,
    tx: Sender<InstanceMsg>,
    rx: Receiver<InstanceMsg>,
}

// Handle of a running instance.
#[derive(Debug)]
pub struct InstanceHandle {
    pub router_id: Ipv4Addr,
    lsdb: Arc<Lsdb>,
    tx: Sender<InstanceMsg>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<Task<()>>,
}

// State of the instance task.
#[derive(Debug)]
struct InstanceState {
    router_id: Ipv4Addr,
    areas: BTreeMap<Ipv4Addr, Area>,
    interfaces: Vec<InstanceInterface>,
    // Last known state of every neighbor, indexed by interface name and
    // neighbor key.
    neighbors: BTreeMap<(String, NeighborKey), InstanceNeighbor>,
    lsdb: Arc<Lsdb>,
    flood_ifaces: Vec<FloodInterface>,
    _lsa_refresh: IntervalTask,
}

#[derive(Debug)]
struct InstanceInterface {
    name: String,
    area_id: Ipv4Addr,
    config: InterfaceCfg,
    system: InterfaceSys,
    handle: InterfaceHandle,
}

#[derive(Clone, Copy, Debug)]
struct InstanceNeighbor {
    router_id: Ipv4Addr,
    state: nsm::State,
}

// ===== impl Instance =====

impl Instance {
    // Builds an instance out of its configuration and the operational data
    // of the system interfaces.
    pub fn new(
        cfg: &InstanceCfg,
        sys_ifaces: &BTreeMap<String, InterfaceSys>,
    ) -> Result<Instance, ConfigError> {
        if cfg.router_id.is_unspecified() {
            return Err(ConfigError::InvalidRouterId(cfg.router_id));
        }

        // Explicitly configured areas.
        let mut areas = BTreeMap::new();
        for area_cfg in &cfg.areas {
            let area = Area::new(area_cfg.area_id, area_cfg.stub)?;
            areas.insert(area.area_id, area);
        }

        // Validate interfaces, creating their areas as needed.
        let mut names = BTreeSet::new();
        let mut ifaces = vec![];
        for iface_cfg in &cfg.interfaces {
            if !names.insert(iface_cfg.name.clone()) {
                return Err(ConfigError::DuplicateInterface(
                    iface_cfg.name.clone(),
                ));
            }
            let system = sys_ifaces.get(&iface_cfg.name).ok_or_else(|| {
                ConfigError::UnknownInterface(iface_cfg.name.clone())
            })?;
            if system.addr.ip().is_unspecified() {
                return Err(ConfigError::InterfaceNoAddress(
                    iface_cfg.name.clone(),
                ));
            }
            if !areas.contains_key(&iface_cfg.area_id) {
                let area_cfg = cfg.area(iface_cfg.area_id);
                let area = Area::new(area_cfg.area_id, area_cfg.stub)?;
                areas.insert(area.area_id, area);
            }
            ifaces.push((iface_cfg.clone(), system.clone()));
        }

        Debug::InstanceCreate.log();

        let lsdb = Arc::new(Lsdb::new(areas.keys().copied()));
        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        let (interfaces, interfaces_rx) = ifaces
            .into_iter()
            .map(|(config, system)| {
                let area = areas[&config.area_id].clone();
                Interface::new(
                    cfg.router_id,
                    area,
                    config,
                    system,
                    lsdb.clone(),
                    tx.clone(),
                )
            })
            .unzip();

        Ok(Instance {
            router_id: cfg.router_id,
            areas,
            interfaces,
            lsdb,
            interfaces_rx,
            tx,
            rx,
        })
    }

    // Starts all interfaces and spawns the instance task.
    pub fn start(self) -> Result<InstanceHandle, Error> {
        let span = debug_span!("ospf-instance");
        let _span_guard = span.enter();

        Debug::InstanceStart.log();

        let mut interfaces = vec![];
        for (iface, rx) in self.interfaces.into_iter().zip(self.interfaces_rx)
        {
            let name = iface.name.clone();
            let area_id = iface.area.area_id;
            let config = iface.config.clone();
            let system = iface.system.clone();
            let handle = iface.start(rx)?;
            interfaces.push(InstanceInterface {
                name,
                area_id,
                config,
                system,
                handle,
            });
        }

        let flood_ifaces = interfaces
            .iter()
            .map(|iface| iface.handle.flood.clone())
            .collect();
        let state = InstanceState {
            router_id: self.router_id,
            areas: self.areas,
            interfaces,
            neighbors: Default::default(),
            lsdb: self.lsdb.clone(),
            flood_ifaces,
            _lsa_refresh: tasks::lsa_refresh_interval(&self.tx),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = Task::spawn(
            run(state, self.rx, shutdown_rx).instrument(span.clone()),
        );

        Ok(InstanceHandle {
            router_id: self.router_id,
            lsdb: self.lsdb,
            tx: self.tx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

// ===== impl InstanceHandle =====

impl InstanceHandle {
    // Returns the number of neighbors in each state.
    pub async fn neighbor_counts(&self) -> BTreeMap<nsm::State, usize> {
        let (responder, rx) = oneshot::channel();
        let msg = InstanceMsg::Query(InstanceQuery::NeighborCounts(responder));
        if self.tx.send(msg).await.is_err() {
            return Default::default();
        }
        rx.await.unwrap_or_default()
    }

    // Returns the number of neighbors forming an adjacency but not fully
    // adjacent yet (ExStart, Exchange and Loading).
    pub async fn partial_adjacency_count(&self) -> usize {
        let (responder, rx) = oneshot::channel();
        let msg =
            InstanceMsg::Query(InstanceQuery::PartialAdjacencyCount(responder));
        if self.tx.send(msg).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or_default()
    }

    pub fn lsdb(&self) -> &Arc<Lsdb> {
        &self.lsdb
    }

    // Stops the instance along with all of its interfaces and neighbors.
    pub async fn stop(mut self) {
        self.shutdown_tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn process_msg(&mut self, msg: InstanceMsg) {
        match msg {
            InstanceMsg::NbrState(msg) => self.process_nbr_state(msg),
            InstanceMsg::Flood(msg) => self.process_flood(msg),
            InstanceMsg::SelfOriginatedLsaRcvd(msg) => {
                self.process_self_originated_lsa(msg)
            }
            InstanceMsg::LsaRefresh => {
                Debug::LsaRefresh.log();
                let area_ids = self.areas.keys().copied().collect::<Vec<_>>();
                for area_id in area_ids {
                    self.router_lsa_originate(area_id);
                }
            }
            InstanceMsg::Query(query) => self.process_query(query),
        }
    }

    fn process_nbr_state(&mut self, msg: NbrStateMsg) {
        let key = (msg.ifname, msg.nbr_key);
        if msg.new_state == nsm::State::Down {
            self.neighbors.remove(&key);
        } else {
            self.neighbors.insert(
                key,
                InstanceNeighbor {
                    router_id: msg.router_id,
                    state: msg.new_state,
                },
            );
        }

        // Re-originate the Router-LSA when an adjacency comes up or goes
        // down.
        if (msg.old_state == nsm::State::Full)
            != (msg.new_state == nsm::State::Full)
        {
            self.router_lsa_originate(msg.area_id);
        }
    }

    fn process_flood(&self, msg: FloodRequestMsg) {
        flood::flood_task(
            self.flood_ifaces.clone(),
            msg.area_id,
            msg.lsa,
            msg.src,
        );
    }

    // Handles the receipt of a newer instance of a self-originated LSA
    // (RFC 2328 Section 13.4).
    fn process_self_originated_lsa(&mut self, msg: SelfOriginatedLsaMsg) {
        let hdr = &msg.lsa.hdr;
        if hdr.lsa_type == LsaType::from(LsaTypeCode::Router)
            && hdr.lsa_id == self.router_id
        {
            // Originate a new instance with a higher sequence number.
            self.router_lsa_originate(msg.area_id);
        } else {
            // The LSA isn't originated anymore, so flush it.
            let mut lsa = (*msg.lsa).clone();
            lsa.set_maxage();
            self.lsa_install_flood(msg.area_id, lsa);
        }
    }

    fn process_query(&self, query: InstanceQuery) {
        match query {
            InstanceQuery::NeighborCounts(responder) => {
                let mut counts = BTreeMap::new();
                for nbr in self.neighbors.values() {
                    *counts.entry(nbr.state).or_default() += 1;
                }
                let _ = responder.send(counts);
            }
            InstanceQuery::PartialAdjacencyCount(responder) => {
                let count = self
                    .neighbors
                    .values()
                    .filter(|nbr| {
                        matches!(
                            nbr.state,
                            nsm::State::ExStart
                                | nsm::State::Exchange
                                | nsm::State::Loading
                        )
                    })
                    .count();
                let _ = responder.send(count);
            }
        }
    }

    // Originates the Router-LSA of the given area (RFC 2328 Section 12.4.1).
    fn router_lsa_originate(&self, area_id: Ipv4Addr) {
        let Some(area) = self.areas.get(&area_id) else {
            Error::UnknownArea(area_id).log();
            return;
        };

        let area_ifaces = self
            .interfaces
            .iter()
            .filter(|iface| iface.area_id == area_id)
            .map(|iface| {
                let full_nbrs = self
                    .neighbors
                    .iter()
                    .filter(|((ifname, _), nbr)| {
                        *ifname == iface.name && nbr.state == nsm::State::Full
                    })
                    .map(|(_, nbr)| nbr.router_id)
                    .collect();
                AreaInterface::new(&iface.config, &iface.system, full_nbrs)
            })
            .collect::<Vec<_>>();
        let body = LsaBody::Router(area.router_lsa_body(&area_ifaces));

        // Pick the next sequence number.
        let lsa_key = LsaKey::new(
            LsaTypeCode::Router.into(),
            self.router_id,
            self.router_id,
        );
        let seq_no = match self.lsdb.get(area_id, &lsa_key) {
            Some(old) if old.hdr.seq_no == LSA_MAX_SEQ_NO => {
                Error::InvariantViolation("LSA sequence number wrapping")
                    .log();
                return;
            }
            Some(old) => old.hdr.seq_no.wrapping_add(1),
            None => LSA_INIT_SEQ_NO,
        };

        let lsa = Lsa::new(
            0,
            area.options(),
            self.router_id,
            self.router_id,
            seq_no,
            body,
        );
        Debug::LsaOriginate(&lsa.hdr).log();
        self.lsa_install_flood(area_id, lsa);
    }

    fn lsa_install_flood(&self, area_id: Ipv4Addr, lsa: Lsa) {
        let lsa = Arc::new(lsa);
        if let Err(error) =
            self.lsdb
                .set(area_id, lsa.clone(), LsaEntryFlags::SELF_ORIGINATED)
        {
            error.log();
            return;
        }
        flood::flood_task(self.flood_ifaces.clone(), area_id, lsa, None);
    }
}

// ===== instance task =====

async fn run(
    mut state: InstanceState,
    mut rx: Receiver<InstanceMsg>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // Originate the initial Router-LSAs.
    let area_ids = state.areas.keys().copied().collect::<Vec<_>>();
    for area_id in area_ids {
        state.router_lsa_originate(area_id);
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            Some(msg) = rx.recv() => state.process_msg(msg),
            else => break,
        }
    }

    Debug::InstanceStop.log();
    for iface in state.interfaces {
        iface.handle.stop().await;
    }
}
