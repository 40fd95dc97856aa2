//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ospf_utils::task::{IntervalTask, Task, TimeoutTask};
use ospf_utils::{Receiver, Sender};
use serde::{Deserialize, Serialize};
#[cfg(not(feature = "testing"))]
use tokio::io::unix::AsyncFd;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug_span};

use crate::area::Area;
use crate::config::{InterfaceCfg, InterfaceSys};
use crate::debug::Debug;
use crate::error::{Error, InterfaceCfgError, IoError};
use crate::flood::{self, FloodInterface, FloodOutAction};
use crate::lsdb::Lsdb;
use crate::neighbor::{
    Neighbor, NeighborChannels, NeighborEnv, NeighborKey, nsm,
};
use crate::network::{self, MulticastAddr, MulticastGuard};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{Hello, Options, Packet, PacketType};
use crate::tasks::messages::{
    FloodNeighbor, HelloRcvdMsg, InstanceMsg, InterfaceFloodMsg,
    InterfaceTimerMsg, NbrStateMsg, NeighborEventMsg, NeighborPacketMsg,
    NetRxPacketMsg, NetTxPacketMsg,
};
use crate::{output, tasks};

// Capacity of the bounded channels connecting the protocol tasks.
pub const CHANNEL_SIZE: usize = 64;

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub router_id: Ipv4Addr,
    pub area: Area,
    pub config: InterfaceCfg,
    pub system: InterfaceSys,
    pub lsdb: Arc<Lsdb>,
    pub state: InterfaceState,
    pub tx: InterfaceTx,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    PointToPoint,
    PointToMultipoint,
    Broadcast,
    NonBroadcast,
    VirtualLink,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    // DR and BDR advertised in received Hellos.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    // Neighbors of this interface.
    pub neighbors: BTreeMap<NeighborKey, NeighborHandle>,
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update_list: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSA headers enqueued for delayed acknowledgment.
    pub ls_ack_list: BTreeMap<LsaKey, LsaHdr>,
    // Interface tasks.
    pub tasks: InterfaceTasks,
    // Raw socket tasks and multicast group membership.
    net: Option<InterfaceNet>,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Option<IntervalTask>,
    pub ls_update_timer: Option<TimeoutTask>,
    pub delayed_ack_timer: Option<TimeoutTask>,
}

#[derive(Debug)]
struct InterfaceNet {
    _net_rx_task: Task<()>,
    _net_tx_task: Task<()>,
    _mcast_membership: MulticastGuard,
}

// Interface's view of a neighbor task.
#[derive(Debug)]
pub struct NeighborHandle {
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    // Last state reported by the neighbor task.
    pub state: nsm::State,
    pub event_tx: Sender<NeighborEventMsg>,
    pub packet_tx: Sender<NeighborPacketMsg>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<Task<()>>,
}

// Senders owned by the interface.
#[derive(Clone, Debug)]
pub struct InterfaceTx {
    pub net: Sender<NetTxPacketMsg>,
    pub timer: Sender<InterfaceTimerMsg>,
    pub nbr_state: Sender<NbrStateMsg>,
    pub flood: Sender<InterfaceFloodMsg>,
    pub instance: Sender<InstanceMsg>,
}

// Receivers consumed by the interface task.
#[derive(Debug)]
pub struct InterfaceRx {
    // Packets to be sent to the network.
    pub net_out: Receiver<NetTxPacketMsg>,
    pub timer: Receiver<InterfaceTimerMsg>,
    pub nbr_state: Receiver<NbrStateMsg>,
    pub flood: Receiver<InterfaceFloodMsg>,
}

// Handle of a running interface task.
#[derive(Debug)]
pub struct InterfaceHandle {
    pub name: String,
    pub flood: FloodInterface,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<Task<()>>,
}

// ===== impl Interface =====

impl Interface {
    pub fn new(
        router_id: Ipv4Addr,
        area: Area,
        config: InterfaceCfg,
        system: InterfaceSys,
        lsdb: Arc<Lsdb>,
        instance_tx: Sender<InstanceMsg>,
    ) -> (Interface, InterfaceRx) {
        Debug::InterfaceCreate(&config.name).log();

        let (net_tx, net_out_rx) = mpsc::channel(CHANNEL_SIZE);
        let (timer_tx, timer_rx) = mpsc::channel(CHANNEL_SIZE);
        let (nbr_state_tx, nbr_state_rx) = mpsc::channel(CHANNEL_SIZE);
        let (flood_tx, flood_rx) = mpsc::channel(CHANNEL_SIZE);

        let iface = Interface {
            name: config.name.clone(),
            router_id,
            area,
            config,
            system,
            lsdb,
            state: Default::default(),
            tx: InterfaceTx {
                net: net_tx,
                timer: timer_tx,
                nbr_state: nbr_state_tx,
                flood: flood_tx,
                instance: instance_tx,
            },
        };
        let rx = InterfaceRx {
            net_out: net_out_rx,
            timer: timer_rx,
            nbr_state: nbr_state_rx,
            flood: flood_rx,
        };

        (iface, rx)
    }

    // Interface as seen by the flooding procedure.
    pub fn flood_interface(&self) -> FloodInterface {
        FloodInterface {
            name: self.name.clone(),
            area: self.area.clone(),
            if_type: self.config.if_type,
            flood_tx: self.tx.flood.clone(),
        }
    }

    // Opens the interface's raw socket and spawns the interface task.
    pub fn start(mut self, rx: InterfaceRx) -> Result<InterfaceHandle, Error> {
        Debug::InterfaceStart(&self.name).log();

        let InterfaceRx {
            net_out,
            timer,
            nbr_state,
            flood,
        } = rx;

        // Start network Tx/Rx tasks.
        let (net_rx_tx, net_rx_rx) = mpsc::channel(CHANNEL_SIZE);
        let net =
            self.net_start(&net_rx_tx, net_out).map_err(|error| {
                Error::InterfaceStartError(self.name.clone(), error)
            })?;
        self.state.net = Some(net);

        // Start sending Hellos.
        let task =
            tasks::hello_interval(&self.tx.timer, self.config.hello_interval);
        self.state.tasks.hello_interval = Some(task);

        let name = self.name.clone();
        let flood_iface = self.flood_interface();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let loop_rx = LoopRx {
            net_rx: net_rx_rx,
            timer,
            nbr_state,
            flood,
            shutdown: shutdown_rx,
        };
        let span = debug_span!("interface", %name);
        let task = Task::spawn(run(self, loop_rx).instrument(span));

        Ok(InterfaceHandle {
            name,
            flood: flood_iface,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    #[cfg(not(feature = "testing"))]
    fn net_start(
        &self,
        net_rx_tx: &Sender<NetRxPacketMsg>,
        net_out: Receiver<NetTxPacketMsg>,
    ) -> Result<InterfaceNet, IoError> {
        let socket = network::socket(&self.name)
            .and_then(AsyncFd::new)
            .map(Arc::new)
            .map_err(IoError::SocketError)?;
        let mcast_membership = MulticastGuard::join(
            &socket,
            MulticastAddr::AllSpfRtrs,
            self.system.ifindex,
        )?;

        Ok(InterfaceNet {
            _net_rx_task: tasks::net_rx(socket.clone(), net_rx_tx),
            _net_tx_task: tasks::net_tx(socket, net_out),
            _mcast_membership: mcast_membership,
        })
    }

    #[cfg(feature = "testing")]
    fn net_start(
        &self,
        net_rx_tx: &Sender<NetRxPacketMsg>,
        net_out: Receiver<NetTxPacketMsg>,
    ) -> Result<InterfaceNet, IoError> {
        let mcast_membership = MulticastGuard::join(
            MulticastAddr::AllSpfRtrs,
            self.system.ifindex,
        )?;

        Ok(InterfaceNet {
            _net_rx_task: tasks::net_rx(net_rx_tx),
            _net_tx_task: tasks::net_tx(net_out),
            _mcast_membership: mcast_membership,
        })
    }

    // Enqueues a packet for transmission without blocking.
    pub(crate) fn send_packet(&self, msg: NetTxPacketMsg) {
        if self.tx.net.try_send(msg).is_err() {
            Error::QueueFull("network tx").log();
        }
    }

    // ===== packet input =====

    // Validates a packet received from the network and dispatches it.
    pub fn process_packet(&mut self, msg: NetRxPacketMsg) -> Result<(), Error> {
        // Ignore packets received on the wrong interface.
        if msg.ifindex != self.system.ifindex {
            return Err(Error::IfindexMismatch(
                msg.ifindex,
                self.system.ifindex,
            ));
        }

        let packet = msg.packet.map_err(Error::PacketDecodeError)?;

        // Check destination address. AllDRouters is never accepted as no
        // DR election takes place.
        if msg.dst != self.system.addr.ip() && msg.dst != network::ALL_SPF_RTRS
        {
            return Err(Error::InvalidDstAddr(msg.dst));
        }

        // Check that the source belongs to the interface's subnet.
        if self.config.if_type != InterfaceType::PointToPoint
            && !self.system.addr.contains(msg.src)
        {
            return Err(Error::InvalidSrcAddr(msg.src));
        }

        // Check area ID.
        let hdr = packet.hdr();
        if hdr.area_id != self.area.area_id {
            return Err(Error::InterfaceCfgError(
                self.name.clone(),
                msg.src,
                hdr.pkt_type,
                InterfaceCfgError::AreaIdMismatch(
                    hdr.area_id,
                    self.area.area_id,
                ),
            ));
        }

        // Ignore our own packets.
        if msg.src == self.system.addr.ip() {
            return Ok(());
        }

        Debug::PacketRx(&self.name, &msg.src, &msg.dst, &packet).log();

        match packet {
            Packet::Hello(hello) => self.process_hello(msg.src, hello),
            packet => {
                let hdr = packet.hdr();
                let nbr_key = NeighborKey::new(
                    self.config.if_type,
                    hdr.router_id,
                    msg.src,
                );
                let Some(nbr) = self.state.neighbors.get(&nbr_key) else {
                    return Err(Error::UnknownNeighbor(msg.src, hdr.router_id));
                };
                let msg = NeighborPacketMsg {
                    src: msg.src,
                    packet,
                };
                if nbr.packet_tx.try_send(msg).is_err() {
                    Error::QueueFull("neighbor packets").log();
                }
                Ok(())
            }
        }
    }

    fn process_hello(
        &mut self,
        src: Ipv4Addr,
        hello: Hello,
    ) -> Result<(), Error> {
        let router_id = hello.hdr.router_id;

        // Sanity checks.
        if let Err(error) = self.validate_hello(&hello) {
            return Err(Error::InterfaceCfgError(
                self.name.clone(),
                src,
                PacketType::Hello,
                error,
            ));
        }

        // Create the neighbor if it wasn't seen before.
        let nbr_key = NeighborKey::new(self.config.if_type, router_id, src);
        if !self.state.neighbors.contains_key(&nbr_key) {
            let nbr = self.neighbor_spawn(nbr_key, router_id, src);
            self.state.neighbors.insert(nbr_key, nbr);
        }

        if self.config.if_type.is_broadcast_or_nbma() {
            self.state.dr = hello.dr;
            self.state.bdr = hello.bdr;
        }

        // Hand the Hello over to the neighbor.
        let msg = NeighborEventMsg::Hello(HelloRcvdMsg {
            src,
            priority: hello.priority,
            options: hello.options,
            dr: hello.dr,
            bdr: hello.bdr,
            two_way: hello.neighbors.contains(&self.router_id),
        });
        if let Some(nbr) = self.state.neighbors.get(&nbr_key)
            && nbr.event_tx.try_send(msg).is_err()
        {
            Error::QueueFull("neighbor events").log();
        }

        Ok(())
    }

    fn validate_hello(&self, hello: &Hello) -> Result<(), InterfaceCfgError> {
        // The network mask is only meaningful on multi-access networks.
        if self.config.if_type != InterfaceType::PointToPoint
            && self.config.if_type != InterfaceType::VirtualLink
            && hello.network_mask != self.system.addr.mask()
        {
            return Err(InterfaceCfgError::HelloMaskMismatch(
                hello.network_mask,
                self.system.addr.mask(),
            ));
        }

        if hello.hello_interval != self.config.hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                self.config.hello_interval,
            ));
        }

        if hello.dead_interval != self.config.dead_interval {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                self.config.dead_interval,
            ));
        }

        let e_bit = hello.options.contains(Options::E);
        if e_bit != self.area.external_routing_capability() {
            return Err(InterfaceCfgError::ExternalRoutingCapabilityMismatch(
                e_bit,
            ));
        }

        if hello.hdr.router_id == self.router_id {
            return Err(InterfaceCfgError::DuplicateRouterId(
                hello.hdr.router_id,
            ));
        }

        Ok(())
    }

    fn neighbor_spawn(
        &self,
        nbr_key: NeighborKey,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> NeighborHandle {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_SIZE);
        let (packet_tx, packet_rx) = mpsc::channel(CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let nbr = Neighbor::new(nbr_key, router_id, src);
        let env = NeighborEnv {
            router_id: self.router_id,
            area: self.area.clone(),
            config: self.config.clone(),
            system: self.system.clone(),
            lsdb: self.lsdb.clone(),
            net_tx: self.tx.net.clone(),
            event_tx: event_tx.clone(),
        };
        let channels = NeighborChannels {
            event_rx,
            packet_rx,
            shutdown_rx,
            iface_tx: self.tx.nbr_state.clone(),
            instance_tx: self.tx.instance.clone(),
        };
        let task = tasks::neighbor(nbr, env, channels);

        NeighborHandle {
            router_id,
            src,
            state: nsm::State::Down,
            event_tx,
            packet_tx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    // ===== other events =====

    pub async fn process_nbr_state(&mut self, msg: NbrStateMsg) {
        if msg.new_state == nsm::State::Down {
            // Neighbor removal. The neighbor task is stopped before its key
            // can be reused.
            if let Some(nbr) = self.state.neighbors.remove(&msg.nbr_key) {
                nbr.stop().await;
            }
            return;
        }

        if let Some(nbr) = self.state.neighbors.get_mut(&msg.nbr_key) {
            nbr.state = msg.new_state;
            nbr.src = msg.src;
        }
    }

    pub fn process_timer(&mut self, msg: InterfaceTimerMsg) {
        match msg {
            InterfaceTimerMsg::Hello => {
                output::send_hello(self);
            }
            InterfaceTimerMsg::LsUpdate => {
                self.state.tasks.ls_update_timer = None;
                output::send_lsupd(self);
            }
            InterfaceTimerMsg::DelayedAck => {
                self.state.tasks.delayed_ack_timer = None;
                output::send_lsack_delayed(self);
            }
        }
    }

    pub fn process_flood(&mut self, msg: InterfaceFloodMsg) {
        match msg {
            InterfaceFloodMsg::Neighbors(responder) => {
                let nbrs = self
                    .state
                    .neighbors
                    .iter()
                    .map(|(nbr_key, nbr)| FloodNeighbor {
                        nbr_key: *nbr_key,
                        router_id: nbr.router_id,
                        state: nbr.state,
                        event_tx: nbr.event_tx.clone(),
                    })
                    .collect();
                let _ = responder.send(nbrs);
            }
            InterfaceFloodMsg::FloodOut(msg) => {
                let flooded_back = match flood::flood_out_action(
                    &msg,
                    self.state.dr,
                    self.state.bdr,
                ) {
                    FloodOutAction::Skip => false,
                    FloodOutAction::Send { flooded_back } => {
                        self.enqueue_ls_update(msg.lsa.clone());
                        flooded_back
                    }
                };

                // LSAs that weren't flooded back out the receiving interface
                // are acknowledged there.
                if msg.src.is_some() && !flooded_back {
                    self.enqueue_delayed_ack(&msg.lsa.hdr);
                }
            }
        }
    }

    pub fn enqueue_ls_update(&mut self, lsa: Arc<Lsa>) {
        self.state.ls_update_list.insert(lsa.hdr.key(), lsa);
        if self.state.tasks.ls_update_timer.is_none() {
            let task = tasks::ls_update_timer(&self.tx.timer);
            self.state.tasks.ls_update_timer = Some(task);
        }
    }

    pub fn enqueue_delayed_ack(&mut self, lsa_hdr: &LsaHdr) {
        self.state.ls_ack_list.insert(lsa_hdr.key(), *lsa_hdr);
        if self.state.tasks.delayed_ack_timer.is_none() {
            let task = tasks::delayed_ack_timer(&self.tx.timer);
            self.state.tasks.delayed_ack_timer = Some(task);
        }
    }

    // Stops all neighbors of the interface.
    async fn neighbors_stop(&mut self) {
        for (_, nbr) in std::mem::take(&mut self.state.neighbors) {
            nbr.stop().await;
        }
    }
}

// ===== impl InterfaceType =====

impl InterfaceType {
    // Whether every neighbor that reaches 2-Way becomes adjacent.
    pub fn need_adjacency(&self) -> bool {
        match self {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::VirtualLink => true,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => false,
        }
    }

    pub fn is_broadcast_or_nbma(&self) -> bool {
        matches!(self, InterfaceType::Broadcast | InterfaceType::NonBroadcast)
    }
}

// ===== impl NeighborHandle =====

impl NeighborHandle {
    // Signals the neighbor task to stop and waits for it to finish.
    pub async fn stop(mut self) {
        self.shutdown_tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ===== impl InterfaceHandle =====

impl InterfaceHandle {
    // Stops the interface task along with all of its neighbors.
    pub async fn stop(mut self) {
        self.shutdown_tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ===== interface task =====

#[derive(Debug)]
struct LoopRx {
    net_rx: Receiver<NetRxPacketMsg>,
    timer: Receiver<InterfaceTimerMsg>,
    nbr_state: Receiver<NbrStateMsg>,
    flood: Receiver<InterfaceFloodMsg>,
    shutdown: oneshot::Receiver<()>,
}

async fn run(mut iface: Interface, mut rx: LoopRx) {
    loop {
        tokio::select! {
            biased;
            _ = &mut rx.shutdown => break,
            Some(msg) = rx.nbr_state.recv() => {
                iface.process_nbr_state(msg).await;
            }
            Some(msg) = rx.timer.recv() => {
                iface.process_timer(msg);
            }
            Some(msg) = rx.flood.recv() => {
                iface.process_flood(msg);
            }
            Some(msg) = rx.net_rx.recv() => {
                if let Err(error) = iface.process_packet(msg) {
                    error.log();
                }
            }
            else => break,
        }
    }

    iface.neighbors_stop().await;
    iface.state = Default::default();
    Debug::InterfaceStop(&iface.name).log();
}

