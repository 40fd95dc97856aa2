//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#[cfg(not(feature = "testing"))]
use std::sync::Arc;
use std::time::Duration;

use ospf_utils::task::{IntervalTask, Task, TimeoutTask};
use ospf_utils::{Receiver, Sender};
#[cfg(not(feature = "testing"))]
use socket2::Socket;
#[cfg(not(feature = "testing"))]
use tokio::io::unix::AsyncFd;
use tracing::{Instrument, debug_span};

use crate::neighbor::{Neighbor, NeighborChannels, NeighborEnv, nsm};
#[cfg(not(feature = "testing"))]
use crate::network;
use crate::tasks::messages::{
    InstanceMsg, InterfaceTimerMsg, NeighborEventMsg, NetRxPacketMsg,
    NetTxPacketMsg, RxmtPacketType,
};

//
// OSPF tasks diagram:
//
//                              +--------------+
//                              |   instance   | <- (1x) lsa_refresh_interval
//                              +--------------+
//                                ^  |     ^
//               nbr state (Nx)   |  |     | nbr state, flood requests (Nx)
//                                |  V     |
//                              +--------------+
//             net_rx (Nx) ->   |  interface   | -> (Nx) net_tx
//     hello_interval (Nx) ->   |              |
//    ls_update_timer (Nx) ->   |              | <- (Nx) flooding
//  delayed_ack_timer (Nx) ->   +--------------+
//                                |  ^
//          events, packets (Nx)  V  | nbr state (Nx)
//                              +--------------+
// nsm_inactivity_timer (Nx) -> |   neighbor   | -> (Nx) net_tx
// packet_rxmt_interval (Nx) -> |              | <- (Nx) flooding
//    dbdesc_free_timer (Nx) -> +--------------+
//

// OSPF inter-task message types.
pub mod messages {
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use ospf_utils::{Responder, Sender};
    use serde::{Deserialize, Serialize};

    use crate::neighbor::{NeighborKey, nsm};
    use crate::network::SendDestination;
    use crate::packet::error::DecodeError;
    use crate::packet::lsa::Lsa;
    use crate::packet::{Options, Packet};

    // Packet received from the network.
    #[derive(Debug, Serialize)]
    pub struct NetRxPacketMsg {
        pub ifindex: u32,
        pub src: Ipv4Addr,
        pub dst: Ipv4Addr,
        pub packet: Result<Packet, DecodeError>,
    }

    // Packet to be sent to the network.
    #[derive(Clone, Debug, Serialize)]
    pub struct NetTxPacketMsg {
        pub packet: Packet,
        pub src: Ipv4Addr,
        pub dst: SendDestination,
    }

    // Messages processed by a neighbor task, other than packets.
    #[derive(Debug)]
    pub enum NeighborEventMsg {
        Hello(HelloRcvdMsg),
        Nsm(nsm::Event),
        RxmtInterval(RxmtPacketType),
        DbDescFree,
        Flood(NeighborFloodMsg),
    }

    // Fields learned from a Hello packet that passed the interface checks.
    #[derive(Clone, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct HelloRcvdMsg {
        pub src: Ipv4Addr,
        pub priority: u8,
        pub options: Options,
        pub dr: Option<Ipv4Addr>,
        pub bdr: Option<Ipv4Addr>,
        // Whether our Router ID is listed in the Hello.
        pub two_way: bool,
    }

    // Per-neighbor flooding step. The reply tells whether the LSA was added
    // to the neighbor's retransmission list.
    #[derive(Debug)]
    pub struct NeighborFloodMsg {
        pub lsa: Arc<Lsa>,
        pub is_src: bool,
        pub reply: Responder<bool>,
    }

    // Packet addressed to a neighbor.
    #[derive(Debug, Serialize)]
    pub struct NeighborPacketMsg {
        pub src: Ipv4Addr,
        pub packet: Packet,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum RxmtPacketType {
        DbDesc,
        LsRequest,
        LsUpdate,
    }

    // Neighbor state change, reported to the interface and to the instance.
    #[derive(Clone, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct NbrStateMsg {
        pub ifname: String,
        pub area_id: Ipv4Addr,
        pub nbr_key: NeighborKey,
        pub router_id: Ipv4Addr,
        pub src: Ipv4Addr,
        pub old_state: nsm::State,
        pub new_state: nsm::State,
    }

    // Interface timer expirations.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum InterfaceTimerMsg {
        Hello,
        LsUpdate,
        DelayedAck,
    }

    // Messages sent by flooding tasks to an interface.
    #[derive(Debug)]
    pub enum InterfaceFloodMsg {
        Neighbors(Responder<Vec<FloodNeighbor>>),
        FloodOut(FloodOutMsg),
    }

    // Neighbor snapshot handed out to flooding tasks.
    #[derive(Clone, Debug)]
    pub struct FloodNeighbor {
        pub nbr_key: NeighborKey,
        pub router_id: Ipv4Addr,
        pub state: nsm::State,
        pub event_tx: Sender<NeighborEventMsg>,
    }

    // Outcome of the per-neighbor flooding steps on an interface.
    #[derive(Clone, Debug)]
    pub struct FloodOutMsg {
        pub lsa: Arc<Lsa>,
        pub rxmt_added: bool,
        // Neighbor the LSA was received from, when received on this
        // interface.
        pub src: Option<NeighborKey>,
    }

    // Messages processed by the instance task.
    #[derive(Debug)]
    pub enum InstanceMsg {
        NbrState(NbrStateMsg),
        Flood(FloodRequestMsg),
        SelfOriginatedLsaRcvd(SelfOriginatedLsaMsg),
        LsaRefresh,
        Query(InstanceQuery),
    }

    // Request to flood an LSA that was just installed in the LSDB.
    #[derive(Clone, Debug)]
    pub struct FloodRequestMsg {
        pub area_id: Ipv4Addr,
        pub lsa: Arc<Lsa>,
        pub src: Option<FloodSource>,
    }

    // Interface and neighbor an LSA was received from.
    #[derive(Clone, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct FloodSource {
        pub ifname: String,
        pub nbr_key: NeighborKey,
    }

    #[derive(Clone, Debug)]
    pub struct SelfOriginatedLsaMsg {
        pub area_id: Ipv4Addr,
        pub lsa: Arc<Lsa>,
    }

    // Management queries.
    #[derive(Debug)]
    pub enum InstanceQuery {
        NeighborCounts(Responder<BTreeMap<nsm::State, usize>>),
        PartialAdjacencyCount(Responder<usize>),
    }
}

// ===== OSPF tasks =====

// Network Rx task.
#[cfg(not(feature = "testing"))]
pub(crate) fn net_rx(
    socket: Arc<AsyncFd<Socket>>,
    net_packet_rxp: &Sender<NetRxPacketMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let net_packet_rxp = net_packet_rxp.clone();

    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let net_packet_rxp = net_packet_rxp.clone();
        async move {
            let _ = network::read_loop(socket, net_packet_rxp).await;
        }
        .in_current_span()
    })
}

#[cfg(feature = "testing")]
pub(crate) fn net_rx(_net_packet_rxp: &Sender<NetRxPacketMsg>) -> Task<()> {
    Task::spawn(async move { std::future::pending().await })
}

// Network Tx task.
#[cfg(not(feature = "testing"))]
pub(crate) fn net_tx(
    socket: Arc<AsyncFd<Socket>>,
    net_packet_txc: Receiver<NetTxPacketMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::write_loop(socket, net_packet_txc).await;
        }
        .in_current_span(),
    )
}

#[cfg(feature = "testing")]
pub(crate) fn net_tx(mut net_packet_txc: Receiver<NetTxPacketMsg>) -> Task<()> {
    // Discard outgoing packets.
    Task::spawn(async move { while net_packet_txc.recv().await.is_some() {} })
}

// Neighbor task.
pub(crate) fn neighbor(
    nbr: Neighbor,
    env: NeighborEnv,
    channels: NeighborChannels,
) -> Task<()> {
    let span = debug_span!("neighbor", router_id = %nbr.router_id);
    Task::spawn(crate::neighbor::run(nbr, env, channels).instrument(span))
}

// Send periodic Hello ticks to the interface task.
pub(crate) fn hello_interval(
    timerp: &Sender<InterfaceTimerMsg>,
    interval: u16,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let timerp = timerp.clone();
        IntervalTask::new(
            Duration::from_secs(interval.into()),
            true,
            move || {
                let timerp = timerp.clone();
                async move {
                    let _ = timerp.send(InterfaceTimerMsg::Hello).await;
                }
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

// Interface LS Update timer task.
pub(crate) fn ls_update_timer(
    timerp: &Sender<InterfaceTimerMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let timerp = timerp.clone();
        TimeoutTask::new(Duration::from_millis(100), move || async move {
            let _ = timerp.send(InterfaceTimerMsg::LsUpdate).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Interface delayed Ack timer task.
pub(crate) fn delayed_ack_timer(
    timerp: &Sender<InterfaceTimerMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        // RFC 2328 - Section 13.5:
        // "The fixed interval between a router's delayed transmissions must be
        // short (less than RxmtInterval) or needless retransmissions will
        // ensue".
        let timerp = timerp.clone();
        TimeoutTask::new(Duration::from_secs(1), move || async move {
            let _ = timerp.send(InterfaceTimerMsg::DelayedAck).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Neighbor inactivity timer.
pub(crate) fn nsm_inactivity_timer(
    env: &NeighborEnv,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let timeout = Duration::from_secs(env.config.dead_interval.into());
        let event_tx = env.event_tx.clone();

        TimeoutTask::new(timeout, move || async move {
            let msg = NeighborEventMsg::Nsm(nsm::Event::InactivityTimer);
            let _ = event_tx.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Send periodic packet retransmissions.
pub(crate) fn packet_rxmt_interval(
    env: &NeighborEnv,
    packet_type: RxmtPacketType,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let event_tx = env.event_tx.clone();

        IntervalTask::new(
            Duration::from_secs(env.config.retransmit_interval.into()),
            false,
            move || {
                let event_tx = event_tx.clone();
                async move {
                    let msg = NeighborEventMsg::RxmtInterval(packet_type);
                    let _ = event_tx.send(msg).await;
                }
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

// Timer to free the neighbor's last sent/received Database Description packets.
pub(crate) fn dbdesc_free_timer(env: &NeighborEnv) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let event_tx = env.event_tx.clone();

        TimeoutTask::new(
            Duration::from_secs(env.config.dead_interval.into()),
            move || async move {
                let _ = event_tx.send(NeighborEventMsg::DbDescFree).await;
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// Periodic refresh of self-originated LSAs.
pub(crate) fn lsa_refresh_interval(
    instancep: &Sender<InstanceMsg>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let instancep = instancep.clone();
        let interval = crate::lsdb::LSA_REFRESH_TIME;

        IntervalTask::new(
            Duration::from_secs(interval.into()),
            false,
            move || {
                let instancep = instancep.clone();
                async move {
                    let _ = instancep.send(InstanceMsg::LsaRefresh).await;
                }
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}
