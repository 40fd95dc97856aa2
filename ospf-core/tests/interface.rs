//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use const_addrs::ip4;
use ospf_core::area::Area;
use ospf_core::config::{InterfaceCfg, InterfaceSys};
use ospf_core::error::{Error, InterfaceCfgError};
use ospf_core::interface::{CHANNEL_SIZE, Interface, InterfaceRx, InterfaceType};
use ospf_core::lsdb::Lsdb;
use ospf_core::neighbor::NeighborKey;
use ospf_core::neighbor::nsm::State;
use ospf_core::network::ALL_SPF_RTRS;
use ospf_core::packet::error::DecodeError;
use ospf_core::packet::{Hello, LsAck, Options, Packet, PacketHdr, PacketType};
use ospf_core::tasks::messages::{
    InstanceMsg, InterfaceTimerMsg, NetRxPacketMsg,
};
use ospf_utils::Receiver;
use tokio::sync::mpsc;

const IFINDEX: u32 = 2;

struct TestInterface {
    iface: Interface,
    rx: InterfaceRx,
    _instance_rx: Receiver<InstanceMsg>,
}

//
// Helper functions.
//

fn test_interface(if_type: InterfaceType) -> TestInterface {
    let (instance_tx, instance_rx) = mpsc::channel(CHANNEL_SIZE);
    let config = InterfaceCfg {
        name: "eth-rt2".to_owned(),
        if_type,
        ..Default::default()
    };
    let system =
        InterfaceSys::new(IFINDEX, 1500, "10.0.1.1/24".parse().unwrap());
    let (iface, rx) = Interface::new(
        ip4!("1.1.1.1"),
        Area::new(Area::BACKBONE, false).unwrap(),
        config,
        system,
        Arc::new(Lsdb::new([Area::BACKBONE])),
        instance_tx,
    );

    TestInterface {
        iface,
        rx,
        _instance_rx: instance_rx,
    }
}

fn hello(router_id: Ipv4Addr, neighbors: BTreeSet<Ipv4Addr>) -> Packet {
    Packet::Hello(Hello {
        hdr: PacketHdr::new(PacketType::Hello, router_id, Area::BACKBONE),
        network_mask: ip4!("255.255.255.0"),
        hello_interval: InterfaceCfg::DFLT_HELLO_INTERVAL,
        options: Options::E,
        priority: 1,
        dead_interval: InterfaceCfg::DFLT_DEAD_INTERVAL,
        dr: None,
        bdr: None,
        neighbors,
    })
}

fn rx_msg(src: Ipv4Addr, dst: Ipv4Addr, packet: Packet) -> NetRxPacketMsg {
    NetRxPacketMsg {
        ifindex: IFINDEX,
        src,
        dst,
        packet: Ok(packet),
    }
}

//
// Tests.
//

#[tokio::test]
async fn test_neighbor_key_point_to_point() {
    let mut test = test_interface(InterfaceType::PointToPoint);

    let packet = hello(ip4!("2.2.2.2"), Default::default());
    let msg = rx_msg(ip4!("10.0.1.2"), ALL_SPF_RTRS, packet);
    test.iface.process_packet(msg).unwrap();

    let keys = test.iface.state.neighbors.keys().collect::<Vec<_>>();
    assert_eq!(keys, vec![&NeighborKey::RouterId(ip4!("2.2.2.2"))]);

    // A new source address doesn't create a new neighbor.
    let packet = hello(ip4!("2.2.2.2"), Default::default());
    let msg = rx_msg(ip4!("10.0.1.3"), ALL_SPF_RTRS, packet);
    test.iface.process_packet(msg).unwrap();
    assert_eq!(test.iface.state.neighbors.len(), 1);
}

#[tokio::test]
async fn test_neighbor_key_broadcast() {
    let mut test = test_interface(InterfaceType::Broadcast);

    for src in [ip4!("10.0.1.2"), ip4!("10.0.1.3")] {
        let packet = hello(ip4!("2.2.2.2"), Default::default());
        let msg = rx_msg(src, ALL_SPF_RTRS, packet);
        test.iface.process_packet(msg).unwrap();
    }

    let keys = test.iface.state.neighbors.keys().collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            &NeighborKey::Addr(ip4!("10.0.1.2")),
            &NeighborKey::Addr(ip4!("10.0.1.3"))
        ]
    );
}

#[tokio::test]
async fn test_hello_lists_neighbor_after_state_change() {
    let mut test = test_interface(InterfaceType::PointToPoint);

    let packet = hello(ip4!("2.2.2.2"), [ip4!("1.1.1.1")].into());
    let msg = rx_msg(ip4!("10.0.1.2"), ALL_SPF_RTRS, packet);
    test.iface.process_packet(msg).unwrap();

    // The neighbor goes to Init and then straight to ExStart.
    let msg = test.rx.nbr_state.recv().await.unwrap();
    assert_eq!((msg.old_state, msg.new_state), (State::Down, State::Init));
    test.iface.process_nbr_state(msg).await;
    let msg = test.rx.nbr_state.recv().await.unwrap();
    assert_eq!((msg.old_state, msg.new_state), (State::Init, State::ExStart));
    test.iface.process_nbr_state(msg).await;

    let nbr_key = NeighborKey::RouterId(ip4!("2.2.2.2"));
    assert_eq!(test.iface.state.neighbors[&nbr_key].state, State::ExStart);

    // The neighbor's initial Database Description packet goes out first.
    let msg = test.rx.net_out.recv().await.unwrap();
    assert!(matches!(msg.packet, Packet::DbDesc(_)));

    test.iface.process_timer(InterfaceTimerMsg::Hello);
    let msg = test.rx.net_out.recv().await.unwrap();
    let Packet::Hello(hello) = msg.packet else {
        panic!("unexpected packet type");
    };
    assert_eq!(msg.src, ip4!("10.0.1.1"));
    assert_eq!(msg.dst.addrs.as_slice(), &[ALL_SPF_RTRS]);
    assert_eq!(hello.network_mask, Ipv4Addr::UNSPECIFIED);
    assert_eq!(hello.options, Options::E);
    assert_eq!(hello.neighbors, BTreeSet::from([ip4!("2.2.2.2")]));
}

#[tokio::test]
async fn test_neighbor_down_is_removed() {
    let mut test = test_interface(InterfaceType::PointToPoint);

    let packet = hello(ip4!("2.2.2.2"), Default::default());
    let msg = rx_msg(ip4!("10.0.1.2"), ALL_SPF_RTRS, packet);
    test.iface.process_packet(msg).unwrap();
    let msg = test.rx.nbr_state.recv().await.unwrap();
    test.iface.process_nbr_state(msg.clone()).await;

    let mut down = msg;
    down.old_state = State::Init;
    down.new_state = State::Down;
    test.iface.process_nbr_state(down).await;
    assert!(test.iface.state.neighbors.is_empty());
}

#[tokio::test]
async fn test_packet_validation() {
    let mut test = test_interface(InterfaceType::Broadcast);
    let src = ip4!("10.0.1.2");

    // Wrong interface.
    let packet = hello(ip4!("2.2.2.2"), Default::default());
    let mut msg = rx_msg(src, ALL_SPF_RTRS, packet);
    msg.ifindex = IFINDEX + 1;
    assert!(matches!(
        test.iface.process_packet(msg),
        Err(Error::IfindexMismatch(..))
    ));

    // Undecodable packet.
    let msg = NetRxPacketMsg {
        ifindex: IFINDEX,
        src,
        dst: ALL_SPF_RTRS,
        packet: Err(DecodeError::InvalidChecksum),
    };
    assert!(matches!(
        test.iface.process_packet(msg),
        Err(Error::PacketDecodeError(DecodeError::InvalidChecksum))
    ));

    // AllDRouters isn't accepted.
    let packet = hello(ip4!("2.2.2.2"), Default::default());
    let msg = rx_msg(src, ip4!("224.0.0.6"), packet);
    assert!(matches!(
        test.iface.process_packet(msg),
        Err(Error::InvalidDstAddr(_))
    ));

    // Source outside of the interface's subnet.
    let msg = rx_msg(
        ip4!("10.0.2.2"),
        ALL_SPF_RTRS,
        hello(ip4!("2.2.2.2"), Default::default()),
    );
    assert!(matches!(
        test.iface.process_packet(msg),
        Err(Error::InvalidSrcAddr(_))
    ));

    // Area mismatch.
    let mut packet = hello(ip4!("2.2.2.2"), Default::default());
    if let Packet::Hello(hello) = &mut packet {
        hello.hdr.area_id = ip4!("0.0.0.1");
    }
    assert!(matches!(
        test.iface.process_packet(rx_msg(src, ALL_SPF_RTRS, packet)),
        Err(Error::InterfaceCfgError(
            _,
            _,
            PacketType::Hello,
            InterfaceCfgError::AreaIdMismatch(..)
        ))
    ));

    // Our own packets are silently ignored.
    let msg = rx_msg(
        ip4!("10.0.1.1"),
        ALL_SPF_RTRS,
        hello(ip4!("2.2.2.2"), Default::default()),
    );
    assert!(test.iface.process_packet(msg).is_ok());

    // Non-Hello packets from unknown neighbors.
    let packet = Packet::LsAck(LsAck {
        hdr: PacketHdr::new(PacketType::LsAck, ip4!("2.2.2.2"), Area::BACKBONE),
        lsa_hdrs: vec![],
    });
    assert!(matches!(
        test.iface.process_packet(rx_msg(src, ALL_SPF_RTRS, packet)),
        Err(Error::UnknownNeighbor(..))
    ));

    assert!(test.iface.state.neighbors.is_empty());
}

#[tokio::test]
async fn test_hello_validation() {
    let mut test = test_interface(InterfaceType::Broadcast);
    let src = ip4!("10.0.1.2");

    let mismatches: [(fn(&mut Hello), fn(&InterfaceCfgError) -> bool); 5] = [
        (
            |hello| hello.network_mask = ip4!("255.255.0.0"),
            |error| matches!(error, InterfaceCfgError::HelloMaskMismatch(..)),
        ),
        (
            |hello| hello.hello_interval += 1,
            |error| {
                matches!(error, InterfaceCfgError::HelloIntervalMismatch(..))
            },
        ),
        (
            |hello| hello.dead_interval += 1,
            |error| {
                matches!(error, InterfaceCfgError::DeadIntervalMismatch(..))
            },
        ),
        (
            |hello| hello.options = Options::empty(),
            |error| {
                matches!(
                    error,
                    InterfaceCfgError::ExternalRoutingCapabilityMismatch(_)
                )
            },
        ),
        (
            |hello| hello.hdr.router_id = ip4!("1.1.1.1"),
            |error| matches!(error, InterfaceCfgError::DuplicateRouterId(_)),
        ),
    ];

    for (mutate, check) in mismatches {
        let mut packet = hello(ip4!("2.2.2.2"), Default::default());
        if let Packet::Hello(hello) = &mut packet {
            mutate(hello);
        }
        match test.iface.process_packet(rx_msg(src, ALL_SPF_RTRS, packet)) {
            Err(Error::InterfaceCfgError(_, _, PacketType::Hello, error)) => {
                assert!(check(&error), "{error:?}");
            }
            result => panic!("unexpected result: {result:?}"),
        }
    }

    assert!(test.iface.state.neighbors.is_empty());
}
