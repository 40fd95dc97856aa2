//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use const_addrs::ip4;
use ospf_core::area::Area;
use ospf_core::config::{InterfaceCfg, InterfaceSys};
use ospf_core::debug::SeqNoMismatchReason;
use ospf_core::error::Error;
use ospf_core::interface::{CHANNEL_SIZE, InterfaceType};
use ospf_core::lsdb::Lsdb;
use ospf_core::neighbor::nsm::{Event, State};
use ospf_core::neighbor::{Neighbor, NeighborEnv, NeighborKey, NeighborNotif};
use ospf_core::packet::{DbDescFlags, Packet};
use ospf_core::tasks::messages::{NeighborEventMsg, NetTxPacketMsg};
use ospf_utils::Receiver;
use tokio::sync::mpsc;

const STATES: [State; 8] = [
    State::Down,
    State::Attempt,
    State::Init,
    State::TwoWay,
    State::ExStart,
    State::Exchange,
    State::Loading,
    State::Full,
];

const EVENTS: [Event; 13] = [
    Event::HelloRcvd,
    Event::Start,
    Event::TwoWayRcvd,
    Event::NegotiationDone,
    Event::ExchangeDone,
    Event::BadLsReq,
    Event::LoadingDone,
    Event::AdjOk,
    Event::SeqNoMismatch(SeqNoMismatchReason::InconsistentSeqNo),
    Event::OneWayRcvd,
    Event::Kill,
    Event::InactivityTimer,
    Event::LinkDown,
];

struct TestEnv {
    env: NeighborEnv,
    net_rx: Receiver<NetTxPacketMsg>,
    _event_rx: Receiver<NeighborEventMsg>,
}

//
// Helper functions.
//

fn test_env(if_type: InterfaceType) -> TestEnv {
    let (net_tx, net_rx) = mpsc::channel(CHANNEL_SIZE);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_SIZE);
    let env = NeighborEnv {
        router_id: ip4!("1.1.1.1"),
        area: Area::new(Area::BACKBONE, false).unwrap(),
        config: InterfaceCfg {
            name: "eth-rt2".to_owned(),
            if_type,
            ..Default::default()
        },
        system: InterfaceSys::new(1, 1500, "10.0.1.1/24".parse().unwrap()),
        lsdb: Arc::new(Lsdb::new([Area::BACKBONE])),
        net_tx,
        event_tx,
    };

    TestEnv {
        env,
        net_rx,
        _event_rx: event_rx,
    }
}

fn test_neighbor(if_type: InterfaceType) -> Neighbor {
    let router_id = ip4!("2.2.2.2");
    let src = ip4!("10.0.1.2");
    Neighbor::new(NeighborKey::new(if_type, router_id, src), router_id, src)
}

fn state_changes(nbr: &mut Neighbor) -> Vec<(State, State)> {
    nbr.take_notifications()
        .into_iter()
        .filter_map(|notif| match notif {
            NeighborNotif::StateChange {
                old_state,
                new_state,
                ..
            } => Some((old_state, new_state)),
            _ => None,
        })
        .collect()
}

//
// Tests.
//

#[test]
fn test_hello_then_two_way_point_to_point() {
    let mut test = test_env(InterfaceType::PointToPoint);
    let mut nbr = test_neighbor(InterfaceType::PointToPoint);

    nbr.fsm(&test.env, Event::HelloRcvd).unwrap();
    assert_eq!(nbr.state, State::Init);
    nbr.fsm(&test.env, Event::TwoWayRcvd).unwrap();
    assert_eq!(nbr.state, State::ExStart);
    assert_eq!(
        state_changes(&mut nbr),
        vec![(State::Down, State::Init), (State::Init, State::ExStart)]
    );

    // The initial Database Description packet must have been sent, with the
    // I, M and MS bits set and no LSA headers.
    let msg = test.net_rx.try_recv().unwrap();
    let Packet::DbDesc(dbdesc) = msg.packet else {
        panic!("unexpected packet type");
    };
    assert_eq!(
        dbdesc.dd_flags,
        DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS
    );
    assert!(dbdesc.lsa_hdrs.is_empty());
    assert_eq!(dbdesc.dd_seq_no, u32::from(ip4!("2.2.2.2")) + 1);
    assert!(test.net_rx.try_recv().is_err());
}

#[test]
fn test_two_way_broadcast_forms_no_adjacency() {
    let mut test = test_env(InterfaceType::Broadcast);
    let mut nbr = test_neighbor(InterfaceType::Broadcast);

    nbr.fsm(&test.env, Event::HelloRcvd).unwrap();
    nbr.fsm(&test.env, Event::TwoWayRcvd).unwrap();
    assert_eq!(nbr.state, State::TwoWay);
    assert!(test.net_rx.try_recv().is_err());

    // AdjOk doesn't change anything either.
    nbr.fsm(&test.env, Event::AdjOk).unwrap();
    assert_eq!(nbr.state, State::TwoWay);
}

#[test]
fn test_seq_no_mismatch_restarts_negotiation() {
    let mut test = test_env(InterfaceType::PointToPoint);
    let mut nbr = test_neighbor(InterfaceType::PointToPoint);

    nbr.fsm(&test.env, Event::HelloRcvd).unwrap();
    nbr.fsm(&test.env, Event::TwoWayRcvd).unwrap();
    let first_seq_no = nbr.dd_seq_no;
    nbr.fsm(&test.env, Event::NegotiationDone).unwrap();
    assert_eq!(nbr.state, State::Exchange);
    let _ = nbr.take_notifications();

    nbr.fsm(
        &test.env,
        Event::SeqNoMismatch(SeqNoMismatchReason::InconsistentFlags),
    )
    .unwrap();
    assert_eq!(nbr.state, State::ExStart);
    assert_eq!(nbr.dd_seq_no, first_seq_no + 1);
    assert!(nbr.dd_flags.contains(DbDescFlags::MS));
    assert_eq!(
        state_changes(&mut nbr),
        vec![(State::Exchange, State::ExStart)]
    );

    // One DD for the first negotiation, another for the restart.
    assert!(test.net_rx.try_recv().is_ok());
    assert!(test.net_rx.try_recv().is_ok());
    assert!(test.net_rx.try_recv().is_err());
}

#[test]
fn test_exchange_done_without_requests_is_full() {
    let test = test_env(InterfaceType::PointToPoint);
    let mut nbr = test_neighbor(InterfaceType::PointToPoint);
    nbr.state = State::Exchange;

    nbr.fsm(&test.env, Event::ExchangeDone).unwrap();
    assert_eq!(nbr.state, State::Full);
}

#[test]
fn test_one_way_falls_back_to_attempt() {
    let test = test_env(InterfaceType::PointToPoint);
    let mut nbr = test_neighbor(InterfaceType::PointToPoint);
    nbr.state = State::Full;

    nbr.fsm(&test.env, Event::OneWayRcvd).unwrap();
    assert_eq!(nbr.state, State::Attempt);
    assert!(nbr.lists.ls_rxmt.is_empty());

    // The next Hello moves the neighbor back to Init.
    nbr.fsm(&test.env, Event::HelloRcvd).unwrap();
    assert_eq!(nbr.state, State::Init);
}

#[test]
fn test_kill_from_down_still_notifies() {
    let test = test_env(InterfaceType::PointToPoint);
    let mut nbr = test_neighbor(InterfaceType::PointToPoint);

    nbr.fsm(&test.env, Event::Kill).unwrap();
    assert_eq!(nbr.state, State::Down);
    assert_eq!(state_changes(&mut nbr), vec![(State::Down, State::Down)]);
}

#[test]
fn test_down_is_notified_exactly_once() {
    for event in [Event::Kill, Event::InactivityTimer, Event::LinkDown] {
        for state in STATES {
            let test = test_env(InterfaceType::PointToPoint);
            let mut nbr = test_neighbor(InterfaceType::PointToPoint);
            nbr.state = state;

            nbr.fsm(&test.env, event).unwrap();
            assert_eq!(nbr.state, State::Down);
            assert_eq!(state_changes(&mut nbr), vec![(state, State::Down)]);
            assert!(nbr.tasks.inactivity_timer.is_none());
        }
    }
}

#[test]
fn test_unexpected_event_keeps_state() {
    let test = test_env(InterfaceType::PointToPoint);
    let mut nbr = test_neighbor(InterfaceType::PointToPoint);

    let result = nbr.fsm(&test.env, Event::ExchangeDone);
    assert!(matches!(
        result,
        Err(Error::NsmUnexpectedEvent(_, State::Down, Event::ExchangeDone))
    ));
    assert_eq!(nbr.state, State::Down);
    assert!(nbr.take_notifications().is_empty());
}

#[test]
fn test_start_only_on_nbma() {
    let test = test_env(InterfaceType::NonBroadcast);
    let mut nbr = test_neighbor(InterfaceType::NonBroadcast);
    nbr.fsm(&test.env, Event::Start).unwrap();
    assert_eq!(nbr.state, State::Attempt);
    assert!(nbr.tasks.inactivity_timer.is_some());
    assert_eq!(state_changes(&mut nbr), vec![(State::Down, State::Attempt)]);

    for if_type in [
        InterfaceType::PointToPoint,
        InterfaceType::Broadcast,
        InterfaceType::PointToMultipoint,
    ] {
        let test = test_env(if_type);
        let mut nbr = test_neighbor(if_type);
        let result = nbr.fsm(&test.env, Event::Start);
        assert!(matches!(
            result,
            Err(Error::NsmUnexpectedEvent(_, State::Down, Event::Start))
        ));
        assert_eq!(nbr.state, State::Down);
        assert!(nbr.take_notifications().is_empty());
    }
}

#[test]
fn test_fsm_is_total() {
    for if_type in [
        InterfaceType::PointToPoint,
        InterfaceType::Broadcast,
        InterfaceType::NonBroadcast,
    ] {
        for state in STATES {
            for event in EVENTS {
                let test = test_env(if_type);
                let mut nbr = test_neighbor(if_type);
                nbr.state = state;

                match nbr.fsm(&test.env, event) {
                    Ok(()) => {
                        // At most one transition per event.
                        let changes = state_changes(&mut nbr);
                        assert!(changes.len() <= 1, "{state:?} {event:?}");
                        if let Some((old_state, new_state)) = changes.first() {
                            assert_eq!(*old_state, state);
                            assert_eq!(*new_state, nbr.state);
                        }
                    }
                    Err(Error::NsmUnexpectedEvent(_, err_state, err_event)) => {
                        assert_eq!(err_state, state);
                        assert_eq!(err_event, event);
                        assert_eq!(nbr.state, state, "{state:?} {event:?}");
                        assert!(nbr.take_notifications().is_empty());
                    }
                    Err(error) => panic!("unexpected error: {error:?}"),
                }
            }
        }
    }
}
