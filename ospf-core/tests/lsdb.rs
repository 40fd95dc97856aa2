//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use const_addrs::ip4;
use ospf_core::area::Area;
use ospf_core::lsdb::{
    LSA_MAX_AGE, LSA_MAX_AGE_DIFF, LsaEntryFlags, Lsdb, lsa_compare,
    lsa_min_arrival_check,
};
use ospf_core::packet::Options;
use ospf_core::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaHdr, LsaKey,
    LsaRouter, LsaRouterFlags, LsaType, LsaTypeCode,
};

const AREA1: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

//
// Helper functions.
//

fn router_lsa(adv_rtr: Ipv4Addr, seq_no: u32) -> Arc<Lsa> {
    Arc::new(Lsa::new(
        1,
        Options::E,
        adv_rtr,
        adv_rtr,
        seq_no,
        LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links: vec![],
        }),
    ))
}

fn external_lsa(adv_rtr: Ipv4Addr) -> Arc<Lsa> {
    Arc::new(Lsa::new(
        1,
        Options::E,
        ip4!("172.16.1.0"),
        adv_rtr,
        0x80000001,
        LsaBody::AsExternal(LsaAsExternal {
            mask: ip4!("255.255.255.0"),
            flags: LsaAsExternalFlags::E,
            metric: 20,
            fwd_addr: None,
            tag: 0,
        }),
    ))
}

fn lsa_hdr(seq_no: u32, cksum: u16, age: u16) -> LsaHdr {
    LsaHdr {
        age,
        options: Options::E,
        lsa_type: LsaTypeCode::Router.into(),
        lsa_id: ip4!("1.1.1.1"),
        adv_rtr: ip4!("1.1.1.1"),
        seq_no,
        cksum,
        length: 24,
    }
}

//
// Tests.
//

#[test]
fn test_area_lsas_are_scoped_per_area() {
    let lsdb = Lsdb::new([Area::BACKBONE, AREA1]);
    let lsa = router_lsa(ip4!("2.2.2.2"), 0x80000001);
    let key = lsa.hdr.key();

    assert!(lsdb.get(Area::BACKBONE, &key).is_none());
    assert_eq!(
        lsdb.set(Area::BACKBONE, lsa.clone(), LsaEntryFlags::RECEIVED)
            .unwrap(),
        None
    );
    assert_eq!(lsdb.get(Area::BACKBONE, &key), Some(lsa.clone()));
    assert!(lsdb.get(AREA1, &key).is_none());
    assert_eq!(lsdb.area_lsas(Area::BACKBONE), vec![lsa]);
    assert!(lsdb.area_lsas(AREA1).is_empty());
}

#[test]
fn test_as_external_lsas_are_global() {
    let lsdb = Lsdb::new([Area::BACKBONE, AREA1]);
    let lsa = external_lsa(ip4!("2.2.2.2"));
    let key = lsa.hdr.key();

    lsdb.set(AREA1, lsa.clone(), LsaEntryFlags::RECEIVED).unwrap();
    assert_eq!(lsdb.get(Area::BACKBONE, &key), Some(lsa.clone()));
    assert_eq!(lsdb.get(AREA1, &key), Some(lsa.clone()));
    assert!(lsdb.area_lsas(AREA1).is_empty());
    assert_eq!(lsdb.as_external_lsas(), vec![lsa.clone()]);

    // Stub areas don't get AS-external LSAs described.
    assert!(lsdb.summary_lsas(AREA1, false).is_empty());
    assert_eq!(lsdb.summary_lsas(AREA1, true), vec![lsa]);
}

#[test]
fn test_set_replaces_previous_instance() {
    let lsdb = Lsdb::new([Area::BACKBONE]);
    let old = router_lsa(ip4!("2.2.2.2"), 0x80000001);
    let new = router_lsa(ip4!("2.2.2.2"), 0x80000002);

    lsdb.set(Area::BACKBONE, old.clone(), LsaEntryFlags::RECEIVED)
        .unwrap();
    let replaced = lsdb
        .set(Area::BACKBONE, new.clone(), LsaEntryFlags::SELF_ORIGINATED)
        .unwrap();
    assert_eq!(replaced, Some(old));

    let lse = lsdb.get_entry(Area::BACKBONE, &new.hdr.key()).unwrap();
    assert_eq!(lse.data, new);
    assert_eq!(lse.flags, LsaEntryFlags::SELF_ORIGINATED);
    assert_eq!(lsdb.area_lsas(Area::BACKBONE).len(), 1);
}

#[test]
fn test_delete() {
    let lsdb = Lsdb::new([Area::BACKBONE]);
    let lsa = router_lsa(ip4!("2.2.2.2"), 0x80000001);
    let key = lsa.hdr.key();

    lsdb.set(Area::BACKBONE, lsa.clone(), LsaEntryFlags::RECEIVED)
        .unwrap();
    assert_eq!(lsdb.delete(Area::BACKBONE, &key).unwrap(), Some(lsa));
    assert!(lsdb.get(Area::BACKBONE, &key).is_none());
    assert_eq!(lsdb.delete(Area::BACKBONE, &key).unwrap(), None);
}

#[test]
fn test_unknown_area_and_scope() {
    let lsdb = Lsdb::new([Area::BACKBONE]);
    let lsa = router_lsa(ip4!("2.2.2.2"), 0x80000001);

    assert!(lsdb.set(AREA1, lsa.clone(), LsaEntryFlags::empty()).is_err());
    assert!(lsdb.get(AREA1, &lsa.hdr.key()).is_none());

    let key = LsaKey::new(LsaType(10), ip4!("2.2.2.2"), ip4!("1.0.0.0"));
    assert!(lsdb.get(Area::BACKBONE, &key).is_none());
    assert!(lsdb.delete(Area::BACKBONE, &key).is_err());
}

#[test]
fn test_lsa_compare() {
    // Sequence numbers are compared as signed integers.
    assert_eq!(
        lsa_compare(&lsa_hdr(0x80000002, 0, 1), &lsa_hdr(0x80000001, 0, 1)),
        Ordering::Greater
    );
    assert_eq!(
        lsa_compare(&lsa_hdr(0x7fffffff, 0, 1), &lsa_hdr(0x80000001, 0, 1)),
        Ordering::Greater
    );

    // Then the checksum.
    assert_eq!(
        lsa_compare(&lsa_hdr(0x80000001, 2, 1), &lsa_hdr(0x80000001, 1, 1)),
        Ordering::Greater
    );

    // Then MaxAge.
    assert_eq!(
        lsa_compare(
            &lsa_hdr(0x80000001, 1, LSA_MAX_AGE),
            &lsa_hdr(0x80000001, 1, 1)
        ),
        Ordering::Greater
    );

    // Then a large enough age difference, younger is newer.
    assert_eq!(
        lsa_compare(
            &lsa_hdr(0x80000001, 1, 1),
            &lsa_hdr(0x80000001, 1, LSA_MAX_AGE_DIFF + 2)
        ),
        Ordering::Greater
    );
    assert_eq!(
        lsa_compare(
            &lsa_hdr(0x80000001, 1, 1),
            &lsa_hdr(0x80000001, 1, LSA_MAX_AGE_DIFF)
        ),
        Ordering::Equal
    );
}

#[test]
fn test_lsa_compare_current_age() {
    // Stored with an age close to MaxAge, 20 seconds ago.
    let mut lsa = (*router_lsa(ip4!("2.2.2.2"), 0x80000001)).clone();
    lsa.set_age(LSA_MAX_AGE - 10);
    lsa.base_time = Instant::now().checked_sub(Duration::from_secs(20));
    assert_eq!(lsa.age(), LSA_MAX_AGE);

    let mut rcvd_hdr = lsa.hdr;
    rcvd_hdr.age = LSA_MAX_AGE - 10;
    assert_eq!(lsa.current_hdr().age, LSA_MAX_AGE);
    assert_eq!(lsa_compare(&lsa.hdr, &rcvd_hdr), Ordering::Equal);
    assert_eq!(
        lsa_compare(&lsa.current_hdr(), &rcvd_hdr),
        Ordering::Greater
    );
}

#[test]
fn test_self_originated_lsas_skip_min_arrival() {
    let lsdb = Lsdb::new([Area::BACKBONE]);
    let lsa = router_lsa(ip4!("1.1.1.1"), 0x80000001);
    lsdb.set(Area::BACKBONE, lsa.clone(), LsaEntryFlags::SELF_ORIGINATED)
        .unwrap();

    let lse = lsdb.get_entry(Area::BACKBONE, &lsa.hdr.key()).unwrap();
    assert!(!lsa_min_arrival_check(&lse));
}
