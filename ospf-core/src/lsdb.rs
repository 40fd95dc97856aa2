//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::debug::Debug;
use crate::error::Error;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey, LsaScope};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_ARRIVAL: u64 = 1;

// Link-state database.
//
// Area-scoped LSAs live in one map per area, AS-scoped LSAs in a single
// global map. Each map has its own lock, and no lock is ever held across an
// await point.
#[derive(Debug)]
pub struct Lsdb {
    areas: BTreeMap<Ipv4Addr, Mutex<LsdbMap>>,
    as_external: Mutex<LsdbMap>,
}

pub type LsdbMap = BTreeMap<LsaKey, LsaEntry>;

#[derive(Clone, Debug)]
pub struct LsaEntry {
    // LSA data.
    pub data: Arc<Lsa>,
    // Installation time.
    pub installed: Instant,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub fn new(area_ids: impl IntoIterator<Item = Ipv4Addr>) -> Lsdb {
        Lsdb {
            areas: area_ids
                .into_iter()
                .map(|area_id| (area_id, Default::default()))
                .collect(),
            as_external: Default::default(),
        }
    }

    // Returns the identifiers of all areas known to this LSDB.
    pub fn area_ids(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.areas.keys().copied()
    }

    // Looks up an LSA. AS-scoped LSAs are found regardless of the area.
    pub fn get(&self, area_id: Ipv4Addr, key: &LsaKey) -> Option<Arc<Lsa>> {
        self.get_entry(area_id, key).map(|lse| lse.data)
    }

    pub fn get_entry(
        &self,
        area_id: Ipv4Addr,
        key: &LsaKey,
    ) -> Option<LsaEntry> {
        let map = self.map(area_id, key.lsa_type.scope()).ok()?;
        lock(map).get(key).cloned()
    }

    // Installs an LSA, replacing any previous instance with the same key.
    // Returns the replaced instance.
    pub fn set(
        &self,
        area_id: Ipv4Addr,
        lsa: Arc<Lsa>,
        flags: LsaEntryFlags,
    ) -> Result<Option<Arc<Lsa>>, Error> {
        let key = lsa.hdr.key();
        let map = self.map(area_id, key.lsa_type.scope())?;

        Debug::LsaInstall(&lsa.hdr).log();

        let lse = LsaEntry {
            data: lsa,
            installed: Instant::now(),
            flags,
        };
        let old = lock(map).insert(key, lse);
        Ok(old.map(|lse| lse.data))
    }

    // Removes an LSA. Returns the removed instance, if any.
    pub fn delete(
        &self,
        area_id: Ipv4Addr,
        key: &LsaKey,
    ) -> Result<Option<Arc<Lsa>>, Error> {
        let map = self.map(area_id, key.lsa_type.scope())?;
        let old = lock(map).remove(key);
        Ok(old.map(|lse| lse.data))
    }

    // Returns all LSAs of the given area, in key order.
    pub fn area_lsas(&self, area_id: Ipv4Addr) -> Vec<Arc<Lsa>> {
        match self.areas.get(&area_id) {
            Some(map) => {
                lock(map).values().map(|lse| lse.data.clone()).collect()
            }
            None => vec![],
        }
    }

    // Returns all AS-external LSAs, in key order.
    pub fn as_external_lsas(&self) -> Vec<Arc<Lsa>> {
        lock(&self.as_external)
            .values()
            .map(|lse| lse.data.clone())
            .collect()
    }

    // Returns the LSAs that must be described to a neighbor of the given
    // area during the database exchange.
    pub fn summary_lsas(
        &self,
        area_id: Ipv4Addr,
        include_external: bool,
    ) -> Vec<Arc<Lsa>> {
        let mut lsas = self.area_lsas(area_id);
        if include_external {
            lsas.extend(self.as_external_lsas());
        }
        lsas
    }

    fn map(
        &self,
        area_id: Ipv4Addr,
        scope: LsaScope,
    ) -> Result<&Mutex<LsdbMap>, Error> {
        match scope {
            LsaScope::Area => self
                .areas
                .get(&area_id)
                .ok_or(Error::UnknownArea(area_id)),
            LsaScope::As => Ok(&self.as_external),
            LsaScope::Unknown => {
                Err(Error::InvariantViolation("LSA of unknown flooding scope"))
            }
        }
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in
// Section 13.1 of RFC 2328. Headers of stored LSAs must carry their current
// age (see `Lsa::current_hdr`).
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

// Checks whether the database copy was installed less than MinLSArrival
// seconds ago, in which case a newer instance received from the network must
// be discarded.
pub fn lsa_min_arrival_check(lse: &LsaEntry) -> bool {
    if !lse.flags.contains(LsaEntryFlags::RECEIVED) {
        return false;
    }

    #[cfg(feature = "deterministic")]
    {
        false
    }
    #[cfg(not(feature = "deterministic"))]
    {
        lse.installed.elapsed() < Duration::from_secs(LSA_MIN_ARRIVAL)
    }
}

fn lock(map: &Mutex<LsdbMap>) -> MutexGuard<'_, LsdbMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}
