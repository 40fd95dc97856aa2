//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use derive_new::new;
use ipnetwork::Ipv4Network;
use ospf_utils::ip::{Ipv4AddrExt, Ipv4NetworkExt};
use serde::{Deserialize, Serialize};

use crate::config::{InterfaceCfg, InterfaceSys};
use crate::error::ConfigError;
use crate::interface::InterfaceType;
use crate::packet::Options;
use crate::packet::lsa::{
    LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType, LsaType,
    LsaTypeCode,
};

// OSPF area.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Area {
    // Area ID.
    pub area_id: Ipv4Addr,
    // Whether AS-external LSAs are kept out of this area.
    pub stub: bool,
}

// Area interface, as seen by the Router-LSA origination.
#[derive(Debug, new)]
pub struct AreaInterface<'a> {
    pub config: &'a InterfaceCfg,
    pub system: &'a InterfaceSys,
    // Router IDs of the fully adjacent neighbors.
    pub full_nbrs: Vec<Ipv4Addr>,
}

// ===== impl Area =====

impl Area {
    pub const BACKBONE: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

    pub fn new(area_id: Ipv4Addr, stub: bool) -> Result<Area, ConfigError> {
        if area_id == Self::BACKBONE && stub {
            return Err(ConfigError::StubBackbone);
        }

        Ok(Area { area_id, stub })
    }

    pub fn is_backbone(&self) -> bool {
        self.area_id == Self::BACKBONE
    }

    // Whether AS-external LSAs are flooded into this area.
    pub fn external_routing_capability(&self) -> bool {
        !self.stub
    }

    // Options used in Hello and Database Description packets and in
    // self-originated LSAs.
    pub fn options(&self) -> Options {
        let mut options = Options::empty();
        if self.external_routing_capability() {
            options.insert(Options::E);
        }
        options
    }

    // Checks whether LSAs of the given type are accepted in this area.
    pub fn lsa_type_is_valid(&self, lsa_type: LsaType) -> bool {
        match lsa_type.type_code() {
            Some(LsaTypeCode::AsExternal) => {
                self.external_routing_capability()
            }
            Some(_) => true,
            None => false,
        }
    }

    // Builds the body of the router's Router-LSA for this area
    // (RFC 2328 Section 12.4.1).
    pub fn router_lsa_body(&self, ifaces: &[AreaInterface<'_>]) -> LsaRouter {
        let mut links = vec![];

        for iface in ifaces {
            let addr = iface.system.addr;
            let cost = iface.config.cost;

            match iface.config.if_type {
                InterfaceType::PointToPoint => {
                    // Add a Type-1 link (p2p) for each fully adjacent neighbor.
                    links.extend(iface.full_nbrs.iter().map(|router_id| {
                        LsaRouterLink::new(
                            LsaRouterLinkType::PointToPoint,
                            *router_id,
                            addr.ip(),
                            cost,
                        )
                    }));

                    // Add a Type-3 (stub) link for the subnet.
                    links.push(stub_link(addr.apply_mask(), cost));
                }
                InterfaceType::PointToMultipoint => {
                    // Add a Type-1 link (p2p) for each fully adjacent neighbor.
                    links.extend(iface.full_nbrs.iter().map(|router_id| {
                        LsaRouterLink::new(
                            LsaRouterLinkType::PointToPoint,
                            *router_id,
                            addr.ip(),
                            cost,
                        )
                    }));

                    // Add a Type-3 (stub) link for the interface address.
                    links.push(stub_link(addr.ip().to_host_prefix(), 0));
                }
                InterfaceType::Broadcast
                | InterfaceType::NonBroadcast
                | InterfaceType::VirtualLink => {
                    // Without a Designated Router there's no transit network
                    // to describe.
                    links.push(stub_link(addr.apply_mask(), cost));
                }
            }
        }

        LsaRouter {
            flags: LsaRouterFlags::empty(),
            links,
        }
    }
}

// ===== helper functions =====

fn stub_link(network: Ipv4Network, metric: u16) -> LsaRouterLink {
    LsaRouterLink::new(
        LsaRouterLinkType::StubNetwork,
        network.network(),
        network.mask(),
        metric,
    )
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backbone_is_rejected() {
        assert_eq!(
            Area::new(Area::BACKBONE, true),
            Err(ConfigError::StubBackbone)
        );
        assert!(Area::new(Area::BACKBONE, false).is_ok());
        assert!(Area::new(Ipv4Addr::new(0, 0, 0, 1), true).is_ok());
    }

    #[test]
    fn stub_area_rejects_external_lsas() {
        let area = Area::new(Ipv4Addr::new(0, 0, 0, 1), true).unwrap();
        assert!(!area.lsa_type_is_valid(LsaTypeCode::AsExternal.into()));
        assert!(area.lsa_type_is_valid(LsaTypeCode::Router.into()));
        assert!(!area.lsa_type_is_valid(LsaType(11)));
        assert!(!area.options().contains(Options::E));
    }
}
