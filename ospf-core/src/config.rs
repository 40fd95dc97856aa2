//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::net::Ipv4Addr;

use derive_new::new;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::interface::InterfaceType;

// OSPF instance configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceCfg {
    pub router_id: Ipv4Addr,
    pub areas: Vec<AreaCfg>,
    pub interfaces: Vec<InterfaceCfg>,
}

// OSPF area configuration. Areas that aren't listed explicitly are created
// with default settings once an interface references them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AreaCfg {
    pub area_id: Ipv4Addr,
    pub stub: bool,
}

// OSPF interface configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub area_id: Ipv4Addr,
    pub if_type: InterfaceType,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub priority: u8,
    pub cost: u16,
}

// Operational data of a system interface, as learned from the OS.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceSys {
    pub ifindex: u32,
    pub mtu: u16,
    pub addr: Ipv4Network,
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    // Returns the configuration of the given area, or the defaults if the
    // area isn't explicitly configured.
    pub fn area(&self, area_id: Ipv4Addr) -> AreaCfg {
        self.areas
            .iter()
            .find(|area| area.area_id == area_id)
            .cloned()
            .unwrap_or_else(|| AreaCfg {
                area_id,
                ..Default::default()
            })
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            router_id: Ipv4Addr::UNSPECIFIED,
            areas: vec![],
            interfaces: vec![],
        }
    }
}

// ===== impl AreaCfg =====

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            stub: false,
        }
    }
}

// ===== impl InterfaceCfg =====

impl InterfaceCfg {
    pub const DFLT_HELLO_INTERVAL: u16 = 10;
    pub const DFLT_DEAD_INTERVAL: u32 = 40;
    pub const DFLT_RXMT_INTERVAL: u16 = 5;
    pub const DFLT_TRANSMIT_DELAY: u16 = 1;
    pub const DFLT_PRIORITY: u8 = 1;
    pub const DFLT_COST: u16 = 10;
}

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            name: String::new(),
            area_id: Ipv4Addr::UNSPECIFIED,
            if_type: InterfaceType::PointToPoint,
            hello_interval: Self::DFLT_HELLO_INTERVAL,
            dead_interval: Self::DFLT_DEAD_INTERVAL,
            retransmit_interval: Self::DFLT_RXMT_INTERVAL,
            transmit_delay: Self::DFLT_TRANSMIT_DELAY,
            priority: Self::DFLT_PRIORITY,
            cost: Self::DFLT_COST,
        }
    }
}
