//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;
use ospf_core::config::InterfaceSys;
use tracing::warn;

const DFLT_MTU: u16 = 1500;

// Collects the operational data of all system interfaces.
//
// Only the first IPv4 address of each interface is considered. Interfaces
// without an IPv4 address are reported with 0.0.0.0/0.
pub(crate) fn interfaces() -> nix::Result<BTreeMap<String, InterfaceSys>> {
    let mut interfaces = BTreeMap::new();

    for ifaddr in getifaddrs()? {
        let ifname = ifaddr.interface_name;
        let Ok(ifindex) = if_nametoindex(ifname.as_str()) else {
            continue;
        };
        let iface = interfaces.entry(ifname.clone()).or_insert_with(|| {
            InterfaceSys::new(
                ifindex,
                interface_mtu(&ifname),
                Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap(),
            )
        });
        if !iface.addr.ip().is_unspecified() {
            continue;
        }

        let addr = ifaddr
            .address
            .as_ref()
            .and_then(|addr| addr.as_sockaddr_in())
            .map(|addr| addr.ip());
        let mask = ifaddr
            .netmask
            .as_ref()
            .and_then(|mask| mask.as_sockaddr_in())
            .map(|mask| mask.ip());
        if let (Some(addr), Some(mask)) = (addr, mask) {
            match Ipv4Network::with_netmask(addr, mask) {
                Ok(network) => iface.addr = network,
                Err(error) => {
                    warn!(%ifname, %addr, %mask, %error, "invalid address");
                }
            }
        }
    }

    Ok(interfaces)
}

fn interface_mtu(ifname: &str) -> u16 {
    let path = format!("/sys/class/net/{ifname}/mtu");
    match std::fs::read_to_string(&path) {
        Ok(mtu) => match mtu.trim().parse() {
            Ok(mtu) => mtu,
            Err(error) => {
                warn!(%ifname, %error, "failed to parse interface MTU");
                DFLT_MTU
            }
        },
        Err(error) => {
            warn!(%ifname, %error, "failed to read interface MTU");
            DFLT_MTU
        }
    }
}
