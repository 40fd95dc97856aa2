//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    /// Returns true if this is an address that can be assigned to an
    /// interface and used as the source of a unicast packet.
    fn is_usable(&self) -> bool;

    /// Returns the /32 prefix covering this address.
    fn to_host_prefix(&self) -> Ipv4Network;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    /// Returns the network with all host bits cleared.
    fn apply_mask(&self) -> Ipv4Network;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    fn is_usable(&self) -> bool {
        !(self.is_loopback()
            || self.is_broadcast()
            || self.is_multicast()
            || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::from(*self)
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    fn apply_mask(&self) -> Ipv4Network {
        // The network address always fits the prefix length it came from.
        Ipv4Network::new(self.network(), self.prefix()).unwrap_or(*self)
    }
}

// ===== unit tests =====
