//! Identity and address allocation
//!
//! Identities come from a half-open range scanned in ascending order. The
//! address for an identity is derived from its offset in that range so
//! operators can predict one from the other:
//!
//! ```text
//! identity 300 -> 192.168.171.200
//! identity 301 -> 192.168.171.201
//! ```
//!
//! When the derived address is already taken (for example assigned by hand)
//! the allocator probes forward through the address window, then wraps to the
//! start of the window before giving up.

use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

use crate::config::OrchestratorConfig;
use crate::models::GuestId;
use crate::pool::PoolSnapshot;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub identity: GuestId,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct Allocator {
    range_start: GuestId,
    range_end: GuestId,
    prefix: [u8; 3],
    ip_start: u8,
    ip_window: u8,
}

impl Allocator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        let [a, b, c, _] = config.subnet_base.octets();
        Self {
            range_start: config.id_range_start,
            range_end: config.id_range_end,
            prefix: [a, b, c],
            ip_start: config.ip_start,
            ip_window: config.ip_window,
        }
    }

    pub fn contains(&self, id: GuestId) -> bool {
        (self.range_start..self.range_end).contains(&id)
    }

    pub fn first_address(&self) -> Ipv4Addr {
        self.address_at(0)
    }

    pub fn last_address(&self) -> Ipv4Addr {
        self.address_at(self.ip_window.saturating_sub(1))
    }

    fn address_at(&self, slot: u8) -> Ipv4Addr {
        let [a, b, c] = self.prefix;
        Ipv4Addr::new(a, b, c, self.ip_start.saturating_add(slot))
    }

    /// Lowest identity in range that is not in `used`
    pub fn allocate_identity(&self, used: &BTreeSet<GuestId>) -> Option<GuestId> {
        (self.range_start..self.range_end).find(|id| !used.contains(id))
    }

    /// Deterministic address for `identity`, probing past collisions
    pub fn allocate_address(&self, identity: GuestId, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
        let window = u32::from(self.ip_window);
        if window == 0 {
            return None;
        }
        let offset = identity.saturating_sub(self.range_start);
        let candidate = if offset < window { offset } else { 0 };

        (candidate..window)
            .chain(0..candidate)
            .map(|slot| self.address_at(slot as u8))
            .find(|addr| !used.contains(addr))
    }

    /// Pick an identity and address from `snapshot` and reserve both in it
    pub fn allocate(&self, snapshot: &mut PoolSnapshot) -> Result<Allocation> {
        let identity = self
            .allocate_identity(&snapshot.identities)
            .ok_or(Error::IdentityExhausted {
                start: self.range_start,
                end: self.range_end,
            })?;
        let address = self
            .allocate_address(identity, &snapshot.addresses)
            .ok_or(Error::AddressExhausted {
                first: self.first_address(),
                last: self.last_address(),
            })?;

        snapshot.reserve(identity, address);
        Ok(Allocation { identity, address })
    }
}
