//! Resource pool inspection
//!
//! The host is the only source of truth for which identities and addresses
//! are taken. Nothing is cached between calls: every snapshot is rebuilt from
//! a fresh `list` plus one `config` per guest.

use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::models::{GuestEntry, GuestId};
use crate::proxmox::Hypervisor;
use crate::{Error, Result};

/// Identities and addresses in use at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub identities: BTreeSet<GuestId>,
    pub addresses: HashSet<Ipv4Addr>,
}

impl PoolSnapshot {
    pub fn new(
        identities: impl IntoIterator<Item = GuestId>,
        addresses: impl IntoIterator<Item = Ipv4Addr>,
    ) -> Self {
        Self {
            identities: identities.into_iter().collect(),
            addresses: addresses.into_iter().collect(),
        }
    }

    pub fn has_identity(&self, id: GuestId) -> bool {
        self.identities.contains(&id)
    }

    pub fn has_address(&self, addr: Ipv4Addr) -> bool {
        self.addresses.contains(&addr)
    }

    /// Mark a pair as taken so later allocations from this snapshot skip it
    pub fn reserve(&mut self, id: GuestId, addr: Ipv4Addr) {
        self.identities.insert(id);
        self.addresses.insert(addr);
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.addresses.is_empty()
    }
}

/// Read-only view of the host's live inventory
#[derive(Clone)]
pub struct PoolInspector {
    hypervisor: Arc<dyn Hypervisor>,
}

impl PoolInspector {
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self { hypervisor }
    }

    pub async fn entries(&self) -> Result<Vec<GuestEntry>> {
        self.hypervisor.list().await
    }

    /// Every guest ID on the host, containers and VMs alike
    pub async fn list_allocated_identities(&self) -> Result<BTreeSet<GuestId>> {
        Ok(self.entries().await?.iter().map(|e| e.guest.id).collect())
    }

    /// Every static address configured on a guest
    pub async fn list_allocated_addresses(&self) -> Result<HashSet<Ipv4Addr>> {
        let entries = self.entries().await?;
        self.addresses_of(&entries).await
    }

    /// Identities and addresses from a single inventory listing
    pub async fn snapshot(&self) -> Result<PoolSnapshot> {
        let entries = self.entries().await?;
        let addresses = self.addresses_of(&entries).await?;
        let snapshot = PoolSnapshot {
            identities: entries.iter().map(|e| e.guest.id).collect(),
            addresses,
        };
        tracing::debug!(
            identities = snapshot.identities.len(),
            addresses = snapshot.addresses.len(),
            "Pool snapshot"
        );
        Ok(snapshot)
    }

    async fn addresses_of(&self, entries: &[GuestEntry]) -> Result<HashSet<Ipv4Addr>> {
        let mut addresses = HashSet::new();
        for entry in entries {
            match self.hypervisor.config(entry.guest).await {
                Ok(config) => addresses.extend(config.address),
                // removed between list and config
                Err(Error::GuestNotFound(_)) => {}
                // an unreadable guest may hold any address in the window
                Err(e) => {
                    tracing::warn!(guest = %entry.guest, error = %e, "Unreadable guest config");
                    return Err(e);
                }
            }
        }
        Ok(addresses)
    }
}
