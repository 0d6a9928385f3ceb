//! Guest model - containers and VMs as the hypervisor reports them

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Numeric handle of a guest on the host (Proxmox VMID)
pub type GuestId = u32;

/// Kind of guest backing a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// LXC container, managed with `pct`
    #[default]
    #[serde(rename = "lxc", alias = "container")]
    Container,
    /// QEMU virtual machine, managed with `qm`
    #[serde(rename = "vm", alias = "qemu")]
    VirtualMachine,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Container => write!(f, "lxc"),
            ResourceKind::VirtualMachine => write!(f, "vm"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lxc" | "container" | "ct" => Ok(ResourceKind::Container),
            "vm" | "qemu" => Ok(ResourceKind::VirtualMachine),
            other => Err(format!("unknown resource type '{}' (expected lxc or vm)", other)),
        }
    }
}

/// A guest addressed by identity and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guest {
    pub id: GuestId,
    pub kind: ResourceKind,
}

impl Guest {
    pub fn container(id: GuestId) -> Self {
        Self { id, kind: ResourceKind::Container }
    }

    pub fn vm(id: GuestId) -> Self {
        Self { id, kind: ResourceKind::VirtualMachine }
    }

    /// Operator hint for getting a shell in the guest
    pub fn shell_hint(&self, address: Ipv4Addr) -> String {
        match self.kind {
            ResourceKind::Container => format!("pct enter {}", self.id),
            ResourceKind::VirtualMachine => format!("ssh root@{}", address),
        }
    }
}

impl std::fmt::Display for Guest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// One row of the hypervisor inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestEntry {
    pub guest: Guest,
    pub status: String,
    pub name: Option<String>,
}

/// Fields recovered from a guest's configuration dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestConfig {
    pub hostname: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub description: Option<String>,
}

/// A deployment reconstructed from live hypervisor state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedGuest {
    pub ctid: GuestId,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub hostname: Option<String>,
    pub status: String,
    pub ip: Option<Ipv4Addr>,
    pub framework: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    /// Why the description tag could not be decoded, if it could not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_error: Option<String>,
}

/// Live status of one guest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestStatus {
    pub ctid: GuestId,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_parse() {
        assert_eq!("lxc".parse::<ResourceKind>().unwrap(), ResourceKind::Container);
        assert_eq!("VM".parse::<ResourceKind>().unwrap(), ResourceKind::VirtualMachine);
        assert!("docker".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_resource_kind_serde() {
        let kind: ResourceKind = serde_json::from_str("\"container\"").unwrap();
        assert_eq!(kind, ResourceKind::Container);
        assert_eq!(serde_json::to_string(&ResourceKind::VirtualMachine).unwrap(), "\"vm\"");
    }

    #[test]
    fn test_shell_hint() {
        let ip = Ipv4Addr::new(192, 168, 171, 200);
        assert_eq!(Guest::container(300).shell_hint(ip), "pct enter 300");
        assert_eq!(Guest::vm(301).shell_hint(ip), "ssh root@192.168.171.200");
    }
}
