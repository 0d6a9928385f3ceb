//! Proxmox VE command surface
//!
//! The orchestrator only talks to the host through the [`Hypervisor`] trait.
//! [`ProxmoxCli`] implements it by shelling out to `pct` and `qm` through a
//! [`CommandRunner`], which keeps the argument building testable without a
//! Proxmox host.

mod commands;
mod parse;
mod runner;
pub mod tags;

pub use commands::ProxmoxCli;
pub use parse::{parse_config, parse_pct_list, parse_qm_list, parse_status};
pub(crate) use parse::is_id_conflict;
pub use runner::{CommandRunner, TokioCommandRunner};
pub use tags::ServiceTag;

#[cfg(test)]
pub use runner::MockCommandRunner;

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::models::{Guest, GuestConfig, GuestEntry};
use crate::Result;

/// Exit status and captured streams of one actuation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr joined, trimmed, for diagnostics
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_string(),
            (false, true) => out.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }

    /// Human-readable exit description
    pub fn describe_exit(&self) -> String {
        match self.code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Everything needed to instantiate one guest
#[derive(Clone)]
pub struct CreateSpec {
    pub guest: Guest,
    pub hostname: String,
    pub memory_mb: u64,
    pub cores: u32,
    pub address: Ipv4Addr,
    pub netmask: u8,
    pub gateway: Ipv4Addr,
    /// Root password for the guest
    pub password: String,
    /// Free-text metadata; carries the encoded [`ServiceTag`]
    pub description: String,
}

impl std::fmt::Debug for CreateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateSpec")
            .field("guest", &self.guest)
            .field("hostname", &self.hostname)
            .field("memory_mb", &self.memory_mb)
            .field("cores", &self.cores)
            .field("address", &self.address)
            .field("netmask", &self.netmask)
            .field("gateway", &self.gateway)
            .field("password", &"********")
            .field("description", &self.description)
            .finish()
    }
}

/// Lifecycle and exec surface of the host.
///
/// Methods return `Err` only when the hypervisor could not be reached or the
/// call timed out. A command that ran and failed comes back as `Ok` with a
/// non-zero [`CommandOutput::code`]; callers decide whether that is fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Every container and VM on the host
    async fn list(&self) -> Result<Vec<GuestEntry>>;

    /// Parsed configuration; `GuestNotFound` if the guest does not exist
    async fn config(&self, guest: Guest) -> Result<GuestConfig>;

    async fn create(&self, spec: &CreateSpec) -> Result<CommandOutput>;

    async fn start(&self, guest: Guest) -> Result<CommandOutput>;

    async fn stop(&self, guest: Guest) -> Result<CommandOutput>;

    async fn destroy(&self, guest: Guest) -> Result<CommandOutput>;

    /// Power state such as `running` or `stopped`
    async fn status(&self, guest: Guest) -> Result<String>;

    /// Run a shell command inside the guest
    async fn exec(&self, guest: Guest, command: &str, timeout: Duration) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "partial\n".into(),
            stderr: "E: broken\n".into(),
        };
        assert_eq!(out.combined(), "partial\nE: broken");
        assert!(!out.success());
        assert_eq!(out.describe_exit(), "exited with status 1");

        assert_eq!(CommandOutput::failed(2, "nope").combined(), "nope");
        assert_eq!(CommandOutput { code: None, ..Default::default() }.describe_exit(), "terminated by signal");
    }

    #[test]
    fn test_create_spec_debug_hides_password() {
        let spec = CreateSpec {
            guest: Guest::container(300),
            hostname: "demo".into(),
            memory_mb: 1024,
            cores: 1,
            address: Ipv4Addr::new(10, 0, 0, 2),
            netmask: 24,
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            password: "Zx9-very-secret".into(),
            description: "Framework:go-gin|Port:8080".into(),
        };
        let debug = format!("{:?}", spec);
        assert!(!debug.contains("Zx9-very-secret"));
        assert!(debug.contains("go-gin"));
    }
}
