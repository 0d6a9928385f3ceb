//! Orchestrator configuration with builder pattern

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::models::GuestId;

/// What to do when the framework setup command exits non-zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupPolicy {
    /// Log and continue; setup scripts often fail on idempotent re-runs
    #[default]
    Tolerate,
    /// Treat as a fatal stage failure
    Strict,
}

/// Upper bounds for each hypervisor actuation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    /// list / config / status queries
    #[serde(with = "secs")]
    pub inspect: Duration,
    #[serde(with = "secs")]
    pub create: Duration,
    /// start / stop / destroy
    #[serde(with = "secs")]
    pub lifecycle: Duration,
    #[serde(with = "secs")]
    pub install: Duration,
    #[serde(with = "secs")]
    pub fetch: Duration,
    #[serde(with = "secs")]
    pub setup: Duration,
    #[serde(with = "secs")]
    pub register: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            inspect: Duration::from_secs(30),
            create: Duration::from_secs(120),
            lifecycle: Duration::from_secs(60),
            install: Duration::from_secs(900),
            fetch: Duration::from_secs(300),
            setup: Duration::from_secs(900),
            register: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Container base image
    pub template: String,
    /// Cloud-init VM template cloned for VM deployments
    pub vm_template_id: GuestId,
    /// Container root disk spec
    pub rootfs: String,
    pub bridge: String,
    /// First managed guest ID (inclusive)
    pub id_range_start: GuestId,
    /// End of the managed guest ID range (exclusive)
    pub id_range_end: GuestId,
    /// Network whose first three octets prefix every guest address
    pub subnet_base: Ipv4Addr,
    /// Last octet of the first guest address
    pub ip_start: u8,
    /// Number of addresses in the guest address window
    pub ip_window: u8,
    pub gateway: Ipv4Addr,
    /// Prefix length
    pub netmask: u8,
    /// Where the application source is cloned inside the guest
    pub app_dir: String,
    pub default_memory_mb: u64,
    pub default_cores: u32,
    /// Wait after power-on before the first exec
    #[serde(with = "secs")]
    pub start_settle: Duration,
    /// Wait after the service is started
    #[serde(with = "secs")]
    pub service_settle: Duration,
    /// Wait between stop and destroy when deleting
    #[serde(with = "secs")]
    pub stop_settle: Duration,
    /// Pause between deployments of a batch run
    #[serde(with = "secs")]
    pub batch_pause: Duration,
    pub timeouts: StageTimeouts,
    pub setup_policy: SetupPolicy,
    /// How often Create is retried after an "already exists" conflict
    pub create_retries: u32,
    pub password_length: usize,
    /// Unit RestartSec
    pub restart_sec: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            template: "local:vztmpl/ubuntu-22.04-standard_22.04-1_amd64.tar.zst".to_string(),
            vm_template_id: 9000,
            rootfs: "local-lvm:8".to_string(),
            bridge: "vmbr0".to_string(),
            id_range_start: 300,
            id_range_end: 399,
            subnet_base: Ipv4Addr::new(192, 168, 171, 0),
            ip_start: 200,
            ip_window: 55,
            gateway: Ipv4Addr::new(192, 168, 171, 2),
            netmask: 24,
            app_dir: "/opt/app".to_string(),
            default_memory_mb: 5120,
            default_cores: 2,
            start_settle: Duration::from_secs(15),
            service_settle: Duration::from_secs(5),
            stop_settle: Duration::from_secs(2),
            batch_pause: Duration::from_secs(5),
            timeouts: StageTimeouts::default(),
            setup_policy: SetupPolicy::Tolerate,
            create_retries: 3,
            password_length: 20,
            restart_sec: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Load a JSON config file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded orchestrator config");
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.id_range_start >= self.id_range_end {
            return Err(crate::Error::Config(format!(
                "guest ID range {}-{} is empty",
                self.id_range_start, self.id_range_end
            )));
        }
        if self.id_range_start < 100 {
            return Err(crate::Error::Config("guest IDs below 100 are reserved".into()));
        }
        if self.ip_start == 0 || self.ip_window == 0 {
            return Err(crate::Error::Config("address window cannot be empty".into()));
        }
        if u16::from(self.ip_start) + u16::from(self.ip_window) > 255 {
            return Err(crate::Error::Config(format!(
                "address window .{} + {} overflows the last octet",
                self.ip_start, self.ip_window
            )));
        }
        if self.netmask == 0 || self.netmask > 32 {
            return Err(crate::Error::Config(format!("invalid netmask /{}", self.netmask)));
        }
        if !self.app_dir.starts_with('/') || self.app_dir.contains('\'') {
            return Err(crate::Error::Config("app_dir must be an absolute path".into()));
        }
        if self.password_length < 12 {
            return Err(crate::Error::Config("password_length must be at least 12".into()));
        }
        if self.default_memory_mb < 256 || self.default_cores == 0 {
            return Err(crate::Error::Config("default guest size is too small".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn id_range(mut self, start: GuestId, end: GuestId) -> Self {
        self.config.id_range_start = start;
        self.config.id_range_end = end;
        self
    }

    pub fn address_window(mut self, ip_start: u8, len: u8) -> Self {
        self.config.ip_start = ip_start;
        self.config.ip_window = len;
        self
    }

    pub fn settle(mut self, start: Duration, service: Duration) -> Self {
        self.config.start_settle = start;
        self.config.service_settle = service;
        self
    }

    /// Zero every fixed delay
    pub fn no_delays(mut self) -> Self {
        self.config.start_settle = Duration::ZERO;
        self.config.service_settle = Duration::ZERO;
        self.config.stop_settle = Duration::ZERO;
        self.config.batch_pause = Duration::ZERO;
        self
    }

    pub fn timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn setup_policy(mut self, policy: SetupPolicy) -> Self {
        self.config.setup_policy = policy;
        self
    }

    pub fn create_retries(mut self, retries: u32) -> Self {
        self.config.create_retries = retries;
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

/// Serialize durations as whole seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
