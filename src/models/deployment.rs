//! Deployment model - requests, pipeline states and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::guest::{GuestId, ResourceKind};

/// A request to deploy one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Application name; becomes the hostname and the service unit name
    pub name: String,
    /// Framework registry key
    pub framework: String,
    /// Source repository; falls back to the framework's default
    pub repo: Option<String>,
    /// Container or VM
    pub kind: ResourceKind,
    /// Memory in MB (config default when unset)
    pub memory_mb: Option<u64>,
    /// CPU cores (config default when unset)
    pub cores: Option<u32>,
}

impl DeploymentRequest {
    pub fn new(name: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            framework: framework.into(),
            repo: None,
            kind: ResourceKind::Container,
            memory_mb: None,
            cores: None,
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_memory(mut self, mb: u64) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    pub fn with_cores(mut self, cores: u32) -> Self {
        self.cores = Some(cores);
        self
    }
}

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Allocate,
    Create,
    Start,
    Install,
    Fetch,
    Configure,
    Register,
    Settle,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Allocate => "Allocate",
            Stage::Create => "Create",
            Stage::Start => "Start",
            Stage::Install => "Install",
            Stage::Fetch => "Fetch",
            Stage::Configure => "Configure",
            Stage::Register => "Register",
            Stage::Settle => "Settle",
        };
        write!(f, "{}", s)
    }
}

/// State of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage")]
pub enum PipelineState {
    Requested,
    Allocated,
    Created,
    Started,
    DependenciesInstalled,
    SourceFetched,
    Configured,
    ServiceRegistered,
    /// Terminal success
    Running,
    /// Terminal failure at the given stage
    Failed(Stage),
}

impl PipelineState {
    /// State reached once `stage` has completed
    pub fn after(stage: Stage) -> Self {
        match stage {
            Stage::Allocate => PipelineState::Allocated,
            Stage::Create => PipelineState::Created,
            Stage::Start => PipelineState::Started,
            Stage::Install => PipelineState::DependenciesInstalled,
            Stage::Fetch => PipelineState::SourceFetched,
            Stage::Configure => PipelineState::Configured,
            Stage::Register => PipelineState::ServiceRegistered,
            Stage::Settle => PipelineState::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Failed(_))
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Failed(stage) => write!(f, "Failed({})", stage),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Root credentials generated for one guest, returned once
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Result of a successful deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub identity: GuestId,
    pub kind: ResourceKind,
    pub name: String,
    pub address: Ipv4Addr,
    pub framework: String,
    pub framework_name: String,
    pub repo: String,
    pub port: u16,
    pub service_url: String,
    pub ssh_hint: String,
    pub credentials: Credentials,
    pub state: PipelineState,
    pub deployed_at: DateTime<Utc>,
}

/// A pipeline run that has not finished yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDeployment {
    pub run_id: String,
    pub name: String,
    pub framework: String,
    pub identity: Option<GuestId>,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = DeploymentRequest::new("demo", "python-flask")
            .with_repo("https://example.com/r.git")
            .with_kind(ResourceKind::VirtualMachine)
            .with_memory(2048)
            .with_cores(4);

        assert_eq!(req.name, "demo");
        assert_eq!(req.repo.as_deref(), Some("https://example.com/r.git"));
        assert_eq!(req.kind, ResourceKind::VirtualMachine);
        assert_eq!(req.memory_mb, Some(2048));
        assert_eq!(req.cores, Some(4));
    }

    #[test]
    fn test_state_after_stage() {
        assert_eq!(PipelineState::after(Stage::Create), PipelineState::Created);
        assert_eq!(PipelineState::after(Stage::Configure), PipelineState::Configured);
        assert_eq!(PipelineState::after(Stage::Settle), PipelineState::Running);
        assert!(PipelineState::Running.is_terminal());
        assert!(PipelineState::Failed(Stage::Install).is_terminal());
        assert!(!PipelineState::Started.is_terminal());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "root".into(),
            password: "s3cret-value".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("root"));
        assert!(!debug.contains("s3cret-value"));
    }

    #[test]
    fn test_failed_state_display() {
        assert_eq!(PipelineState::Failed(Stage::Fetch).to_string(), "Failed(Fetch)");
        assert_eq!(PipelineState::SourceFetched.to_string(), "SourceFetched");
    }
}
