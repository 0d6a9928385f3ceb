//! Proxmox Deployment Orchestrator
//!
//! Provisions application runtimes on a single Proxmox VE host: one LXC
//! container or QEMU VM per application, with the framework's runtime
//! installed, the source repository cloned and the app supervised by systemd.
//!
//! # Key Features
//!
//! - **Conflict-free allocation** - guest ID and static address picked from the
//!   live host inventory, serialized per process
//! - **All-or-nothing** - any failure after Create stops and destroys the guest
//! - **Stateless** - deployments are rebuilt from the guest description tag
//! - **Per-deployment secrets** - every guest gets its own root password
//!
//! # Example
//!
//! ```no_run
//! use pve_deploy::{DeploymentRequest, FrameworkRegistry, Orchestrator, OrchestratorConfig};
//!
//! # async fn run() -> pve_deploy::Result<()> {
//! let orchestrator = Orchestrator::proxmox(
//!     OrchestratorConfig::default(),
//!     FrameworkRegistry::builtin(),
//! )?;
//!
//! let record = orchestrator
//!     .deploy(DeploymentRequest::new("demo", "python-flask")
//!         .with_repo("https://github.com/example/app.git"))
//!     .await?;
//!
//! println!("{} is up at {}", record.name, record.service_url);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod guest;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod proxmox;
pub mod registry;
pub mod rollback;
pub mod secret;

pub use api::Server;
pub use config::{OrchestratorConfig, SetupPolicy, StageTimeouts};
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use orchestrator::Orchestrator;
pub use proxmox::{CommandOutput, CreateSpec, Hypervisor, ProxmoxCli};
pub use registry::FrameworkRegistry;
