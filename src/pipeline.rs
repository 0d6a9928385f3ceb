//! Provisioning pipeline
//!
//! ```text
//! Requested -> Allocated -> Created -> Started -> DependenciesInstalled
//!   -> SourceFetched -> Configured -> ServiceRegistered -> Running
//! ```
//!
//! Every transition is one actuation against the host and counts as done
//! only on a zero exit. Any failure after Create hands the guest to the
//! [`RollbackController`] before the error is returned. Allocate and Create
//! run under one lock so concurrent pipelines in this process never pick the
//! same identity.

use chrono::Utc;
use regex::Regex;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::allocator::{Allocation, Allocator};
use crate::config::{OrchestratorConfig, SetupPolicy};
use crate::guest::{self, UnitOptions, SERVICE_PATH};
use crate::models::{
    Credentials, DeploymentRecord, DeploymentRequest, FrameworkSpec, Guest, GuestId,
    PipelineState, ResourceKind, Stage,
};
use crate::pool::PoolInspector;
use crate::proxmox::{is_id_conflict, CommandOutput, CreateSpec, Hypervisor, ServiceTag};
use crate::registry::FrameworkRegistry;
use crate::rollback::RollbackController;
use crate::secret::generate_password;
use crate::{Error, Result};

/// Hostname rule; the name is also used as the systemd unit name
pub static APP_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex")
});

static REPO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"^(https?://|ssh://|git@)[^\s'"\\`]+$"#).expect("valid regex")
});

const MIN_MEMORY_MB: u64 = 256;
const MAX_CORES: u32 = 128;

/// Receives every state transition of one run
pub type Progress<'a> = &'a (dyn Fn(PipelineState, Option<GuestId>) + Send + Sync);

/// `"My App"` -> `"my-app"`
pub fn normalize_name(raw: &str) -> String {
    raw.trim().replace(' ', "-").to_lowercase()
}

/// A request checked against the registry and config, ready to run
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub name: String,
    pub framework: FrameworkSpec,
    pub repo: String,
    pub kind: ResourceKind,
    pub memory_mb: u64,
    pub cores: u32,
}

impl DeploymentPlan {
    /// Validate `request` without touching the host
    pub fn resolve(
        request: &DeploymentRequest,
        registry: &FrameworkRegistry,
        config: &OrchestratorConfig,
    ) -> Result<Self> {
        let framework = registry.lookup(&request.framework)?.clone();

        let repo = request
            .repo
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .or_else(|| framework.default_source_repo.clone())
            .ok_or(Error::MissingRepository)?;
        if !REPO_URL_RE.is_match(&repo) {
            return Err(Error::Validation(format!("unsupported repository URL '{}'", repo)));
        }

        let name = normalize_name(&request.name);
        if !APP_NAME_RE.is_match(&name) {
            return Err(Error::Validation(format!(
                "invalid application name '{}': use lowercase letters, digits and '-'",
                request.name
            )));
        }

        let memory_mb = request.memory_mb.unwrap_or(config.default_memory_mb);
        if memory_mb < MIN_MEMORY_MB {
            return Err(Error::Validation(format!(
                "memory must be at least {} MB",
                MIN_MEMORY_MB
            )));
        }
        let cores = request.cores.unwrap_or(config.default_cores);
        if cores == 0 || cores > MAX_CORES {
            return Err(Error::Validation(format!("cores must be between 1 and {}", MAX_CORES)));
        }

        Ok(Self {
            name,
            framework,
            repo,
            kind: request.kind,
            memory_mb,
            cores,
        })
    }
}

pub struct Pipeline {
    hypervisor: Arc<dyn Hypervisor>,
    config: Arc<OrchestratorConfig>,
    inspector: PoolInspector,
    allocator: Allocator,
    rollback: RollbackController,
    create_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            inspector: PoolInspector::new(hypervisor.clone()),
            allocator: Allocator::new(&config),
            rollback: RollbackController::new(hypervisor.clone()),
            hypervisor,
            config,
            create_lock: Mutex::new(()),
        }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn inspector(&self) -> &PoolInspector {
        &self.inspector
    }

    pub fn rollback(&self) -> &RollbackController {
        &self.rollback
    }

    /// Drive `plan` to `Running` or to a clean failure
    pub async fn run(
        &self,
        plan: &DeploymentPlan,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<DeploymentRecord> {
        let password = generate_password(self.config.password_length);

        let alloc = match self.allocate_and_create(plan, &password, cancel, progress).await {
            Ok(alloc) => alloc,
            Err((stage, identity, e)) => {
                tracing::error!(%stage, error = %e, output = e.output().unwrap_or(""), "Deployment failed");
                progress(PipelineState::Failed(stage), identity);
                return Err(e);
            }
        };
        let guest = Guest {
            id: alloc.identity,
            kind: plan.kind,
        };

        let mut stage = Stage::Start;
        if let Err(e) = self.provision(guest, plan, cancel, &mut stage, progress).await {
            let e = e.redact(&password);
            tracing::error!(
                guest = %guest,
                %stage,
                error = %e,
                output = e.output().unwrap_or(""),
                "Deployment failed"
            );
            progress(PipelineState::Failed(stage), Some(guest.id));
            self.rollback.rollback(guest).await;
            return Err(e);
        }

        progress(PipelineState::after(Stage::Settle), Some(guest.id));
        let port = plan.framework.listen_port;
        tracing::info!(guest = %guest, address = %alloc.address, port, "Deployment running");

        Ok(DeploymentRecord {
            identity: guest.id,
            kind: guest.kind,
            name: plan.name.clone(),
            address: alloc.address,
            framework: plan.framework.key.clone(),
            framework_name: plan.framework.display_name.clone(),
            repo: plan.repo.clone(),
            port,
            service_url: format!("http://{}:{}", alloc.address, port),
            ssh_hint: guest.shell_hint(alloc.address),
            credentials: Credentials {
                username: "root".to_string(),
                password,
            },
            state: PipelineState::Running,
            deployed_at: Utc::now(),
        })
    }

    /// Allocate and Create under the host-wide lock.
    ///
    /// A Create that exits non-zero left nothing behind and is not rolled
    /// back. A Create that timed out, lost its transport or was cancelled may
    /// have half-built the guest, so that guest is rolled back.
    async fn allocate_and_create(
        &self,
        plan: &DeploymentPlan,
        password: &str,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> std::result::Result<Allocation, (Stage, Option<GuestId>, Error)> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err((Stage::Allocate, None, Error::Cancelled)),
            guard = self.create_lock.lock() => guard,
        };

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err((Stage::Allocate, None, Error::Cancelled));
            }

            let mut snapshot = self
                .inspector
                .snapshot()
                .await
                .map_err(|e| (Stage::Allocate, None, unavailable(e)))?;
            let alloc = self
                .allocator
                .allocate(&mut snapshot)
                .map_err(|e| (Stage::Allocate, None, e))?;
            progress(PipelineState::after(Stage::Allocate), Some(alloc.identity));
            tracing::info!(identity = alloc.identity, address = %alloc.address, "Allocated");

            let guest = Guest {
                id: alloc.identity,
                kind: plan.kind,
            };
            let spec = self.create_spec(plan, guest, alloc.address, password);
            let created = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = self.hypervisor.create(&spec) => r,
            };

            match created {
                Ok(out) if out.success() => {
                    progress(PipelineState::after(Stage::Create), Some(guest.id));
                    tracing::info!(guest = %guest, "Created");
                    return Ok(alloc);
                }
                Ok(out) if is_id_conflict(&out.combined()) && attempt < self.config.create_retries => {
                    attempt += 1;
                    tracing::warn!(guest = %guest, attempt, "Identity taken out of band, re-allocating");
                }
                Ok(out) => {
                    let e = failure(Stage::Create, &out).redact(password);
                    return Err((Stage::Create, Some(guest.id), e));
                }
                Err(e) => {
                    self.rollback.rollback(guest).await;
                    let e = stage_error(Stage::Create, e).redact(password);
                    return Err((Stage::Create, Some(guest.id), e));
                }
            }
        }
    }

    fn create_spec(
        &self,
        plan: &DeploymentPlan,
        guest: Guest,
        address: Ipv4Addr,
        password: &str,
    ) -> CreateSpec {
        CreateSpec {
            guest,
            hostname: plan.name.clone(),
            memory_mb: plan.memory_mb,
            cores: plan.cores,
            address,
            netmask: self.config.netmask,
            gateway: self.config.gateway,
            password: password.to_string(),
            description: ServiceTag::new(&plan.framework.key, plan.framework.listen_port).encode(),
        }
    }

    async fn provision(
        &self,
        guest: Guest,
        plan: &DeploymentPlan,
        cancel: &CancellationToken,
        stage: &mut Stage,
        progress: Progress<'_>,
    ) -> Result<()> {
        let timeouts = &self.config.timeouts;
        let id = Some(guest.id);

        *stage = Stage::Start;
        let out = actuate(Stage::Start, cancel, self.hypervisor.start(guest)).await?;
        require_success(Stage::Start, &out)?;
        settle(self.config.start_settle, cancel).await?;
        progress(PipelineState::after(Stage::Start), id);

        *stage = Stage::Install;
        tracing::info!(framework = %plan.framework.display_name, "Installing dependencies");
        self.exec(guest, Stage::Install, &plan.framework.install_command, timeouts.install, cancel)
            .await?;
        progress(PipelineState::after(Stage::Install), id);

        *stage = Stage::Fetch;
        tracing::info!(repo = %plan.repo, "Fetching source");
        let fetch = guest::fetch_command(&plan.repo, &self.config.app_dir);
        self.exec(guest, Stage::Fetch, &fetch, timeouts.fetch, cancel).await?;
        progress(PipelineState::after(Stage::Fetch), id);

        *stage = Stage::Configure;
        let setup = plan.framework.setup_command.trim();
        if !setup.is_empty() {
            let out = actuate(
                Stage::Configure,
                cancel,
                self.hypervisor.exec(guest, setup, timeouts.setup),
            )
            .await?;
            if !out.success() {
                match self.config.setup_policy {
                    SetupPolicy::Tolerate => tracing::warn!(
                        guest = %guest,
                        exit = %out.describe_exit(),
                        output = %out.combined(),
                        "Setup command failed, continuing"
                    ),
                    SetupPolicy::Strict => return Err(failure(Stage::Configure, &out)),
                }
            }
        }
        progress(PipelineState::after(Stage::Configure), id);

        *stage = Stage::Register;
        let options = UnitOptions {
            working_dir: self.config.app_dir.clone(),
            restart_sec: self.config.restart_sec,
            path: SERVICE_PATH.to_string(),
        };
        let unit = guest::render_unit(&plan.framework, &plan.name, &options);
        self.exec(
            guest,
            Stage::Register,
            &guest::install_unit_command(&plan.name, &unit),
            timeouts.register,
            cancel,
        )
        .await?;
        self.exec(
            guest,
            Stage::Register,
            &guest::register_command(&plan.name),
            timeouts.register,
            cancel,
        )
        .await?;
        progress(PipelineState::after(Stage::Register), id);

        *stage = Stage::Settle;
        settle(self.config.service_settle, cancel).await
    }

    /// In-guest command that must exit zero
    async fn exec(
        &self,
        guest: Guest,
        stage: Stage,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let out = actuate(stage, cancel, self.hypervisor.exec(guest, command, timeout)).await?;
        require_success(stage, &out)?;
        Ok(out)
    }
}

/// Await one actuation, giving up early on cancellation
async fn actuate<F>(stage: Stage, cancel: &CancellationToken, fut: F) -> Result<CommandOutput>
where
    F: Future<Output = Result<CommandOutput>> + Send,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        r = fut => r.map_err(|e| stage_error(stage, e)),
    }
}

/// Fixed wait; at least `delay` unless cancelled
async fn settle(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn require_success(stage: Stage, out: &CommandOutput) -> Result<()> {
    if out.success() {
        Ok(())
    } else {
        Err(failure(stage, out))
    }
}

fn failure(stage: Stage, out: &CommandOutput) -> Error {
    Error::Provisioning {
        stage,
        message: out.describe_exit(),
        output: out.combined(),
    }
}

/// Timeouts and transport errors during a stage count as that stage failing
fn stage_error(stage: Stage, e: Error) -> Error {
    match e {
        Error::Cancelled | Error::Provisioning { .. } => e,
        other => Error::Provisioning {
            stage,
            message: other.to_string(),
            output: String::new(),
        },
    }
}

fn unavailable(e: Error) -> Error {
    match e {
        Error::HypervisorUnavailable(_) => e,
        other => Error::HypervisorUnavailable(other.to_string()),
    }
}
