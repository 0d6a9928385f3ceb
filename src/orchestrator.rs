//! Orchestrator - entry point for deployments and inventory operations

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::allocator::Allocator;
use crate::config::OrchestratorConfig;
use crate::guest;
use crate::models::{
    ActiveDeployment, DeploymentRecord, DeploymentRequest, FrameworkSpec, Guest, GuestEntry,
    GuestId, GuestStatus, ListedGuest, PipelineState, ResourceKind,
};
use crate::pipeline::{DeploymentPlan, Pipeline};
use crate::proxmox::{Hypervisor, ProxmoxCli, ServiceTag};
use crate::registry::FrameworkRegistry;
use crate::{Error, Result};

/// Result of deleting one guest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub ctid: GuestId,
    /// False when there was nothing to delete
    pub existed: bool,
}

/// One line of a batch deployment report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub framework: String,
    pub framework_name: String,
    /// `success` or `error`
    pub status: String,
    pub ctid: Option<GuestId>,
    pub ip: Option<std::net::Ipv4Addr>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub message: String,
}

impl BatchEntry {
    fn from_result(spec: &FrameworkSpec, result: &Result<DeploymentRecord>) -> Self {
        match result {
            Ok(record) => Self {
                framework: spec.key.clone(),
                framework_name: spec.display_name.clone(),
                status: "success".to_string(),
                ctid: Some(record.identity),
                ip: Some(record.address),
                port: Some(record.port),
                url: Some(record.service_url.clone()),
                message: format!("Deployed successfully! Access at {}", record.service_url),
            },
            Err(e) => Self {
                framework: spec.key.clone(),
                framework_name: spec.display_name.clone(),
                status: "error".to_string(),
                ctid: None,
                ip: None,
                port: None,
                url: None,
                message: e.to_string(),
            },
        }
    }
}

type ActiveTable = Arc<RwLock<HashMap<Uuid, ActiveDeployment>>>;

/// Removes a run from the active table however the run ends
struct ActiveGuard {
    table: ActiveTable,
    run_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.table.write().remove(&self.run_id);
    }
}

/// Stateless controller over the host's live inventory
pub struct Orchestrator {
    hypervisor: Arc<dyn Hypervisor>,
    registry: Arc<FrameworkRegistry>,
    config: Arc<OrchestratorConfig>,
    pipeline: Pipeline,
    active: ActiveTable,
}

impl Orchestrator {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        registry: Arc<FrameworkRegistry>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            pipeline: Pipeline::new(hypervisor.clone(), config.clone()),
            hypervisor,
            registry,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Orchestrator driving the local Proxmox host through `pct`/`qm`
    pub fn proxmox(config: OrchestratorConfig, registry: FrameworkRegistry) -> Result<Self> {
        let cli = ProxmoxCli::from_config(&config);
        Self::new(Arc::new(cli), Arc::new(registry), config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn frameworks(&self) -> &[FrameworkSpec] {
        self.registry.list()
    }

    fn allocator(&self) -> &Allocator {
        self.pipeline.allocator()
    }

    /// Deploy one application and wait for it to reach `Running`
    pub async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentRecord> {
        self.deploy_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`deploy`](Self::deploy), but stops early when `cancel` fires.
    ///
    /// A cancelled run that already created its guest still rolls it back.
    pub async fn deploy_with_cancel(
        &self,
        request: DeploymentRequest,
        cancel: CancellationToken,
    ) -> Result<DeploymentRecord> {
        let plan = DeploymentPlan::resolve(&request, &self.registry, &self.config)?;

        let run_id = Uuid::new_v4();
        self.active.write().insert(
            run_id,
            ActiveDeployment {
                run_id: run_id.to_string(),
                name: plan.name.clone(),
                framework: plan.framework.key.clone(),
                identity: None,
                state: PipelineState::Requested,
                started_at: Utc::now(),
            },
        );
        let _guard = ActiveGuard {
            table: self.active.clone(),
            run_id,
        };

        let table = self.active.clone();
        let progress = move |state: PipelineState, identity: Option<GuestId>| {
            if let Some(entry) = table.write().get_mut(&run_id) {
                entry.state = state;
                if identity.is_some() {
                    entry.identity = identity;
                }
            }
        };

        let span = tracing::info_span!(
            "deploy",
            %run_id,
            name = %plan.name,
            framework = %plan.framework.key,
            kind = %plan.kind
        );
        async {
            tracing::info!(repo = %plan.repo, memory_mb = plan.memory_mb, cores = plan.cores, "Deployment requested");
            self.pipeline.run(&plan, &cancel, &progress).await
        }
        .instrument(span)
        .await
    }

    /// Pipelines that have not finished yet
    pub fn active_deployments(&self) -> Vec<ActiveDeployment> {
        let mut runs: Vec<_> = self
            .active
            .read()
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Deployments in the managed range, rebuilt from host metadata
    pub async fn list(&self) -> Result<Vec<ListedGuest>> {
        let mut entries: Vec<GuestEntry> = self
            .hypervisor
            .list()
            .await?
            .into_iter()
            .filter(|e| self.allocator().contains(e.guest.id))
            .collect();
        entries.sort_by_key(|e| e.guest.id);

        let mut listed = Vec::with_capacity(entries.len());
        for entry in entries {
            let config = match self.hypervisor.config(entry.guest).await {
                Ok(config) => config,
                Err(Error::GuestNotFound(_)) => continue,
                Err(Error::Command { action, output }) => {
                    tracing::warn!(guest = %entry.guest, %action, %output, "Unreadable guest config");
                    listed.push(ListedGuest {
                        ctid: entry.guest.id,
                        kind: entry.guest.kind,
                        hostname: entry.name,
                        status: entry.status,
                        ip: None,
                        framework: None,
                        port: None,
                        url: None,
                        tag_error: Some("guest config unreadable".to_string()),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let tag = match config.description.as_deref() {
                Some(desc) => ServiceTag::decode(desc).map_err(|e| e.to_string()),
                None => Err("no description tag".to_string()),
            };
            let (framework, port, tag_error) = match tag {
                Ok(tag) => (Some(tag.framework), Some(tag.port), None),
                Err(reason) => (None, None, Some(reason)),
            };
            let url = match (config.address, port) {
                (Some(ip), Some(port)) => Some(format!("http://{}:{}", ip, port)),
                _ => None,
            };

            listed.push(ListedGuest {
                ctid: entry.guest.id,
                kind: entry.guest.kind,
                hostname: config.hostname.or(entry.name),
                status: entry.status,
                ip: config.address,
                framework,
                port,
                url,
                tag_error,
            });
        }
        Ok(listed)
    }

    async fn find(&self, id: GuestId) -> Result<Option<GuestEntry>> {
        Ok(self
            .hypervisor
            .list()
            .await?
            .into_iter()
            .find(|e| e.guest.id == id))
    }

    async fn require(&self, id: GuestId) -> Result<GuestEntry> {
        self.find(id).await?.ok_or(Error::GuestNotFound(id))
    }

    pub async fn status(&self, id: GuestId) -> Result<GuestStatus> {
        let entry = self.require(id).await?;
        let status = self.hypervisor.status(entry.guest).await?;
        Ok(GuestStatus {
            ctid: id,
            kind: entry.guest.kind,
            status,
        })
    }

    /// Last `lines` lines of the application's service journal
    pub async fn logs(&self, id: GuestId, lines: u32) -> Result<String> {
        let entry = self.require(id).await?;
        let unit = match self.hypervisor.config(entry.guest).await?.hostname {
            Some(hostname) => hostname,
            None => entry
                .name
                .ok_or_else(|| Error::Validation(format!("guest {} has no hostname", id)))?,
        };

        let out = self
            .hypervisor
            .exec(
                entry.guest,
                &guest::logs_command(&unit, lines),
                self.config.timeouts.inspect,
            )
            .await?;
        if !out.success() {
            return Err(Error::Command {
                action: format!("journalctl for {}", Guest { id, kind: entry.guest.kind }),
                output: out.combined(),
            });
        }
        Ok(out.stdout)
    }

    /// Stop and destroy a managed guest; deleting a missing guest succeeds
    pub async fn delete(&self, id: GuestId) -> Result<DeleteOutcome> {
        if !self.allocator().contains(id) {
            return Err(Error::Validation(format!(
                "guest {} is outside the managed range {}-{}",
                id, self.config.id_range_start, self.config.id_range_end
            )));
        }

        let Some(entry) = self.find(id).await? else {
            tracing::info!(ctid = id, "Delete requested for absent guest");
            return Ok(DeleteOutcome { ctid: id, existed: false });
        };
        let guest = entry.guest;

        match self.hypervisor.stop(guest).await {
            Ok(out) if !out.success() => {
                tracing::debug!(guest = %guest, output = %out.combined(), "Stop failed, guest may already be stopped")
            }
            Err(e) => tracing::warn!(guest = %guest, error = %e, "Stop failed"),
            Ok(_) => {}
        }
        if !self.config.stop_settle.is_zero() {
            tokio::time::sleep(self.config.stop_settle).await;
        }

        let out = self.hypervisor.destroy(guest).await?;
        if !out.success() {
            return Err(Error::Command {
                action: format!("destroy {}", guest),
                output: out.combined(),
            });
        }
        tracing::info!(guest = %guest, "Deleted");
        Ok(DeleteOutcome { ctid: id, existed: true })
    }

    /// Deploy every registered framework with its sample repository, one at a time
    pub async fn deploy_all(&self, kind: ResourceKind, cancel: CancellationToken) -> Vec<BatchEntry> {
        let mut results = Vec::with_capacity(self.registry.len());

        for (i, spec) in self.registry.list().iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(remaining = self.registry.len() - i, "Batch deployment cancelled");
                break;
            }
            if i > 0 && !self.config.batch_pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.batch_pause) => {}
                }
            }

            let request = DeploymentRequest::new(format!("test-{}", spec.key), &spec.key).with_kind(kind);
            let result = self.deploy_with_cancel(request, cancel.child_token()).await;
            results.push(BatchEntry::from_result(spec, &result));
        }

        let ok = results.iter().filter(|r| r.status == "success").count();
        tracing::info!(succeeded = ok, total = results.len(), "Batch deployment finished");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GuestConfig;
    use crate::proxmox::{CommandOutput, MockHypervisor};

    fn orchestrator(hv: MockHypervisor) -> Orchestrator {
        Orchestrator::new(
            Arc::new(hv),
            Arc::new(FrameworkRegistry::builtin()),
            OrchestratorConfig::builder().no_delays().build(),
        )
        .unwrap()
    }

    fn entry(guest: Guest, name: &str) -> GuestEntry {
        GuestEntry {
            guest,
            status: "running".into(),
            name: Some(name.into()),
        }
    }

    #[tokio::test]
    async fn test_unknown_framework_performs_no_actuation() {
        let mut hv = MockHypervisor::new();
        hv.expect_list().never();
        hv.expect_create().never();

        let err = orchestrator(hv)
            .deploy(DeploymentRequest::new("demo", "unknown-fw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFramework(ref k) if k == "unknown-fw"));
    }

    #[tokio::test]
    async fn test_list_reconstructs_from_tags() {
        let mut hv = MockHypervisor::new();
        hv.expect_list().returning(|| {
            Ok(vec![
                entry(Guest::container(300), "demo"),
                entry(Guest::container(301), "legacy"),
                entry(Guest::container(105), "unmanaged"),
            ])
        });
        hv.expect_config().returning(|guest| {
            Ok(match guest.id {
                300 => GuestConfig {
                    hostname: Some("demo".into()),
                    address: Some(std::net::Ipv4Addr::new(192, 168, 171, 200)),
                    description: Some("Framework:python-flask|Port:8000".into()),
                },
                _ => GuestConfig {
                    hostname: Some("legacy".into()),
                    address: None,
                    description: Some("handmade".into()),
                },
            })
        });

        let listed = orchestrator(hv).list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].framework.as_deref(), Some("python-flask"));
        assert_eq!(listed[0].port, Some(8000));
        assert_eq!(listed[0].url.as_deref(), Some("http://192.168.171.200:8000"));
        assert!(listed[0].tag_error.is_none());
        assert!(listed[1].framework.is_none());
        assert!(listed[1].tag_error.is_some());
    }

    #[tokio::test]
    async fn test_delete_absent_guest_is_ok() {
        let mut hv = MockHypervisor::new();
        hv.expect_list().returning(|| Ok(vec![]));
        hv.expect_stop().never();
        hv.expect_destroy().never();

        let outcome = orchestrator(hv).delete(320).await.unwrap();
        assert!(!outcome.existed);
    }

    #[tokio::test]
    async fn test_delete_outside_range_is_rejected() {
        let mut hv = MockHypervisor::new();
        hv.expect_list().never();

        let err = orchestrator(hv).delete(100).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_ignores_stop_failure() {
        let mut hv = MockHypervisor::new();
        hv.expect_list()
            .returning(|| Ok(vec![entry(Guest::vm(310), "api")]));
        hv.expect_stop()
            .times(1)
            .returning(|_| Ok(CommandOutput::failed(1, "VM 310 not running")));
        hv.expect_destroy()
            .withf(|g| *g == Guest::vm(310))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));

        let outcome = orchestrator(hv).delete(310).await.unwrap();
        assert!(outcome.existed);
    }

    #[tokio::test]
    async fn test_status_of_missing_guest() {
        let mut hv = MockHypervisor::new();
        hv.expect_list().returning(|| Ok(vec![]));

        let err = orchestrator(hv).status(399).await.unwrap_err();
        assert!(matches!(err, Error::GuestNotFound(399)));
    }

    #[tokio::test]
    async fn test_logs_reads_service_journal() {
        let mut hv = MockHypervisor::new();
        hv.expect_list()
            .returning(|| Ok(vec![entry(Guest::container(300), "demo")]));
        hv.expect_config().returning(|_| {
            Ok(GuestConfig {
                hostname: Some("demo".into()),
                ..Default::default()
            })
        });
        hv.expect_exec()
            .withf(|_, cmd, _| cmd == "journalctl -u 'demo' -n 20 --no-pager 2>&1")
            .returning(|_, _, _| Ok(CommandOutput::ok("Started demo.service\n")));

        let logs = orchestrator(hv).logs(300, 20).await.unwrap();
        assert!(logs.contains("Started demo.service"));
    }
}
