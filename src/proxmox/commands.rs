//! `pct` / `qm` wrappers

use async_trait::async_trait;
use std::time::Duration;

use super::parse::{self, GuestExecResult};
use super::{CommandOutput, CommandRunner, CreateSpec, Hypervisor, TokioCommandRunner};
use crate::config::{OrchestratorConfig, StageTimeouts};
use crate::models::{Guest, GuestConfig, GuestEntry, GuestId, ResourceKind};
use crate::{Error, Result};

const PCT: &str = "pct";
const QM: &str = "qm";

/// Extra time the runner waits on top of the in-guest timeout handed to `qm guest exec`
const GUEST_EXEC_GRACE: Duration = Duration::from_secs(10);

/// Proxmox host driven through its command line tools
pub struct ProxmoxCli<R: CommandRunner = TokioCommandRunner> {
    runner: R,
    template: String,
    vm_template_id: GuestId,
    rootfs: String,
    bridge: String,
    timeouts: StageTimeouts,
}

impl ProxmoxCli<TokioCommandRunner> {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(TokioCommandRunner::new(), config)
    }
}

impl<R: CommandRunner> ProxmoxCli<R> {
    pub fn new(runner: R, config: &OrchestratorConfig) -> Self {
        Self {
            runner,
            template: config.template.clone(),
            vm_template_id: config.vm_template_id,
            rootfs: config.rootfs.clone(),
            bridge: config.bridge.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    fn tool(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Container => PCT,
            ResourceKind::VirtualMachine => QM,
        }
    }

    async fn run(&self, program: &str, args: Vec<String>, timeout: Duration) -> Result<CommandOutput> {
        self.runner.run(program, &args, timeout).await
    }

    /// Run a query that must succeed; maps "does not exist" to `GuestNotFound`
    async fn query(&self, guest: Guest, subcommand: &str) -> Result<String> {
        let program = Self::tool(guest.kind);
        let out = self
            .run(program, args([subcommand, &guest.id.to_string()]), self.timeouts.inspect)
            .await?;
        if out.success() {
            return Ok(out.stdout);
        }
        let combined = out.combined();
        if parse::is_missing_guest(&combined) {
            return Err(Error::GuestNotFound(guest.id));
        }
        Err(Error::Command {
            action: format!("{} {} {}", program, subcommand, guest.id),
            output: combined,
        })
    }

    async fn list_raw(&self, program: &str) -> Result<String> {
        let out = self.run(program, args(["list"]), self.timeouts.inspect).await?;
        if !out.success() {
            return Err(Error::HypervisorUnavailable(format!(
                "{} list {}: {}",
                program,
                out.describe_exit(),
                out.combined()
            )));
        }
        Ok(out.stdout)
    }

    fn container_create_args(&self, spec: &CreateSpec) -> Vec<String> {
        vec![
            "create".into(),
            spec.guest.id.to_string(),
            self.template.clone(),
            "--hostname".into(),
            spec.hostname.clone(),
            "--memory".into(),
            spec.memory_mb.to_string(),
            "--cores".into(),
            spec.cores.to_string(),
            "--net0".into(),
            format!(
                "name=eth0,bridge={},ip={}/{},gw={}",
                self.bridge, spec.address, spec.netmask, spec.gateway
            ),
            "--password".into(),
            spec.password.clone(),
            "--features".into(),
            "nesting=1".into(),
            "--unprivileged".into(),
            "1".into(),
            "--rootfs".into(),
            self.rootfs.clone(),
            "--onboot".into(),
            "1".into(),
            "--description".into(),
            spec.description.clone(),
        ]
    }

    fn vm_clone_args(&self, spec: &CreateSpec) -> Vec<String> {
        vec![
            "clone".into(),
            self.vm_template_id.to_string(),
            spec.guest.id.to_string(),
            "--name".into(),
            spec.hostname.clone(),
            "--full".into(),
            "1".into(),
        ]
    }

    fn vm_set_args(&self, spec: &CreateSpec) -> Vec<String> {
        vec![
            "set".into(),
            spec.guest.id.to_string(),
            "--memory".into(),
            spec.memory_mb.to_string(),
            "--cores".into(),
            spec.cores.to_string(),
            "--net0".into(),
            format!("virtio,bridge={}", self.bridge),
            "--ipconfig0".into(),
            format!("ip={}/{},gw={}", spec.address, spec.netmask, spec.gateway),
            "--ciuser".into(),
            "root".into(),
            "--cipassword".into(),
            spec.password.clone(),
            "--agent".into(),
            "enabled=1".into(),
            "--onboot".into(),
            "1".into(),
            "--description".into(),
            spec.description.clone(),
        ]
    }

    async fn create_vm(&self, spec: &CreateSpec) -> Result<CommandOutput> {
        let cloned = self
            .run(QM, self.vm_clone_args(spec), self.timeouts.create)
            .await?;
        if !cloned.success() {
            return Ok(cloned);
        }

        let set = self.run(QM, self.vm_set_args(spec), self.timeouts.create).await?;
        if !set.success() {
            // half-configured clone must not outlive a failed Create
            if let Err(e) = self.destroy(spec.guest).await {
                tracing::warn!(guest = %spec.guest, error = %e, "Failed to remove partial VM clone");
            }
        }
        Ok(set)
    }

    async fn exec_vm(&self, guest: Guest, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let mut argv = args([
            "guest",
            "exec",
            &guest.id.to_string(),
            "--timeout",
            &timeout.as_secs().to_string(),
            "--",
            "bash",
            "-c",
        ]);
        argv.push(command.to_string());

        let out = self.run(QM, argv, timeout + GUEST_EXEC_GRACE).await?;
        if !out.success() {
            // agent not reachable or guest not running
            return Ok(out);
        }

        let result: GuestExecResult = serde_json::from_str(out.stdout.trim())?;
        if result.exited == 0 {
            return Err(Error::Timeout {
                program: "qm guest exec".to_string(),
                secs: timeout.as_secs(),
            });
        }
        Ok(CommandOutput {
            code: result.exitcode,
            stdout: result.out_data,
            stderr: result.err_data,
        })
    }
}

#[async_trait]
impl<R: CommandRunner> Hypervisor for ProxmoxCli<R> {
    async fn list(&self) -> Result<Vec<GuestEntry>> {
        let containers = self.list_raw(PCT).await?;
        let vms = self.list_raw(QM).await?;

        let mut entries = parse::parse_pct_list(&containers);
        entries.extend(parse::parse_qm_list(&vms));
        Ok(entries)
    }

    async fn config(&self, guest: Guest) -> Result<GuestConfig> {
        let raw = self.query(guest, "config").await?;
        Ok(parse::parse_config(&raw, guest.kind))
    }

    async fn create(&self, spec: &CreateSpec) -> Result<CommandOutput> {
        match spec.guest.kind {
            ResourceKind::Container => {
                self.run(PCT, self.container_create_args(spec), self.timeouts.create)
                    .await
            }
            ResourceKind::VirtualMachine => self.create_vm(spec).await,
        }
    }

    async fn start(&self, guest: Guest) -> Result<CommandOutput> {
        self.run(
            Self::tool(guest.kind),
            args(["start", &guest.id.to_string()]),
            self.timeouts.lifecycle,
        )
        .await
    }

    async fn stop(&self, guest: Guest) -> Result<CommandOutput> {
        self.run(
            Self::tool(guest.kind),
            args(["stop", &guest.id.to_string()]),
            self.timeouts.lifecycle,
        )
        .await
    }

    async fn destroy(&self, guest: Guest) -> Result<CommandOutput> {
        self.run(
            Self::tool(guest.kind),
            args(["destroy", &guest.id.to_string(), "--purge"]),
            self.timeouts.lifecycle,
        )
        .await
    }

    async fn status(&self, guest: Guest) -> Result<String> {
        let raw = self.query(guest, "status").await?;
        Ok(parse::parse_status(&raw))
    }

    async fn exec(&self, guest: Guest, command: &str, timeout: Duration) -> Result<CommandOutput> {
        match guest.kind {
            ResourceKind::Container => {
                let mut argv = args(["exec", &guest.id.to_string(), "--", "bash", "-c"]);
                argv.push(command.to_string());
                self.run(PCT, argv, timeout).await
            }
            ResourceKind::VirtualMachine => self.exec_vm(guest, command, timeout).await,
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxmox::MockCommandRunner;
    use std::net::Ipv4Addr;

    fn spec(guest: Guest) -> CreateSpec {
        CreateSpec {
            guest,
            hostname: "demo".into(),
            memory_mb: 2048,
            cores: 2,
            address: Ipv4Addr::new(192, 168, 171, 200),
            netmask: 24,
            gateway: Ipv4Addr::new(192, 168, 171, 2),
            password: "generated-secret".into(),
            description: "Framework:python-flask|Port:8000".into(),
        }
    }

    fn cli(runner: MockCommandRunner) -> ProxmoxCli<MockCommandRunner> {
        ProxmoxCli::new(runner, &OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_container_create_args() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| {
                program == "pct"
                    && args[..3] == ["create", "300", "local:vztmpl/ubuntu-22.04-standard_22.04-1_amd64.tar.zst"]
                    && args.windows(2).any(|w| {
                        w[0] == "--net0" && w[1] == "name=eth0,bridge=vmbr0,ip=192.168.171.200/24,gw=192.168.171.2"
                    })
                    && args.windows(2).any(|w| w[0] == "--password" && w[1] == "generated-secret")
                    && args.windows(2).any(|w| w[0] == "--rootfs" && w[1] == "local-lvm:8")
                    && args.last().map(String::as_str) == Some("Framework:python-flask|Port:8000")
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));

        let out = cli(runner).create(&spec(Guest::container(300))).await.unwrap();
        assert!(out.success());
    }

    #[tokio::test]
    async fn test_vm_create_destroys_clone_when_set_fails() {
        let mut runner = MockCommandRunner::new();
        let mut seq = mockall::Sequence::new();
        runner
            .expect_run()
            .withf(|p, a, _| p == "qm" && a[..3] == ["clone", "9000", "301"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));
        runner
            .expect_run()
            .withf(|p, a, _| p == "qm" && a[..2] == ["set", "301"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::failed(255, "invalid ipconfig")));
        runner
            .expect_run()
            .withf(|p, a, _| p == "qm" && a[..] == ["destroy", "301", "--purge"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));

        let out = cli(runner).create(&spec(Guest::vm(301))).await.unwrap();
        assert_eq!(out.code, Some(255));
    }

    #[tokio::test]
    async fn test_container_exec_args() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|p, a, t| {
                p == "pct"
                    && a[..] == ["exec", "300", "--", "bash", "-c", "echo hi"]
                    && *t == Duration::from_secs(7)
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("hi\n")));

        let out = cli(runner)
            .exec(Guest::container(300), "echo hi", Duration::from_secs(7))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hi\n");
    }

    #[tokio::test]
    async fn test_vm_exec_parses_agent_json() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|p, a, t| {
                p == "qm" && a[..5] == ["guest", "exec", "305", "--timeout", "30"] && *t == Duration::from_secs(40)
            })
            .returning(|_, _, _| {
                Ok(CommandOutput::ok(r#"{"exitcode":2,"exited":1,"err-data":"nope"}"#))
            });

        let out = cli(runner)
            .exec(Guest::vm(305), "false", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(out.code, Some(2));
        assert_eq!(out.stderr, "nope");
    }

    #[tokio::test]
    async fn test_vm_exec_not_exited_is_timeout() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _| Ok(CommandOutput::ok(r#"{"exited":0}"#)));

        let err = cli(runner)
            .exec(Guest::vm(305), "sleep 999", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_list_merges_containers_and_vms() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|p, a, _| p == "pct" && a[..] == ["list"])
            .returning(|_, _, _| {
                Ok(CommandOutput::ok("VMID Status Lock Name\n300 running demo\n"))
            });
        runner
            .expect_run()
            .withf(|p, a, _| p == "qm" && a[..] == ["list"])
            .returning(|_, _, _| {
                Ok(CommandOutput::ok("VMID NAME STATUS MEM(MB) BOOTDISK(GB) PID\n301 vm1 stopped 2048 32.00 0\n"))
            });

        let entries = cli(runner).list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].guest, Guest::container(300));
        assert_eq!(entries[1].guest, Guest::vm(301));
    }

    #[tokio::test]
    async fn test_config_missing_guest() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _| {
            Ok(CommandOutput::failed(
                2,
                "Configuration file 'nodes/pve/lxc/350.conf' does not exist",
            ))
        });

        let err = cli(runner).config(Guest::container(350)).await.unwrap_err();
        assert!(matches!(err, Error::GuestNotFound(350)));
    }
}
