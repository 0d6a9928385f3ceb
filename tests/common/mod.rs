//! In-memory Proxmox host for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pve_deploy::{
    CommandOutput, CreateSpec, Error, FrameworkRegistry, Guest, GuestConfig, GuestEntry,
    Hypervisor, Orchestrator, OrchestratorConfig, Result,
};

/// One recorded call against the fake host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Config(Guest),
    Create { guest: Guest, hostname: String },
    Start(Guest),
    Stop(Guest),
    Destroy(Guest),
    Status(Guest),
    Exec { guest: Guest, command: String },
}

impl Call {
    pub fn is_actuation(&self) -> bool {
        !matches!(self, Call::List | Call::Config(_) | Call::Status(_))
    }
}

#[derive(Debug, Clone)]
struct FakeGuest {
    entry: GuestEntry,
    config: GuestConfig,
}

#[derive(Default)]
struct State {
    guests: BTreeMap<u32, FakeGuest>,
    calls: Vec<Call>,
    passwords: Vec<String>,
    fail_exec: Vec<(String, CommandOutput)>,
    fail_create: Option<CommandOutput>,
    /// Identities that `create` reports as already taken
    conflicts: Vec<u32>,
    create_hangs: bool,
    hang_exec: Option<String>,
    timeout_exec: Option<String>,
    unreadable: Vec<u32>,
    list_down: bool,
}

/// Fake hypervisor; every guest it creates shows up in later listings
#[derive(Clone, Default)]
pub struct FakeHypervisor {
    state: Arc<Mutex<State>>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing guest, as if created outside the orchestrator
    pub fn with_guest(self, guest: Guest, hostname: &str, config: GuestConfig) -> Self {
        self.state.lock().guests.insert(
            guest.id,
            FakeGuest {
                entry: GuestEntry {
                    guest,
                    status: "running".to_string(),
                    name: Some(hostname.to_string()),
                },
                config,
            },
        );
        self
    }

    /// Any exec whose command contains `needle` returns `output`.
    /// `{password}` in the output is replaced by the guest's root password.
    pub fn fail_exec(self, needle: &str, output: CommandOutput) -> Self {
        self.state.lock().fail_exec.push((needle.to_string(), output));
        self
    }

    pub fn fail_create(self, output: CommandOutput) -> Self {
        self.state.lock().fail_create = Some(output);
        self
    }

    /// `create` on `id` fails with "already exists" and the guest appears
    pub fn conflict_on(self, id: u32) -> Self {
        self.state.lock().conflicts.push(id);
        self
    }

    /// `create` never returns
    pub fn hang_create(self) -> Self {
        self.state.lock().create_hangs = true;
        self
    }

    /// Any exec whose command contains `needle` never returns
    pub fn hang_exec(self, needle: &str) -> Self {
        self.state.lock().hang_exec = Some(needle.to_string());
        self
    }

    /// Any exec whose command contains `needle` fails with `Error::Timeout`
    pub fn time_out_exec(self, needle: &str) -> Self {
        self.state.lock().timeout_exec = Some(needle.to_string());
        self
    }

    /// `config` of guest `id` fails as if `pct config` errored
    pub fn unreadable_config(self, id: u32) -> Self {
        self.state.lock().unreadable.push(id);
        self
    }

    pub fn list_down(self) -> Self {
        self.state.lock().list_down = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn actuations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_actuation).collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn guest_ids(&self) -> Vec<u32> {
        self.state.lock().guests.keys().copied().collect()
    }

    /// Passwords handed to `create`, in order
    pub fn passwords(&self) -> Vec<String> {
        self.state.lock().passwords.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn list(&self) -> Result<Vec<GuestEntry>> {
        self.record(Call::List);
        let state = self.state.lock();
        if state.list_down {
            return Err(Error::HypervisorUnavailable("pct: connection refused".to_string()));
        }
        Ok(state.guests.values().map(|g| g.entry.clone()).collect())
    }

    async fn config(&self, guest: Guest) -> Result<GuestConfig> {
        self.record(Call::Config(guest));
        let state = self.state.lock();
        if state.unreadable.contains(&guest.id) {
            return Err(Error::Command {
                action: format!("pct config {}", guest.id),
                output: "ipcc_send_rec[1] failed: Connection refused".to_string(),
            });
        }
        let config = state.guests.get(&guest.id).map(|g| g.config.clone());
        config.ok_or(Error::GuestNotFound(guest.id))
    }

    async fn create(&self, spec: &CreateSpec) -> Result<CommandOutput> {
        self.record(Call::Create {
            guest: spec.guest,
            hostname: spec.hostname.clone(),
        });

        let hangs = {
            let mut state = self.state.lock();
            state.passwords.push(spec.password.clone());

            if let Some(pos) = state.conflicts.iter().position(|id| *id == spec.guest.id) {
                state.conflicts.remove(pos);
                state.guests.insert(
                    spec.guest.id,
                    FakeGuest {
                        entry: GuestEntry {
                            guest: spec.guest,
                            status: "stopped".to_string(),
                            name: Some("intruder".to_string()),
                        },
                        config: GuestConfig::default(),
                    },
                );
                return Ok(CommandOutput::failed(
                    255,
                    format!("CT {} already exists on node 'pve'", spec.guest.id),
                ));
            }
            if let Some(out) = state.fail_create.clone() {
                return Ok(out);
            }

            state.guests.insert(
                spec.guest.id,
                FakeGuest {
                    entry: GuestEntry {
                        guest: spec.guest,
                        status: "stopped".to_string(),
                        name: Some(spec.hostname.clone()),
                    },
                    config: GuestConfig {
                        hostname: Some(spec.hostname.clone()),
                        address: Some(spec.address),
                        description: Some(spec.description.clone()),
                    },
                },
            );
            state.create_hangs
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(CommandOutput::ok(""))
    }

    async fn start(&self, guest: Guest) -> Result<CommandOutput> {
        self.record(Call::Start(guest));
        if let Some(g) = self.state.lock().guests.get_mut(&guest.id) {
            g.entry.status = "running".to_string();
        }
        Ok(CommandOutput::ok(""))
    }

    async fn stop(&self, guest: Guest) -> Result<CommandOutput> {
        self.record(Call::Stop(guest));
        match self.state.lock().guests.get_mut(&guest.id) {
            Some(g) => {
                g.entry.status = "stopped".to_string();
                Ok(CommandOutput::ok(""))
            }
            None => Ok(CommandOutput::failed(2, format!("CT {} does not exist", guest.id))),
        }
    }

    async fn destroy(&self, guest: Guest) -> Result<CommandOutput> {
        self.record(Call::Destroy(guest));
        match self.state.lock().guests.remove(&guest.id) {
            Some(_) => Ok(CommandOutput::ok("")),
            None => Ok(CommandOutput::failed(2, format!("CT {} does not exist", guest.id))),
        }
    }

    async fn status(&self, guest: Guest) -> Result<String> {
        self.record(Call::Status(guest));
        self.state
            .lock()
            .guests
            .get(&guest.id)
            .map(|g| g.entry.status.clone())
            .ok_or(Error::GuestNotFound(guest.id))
    }

    async fn exec(&self, guest: Guest, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.record(Call::Exec {
            guest,
            command: command.to_string(),
        });
        let hangs = {
            let state = self.state.lock();
            let failing = state
                .fail_exec
                .iter()
                .find(|(needle, _)| command.contains(needle.as_str()));
            if let Some((_, out)) = failing {
                let password = state.passwords.last().cloned().unwrap_or_default();
                let mut out = out.clone();
                out.stdout = out.stdout.replace("{password}", &password);
                out.stderr = out.stderr.replace("{password}", &password);
                return Ok(out);
            }
            if state
                .timeout_exec
                .as_deref()
                .is_some_and(|needle| command.contains(needle))
            {
                return Err(Error::Timeout {
                    program: "pct".to_string(),
                    secs: timeout.as_secs(),
                });
            }
            if command.starts_with("journalctl") {
                return Ok(CommandOutput::ok("-- Logs begin --\nStarted app.service\n"));
            }
            state
                .hang_exec
                .as_deref()
                .is_some_and(|needle| command.contains(needle))
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(CommandOutput::ok(""))
    }
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig::builder().no_delays().build()
}

pub fn orchestrator(hv: &FakeHypervisor) -> Orchestrator {
    orchestrator_with(hv, config())
}

pub fn orchestrator_with(hv: &FakeHypervisor, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(
        Arc::new(hv.clone()),
        Arc::new(FrameworkRegistry::builtin()),
        config,
    )
    .unwrap()
}
