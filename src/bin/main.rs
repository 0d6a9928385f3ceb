//! pve-deploy CLI - deploy applications onto a Proxmox host

use clap::{Parser, Subcommand};
use pve_deploy::{
    DeploymentRequest, FrameworkRegistry, Orchestrator, OrchestratorConfig, ResourceKind,
    Server, SetupPolicy,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pve-deploy")]
#[command(about = "Provision framework apps into Proxmox containers and VMs")]
#[command(version)]
struct Cli {
    /// Orchestrator config (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Framework catalog (JSON array); built-in catalog when omitted
    #[arg(long, global = true)]
    frameworks: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,
    },
    /// Deploy one application
    Deploy {
        /// Application name (hostname and service name)
        #[arg(short, long)]
        name: String,
        /// Framework key, see `frameworks`
        #[arg(short, long)]
        framework: String,
        /// Git repository; defaults to the framework's sample repo
        #[arg(short, long)]
        repo: Option<String>,
        /// lxc or vm
        #[arg(short = 't', long = "type", default_value = "lxc")]
        kind: ResourceKind,
        /// Memory in MB
        #[arg(short, long)]
        memory: Option<u64>,
        /// CPU cores
        #[arg(short, long)]
        cores: Option<u32>,
        /// Fail the deployment when the framework setup command fails
        #[arg(long)]
        strict_setup: bool,
    },
    /// List managed deployments
    List,
    /// Show guest power state
    Status {
        /// Guest ID
        id: u32,
    },
    /// Show application service logs
    Logs {
        /// Guest ID
        id: u32,
        /// Number of journal lines
        #[arg(short = 'n', long, default_value = "50")]
        lines: u32,
    },
    /// Stop and destroy a guest
    Delete {
        /// Guest ID
        id: u32,
    },
    /// List supported frameworks
    Frameworks,
    /// Deploy every framework with its sample repository
    DeployAll {
        /// lxc or vm
        #[arg(short = 't', long = "type", default_value = "lxc")]
        kind: ResourceKind,
    },
}

#[derive(Tabled)]
struct DeploymentRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Framework")]
    framework: String,
    #[tabled(rename = "URL")]
    url: String,
}

#[derive(Tabled)]
struct FrameworkRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Sample repo")]
    repo: String,
}

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Framework")]
    framework: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pve_deploy=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };
    let registry = match &cli.frameworks {
        Some(path) => FrameworkRegistry::from_file(path)?,
        None => FrameworkRegistry::builtin(),
    };

    if let Commands::Deploy { strict_setup: true, .. } = cli.command {
        config.setup_policy = SetupPolicy::Strict;
    }

    let orch = Orchestrator::proxmox(config, registry)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

            println!("Starting API server on http://{}", addr);
            println!();
            println!("Endpoints:");
            println!("  GET    /health               Health check");
            println!("  GET    /frameworks           Supported frameworks");
            println!("  POST   /deploy               Deploy an application");
            println!("  GET    /list                 List deployments");
            println!("  GET    /status/:id           Guest status");
            println!("  GET    /logs/:id             Service logs");
            println!("  DELETE /delete/:id           Delete a guest");
            println!("  GET    /deployments/active   In-flight deployments");
            println!("  POST   /deploy-all-tests     Deploy every framework");
            println!();

            Server::new(orch, addr).run().await?;
        }
        Commands::Deploy {
            name,
            framework,
            repo,
            kind,
            memory,
            cores,
            strict_setup: _,
        } => {
            let mut request = DeploymentRequest::new(name, framework).with_kind(kind);
            request.repo = repo;
            request.memory_mb = memory;
            request.cores = cores;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted, rolling back...");
                    on_ctrl_c.cancel();
                }
            });

            let record = orch.deploy_with_cancel(request, cancel).await?;
            println!("Deployed {} ({})", record.name, record.framework_name);
            println!("  ID:       {}", record.identity);
            println!("  IP:       {}", record.address);
            println!("  URL:      {}", record.service_url);
            println!("  Shell:    {}", record.ssh_hint);
            println!("  User:     {}", record.credentials.username);
            println!("  Password: {}", record.credentials.password);
            println!();
            println!("The password is not stored anywhere; save it now.");
        }
        Commands::List => {
            let listed = orch.list().await?;
            if listed.is_empty() {
                println!("No deployments found.");
                return Ok(());
            }

            let rows: Vec<DeploymentRow> = listed
                .into_iter()
                .map(|g| DeploymentRow {
                    id: g.ctid,
                    kind: g.kind.to_string(),
                    name: g.hostname.unwrap_or_else(|| "-".to_string()),
                    status: g.status,
                    ip: g.ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string()),
                    framework: g
                        .framework
                        .or(g.tag_error.map(|e| format!("? ({})", e)))
                        .unwrap_or_else(|| "-".to_string()),
                    url: g.url.unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        Commands::Status { id } => {
            let status = orch.status(id).await?;
            println!("{} {}: {}", status.kind, status.ctid, status.status);
        }
        Commands::Logs { id, lines } => {
            print!("{}", orch.logs(id, lines).await?);
        }
        Commands::Delete { id } => {
            let outcome = orch.delete(id).await?;
            if outcome.existed {
                println!("Deleted {}.", id);
            } else {
                println!("Guest {} does not exist, nothing to do.", id);
            }
        }
        Commands::Frameworks => {
            let rows: Vec<FrameworkRow> = orch
                .frameworks()
                .iter()
                .map(|f| FrameworkRow {
                    key: f.key.clone(),
                    name: f.display_name.clone(),
                    port: f.listen_port,
                    repo: f.default_source_repo.clone().unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        Commands::DeployAll { kind } => {
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let results = orch.deploy_all(kind, cancel).await;
            let rows: Vec<BatchRow> = results
                .into_iter()
                .map(|r| BatchRow {
                    framework: r.framework,
                    status: r.status,
                    id: r.ctid.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
                    message: r.message,
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}
