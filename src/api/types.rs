//! API request/response types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::error::ErrorKind;
use crate::models::{
    ActiveDeployment, Credentials, DeploymentRecord, DeploymentRequest, GuestId, ListedGuest,
    ResourceKind, Stage,
};
use crate::orchestrator::BatchEntry;

// === Deploy ===

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(default = "default_name")]
    pub name: String,
    /// Required; checked after parsing so a missing key gets a structured error
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
    /// MB
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub cores: Option<u32>,
}

fn default_name() -> String {
    "app".to_string()
}

impl TryFrom<DeployRequest> for DeploymentRequest {
    type Error = crate::Error;

    fn try_from(req: DeployRequest) -> crate::Result<Self> {
        let framework = req
            .framework
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| crate::Error::Validation("framework is required".to_string()))?;
        Ok(DeploymentRequest {
            name: req.name,
            framework,
            repo: req.repo,
            kind: req.kind,
            memory_mb: req.memory,
            cores: req.cores,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    pub status: String,
    pub ctid: GuestId,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub name: String,
    pub ip: Ipv4Addr,
    pub framework: String,
    pub framework_name: String,
    pub repo: String,
    pub port: u16,
    pub url: String,
    pub ssh: String,
    pub credentials: Credentials,
    pub message: String,
}

impl From<DeploymentRecord> for DeployResponse {
    fn from(r: DeploymentRecord) -> Self {
        Self {
            status: "success".to_string(),
            message: format!("Deployed successfully! Access at {}", r.service_url),
            ctid: r.identity,
            kind: r.kind,
            name: r.name,
            ip: r.address,
            framework: r.framework,
            framework_name: r.framework_name,
            repo: r.repo,
            port: r.port,
            url: r.service_url,
            ssh: r.ssh_hint,
            credentials: r.credentials,
        }
    }
}

// === Inventory ===

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub containers: Vec<ListedGuest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// `deleted`, or `absent` when there was nothing to delete
    pub status: String,
    pub ctid: GuestId,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_lines")]
    pub lines: u32,
}

fn default_lines() -> u32 {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub ctid: GuestId,
    pub logs: String,
}

// === Frameworks ===

#[derive(Debug, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub port: u16,
    pub test_repo: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FrameworksResponse {
    pub frameworks: BTreeMap<String, FrameworkInfo>,
}

// === Batch / active ===

#[derive(Debug, Default, Deserialize)]
pub struct DeployAllQuery {
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveResponse {
    pub deployments: Vec<ActiveDeployment>,
}

// === Common ===

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}
