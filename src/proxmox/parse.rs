//! Parsers for `pct`/`qm` text output

use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::net::Ipv4Addr;

use crate::models::{Guest, GuestConfig, GuestEntry, ResourceKind};

/// Parse `pct list`: `VMID Status Lock Name`, lock column may be blank
pub fn parse_pct_list(output: &str) -> Vec<GuestEntry> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let id = cols.first()?.parse().ok()?;
            let status = cols.get(1)?.to_string();
            let name = if cols.len() >= 3 {
                cols.last().map(|s| s.to_string())
            } else {
                None
            };
            Some(GuestEntry {
                guest: Guest::container(id),
                status,
                name,
            })
        })
        .collect()
}

/// Parse `qm list`: `VMID NAME STATUS MEM(MB) BOOTDISK(GB) PID`
pub fn parse_qm_list(output: &str) -> Vec<GuestEntry> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let id = cols.first()?.parse().ok()?;
            let name = cols.get(1)?.to_string();
            let status = cols.get(2)?.to_string();
            Some(GuestEntry {
                guest: Guest::vm(id),
                status,
                name: Some(name),
            })
        })
        .collect()
}

/// Parse `pct config` / `qm config` key-value dumps
pub fn parse_config(output: &str, kind: ResourceKind) -> GuestConfig {
    let name_key = match kind {
        ResourceKind::Container => "hostname",
        ResourceKind::VirtualMachine => "name",
    };

    let mut config = GuestConfig::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == name_key {
            config.hostname = Some(value.to_string());
        } else if key == "description" {
            config.description = Some(percent_decode_str(value).decode_utf8_lossy().into_owned());
        } else if config.address.is_none() && (key.starts_with("net") || key.starts_with("ipconfig")) {
            config.address = extract_ip(value);
        }
    }
    config
}

/// `name=eth0,bridge=vmbr0,ip=192.168.171.200/24,gw=...` -> address
fn extract_ip(value: &str) -> Option<Ipv4Addr> {
    value
        .split(',')
        .find_map(|part| part.trim().strip_prefix("ip="))
        .and_then(|ip| ip.split('/').next())
        .and_then(|ip| ip.parse().ok())
}

/// `status: running` -> `running`
pub fn parse_status(output: &str) -> String {
    let line = output.lines().next().unwrap_or("").trim();
    line.strip_prefix("status:").unwrap_or(line).trim().to_string()
}

/// JSON printed by `qm guest exec`
#[derive(Debug, Deserialize)]
pub(crate) struct GuestExecResult {
    #[serde(default)]
    pub exited: u8,
    #[serde(default)]
    pub exitcode: Option<i32>,
    #[serde(rename = "out-data", default)]
    pub out_data: String,
    #[serde(rename = "err-data", default)]
    pub err_data: String,
}

/// True when the host reports the guest does not exist
pub(crate) fn is_missing_guest(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("does not exist") || lower.contains("no such")
}

/// True when Create failed because the ID was taken in the meantime
pub(crate) fn is_id_conflict(output: &str) -> bool {
    output.to_ascii_lowercase().contains("already exists")
}
