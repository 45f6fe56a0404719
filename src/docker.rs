//! Container runtime client backed by the `docker` CLI.

use crate::catalog;
use crate::command::{run_args, CommandRunner};
use crate::error::{PvarrError, Result};
use crate::outcome::OpResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Container ports that serve a web UI
const WEB_PORTS: [u16; 14] = [
    80, 8080, 8096, 9090, 9091, 7878, 8989, 8686, 8787, 9696, 6767, 6789, 5055, 8181,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container: u16,
    pub host: u16,
    pub protocol: String,
}

/// State of one container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Runtime state, e.g. `running`, `exited`
    pub status: String,
    pub image: String,
    pub description: String,
    pub ports: Vec<PortMapping>,
    pub url: Option<String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Container lifecycle operations.
pub trait ContainerRuntime: Send + Sync {
    /// All containers, running or not, keyed by name
    fn list(&self) -> Result<BTreeMap<String, ContainerInfo>>;
    fn start(&self, name: &str) -> Result<OpResult>;
    fn stop(&self, name: &str) -> Result<OpResult>;
    fn restart(&self, name: &str) -> Result<OpResult>;
    fn logs(&self, name: &str, lines: usize) -> Result<String>;
    fn pull(&self, image: &str) -> Result<OpResult>;
}

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// Parse docker's port summary, e.g. `0.0.0.0:8989->8989/tcp, :::8989->8989/tcp`
pub fn parse_ports(raw: &str) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = Vec::new();
    for entry in raw.split(',').map(str::trim) {
        let Some((host_side, container_side)) = entry.split_once("->") else {
            continue;
        };
        let Some(host) = host_side.rsplit(':').next().and_then(|p| p.parse().ok()) else {
            continue;
        };
        let (port, protocol) = container_side.split_once('/').unwrap_or((container_side, "tcp"));
        let Ok(container) = port.parse() else {
            continue;
        };
        let mapping = PortMapping {
            container,
            host,
            protocol: protocol.to_string(),
        };
        if !mappings.contains(&mapping) {
            mappings.push(mapping);
        }
    }
    mappings
}

/// Drives containers through the `docker` command
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    host: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            host: "localhost".to_string(),
        }
    }

    /// Host name used in web UI URLs
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn parse_line(&self, line: &str) -> Option<(String, ContainerInfo)> {
        let ps: PsLine = match serde_json::from_str(line) {
            Ok(ps) => ps,
            Err(e) => {
                debug!("skipping unparseable docker ps line: {}", e);
                return None;
            }
        };
        let name = ps.names.split(',').next().unwrap_or_default().to_string();
        let ports = parse_ports(&ps.ports);
        let url = (ps.state == "running")
            .then(|| ports.iter().find(|p| WEB_PORTS.contains(&p.container)))
            .flatten()
            .map(|p| format!("http://{}:{}", self.host, p.host));
        let description = catalog::lookup(&name)
            .map(|s| s.description)
            .unwrap_or("Docker container")
            .to_string();
        Some((
            name,
            ContainerInfo {
                status: ps.state,
                image: ps.image,
                description,
                ports,
                url,
            },
        ))
    }

    fn lifecycle(&self, action: &str, name: &str) -> Result<OpResult> {
        let out = run_args(self.runner.as_ref(), "docker", &[action, name])?;
        if out.success {
            Ok(OpResult::success(format!("Container {} {}", name, past_tense(action))))
        } else {
            Ok(OpResult::error(format!(
                "Error {} container {}: {}",
                progressive(action),
                name,
                out.stderr.trim()
            )))
        }
    }
}

fn past_tense(action: &str) -> &'static str {
    match action {
        "start" => "started",
        "stop" => "stopped",
        _ => "restarted",
    }
}

fn progressive(action: &str) -> &'static str {
    match action {
        "start" => "starting",
        "stop" => "stopping",
        _ => "restarting",
    }
}

impl ContainerRuntime for DockerCli {
    fn list(&self) -> Result<BTreeMap<String, ContainerInfo>> {
        let out = run_args(
            self.runner.as_ref(),
            "docker",
            &["ps", "-a", "--format", "{{json .}}"],
        )?;
        if !out.success {
            warn!("docker ps failed: {}", out.stderr.trim());
            return Err(PvarrError::docker(format!(
                "Error getting container status: {}",
                out.stderr.trim()
            )));
        }
        Ok(out
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| self.parse_line(l))
            .collect())
    }

    fn start(&self, name: &str) -> Result<OpResult> {
        self.lifecycle("start", name)
    }

    fn stop(&self, name: &str) -> Result<OpResult> {
        self.lifecycle("stop", name)
    }

    fn restart(&self, name: &str) -> Result<OpResult> {
        self.lifecycle("restart", name)
    }

    fn logs(&self, name: &str, lines: usize) -> Result<String> {
        let tail = lines.to_string();
        let out = run_args(self.runner.as_ref(), "docker", &["logs", "--tail", &tail, name])?;
        if !out.success {
            return Err(PvarrError::docker(format!(
                "Error getting logs for container {}: {}",
                name,
                out.stderr.trim()
            )));
        }
        // docker writes container stderr to our stderr
        Ok(format!("{}{}", out.stdout, out.stderr))
    }

    fn pull(&self, image: &str) -> Result<OpResult> {
        let out = run_args(self.runner.as_ref(), "docker", &["pull", image])?;
        if out.success {
            Ok(OpResult::success(format!("Image {} pulled successfully", image)))
        } else {
            Ok(OpResult::error(format!(
                "Error pulling image {}: {}",
                image,
                out.stderr.trim()
            )))
        }
    }
}
