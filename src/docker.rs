//! Container inspector: finds database containers through the `docker` CLI.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{self, DbKind};
use crate::command::{CommandRunner, IDENTITY_TIMEOUT, LIST_TIMEOUT};
use crate::error::CommandError;
use crate::model::ConnectionConfig;

pub const OPTION_PREFIX: &str = "docker:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStatus {
    Available,
    NotInstalled,
    NotRunning,
    NotAccessible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited,
}

impl ContainerStatus {
    fn filter(self) -> &'static str {
        match self {
            Self::Running => "status=running",
            Self::Exited => "status=exited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedContainer {
    pub container_id: String,
    pub container_name: String,
    pub db_type: String,
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub status: ContainerStatus,
}

impl DetectedContainer {
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    pub fn connectable(&self) -> bool {
        self.is_running() && self.port.is_some()
    }

    pub fn option_id(&self) -> String {
        format!("{OPTION_PREFIX}{}", self.container_id)
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} ({})",
            self.container_name,
            catalog::display_name(&self.db_type)
        )
    }

    pub fn to_config(&self) -> ConnectionConfig {
        let port = match self.port {
            Some(p) => p.to_string(),
            None => catalog::default_port(&self.db_type)
                .map(|p| p.to_string())
                .unwrap_or_default(),
        };
        ConnectionConfig {
            name: self.container_name.clone(),
            db_type: self.db_type.clone(),
            server: self.host.clone(),
            port,
            database: self.database.clone().unwrap_or_default(),
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone(),
            source: Some("docker".into()),
            options: Default::default(),
        }
    }
}

/// Last container scan as seen by the picker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DockerState {
    pub status: Option<DockerStatus>,
    pub loading: bool,
    pub containers: Vec<DetectedContainer>,
}

impl DockerState {
    pub fn rescanning(&self) -> Self {
        Self {
            loading: true,
            ..self.clone()
        }
    }

    pub fn find(&self, container_id: &str) -> Option<&DetectedContainer> {
        self.containers.iter().find(|c| c.container_id == container_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspected {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    host_config: InspectHostConfig,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: Option<String>,
    env: Option<Vec<String>>,
    exposed_ports: Option<HashMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    network_mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    host_port: Option<String>,
}

impl Inspected {
    fn env(&self) -> HashMap<String, String> {
        self.config
            .env
            .iter()
            .flatten()
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn binding_for(&self, container_port: u16) -> Option<u16> {
        let ports = self.network_settings.ports.as_ref()?;
        ports
            .get(&format!("{container_port}/tcp"))?
            .as_ref()?
            .first()?
            .host_port
            .as_deref()?
            .parse()
            .ok()
    }

    fn single_mapped_port(&self) -> Option<u16> {
        let ports = self.network_settings.ports.as_ref()?;
        let mapped: BTreeSet<u16> = ports
            .iter()
            .filter(|(key, _)| key.ends_with("/tcp"))
            .filter_map(|(_, bindings)| bindings.as_ref())
            .flatten()
            .filter_map(|b| b.host_port.as_deref()?.parse().ok())
            .collect();
        if mapped.len() == 1 {
            mapped.into_iter().next()
        } else {
            None
        }
    }

    fn exposed_tcp_ports(&self) -> Vec<u16> {
        self.config
            .exposed_ports
            .iter()
            .flat_map(|m| m.keys())
            .filter_map(|k| k.strip_suffix("/tcp")?.parse().ok())
            .collect()
    }

    fn host_network(&self) -> bool {
        self.host_config.network_mode.as_deref() == Some("host")
    }

    /// Host-side port for a running container, most specific source first.
    fn resolve_port(&self, default_port: u16) -> Option<u16> {
        if let Some(port) = self.binding_for(default_port) {
            return Some(port);
        }
        if let Some(port) = self.single_mapped_port() {
            return Some(port);
        }
        if self.host_network() {
            let exposed = self.exposed_tcp_ports();
            if exposed.len() == 1 {
                return Some(exposed[0]);
            }
            return Some(default_port);
        }
        None
    }

    fn image_name(&self, listed: &str) -> String {
        if !listed.is_empty() && !listed.starts_with("sha256:") {
            return listed.to_string();
        }
        if let Some(image) = self.config.image.as_deref().filter(|s| !s.is_empty()) {
            return image.to_string();
        }
        short_image_id(&self.image)
    }
}

fn short_image_id(image: &str) -> String {
    let hex = image.strip_prefix("sha256:").unwrap_or(image);
    format!("sha256:{}", hex.chars().take(10).collect::<String>())
}

fn detect(
    kind: &'static DbKind,
    short_id: &str,
    inspected: &Inspected,
    status: ContainerStatus,
) -> Option<DetectedContainer> {
    let detector = kind.docker.as_ref()?;
    let port = match status {
        ContainerStatus::Running => inspected.resolve_port(kind.default_port),
        ContainerStatus::Exited => None,
    };
    let creds = detector.credentials(&inspected.env());
    let password = match creds.password {
        None if !kind.requires_auth => Some(String::new()),
        other => other,
    };
    let name = inspected.name.trim_start_matches('/').to_string();
    Some(DetectedContainer {
        container_id: short_id.to_string(),
        container_name: if name.is_empty() {
            short_id.to_string()
        } else {
            name
        },
        db_type: kind.db_type.to_string(),
        host: detector.preferred_host.to_string(),
        port,
        username: creds.user,
        password,
        database: creds.database,
        status,
    })
}

pub struct ContainerInspector {
    runner: Arc<dyn CommandRunner>,
}

impl ContainerInspector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub async fn status(&self) -> DockerStatus {
        match self
            .runner
            .run("docker", &["info", "--format", "{{json .ServerVersion}}"], IDENTITY_TIMEOUT)
            .await
        {
            Ok(_) => DockerStatus::Available,
            Err(CommandError::NotInstalled(_)) => DockerStatus::NotInstalled,
            Err(e) => {
                let detail = e.detail_lower();
                debug!("docker daemon unreachable: {}", detail);
                if detail.contains("permission denied") {
                    DockerStatus::NotAccessible
                } else {
                    DockerStatus::NotRunning
                }
            }
        }
    }

    /// Running containers first, then exited ones.
    pub async fn scan(&self) -> (DockerStatus, Vec<DetectedContainer>) {
        let status = self.status().await;
        if status != DockerStatus::Available {
            return (status, Vec::new());
        }
        let mut found = self.scan_status(ContainerStatus::Running).await;
        found.extend(self.scan_status(ContainerStatus::Exited).await);
        debug!("docker scan found {} database containers", found.len());
        (DockerStatus::Available, found)
    }

    async fn scan_status(&self, status: ContainerStatus) -> Vec<DetectedContainer> {
        let listed = match self
            .runner
            .run(
                "docker",
                &["ps", "-a", "--filter", status.filter(), "--format", "{{json .}}"],
                LIST_TIMEOUT,
            )
            .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!("docker ps ({}) failed: {}", status.filter(), e);
                return Vec::new();
            }
        };

        let lines: Vec<PsLine> = listed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(line) => Some(line),
                Err(e) => {
                    debug!("skipping unparseable docker ps line: {}", e);
                    None
                }
            })
            .collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let inspected = self.inspect(&lines).await;
        lines
            .iter()
            .filter_map(|line| {
                let info = inspected.get(&line.id)?;
                let image = info.image_name(&line.image);
                let kind = catalog::kind_for_image(&image)?;
                detect(kind, &line.id, info, status)
            })
            .collect()
    }

    /// Inspect all listed containers, keyed by the short id from `docker ps`.
    /// A container that vanished or returns garbage is left out.
    async fn inspect(&self, lines: &[PsLine]) -> HashMap<String, Inspected> {
        let mut args = vec!["inspect"];
        args.extend(lines.iter().map(|l| l.id.as_str()));
        let batch = self.runner.run("docker", &args, LIST_TIMEOUT).await;

        let values: Vec<Value> = match batch.map(|out| serde_json::from_str::<Vec<Value>>(&out)) {
            Ok(Ok(values)) => values,
            _ => {
                debug!("batch docker inspect failed, inspecting one by one");
                let mut values = Vec::new();
                for line in lines {
                    match self
                        .runner
                        .run("docker", &["inspect", &line.id], LIST_TIMEOUT)
                        .await
                        .map(|out| serde_json::from_str::<Vec<Value>>(&out))
                    {
                        Ok(Ok(mut v)) => values.append(&mut v),
                        _ => debug!("skipping container {}: inspect failed", line.id),
                    }
                }
                values
            }
        };

        let mut by_id = HashMap::new();
        for value in values {
            match serde_json::from_value::<Inspected>(value) {
                Ok(info) => {
                    if let Some(line) = lines.iter().find(|l| info.id.starts_with(&l.id)) {
                        by_id.insert(line.id.clone(), info);
                    }
                }
                Err(e) => debug!("skipping container with unexpected inspect shape: {}", e),
            }
        }
        by_id
    }
}
