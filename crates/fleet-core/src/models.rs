//! Core data models for the benchmark fleet

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Published ports of a unit: container port -> host ports, in container order
pub type PortMap = BTreeMap<String, Vec<u16>>;

/// Normalized run state of a single container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

impl RunState {
    /// Normalize the daemon's state string ("running", "exited", "created", ...)
    pub fn from_daemon_state(state: &str) -> Self {
        if state.eq_ignore_ascii_case("running") {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }
}

/// Aggregate status of a benchmark unit, derived from its containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Stopped,
    Running,
    Partial,
    Unknown,
}

impl UnitStatus {
    /// Derive the status from a set of container snapshots
    pub fn derive(containers: &[ContainerSnapshot]) -> Self {
        let running = containers
            .iter()
            .filter(|c| c.state == RunState::Running)
            .count();

        if running == 0 {
            UnitStatus::Stopped
        } else if running == containers.len() {
            UnitStatus::Running
        } else {
            UnitStatus::Partial
        }
    }
}

/// A single published port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

/// Container as reported by one daemon list call, before unit matching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContainer {
    pub id: String,
    /// Names as reported by the daemon (may carry a leading '/')
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
}

/// Container associated with a benchmark unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSnapshot {
    /// Short (12 character) container id
    pub id: String,
    pub unit: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: RunState,
    pub ports: Vec<PortBinding>,
}

/// Length of the stable short container id
pub const SHORT_ID_LEN: usize = 12;

impl ContainerSnapshot {
    /// Build a snapshot for `unit` from the daemon's raw form
    pub fn from_raw(raw: &RawContainer, unit: &str) -> Self {
        let name = raw
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();

        Self {
            id: raw.id.chars().take(SHORT_ID_LEN).collect(),
            unit: unit.to_string(),
            name,
            image: raw.image.clone(),
            status: raw.status.clone(),
            state: RunState::from_daemon_state(&raw.state),
            ports: raw.ports.clone(),
        }
    }
}

/// Image known to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub id: String,
    pub tags: Vec<String>,
    pub size_bytes: i64,
}

/// Metadata declared in a unit's manifest; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitMetadata {
    pub display_name: Option<String>,
    pub level: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

/// A benchmark unit: one directory plus its associated containers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkUnit {
    pub name: String,
    /// Numeric identifier embedded in the name (0 when absent)
    pub id: u32,
    pub path: PathBuf,
    pub metadata: UnitMetadata,
    pub has_docker_compose: bool,
    pub has_makefile: bool,
    pub containers: Vec<ContainerSnapshot>,
    pub status: UnitStatus,
    pub ports: PortMap,
    /// Image references built for this unit
    pub images: Vec<String>,
}

impl BenchmarkUnit {
    /// Whether at least one image exists for this unit
    pub fn is_built(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Output of a command executed inside a container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: Option<i64>,
}

/// Daemon connection summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    pub connected: bool,
    pub version: Option<String>,
    pub containers: i64,
    pub containers_running: i64,
    pub images: i64,
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time host resource statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub cpu: CpuStats,
    pub memory: SpaceStats,
    pub disk: SpaceStats,
    /// Seconds since this process started sampling
    pub uptime_secs: u64,
    pub host_uptime_secs: u64,
    pub hostname: String,
    pub containerized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub usage_percent: f64,
    pub cores: u32,
    pub model: String,
    /// Fractional core limit imposed by the cgroup, if any
    pub limit_cores: Option<f64>,
}

/// Total/used/free triple in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl SpaceStats {
    /// Build from total and free, deriving used
    pub fn from_total_free(total: u64, free: u64) -> Self {
        let free = free.min(total);
        Self {
            total,
            used: total - free,
            free,
        }
    }

    /// Build from a limit and current usage, deriving free
    pub fn from_limit_usage(limit: u64, usage: u64) -> Self {
        let used = usage.min(limit);
        Self {
            total: limit,
            used,
            free: limit - used,
        }
    }
}
