//! Host resource sampling
//!
//! [`ResourceProbe`] reports CPU, memory and disk usage for the host. When the
//! process itself runs inside a container, cgroup limits take precedence over
//! the host totals: cgroup v2 unified files are tried first, then the v1
//! controller files. Every sub-probe fails soft to zero/default values.

mod cgroup_v1;
mod cgroup_v2;
mod host;

pub use cgroup_v1::CgroupV1Limits;
pub use cgroup_v2::CgroupV2Limits;
pub use host::{parse_cpu_model, parse_meminfo, parse_proc_stat, utilization, CpuTicks};

use crate::auth::AuthenticatedPrincipal;
use crate::models::{CpuStats, ResourceSnapshot, SpaceStats};
use crate::observability::FleetMetrics;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::fs;
use tracing::debug;

/// Limits at or above this are "unlimited" sentinels
/// (cgroup v1 reports PAGE_COUNTER_MAX, 2^63 - 4096, when no limit is set)
pub(crate) const UNLIMITED_THRESHOLD: u64 = 1 << 62;

/// Substrings in /proc/1/cgroup that identify a container runtime
const RUNTIME_MARKERS: &[&str] = &["docker", "kubepods", "containerd", "lxc", "libpod", "podman"];

/// Read a single numeric value from a cgroup file
pub(crate) async fn read_cgroup_value(dir: &Path, filename: &str) -> Option<u64> {
    let content = fs::read_to_string(dir.join(filename)).await.ok()?;
    content.trim().parse().ok()
}

/// Filesystem locations the probe reads from
#[derive(Debug, Clone)]
pub struct ProbePaths {
    pub proc_root: PathBuf,
    pub cgroup_root: PathBuf,
    /// File whose presence marks a container environment
    pub container_marker: PathBuf,
    /// Mount whose filesystem is reported as disk usage
    pub disk_mount: PathBuf,
}

impl Default for ProbePaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            container_marker: PathBuf::from("/.dockerenv"),
            disk_mount: PathBuf::from("/"),
        }
    }
}

/// Limits discovered from the process's own cgroup
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CgroupLimits {
    pub cpu_cores: Option<f64>,
    /// (limit, usage) in bytes
    pub memory: Option<(u64, u64)>,
}

/// Samples host and cgroup-scoped resource usage
pub struct ResourceProbe {
    paths: ProbePaths,
    sample_window: Duration,
    started: Instant,
    metrics: FleetMetrics,
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new(ProbePaths::default())
    }
}

impl ResourceProbe {
    pub fn new(paths: ProbePaths) -> Self {
        Self {
            paths,
            sample_window: Duration::from_millis(100),
            started: Instant::now(),
            metrics: FleetMetrics::new(),
        }
    }

    /// Override the delay between the two CPU tick samples
    pub fn with_sample_window(mut self, window: Duration) -> Self {
        self.sample_window = window;
        self
    }

    /// Take a resource snapshot
    ///
    /// Blocks the caller for the CPU sampling window.
    pub async fn sample(&self, _principal: &AuthenticatedPrincipal) -> ResourceSnapshot {
        let containerized = self.is_containerized().await;
        let limits = if containerized {
            self.cgroup_limits().await
        } else {
            CgroupLimits::default()
        };

        let cpu = self.cpu_stats(limits.cpu_cores).await;
        let memory = self.memory_stats(limits.memory).await;

        let mount = self.paths.disk_mount.clone();
        let disk = tokio::task::spawn_blocking(move || host::disk_space(&mount))
            .await
            .unwrap_or_default();

        self.metrics.set_host_usage(cpu.usage_percent, memory.used);
        debug!(
            containerized,
            cpu_percent = cpu.usage_percent,
            mem_used = memory.used,
            "Resource sample taken"
        );

        ResourceSnapshot {
            cpu,
            memory,
            disk,
            uptime_secs: self.started.elapsed().as_secs(),
            host_uptime_secs: System::uptime(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            containerized,
        }
    }

    /// Whether this process runs inside a container
    pub async fn is_containerized(&self) -> bool {
        if fs::metadata(&self.paths.container_marker).await.is_ok() {
            return true;
        }

        match fs::read_to_string(self.paths.proc_root.join("1/cgroup")).await {
            Ok(content) => RUNTIME_MARKERS.iter().any(|m| content.contains(m)),
            Err(_) => false,
        }
    }

    /// Read cgroup limits, v2 first with a per-metric v1 fallback
    pub async fn cgroup_limits(&self) -> CgroupLimits {
        let v2 = CgroupV2Limits::new(&self.paths.cgroup_root);
        let v1 = CgroupV1Limits::new(&self.paths.cgroup_root);

        let cpu_cores = match v2.cpu_limit().await {
            Some(cores) => Some(cores),
            None => v1.cpu_limit().await,
        };
        let memory = match v2.memory().await {
            Some(mem) => Some(mem),
            None => v1.memory().await,
        };

        CgroupLimits { cpu_cores, memory }
    }

    async fn read_ticks(&self) -> CpuTicks {
        fs::read_to_string(self.paths.proc_root.join("stat"))
            .await
            .map(|content| parse_proc_stat(&content))
            .unwrap_or_default()
    }

    async fn cpu_stats(&self, limit_cores: Option<f64>) -> CpuStats {
        let before = self.read_ticks().await;
        tokio::time::sleep(self.sample_window).await;
        let after = self.read_ticks().await;

        let model = fs::read_to_string(self.paths.proc_root.join("cpuinfo"))
            .await
            .ok()
            .and_then(|content| parse_cpu_model(&content))
            .unwrap_or_default();

        let host_cores = after.cores;
        let cores = match limit_cores {
            Some(limit) if host_cores > 0 => (limit.ceil() as u32).clamp(1, host_cores),
            Some(limit) => (limit.ceil() as u32).max(1),
            None => host_cores,
        };

        CpuStats {
            usage_percent: utilization(before, after),
            cores,
            model,
            limit_cores,
        }
    }

    async fn memory_stats(&self, limit: Option<(u64, u64)>) -> SpaceStats {
        let (host_total, host_free) = fs::read_to_string(self.paths.proc_root.join("meminfo"))
            .await
            .map(|content| parse_meminfo(&content))
            .unwrap_or((0, 0));

        match limit {
            // A limit above physical memory is not a real constraint
            Some((limit, usage)) if host_total == 0 || limit < host_total => {
                SpaceStats::from_limit_usage(limit, usage)
            }
            _ => SpaceStats::from_total_free(host_total, host_free),
        }
    }
}
