//! cgroup v1 limit discovery (fallback)
//!
//! Reads limits from the legacy per-controller hierarchy:
//! - cpu controller: cpu.cfs_quota_us / cpu.cfs_period_us
//! - memory controller: memory.limit_in_bytes / memory.usage_in_bytes

use super::{read_cgroup_value, UNLIMITED_THRESHOLD};
use std::path::PathBuf;
use tokio::fs;

/// Limit reader for the legacy cgroup v1 hierarchy
pub struct CgroupV1Limits {
    /// Root path for cgroup v1 controllers (typically /sys/fs/cgroup)
    cgroup_root: PathBuf,
}

impl CgroupV1Limits {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Check if cgroup v1 controllers are mounted
    pub async fn is_available(&self) -> bool {
        fs::metadata(self.cgroup_root.join("cpu")).await.is_ok()
            || fs::metadata(self.cgroup_root.join("memory")).await.is_ok()
    }

    /// Convert a CFS quota/period pair into a fractional core count
    /// A quota of -1 means unlimited
    pub fn quota_to_cores(quota: i64, period: i64) -> Option<f64> {
        if quota <= 0 || period <= 0 {
            return None;
        }
        Some(quota as f64 / period as f64)
    }

    /// CPU limit in cores, if one is set
    pub async fn cpu_limit(&self) -> Option<f64> {
        let cpu = self.cgroup_root.join("cpu");
        let quota = fs::read_to_string(cpu.join("cpu.cfs_quota_us")).await.ok()?;
        let period = fs::read_to_string(cpu.join("cpu.cfs_period_us"))
            .await
            .ok()?;

        Self::quota_to_cores(quota.trim().parse().ok()?, period.trim().parse().ok()?)
    }

    /// Memory (limit, usage) in bytes, if a limit is set
    pub async fn memory(&self) -> Option<(u64, u64)> {
        let memory = self.cgroup_root.join("memory");
        let limit = read_cgroup_value(&memory, "memory.limit_in_bytes").await?;
        if limit == 0 || limit >= UNLIMITED_THRESHOLD {
            return None;
        }
        let usage = read_cgroup_value(&memory, "memory.usage_in_bytes")
            .await
            .unwrap_or(0);
        Some((limit, usage))
    }
}
