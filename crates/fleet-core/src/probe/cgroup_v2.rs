//! cgroup v2 limit discovery
//!
//! Reads limits from the unified hierarchy:
//! - cpu.max for the CPU quota ("max 100000" when unlimited)
//! - memory.max and memory.current for the memory limit and usage

use super::{read_cgroup_value, UNLIMITED_THRESHOLD};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Limit reader for the cgroup v2 unified hierarchy
pub struct CgroupV2Limits {
    cgroup_root: PathBuf,
}

impl CgroupV2Limits {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Check if the unified hierarchy is mounted at the root
    pub async fn is_available(&self) -> bool {
        fs::metadata(self.cgroup_root.join("cgroup.controllers"))
            .await
            .is_ok()
    }

    /// Parse cpu.max contents into a fractional core count
    /// Returns None for "max" or malformed content
    pub fn parse_cpu_max(content: &str) -> Option<f64> {
        let mut parts = content.split_whitespace();
        let quota = parts.next()?;
        if quota == "max" {
            return None;
        }
        let quota: f64 = quota.parse().ok()?;
        let period: f64 = parts.next().unwrap_or("100000").parse().ok()?;

        if quota <= 0.0 || period <= 0.0 {
            return None;
        }
        Some(quota / period)
    }

    /// CPU limit in cores, if one is set
    pub async fn cpu_limit(&self) -> Option<f64> {
        let content = fs::read_to_string(self.cgroup_root.join("cpu.max"))
            .await
            .ok()?;
        Self::parse_cpu_max(&content)
    }

    /// Memory (limit, usage) in bytes, if a limit is set
    pub async fn memory(&self) -> Option<(u64, u64)> {
        let limit = read_limit(&self.cgroup_root, "memory.max").await?;
        let usage = read_cgroup_value(&self.cgroup_root, "memory.current")
            .await
            .unwrap_or(0);
        Some((limit, usage))
    }
}

async fn read_limit(root: &Path, filename: &str) -> Option<u64> {
    let content = fs::read_to_string(root.join(filename)).await.ok()?;
    let content = content.trim();
    if content == "max" {
        return None;
    }
    content
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0 && *v < UNLIMITED_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_cpu_max() {
        assert_eq!(CgroupV2Limits::parse_cpu_max("200000 100000\n"), Some(2.0));
        assert_eq!(CgroupV2Limits::parse_cpu_max("50000 100000"), Some(0.5));
        assert_eq!(CgroupV2Limits::parse_cpu_max("max 100000"), None);
        assert_eq!(CgroupV2Limits::parse_cpu_max(""), None);
        assert_eq!(CgroupV2Limits::parse_cpu_max("garbage"), None);
    }

    #[tokio::test]
    async fn test_memory_limit_and_usage() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cgroup.controllers"), "cpu memory\n")
            .await
            .unwrap();
        fs::write(dir.path().join("memory.max"), "536870912\n")
            .await
            .unwrap();
        fs::write(dir.path().join("memory.current"), "134217728\n")
            .await
            .unwrap();

        let limits = CgroupV2Limits::new(dir.path());
        assert!(limits.is_available().await);
        assert_eq!(limits.memory().await, Some((536870912, 134217728)));
    }

    #[tokio::test]
    async fn test_memory_unlimited() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("memory.max"), "max\n").await.unwrap();

        let limits = CgroupV2Limits::new(dir.path());
        assert_eq!(limits.memory().await, None);
        assert_eq!(limits.cpu_limit().await, None);
    }
}
