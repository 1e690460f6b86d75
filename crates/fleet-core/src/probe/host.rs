//! Host-level counters from procfs and the filesystem

use crate::models::SpaceStats;
use std::path::Path;
use sysinfo::Disks;

/// Aggregated tick counters across all logical cores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub total: u64,
    pub idle: u64,
    pub cores: u32,
}

/// Sum the per-core lines ("cpu0", "cpu1", ...) of /proc/stat
///
/// Idle time includes iowait.
pub fn parse_proc_stat(content: &str) -> CpuTicks {
    let mut ticks = CpuTicks::default();

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let label = match fields.next() {
            Some(l) => l,
            None => continue,
        };
        let is_core = label
            .strip_prefix("cpu")
            .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if !is_core {
            continue;
        }

        let values: Vec<u64> = fields.map(|v| v.parse().unwrap_or(0)).collect();
        ticks.total += values.iter().sum::<u64>();
        ticks.idle += values.get(3).copied().unwrap_or(0) + values.get(4).copied().unwrap_or(0);
        ticks.cores += 1;
    }

    ticks
}

/// Busy percentage between two tick samples: (Δtotal − Δidle) / Δtotal
pub fn utilization(before: CpuTicks, after: CpuTicks) -> f64 {
    let total = after.total.saturating_sub(before.total);
    let idle = after.idle.saturating_sub(before.idle);
    if total == 0 {
        return 0.0;
    }
    (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
}

/// Parse /proc/meminfo into (total, available) bytes
pub fn parse_meminfo(content: &str) -> (u64, u64) {
    let mut total = 0u64;
    let mut available = None;
    let mut free = 0u64;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let kib: u64 = parts[1].parse().unwrap_or(0);
        match parts[0] {
            "MemTotal:" => total = kib * 1024,
            "MemAvailable:" => available = Some(kib * 1024),
            "MemFree:" => free = kib * 1024,
            _ => {}
        }
    }

    (total, available.unwrap_or(free))
}

/// First "model name" entry of /proc/cpuinfo
pub fn parse_cpu_model(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "model name").then(|| value.trim().to_string())
    })
}

/// Space of the filesystem holding `mount`, via the longest matching mount point
pub fn disk_space(mount: &Path) -> SpaceStats {
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|d| mount.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| SpaceStats::from_total_free(d.total_space(), d.available_space()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  300 0 100 1000 50 0 0 0 0 0
cpu0 100 0 50 500 25 0 0 0 0 0
cpu1 200 0 50 500 25 0 0 0 0 0
intr 12345
ctxt 6789
";

    #[test]
    fn test_parse_proc_stat_sums_cores() {
        let ticks = parse_proc_stat(STAT);
        assert_eq!(ticks.cores, 2);
        assert_eq!(ticks.total, 675 + 775);
        assert_eq!(ticks.idle, 1050);
    }

    #[test]
    fn test_utilization() {
        let before = CpuTicks { total: 1000, idle: 800, cores: 2 };
        let after = CpuTicks { total: 2000, idle: 1300, cores: 2 };
        assert!((utilization(before, after) - 50.0).abs() < f64::EPSILON);

        assert_eq!(utilization(before, before), 0.0);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16384000 kB
MemFree:         1024000 kB
MemAvailable:    8192000 kB
";
        assert_eq!(parse_meminfo(content), (16384000 * 1024, 8192000 * 1024));

        let no_available = "MemTotal: 1000 kB\nMemFree: 400 kB\n";
        assert_eq!(parse_meminfo(no_available), (1000 * 1024, 400 * 1024));
    }

    #[test]
    fn test_parse_cpu_model() {
        let content = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R) CPU\n";
        assert_eq!(parse_cpu_model(content), Some("Intel(R) Xeon(R) CPU".to_string()));
        assert_eq!(parse_cpu_model(""), None);
    }
}
