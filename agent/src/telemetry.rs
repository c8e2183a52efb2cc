//! Health snapshots sent with every heartbeat

use std::fmt;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Coarse device health derived from resource usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource usage at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// CPU usage percentage (0-100)
    pub cpu_pct: f64,

    /// Memory in use, in MiB
    pub memory_mb: f64,

    /// Memory usage percentage
    pub memory_pct: f64,

    /// Disk usage percentage across all mounted disks
    pub disk_pct: f64,

    /// System uptime in seconds
    pub uptime_secs: u64,

    pub status: HealthStatus,
}

/// cpu or memory >= 95 or disk >= 98 is an error; >= 85 / >= 90 is degraded
pub fn derive_status(cpu_pct: f64, memory_pct: f64, disk_pct: f64) -> HealthStatus {
    if cpu_pct >= 95.0 || memory_pct >= 95.0 || disk_pct >= 98.0 {
        return HealthStatus::Error;
    }
    if cpu_pct >= 85.0 || memory_pct >= 85.0 || disk_pct >= 90.0 {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

fn percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Collect a health snapshot
pub fn collect_health() -> HealthSnapshot {
    let mut sys = System::new_all();
    sys.refresh_all();

    let disks = Disks::new_with_refreshed_list();
    let (disk_used, disk_total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });

    let memory_used = sys.used_memory();
    let memory_pct = percent(memory_used, sys.total_memory());
    let disk_pct = percent(disk_used, disk_total);
    let cpu_pct = f64::from(sys.global_cpu_usage());

    HealthSnapshot {
        cpu_pct,
        memory_mb: memory_used as f64 / (1024.0 * 1024.0),
        memory_pct,
        disk_pct,
        uptime_secs: System::uptime(),
        status: derive_status(cpu_pct, memory_pct, disk_pct),
    }
}

/// Static hardware description sent on registration
pub fn hardware_metadata() -> serde_json::Value {
    let mut sys = System::new();
    sys.refresh_memory();

    serde_json::json!({
        "hostname": System::host_name().unwrap_or_else(|| "unknown".to_string()),
        "os": System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
        "arch": std::env::consts::ARCH,
        "cpu_count": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        "memory_total_mb": sys.total_memory() / (1024 * 1024),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_thresholds() {
        assert_eq!(derive_status(10.0, 20.0, 30.0), HealthStatus::Healthy);
        assert_eq!(derive_status(84.9, 84.9, 89.9), HealthStatus::Healthy);
        assert_eq!(derive_status(85.0, 0.0, 0.0), HealthStatus::Degraded);
        assert_eq!(derive_status(0.0, 0.0, 90.0), HealthStatus::Degraded);
        assert_eq!(derive_status(0.0, 95.0, 0.0), HealthStatus::Error);
        assert_eq!(derive_status(0.0, 0.0, 98.0), HealthStatus::Error);
    }

    #[test]
    fn test_collect_health() {
        let snapshot = collect_health();
        assert!(snapshot.memory_pct >= 0.0 && snapshot.memory_pct <= 100.0);
        assert_eq!(
            snapshot.status,
            derive_status(snapshot.cpu_pct, snapshot.memory_pct, snapshot.disk_pct)
        );
    }
}
