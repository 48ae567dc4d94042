//! Liveness, readiness and host metrics payloads.

use muse_classifier::{AcceleratorInfo, ModelState};
use serde::Serialize;
use sysinfo::{Disks, System};

/// `GET /api/v1/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests.
    pub status: &'static str,
    /// UTC timestamp, RFC 3339.
    pub timestamp: String,
    /// Service name.
    pub service: String,
}

/// Build the liveness body.
pub fn health_check(service: &str) -> HealthResponse {
    HealthResponse {
        status: "healthy",
        timestamp: now_rfc3339(),
        service: service.to_string(),
    }
}

/// `GET /api/v1/health/detailed` body.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealthResponse {
    /// Always `"healthy"`.
    pub status: &'static str,
    /// UTC timestamp, RFC 3339.
    pub timestamp: String,
    /// Host resource usage.
    pub system: SystemMetrics,
    /// Accelerator availability.
    pub gpu: AcceleratorInfo,
    /// Model lifecycle.
    pub model: ModelStatus,
}

/// Host resource usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Global CPU usage, percent.
    pub cpu_percent: f64,
    /// Physical memory.
    pub memory: MemoryMetrics,
    /// Root filesystem.
    pub disk: DiskMetrics,
}

/// Physical memory usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMetrics {
    /// Installed memory, GiB.
    pub total_gb: f64,
    /// Memory available to new allocations, GiB.
    pub available_gb: f64,
    /// Share in use, percent.
    pub percent_used: f64,
}

/// Filesystem usage of the root mount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskMetrics {
    /// Capacity, GiB.
    pub total_gb: f64,
    /// Free space, GiB.
    pub free_gb: f64,
    /// Share in use, percent.
    pub percent_used: f64,
}

/// Model section of the detailed health body.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    /// Model identifier.
    pub name: String,
    /// Lifecycle state.
    pub state: ModelState,
}

/// Build the detailed body from a metrics snapshot.
pub fn detailed_health(
    system: SystemMetrics,
    gpu: AcceleratorInfo,
    model: ModelStatus,
) -> DetailedHealthResponse {
    DetailedHealthResponse {
        status: "healthy",
        timestamp: now_rfc3339(),
        system,
        gpu,
        model,
    }
}

/// `GET /api/v1/ready` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadyResponse {
    /// `"ready"` or `"not_ready"`.
    pub status: &'static str,
    /// Whether the model handle exists.
    pub model_loaded: bool,
    /// Lifecycle state.
    pub state: ModelState,
}

/// Readiness strictly follows the model state.
pub fn readiness(state: ModelState) -> ReadyResponse {
    let ready = state == ModelState::Ready;
    ReadyResponse {
        status: if ready { "ready" } else { "not_ready" },
        model_loaded: ready,
        state,
    }
}

/// Sample CPU, memory and root disk usage.
///
/// Blocks for [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] to measure CPU load.
/// Call from `spawn_blocking`.
pub fn collect_system_metrics(sys: &mut System) -> SystemMetrics {
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().next());
    let (disk_total, disk_free) = root.map_or((0, 0), |d| (d.total_space(), d.available_space()));

    SystemMetrics {
        cpu_percent: round2(f64::from(sys.global_cpu_usage())),
        memory: memory_metrics(sys.total_memory(), sys.available_memory()),
        disk: disk_metrics(disk_total, disk_free),
    }
}

/// Memory metrics from byte counts.
pub fn memory_metrics(total: u64, available: u64) -> MemoryMetrics {
    MemoryMetrics {
        total_gb: round2(gib(total)),
        available_gb: round2(gib(available)),
        percent_used: round2(percent(total.saturating_sub(available), total)),
    }
}

/// Disk metrics from byte counts.
pub fn disk_metrics(total: u64, free: u64) -> DiskMetrics {
    DiskMetrics {
        total_gb: round2(gib(total)),
        free_gb: round2(gib(free)),
        percent_used: round2(percent(total.saturating_sub(free), total)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn gib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0_f64.powi(3)
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
