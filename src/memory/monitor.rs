//! Process memory probe backed by `sysinfo`.

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::info;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = MB * 1024.0;

/// One reading of process and system memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Resident set size of this process, in MB
    pub process_rss_mb: f64,
    /// Memory still available to the system, in GB
    pub available_gb: f64,
    /// Total system memory, in GB
    pub total_gb: f64,
}

/// Reads process RSS and system memory.
///
/// Keeps the first reading as a baseline so later stages can report how much
/// a load grew the process.
pub struct MemoryProbe {
    system: System,
    baseline_mb: f64,
}

impl MemoryProbe {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        let baseline_mb = Self::process_memory_mb(&system);
        Self { system, baseline_mb }
    }

    fn process_memory_mb(system: &System) -> f64 {
        let pid = Pid::from_u32(std::process::id());
        system
            .process(pid)
            .map(|p| p.memory() as f64 / MB)
            .unwrap_or(0.0)
    }

    /// Take a fresh reading.
    pub fn snapshot(&mut self) -> MemorySnapshot {
        self.system.refresh_all();
        MemorySnapshot {
            process_rss_mb: Self::process_memory_mb(&self.system),
            available_gb: self.system.available_memory() as f64 / GB,
            total_gb: self.system.total_memory() as f64 / GB,
        }
    }

    /// Change in process memory since the probe was created (MB).
    pub fn delta_mb(&mut self) -> f64 {
        self.snapshot().process_rss_mb - self.baseline_mb
    }

    /// Log a reading tagged with `stage` and return it.
    pub fn log(&mut self, stage: &str) -> MemorySnapshot {
        let snap = self.snapshot();
        info!(
            stage,
            rss_mb = format!("{:.2}", snap.process_rss_mb),
            available_gb = format!("{:.2}", snap.available_gb),
            "memory usage"
        );
        snap
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reports_system_memory() {
        let mut probe = MemoryProbe::new();
        let snap = probe.snapshot();
        assert!(snap.total_gb > 0.0);
        assert!(snap.available_gb <= snap.total_gb);
    }

    #[test]
    fn test_delta_is_finite() {
        let mut probe = MemoryProbe::default();
        let _buffer = vec![0u8; 4 * 1024 * 1024];
        assert!(probe.delta_mb().is_finite());
    }
}
