use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{Pid, System};

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub last_heartbeat: Instant,
    pub batches_flushed: u64,
    /// Entries durably handed off to the sink, cumulative.
    pub entries_processed: u64,
    /// Current occupancy of the worker's write-through buffer.
    pub buffered_count: usize,
    /// Process RSS in bytes, sampled at the worker's last heartbeat.
    pub memory_bytes: u64,
    pub last_error: Option<String>,
}

impl HealthReport {
    fn new() -> Self {
        Self {
            last_heartbeat: Instant::now(),
            batches_flushed: 0,
            entries_processed: 0,
            buffered_count: 0,
            memory_bytes: 0,
            last_error: None,
        }
    }
}

/// Shared health state published by every worker and consulted by the
/// pool's supervisor loop to detect a hung (not crashed) worker task.
pub struct HealthRegistry {
    reports: Mutex<HashMap<String, HealthReport>>,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self {
            reports: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sample_memory_bytes(&self) -> u64 {
        let Some(pid) = self.pid else { return 0 };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    pub fn heartbeat(&self, worker_id: &str) {
        let memory_bytes = self.sample_memory_bytes();
        let mut reports = self.reports.lock();
        let entry = reports
            .entry(worker_id.to_string())
            .or_insert_with(HealthReport::new);
        entry.last_heartbeat = Instant::now();
        entry.memory_bytes = memory_bytes;
    }

    pub fn record_flush(&self, worker_id: &str, entries: u64) {
        let mut reports = self.reports.lock();
        if let Some(report) = reports.get_mut(worker_id) {
            report.batches_flushed += 1;
            report.entries_processed += entries;
            report.last_heartbeat = Instant::now();
        }
    }

    pub fn record_buffered(&self, worker_id: &str, count: usize) {
        let mut reports = self.reports.lock();
        let entry = reports
            .entry(worker_id.to_string())
            .or_insert_with(HealthReport::new);
        entry.buffered_count = count;
    }

    pub fn record_error(&self, worker_id: &str, error: String) {
        let mut reports = self.reports.lock();
        if let Some(report) = reports.get_mut(worker_id) {
            report.last_error = Some(error);
        }
    }

    /// True if the worker has never reported in, or hasn't reported in
    /// within `2 * heartbeat_interval`.
    pub fn is_stale(&self, worker_id: &str, heartbeat_interval: Duration) -> bool {
        let reports = self.reports.lock();
        match reports.get(worker_id) {
            Some(report) => report.last_heartbeat.elapsed() > heartbeat_interval * 2,
            None => true,
        }
    }

    pub fn remove(&self, worker_id: &str) {
        self.reports.lock().remove(worker_id);
    }

    /// A snapshot of the given worker's last-reported health, if any.
    pub fn report(&self, worker_id: &str) -> Option<HealthReport> {
        self.reports.lock().get(worker_id).cloned()
    }

    /// Number of workers currently reporting in. Used for readiness
    /// checks: the pool is ready once at least one worker has started.
    pub fn worker_count(&self) -> usize {
        self.reports.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_worker_is_stale() {
        let registry = HealthRegistry::new();
        assert!(registry.is_stale("missing", Duration::from_millis(10)));
    }

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let registry = HealthRegistry::new();
        registry.heartbeat("w1");
        assert!(!registry.is_stale("w1", Duration::from_secs(60)));
    }

    #[test]
    fn tracks_buffered_count_and_processed_entries() {
        let registry = HealthRegistry::new();
        registry.heartbeat("w1");
        registry.record_buffered("w1", 7);
        registry.record_flush("w1", 3);
        registry.record_flush("w1", 2);

        let report = registry.report("w1").expect("report should exist");
        assert_eq!(report.buffered_count, 7);
        assert_eq!(report.entries_processed, 5);
        assert_eq!(report.batches_flushed, 2);
    }
}
