//! Soft resource monitoring for loaded modules.
//!
//! Usage samples are recorded per module and queried as current, rolling
//! average, and peak. `check_limits` observes and reports; it never stops a
//! module.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Samples retained per module.
pub const MAX_USAGE_HISTORY: usize = 100;

/// Resource budget for one module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub max_memory_mb: f64,
    pub max_cpu_percent: f32,
    pub max_execution_time_ms: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 512.0,
            max_cpu_percent: 80.0,
            max_execution_time_ms: 30_000,
        }
    }
}

/// One observed usage sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub memory_mb: f64,
    pub cpu_percent: f32,
    pub execution_time_ms: u64,
    /// Unix timestamp (seconds) of the sample.
    pub timestamp: i64,
}

/// Outcome of a limit check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    pub exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LimitCheck {
    fn ok() -> Self {
        Self { exceeded: false, reason: None }
    }

    fn exceeded(reason: String) -> Self {
        Self { exceeded: true, reason: Some(reason) }
    }
}

#[derive(Default)]
struct MonitorState {
    usage: HashMap<String, Vec<ResourceUsage>>,
    limits: HashMap<String, ResourceLimits>,
    started: HashMap<String, Instant>,
}

#[derive(Default)]
pub struct ResourceMonitor {
    state: RwLock<MonitorState>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limits(&self, module: &str, limits: ResourceLimits) {
        self.state.write().unwrap().limits.insert(module.to_string(), limits);
    }

    pub fn get_limits(&self, module: &str) -> ResourceLimits {
        self.state
            .read()
            .unwrap()
            .limits
            .get(module)
            .copied()
            .unwrap_or_default()
    }

    /// Begin tracking a module. Resets its execution clock, keeps history.
    pub fn start_monitoring(&self, module: &str) {
        let mut state = self.state.write().unwrap();
        state.started.insert(module.to_string(), Instant::now());
        state.usage.entry(module.to_string()).or_default();
        debug!(module, "Resource monitoring started");
    }

    pub fn stop_monitoring(&self, module: &str) {
        self.state.write().unwrap().started.remove(module);
    }

    pub fn is_monitored(&self, module: &str) -> bool {
        self.state.read().unwrap().started.contains_key(module)
    }

    pub fn monitored_modules(&self) -> Vec<String> {
        self.state.read().unwrap().started.keys().cloned().collect()
    }

    /// Record an observed sample for a module.
    pub fn record_usage(&self, module: &str, memory_mb: f64, cpu_percent: f32) -> ResourceUsage {
        let mut state = self.state.write().unwrap();
        let execution_time_ms = state
            .started
            .get(module)
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let usage = ResourceUsage {
            memory_mb,
            cpu_percent,
            execution_time_ms,
            timestamp: chrono::Utc::now().timestamp(),
        };

        let history = state.usage.entry(module.to_string()).or_default();
        history.push(usage);
        if history.len() > MAX_USAGE_HISTORY {
            history.remove(0);
        }

        usage
    }

    pub fn current_usage(&self, module: &str) -> Option<ResourceUsage> {
        self.state
            .read()
            .unwrap()
            .usage
            .get(module)
            .and_then(|history| history.last().copied())
    }

    pub fn usage_history(&self, module: &str, limit: Option<usize>) -> Vec<ResourceUsage> {
        let state = self.state.read().unwrap();
        let history = state.usage.get(module).cloned().unwrap_or_default();
        match limit {
            Some(n) if history.len() > n => history[history.len() - n..].to_vec(),
            _ => history,
        }
    }

    pub fn average_usage(&self, module: &str) -> Option<ResourceUsage> {
        let state = self.state.read().unwrap();
        let history = state.usage.get(module)?;
        if history.is_empty() {
            return None;
        }

        let count = history.len() as f64;
        Some(ResourceUsage {
            memory_mb: history.iter().map(|u| u.memory_mb).sum::<f64>() / count,
            cpu_percent: history.iter().map(|u| u.cpu_percent).sum::<f32>() / count as f32,
            execution_time_ms: (history.iter().map(|u| u.execution_time_ms).sum::<u64>() as f64
                / count) as u64,
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    pub fn peak_usage(&self, module: &str) -> Option<ResourceUsage> {
        let state = self.state.read().unwrap();
        let history = state.usage.get(module)?;
        if history.is_empty() {
            return None;
        }

        let mut peak = history[0];
        for usage in &history[1..] {
            peak.memory_mb = peak.memory_mb.max(usage.memory_mb);
            peak.cpu_percent = peak.cpu_percent.max(usage.cpu_percent);
            peak.execution_time_ms = peak.execution_time_ms.max(usage.execution_time_ms);
            peak.timestamp = usage.timestamp;
        }
        Some(peak)
    }

    /// Compare the latest sample against the module's limits. Advisory only:
    /// the result is reported, never acted on here.
    pub fn check_limits(&self, module: &str) -> LimitCheck {
        let limits = self.get_limits(module);
        let Some(usage) = self.current_usage(module) else {
            return LimitCheck::ok();
        };

        if usage.memory_mb > limits.max_memory_mb {
            let reason = format!(
                "memory limit exceeded: {:.2}MB > {:.0}MB",
                usage.memory_mb, limits.max_memory_mb
            );
            warn!(module, %reason, "Resource limit exceeded");
            return LimitCheck::exceeded(reason);
        }
        if usage.cpu_percent > limits.max_cpu_percent {
            let reason = format!(
                "CPU limit exceeded: {:.2}% > {:.0}%",
                usage.cpu_percent, limits.max_cpu_percent
            );
            warn!(module, %reason, "Resource limit exceeded");
            return LimitCheck::exceeded(reason);
        }
        if usage.execution_time_ms > limits.max_execution_time_ms {
            let reason = format!(
                "execution time limit exceeded: {}ms > {}ms",
                usage.execution_time_ms, limits.max_execution_time_ms
            );
            warn!(module, %reason, "Resource limit exceeded");
            return LimitCheck::exceeded(reason);
        }

        LimitCheck::ok()
    }

    /// Drop everything recorded for a module.
    pub fn clear_module(&self, module: &str) {
        let mut state = self.state.write().unwrap();
        state.usage.remove(module);
        state.limits.remove(module);
        state.started.remove(module);
    }

    pub fn clear_all(&self) {
        let mut state = self.state.write().unwrap();
        state.usage.clear();
        state.limits.clear();
        state.started.clear();
    }
}

/// Periodically sample the host process and feed every monitored module.
/// Per-module attribution is not available without OS-level isolation, so
/// all modules observe the shared process footprint.
pub fn spawn_sampler(
    monitor: Arc<ResourceMonitor>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sys = sysinfo::System::new();
        let Ok(pid) = sysinfo::get_current_pid() else {
            warn!("Resource sampler could not resolve its own pid; not sampling");
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sys.refresh_process(pid);
            let Some(process) = sys.process(pid) else { continue };

            let memory_mb = process.memory() as f64 / 1024.0 / 1024.0;
            let cpu_percent = process.cpu_usage();

            for module in monitor.monitored_modules() {
                monitor.record_usage(&module, memory_mb, cpu_percent);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_average_peak() {
        let monitor = ResourceMonitor::new();
        monitor.start_monitoring("reports");

        monitor.record_usage("reports", 100.0, 10.0);
        monitor.record_usage("reports", 300.0, 30.0);
        monitor.record_usage("reports", 200.0, 20.0);

        let current = monitor.current_usage("reports").unwrap();
        assert_eq!(current.memory_mb, 200.0);

        let average = monitor.average_usage("reports").unwrap();
        assert_eq!(average.memory_mb, 200.0);
        assert_eq!(average.cpu_percent, 20.0);

        let peak = monitor.peak_usage("reports").unwrap();
        assert_eq!(peak.memory_mb, 300.0);
        assert_eq!(peak.cpu_percent, 30.0);
    }

    #[test]
    fn test_history_is_capped() {
        let monitor = ResourceMonitor::new();
        monitor.start_monitoring("reports");
        for i in 0..150 {
            monitor.record_usage("reports", i as f64, 1.0);
        }
        let history = monitor.usage_history("reports", None);
        assert_eq!(history.len(), MAX_USAGE_HISTORY);
        assert_eq!(history.last().unwrap().memory_mb, 149.0);
    }

    #[test]
    fn test_check_limits_reports_but_never_gates() {
        let monitor = ResourceMonitor::new();
        monitor.set_limits(
            "reports",
            ResourceLimits { max_memory_mb: 128.0, ..Default::default() },
        );
        monitor.start_monitoring("reports");
        monitor.record_usage("reports", 256.0, 5.0);

        let check = monitor.check_limits("reports");
        assert!(check.exceeded);
        assert!(check.reason.unwrap().contains("memory limit"));

        // The module is still monitored and can keep recording.
        assert!(monitor.is_monitored("reports"));
        monitor.record_usage("reports", 512.0, 5.0);
    }

    #[test]
    fn test_no_samples_means_no_violation() {
        let monitor = ResourceMonitor::new();
        let check = monitor.check_limits("ghost");
        assert!(!check.exceeded);
    }

    #[test]
    fn test_clear_module_discards_state() {
        let monitor = ResourceMonitor::new();
        monitor.start_monitoring("reports");
        monitor.record_usage("reports", 64.0, 2.0);
        monitor.clear_module("reports");

        assert!(monitor.current_usage("reports").is_none());
        assert!(!monitor.is_monitored("reports"));
    }
}
