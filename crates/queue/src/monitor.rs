//! Process resource sampling.
//!
//! Pull-based: a sample is taken only when stats are computed. The numbers
//! are informational and never feed back into admission.

use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

/// Point-in-time resource usage of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    /// CPU usage since the previous sample, in percent of one core.
    pub cpu_percent: f32,
    /// CPU time consumed since the monitor was created, integrated from the
    /// per-sample usage over wall-clock time between samples.
    pub cpu_time_ms: u64,
    /// Seconds since the process started.
    pub run_time_secs: u64,
}

impl ResourceSample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Samples memory and CPU of the current process via `sysinfo`.
pub struct ResourceMonitor {
    inner: Mutex<Sampler>,
    pid: Pid,
}

struct Sampler {
    system: System,
    last_sample: Instant,
    cpu_time_ms: f64,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_process(pid);
        Self {
            inner: Mutex::new(Sampler {
                system,
                last_sample: Instant::now(),
                cpu_time_ms: 0.0,
            }),
            pid,
        }
    }

    /// Refresh and read the current process. `None` if the process table
    /// could not be read.
    pub fn sample(&self) -> Option<ResourceSample> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let sampler = &mut *guard;
        if !sampler.system.refresh_process(self.pid) {
            tracing::debug!(pid = %self.pid, "process refresh failed");
            return None;
        }
        let process = sampler.system.process(self.pid)?;
        let cpu_percent = process.cpu_usage();

        let now = Instant::now();
        let window_ms = now.duration_since(sampler.last_sample).as_secs_f64() * 1000.0;
        sampler.last_sample = now;
        sampler.cpu_time_ms += window_ms * f64::from(cpu_percent.max(0.0)) / 100.0;

        Some(ResourceSample {
            memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            cpu_percent,
            cpu_time_ms: sampler.cpu_time_ms as u64,
            run_time_secs: process.run_time(),
        })
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor").field("pid", &self.pid).finish()
    }
}
