//! Process resource sampling via `sysinfo`.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use super::metrics::{CpuUsage, HeapStats, MemoryUsage};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ResourceSample {
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
    pub heap: HeapStats,
}

/// Samples memory and CPU of the current process.
///
/// CPU usage is computed by sysinfo from the process CPU-time delta between
/// two refreshes, so the first sample after construction reads 0.
pub(crate) struct ResourceSampler {
    pid: Pid,
    total_memory: u64,
    system: Mutex<System>,
}

impl ResourceSampler {
    pub(crate) fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
        );
        system.refresh_memory();
        let total_memory = system.total_memory();

        Self {
            pid,
            total_memory,
            system: Mutex::new(system),
        }
    }

    pub(crate) fn sample(&self) -> ResourceSample {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        let Some(process) = system.process(self.pid) else {
            tracing::debug!(pid = %self.pid, "current process not visible to sysinfo");
            return ResourceSample {
                heap: HeapStats {
                    limit_bytes: self.total_memory,
                    ..HeapStats::default()
                },
                ..ResourceSample::default()
            };
        };

        let rss = process.memory();
        let virt = process.virtual_memory();
        ResourceSample {
            memory: MemoryUsage {
                rss_bytes: rss,
                virtual_bytes: virt,
            },
            cpu: CpuUsage {
                percent: f64::from(process.cpu_usage()),
            },
            heap: HeapStats {
                used_bytes: rss,
                total_bytes: virt,
                limit_bytes: self.total_memory,
            },
        }
    }
}

impl std::fmt::Debug for ResourceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSampler")
            .field("pid", &self.pid)
            .field("total_memory", &self.total_memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_the_running_process() {
        let sampler = ResourceSampler::new();
        let sample = sampler.sample();
        assert!(sample.memory.rss_bytes > 0);
        assert_eq!(sample.heap.used_bytes, sample.memory.rss_bytes);
        assert!(sample.cpu.percent >= 0.0);
    }
}
