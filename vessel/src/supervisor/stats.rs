//! Process resource sampling.
//!
//! On Linux, CPU and memory come from /proc (cumulative core-nanoseconds
//! from utime+stime, RSS and fault counts from stat/statm); elsewhere the
//! sampler falls back to sysinfo's process table, which cannot provide
//! cumulative CPU time.

use chrono::Utc;

/// One sample of a running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSample {
    pub timestamp_ns: i64,
    /// Cumulative CPU time in core-nanoseconds.
    pub cpu_core_ns: u64,
    pub working_set_bytes: u64,
    pub rss_bytes: u64,
    pub page_faults: u64,
}

/// Sample a live process. Returns zeroes for a PID that is gone.
pub(crate) fn sample_process(pid: u32) -> ProcessSample {
    let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let mut sample = ProcessSample {
        timestamp_ns,
        ..Default::default()
    };

    #[cfg(target_os = "linux")]
    {
        if let Ok(proc) = procfs::process::Process::new(pid as i32) {
            if let Ok(stat) = proc.stat() {
                let tps = procfs::ticks_per_second();
                if tps > 0 {
                    let ns_per_tick = 1_000_000_000 / tps;
                    sample.cpu_core_ns = (stat.utime + stat.stime) * ns_per_tick;
                }
                sample.page_faults = stat.minflt + stat.majflt;
                sample.rss_bytes = stat.rss.max(0) as u64 * procfs::page_size();
                // Working set approximated by resident size; the kernel's
                // inactive-file split is not visible per-process.
                sample.working_set_bytes = sample.rss_bytes;
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        use sysinfo::{Pid, ProcessRefreshKind, System};
        let mut system = System::new();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_process_specifics(sys_pid, ProcessRefreshKind::new().with_memory());
        if let Some(process) = system.process(sys_pid) {
            sample.rss_bytes = process.memory();
            sample.working_set_bytes = process.memory();
        }
    }

    sample
}

/// Kernel start time of a process in clock ticks, for crash-recovery
/// identity matching. `None` when the process is gone or unreadable.
pub(crate) fn process_start_ticks(pid: u32) -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        procfs::process::Process::new(pid as i32)
            .ok()
            .and_then(|p| p.stat().ok())
            .map(|s| s.starttime)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_self_reports_memory() {
        let pid = std::process::id();
        let sample = sample_process(pid);
        assert!(sample.timestamp_ns > 0);
        #[cfg(target_os = "linux")]
        {
            assert!(sample.rss_bytes > 0);
            assert!(sample.cpu_core_ns > 0 || sample.page_faults > 0);
        }
    }

    #[test]
    fn dead_pid_samples_zero() {
        // PID 4_000_000 is above the default pid_max.
        let sample = sample_process(4_000_000);
        assert_eq!(sample.rss_bytes, 0);
        assert_eq!(sample.cpu_core_ns, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn start_ticks_present_for_self() {
        assert!(process_start_ticks(std::process::id()).is_some());
        assert!(process_start_ticks(4_000_000).is_none());
    }
}
