//! Resource usage of the agent process, sampled on every report tick.

use std::{fmt, io, time::Duration};

use anyhow::Result;
use chrono::{DateTime, TimeZone};
use log::debug;
use procfs::Current;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub cpu_utime: Duration,
    /// Peak resident set size in kB (`ru_maxrss` on Linux).
    pub max_rss_kb: i64,
    /// Seconds since the process started.
    pub running_time: f64,
}

impl ProcessSnapshot {
    pub fn capture() -> Result<Self> {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }

        let cpu_utime = Duration::from_secs(usage.ru_utime.tv_sec.max(0) as u64)
            + Duration::from_micros(usage.ru_utime.tv_usec.max(0) as u64);

        Ok(Self {
            pid: std::process::id(),
            cpu_utime,
            max_rss_kb: usage.ru_maxrss as i64,
            running_time: running_time().unwrap_or_else(|e| {
                debug!("Could not compute running time: {}", e);
                0.0
            }),
        })
    }
}

/// System uptime minus the process start time from /proc/self/stat.
fn running_time() -> procfs::ProcResult<f64> {
    let uptime = procfs::Uptime::current()?.uptime;
    let start_ticks = procfs::process::Process::myself()?.stat()?.starttime;
    let ticks_per_second = procfs::ticks_per_second() as f64;
    Ok((uptime - start_ticks as f64 / ticks_per_second).max(0.0))
}

impl fmt::Display for ProcessSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid: {}, cpu utime = {}.{:06} sec, mem maxrss = {} kB, running time: {:.2} seconds",
            self.pid,
            self.cpu_utime.as_secs(),
            self.cpu_utime.subsec_micros(),
            self.max_rss_kb,
            self.running_time,
        )
    }
}

/// `"<name> (pid: <pid>) started at <YYYY-mm-dd HH:MM:SS>"`
pub fn startup_banner<Tz>(name: &str, pid: u32, started: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!(
        "{} (pid: {}) started at {}",
        name,
        pid,
        started.format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_report_line_format() {
        let snapshot = ProcessSnapshot {
            pid: 4242,
            cpu_utime: Duration::new(3, 5_000),
            max_rss_kb: 10_240,
            running_time: 45.678,
        };
        assert_eq!(
            snapshot.to_string(),
            "pid: 4242, cpu utime = 3.000005 sec, mem maxrss = 10240 kB, running time: 45.68 seconds"
        );
    }

    #[test]
    fn test_startup_banner_format() {
        let started = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 9, 1, 8, 5, 3)
            .unwrap();
        assert_eq!(
            startup_banner("waldo", 17, &started),
            "waldo (pid: 17) started at 2023-09-01 08:05:03"
        );
    }

    #[test]
    fn test_capture_reports_current_process() {
        let snapshot = ProcessSnapshot::capture().unwrap();
        assert_eq!(snapshot.pid, std::process::id());
        assert!(snapshot.max_rss_kb > 0);
        assert!(snapshot.running_time >= 0.0);
    }
}
