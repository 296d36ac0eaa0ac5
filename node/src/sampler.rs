//! Wall-clock phase timing and resident-memory sampling.

use crate::errors::{NodeError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

/// Monotonic interval timer.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Start measuring now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time elapsed since [`Stopwatch::start`].
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Run `f` and return its output with the time it took.
pub fn time<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let watch = Stopwatch::start();
    let out = f();
    (out, watch.elapsed())
}

/// Await `fut` and return its output with the time it took.
pub async fn time_async<F: Future>(fut: F) -> (F::Output, Duration) {
    let watch = Stopwatch::start();
    let out = fut.await;
    (out, watch.elapsed())
}

/// Convert bytes to mebibytes, the unit used in every report.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Samples the resident set size of the current process using sysinfo.
pub struct MemorySampler {
    sys: System,
    pid: Pid,
}

impl MemorySampler {
    /// Create a sampler bound to the current process.
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| NodeError::Config(format!("Cannot determine current pid: {}", e)))?;
        Ok(Self {
            sys: System::new(),
            pid,
        })
    }

    /// Current resident set size in bytes.
    pub fn resident_bytes(&mut self) -> Result<u64> {
        // Refresh only our own process entry rather than the full table
        if !self.sys.refresh_process(self.pid) {
            return Err(NodeError::Config(format!(
                "Process {} not visible to sysinfo",
                self.pid
            )));
        }

        self.sys
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or_else(|| NodeError::Config(format!("Process {} not found", self.pid)))
    }

    /// Current resident set size in MB.
    pub fn resident_mb(&mut self) -> Result<f64> {
        self.resident_bytes().map(bytes_to_mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwatch_monotonic() {
        let watch = Stopwatch::start();
        let first = watch.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        let second = watch.elapsed();
        assert!(second >= first);
        assert!(second >= Duration::from_millis(5));
    }

    #[test]
    fn test_time_returns_output() {
        let (value, elapsed) = time(|| {
            std::thread::sleep(Duration::from_millis(2));
            42
        });
        assert_eq!(value, 42);
        assert!(elapsed >= Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_time_async_returns_output() {
        let (value, elapsed) = time_async(async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            "done"
        })
        .await;
        assert_eq!(value, "done");
        assert!(elapsed >= Duration::from_millis(2));
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(0), 0.0);
    }

    #[test]
    fn test_memory_sampler_reports_nonzero_rss() {
        let mut sampler = MemorySampler::new().unwrap();
        let rss = sampler.resident_bytes().unwrap();
        assert!(rss > 0);
        assert!(sampler.resident_mb().unwrap() > 0.0);
    }
}
