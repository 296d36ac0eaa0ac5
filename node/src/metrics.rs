//! Per-rank phase timings and their reduction into one run summary.

use crate::errors::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Number of `f64` slots one [`PhaseTiming`] occupies on the wire.
pub const TIMING_WIRE_LEN: usize = 5;

/// What one rank measured about its own run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTiming {
    /// Local multiply only, no communication
    pub compute: Duration,
    /// Broadcast of the second operand
    pub broadcast: Duration,
    /// Scatter of the first operand
    pub scatter: Duration,
    /// Gather of the result blocks
    pub gather: Duration,
    /// Resident set size sampled after the result gather
    pub memory_mb: f64,
}

impl PhaseTiming {
    /// Encode as `[compute_s, broadcast_s, scatter_s, gather_s, memory_mb]`.
    pub fn to_wire(&self) -> [f64; TIMING_WIRE_LEN] {
        [
            self.compute.as_secs_f64(),
            self.broadcast.as_secs_f64(),
            self.scatter.as_secs_f64(),
            self.gather.as_secs_f64(),
            self.memory_mb,
        ]
    }

    /// Decode one record produced by [`PhaseTiming::to_wire`].
    pub fn from_wire(record: &[f64]) -> Result<Self> {
        let [compute, broadcast, scatter, gather, memory_mb]: [f64; TIMING_WIRE_LEN] =
            record.try_into().map_err(|_| {
                NodeError::Shape(format!(
                    "Timing record has {} values, expected {}",
                    record.len(),
                    TIMING_WIRE_LEN
                ))
            })?;

        Ok(Self {
            compute: seconds(compute)?,
            broadcast: seconds(broadcast)?,
            scatter: seconds(scatter)?,
            gather: seconds(gather)?,
            memory_mb,
        })
    }

    /// Decode a gathered buffer holding one record per rank, in rank order.
    pub fn decode_all(buffer: &[f64]) -> Result<Vec<Self>> {
        if buffer.len() % TIMING_WIRE_LEN != 0 {
            return Err(NodeError::Shape(format!(
                "Gathered timing buffer of {} values is not a whole number of records",
                buffer.len()
            )));
        }
        buffer
            .chunks_exact(TIMING_WIRE_LEN)
            .map(Self::from_wire)
            .collect()
    }
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| NodeError::Serialization(format!("Invalid duration {}: {}", value, e)))
}

/// Process-wide statistics for one run, produced once by the coordinator.
///
/// Times are in seconds, memory in MB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub worker_count: usize,
    pub matrix_size: usize,
    /// Coordinator wall clock from after operand setup to after the result gather
    pub total_time_s: f64,
    pub compute_avg_s: f64,
    pub bcast_avg_s: f64,
    pub scatter_avg_s: f64,
    pub gather_avg_s: f64,
    pub mem_max_mb: f64,
}

/// Reduce every rank's timings into one summary.
///
/// Time fields are arithmetic means across ranks; memory is the maximum.
/// `total` is taken as-is from the coordinator rather than reduced.
pub fn aggregate(
    timings: &[PhaseTiming],
    matrix_size: usize,
    total: Duration,
) -> Result<MetricsSummary> {
    if timings.is_empty() {
        return Err(NodeError::Shape(
            "Cannot summarize a run with no timing records".into(),
        ));
    }

    let count = timings.len() as f64;
    let mean = |field: fn(&PhaseTiming) -> Duration| -> f64 {
        timings.iter().map(|t| field(t).as_secs_f64()).sum::<f64>() / count
    };

    let mem_max_mb = timings
        .iter()
        .map(|t| t.memory_mb)
        .fold(f64::NEG_INFINITY, f64::max);

    Ok(MetricsSummary {
        worker_count: timings.len(),
        matrix_size,
        total_time_s: total.as_secs_f64(),
        compute_avg_s: mean(|t| t.compute),
        bcast_avg_s: mean(|t| t.broadcast),
        scatter_avg_s: mean(|t| t.scatter),
        gather_avg_s: mean(|t| t.gather),
        mem_max_mb,
    })
}

impl MetricsSummary {
    /// Log the summary as one structured event
    pub fn print_summary(&self) {
        info!(
            processes = self.worker_count,
            matrix_size = self.matrix_size,
            total_time_s = format!("{:.4}", self.total_time_s),
            compute_avg_s = format!("{:.4}", self.compute_avg_s),
            bcast_avg_s = format!("{:.4}", self.bcast_avg_s),
            scatter_avg_s = format!("{:.4}", self.scatter_avg_s),
            gather_avg_s = format!("{:.4}", self.gather_avg_s),
            mem_max_mb = format!("{:.2}", self.mem_max_mb),
            "Run metrics"
        );
    }

    /// The plain-text block the coordinator prints on stdout.
    ///
    /// Every line is `Label : value`, which is what the bench log scraper
    /// and anyone grepping old run logs expect.
    pub fn render(&self) -> String {
        format!(
            "=== Performance Metrics Summary ===\n\
             Processes      : {}\n\
             Matrix Size    : {}\n\
             Total Time     : {:.4} s\n\
             Compute Time   : avg = {:.4}\n\
             Bcast Time     : avg = {:.4}\n\
             Scatter Time   : avg = {:.4}\n\
             Gather Time    : avg = {:.4}\n\
             Max Memory     : {:.2} MB\n",
            self.worker_count,
            self.matrix_size,
            self.total_time_s,
            self.compute_avg_s,
            self.bcast_avg_s,
            self.scatter_avg_s,
            self.gather_avg_s,
            self.mem_max_mb
        )
    }

    /// Append one `N,P,total,compute,bcast,scatter,gather,mem` line to a
    /// running history file.
    pub fn append_history(&self, path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(
            file,
            "{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.2}",
            self.matrix_size,
            self.worker_count,
            self.total_time_s,
            self.compute_avg_s,
            self.bcast_avg_s,
            self.scatter_avg_s,
            self.gather_avg_s,
            self.mem_max_mb
        )?;
        Ok(())
    }

    /// Display formatted metrics (for CLI)
    pub fn display(&self) {
        use colored::Colorize;

        println!("\n{}", "=== Performance Metrics Summary ===".bold().cyan());
        println!("  Processes:           {}", self.worker_count);
        println!(
            "  Matrix Size:         {}x{}",
            self.matrix_size, self.matrix_size
        );
        println!(
            "  Total Time:          {}",
            format!("{:.4} sec", self.total_time_s).green()
        );
        println!("  Compute Time (avg):  {:.4} sec", self.compute_avg_s);
        println!("  Bcast Time (avg):    {:.4} sec", self.bcast_avg_s);
        println!("  Scatter Time (avg):  {:.4} sec", self.scatter_avg_s);
        println!("  Gather Time (avg):   {:.4} sec", self.gather_avg_s);
        println!(
            "  Max Memory Usage:    {}",
            format!("{:.2} MB", self.mem_max_mb).yellow()
        );
        println!();
    }

    /// Serialize to JSON for the reporting side
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the summary as JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write then rename so a reader never sees a half-written summary
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, self.to_json()?)?;
        std::fs::rename(&temp_path, path)?;

        info!(path = %path.display(), "Metrics summary saved");
        Ok(())
    }

    /// Read a summary previously written by [`MetricsSummary::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn timing(compute_ms: u64, memory_mb: f64) -> PhaseTiming {
        PhaseTiming {
            compute: Duration::from_millis(compute_ms),
            broadcast: Duration::from_millis(10),
            scatter: Duration::from_millis(20),
            gather: Duration::from_millis(30),
            memory_mb,
        }
    }

    #[test]
    fn test_wire_order() {
        let t = timing(1500, 12.5);
        assert_eq!(t.to_wire(), [1.5, 0.01, 0.02, 0.03, 12.5]);

        let decoded = PhaseTiming::from_wire(&t.to_wire()).unwrap();
        assert_eq!(decoded.compute, Duration::from_millis(1500));
        assert!((decoded.gather.as_secs_f64() - 0.03).abs() < 1e-9);
        assert_eq!(decoded.memory_mb, 12.5);
    }

    #[test]
    fn test_from_wire_rejects_bad_records() {
        assert!(matches!(
            PhaseTiming::from_wire(&[1.0, 2.0]),
            Err(NodeError::Shape(_))
        ));
        assert!(PhaseTiming::from_wire(&[-1.0, 0.0, 0.0, 0.0, 0.0]).is_err());
        assert!(PhaseTiming::decode_all(&[0.0; 7]).is_err());
    }

    #[test]
    fn test_decode_all_keeps_rank_order() {
        let mut buffer = Vec::new();
        buffer.extend(timing(100, 1.0).to_wire());
        buffer.extend(timing(200, 2.0).to_wire());

        let decoded = PhaseTiming::decode_all(&buffer).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].memory_mb, 1.0);
        assert!((decoded[1].compute.as_secs_f64() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_mean_and_max() {
        let timings = [timing(100, 50.0), timing(300, 80.0), timing(200, 65.0)];
        let summary = aggregate(&timings, 6, Duration::from_secs(2)).unwrap();

        assert_eq!(summary.worker_count, 3);
        assert_eq!(summary.matrix_size, 6);
        assert_eq!(summary.total_time_s, 2.0);
        assert!((summary.compute_avg_s - 0.2).abs() < 1e-12);
        assert!((summary.bcast_avg_s - 0.01).abs() < 1e-12);
        assert_eq!(summary.mem_max_mb, 80.0);
    }

    #[test]
    fn test_aggregate_empty_is_error() {
        assert!(aggregate(&[], 4, Duration::ZERO).is_err());
    }

    #[test]
    fn test_render_block() {
        let summary = aggregate(&[timing(100, 42.0)], 4, Duration::from_millis(250)).unwrap();
        let text = summary.render();

        assert!(text.starts_with("=== Performance Metrics Summary ===\n"));
        assert!(text.contains("Processes      : 1\n"));
        assert!(text.contains("Matrix Size    : 4\n"));
        assert!(text.contains("Total Time     : 0.2500 s\n"));
        assert!(text.contains("Compute Time   : avg = 0.1000\n"));
        assert!(text.contains("Max Memory     : 42.00 MB\n"));
    }

    #[test]
    fn test_append_history_accumulates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics_summary.csv");

        let summary = aggregate(&[timing(100, 2.0)], 4, Duration::from_millis(500)).unwrap();
        summary.append_history(&path).unwrap();
        summary.append_history(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "4,1,0.5000,0.1000,0.0100,0.0200,0.0300,2.00");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out").join("summary.json");

        let summary = aggregate(&[timing(100, 1.0), timing(120, 3.0)], 8, Duration::from_secs(1))
            .unwrap();
        summary.save(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(MetricsSummary::load(&path).unwrap(), summary);
    }
}
