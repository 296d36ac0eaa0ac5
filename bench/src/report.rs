//! Scaling metrics derived from a sweep's metrics rows.

use crate::errors::Result;
use crate::record::RunRecord;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Header line of the report CSV.
pub const REPORT_HEADER: &str =
    "Processes,MatrixSize,TotalTime,Speedup,Efficiency,CommOverhead,ComputeAvg,MaxMemoryMB";

/// One successful run with its scaling figures.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRow {
    pub processes: usize,
    pub matrix_size: usize,
    pub total_time: f64,
    /// Baseline total time over this run's total time
    pub speedup: f64,
    /// Speedup per process
    pub efficiency: f64,
    /// Broadcast + scatter + gather averages
    pub comm_overhead: f64,
    pub compute_avg: f64,
    pub max_memory_mb: f64,
}

/// Derive scaling figures for every successful run.
///
/// Sentinel rows are dropped, as are rows with a non-positive total time.
/// The baseline is the first remaining row, so its speedup is 1.
pub fn derive(records: &[RunRecord]) -> Vec<ScalingRow> {
    let runs: Vec<_> = records
        .iter()
        .filter_map(|r| r.metrics.as_ref().map(|m| (r.processes, m)))
        .filter(|(processes, m)| {
            let usable = m.total_time > 0.0;
            if !usable {
                warn!(processes, total_time = m.total_time, "Skipping run with no measurable time");
            }
            usable
        })
        .collect();

    let Some((_, baseline)) = runs.first() else {
        return Vec::new();
    };
    let baseline = baseline.total_time;

    runs.iter()
        .map(|(processes, m)| {
            let speedup = baseline / m.total_time;
            ScalingRow {
                processes: *processes,
                matrix_size: m.matrix_size,
                total_time: m.total_time,
                speedup,
                efficiency: speedup / *processes as f64,
                comm_overhead: m.bcast_avg + m.scatter_avg + m.gather_avg,
                compute_avg: m.compute_avg,
                max_memory_mb: m.max_memory_mb,
            }
        })
        .collect()
}

impl ScalingRow {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.2}",
            self.processes,
            self.matrix_size,
            self.total_time,
            self.speedup,
            self.efficiency,
            self.comm_overhead,
            self.compute_avg,
            self.max_memory_mb
        )
    }
}

/// Write the report CSV (header plus one row per successful run).
pub fn write_report_csv(path: &Path, rows: &[ScalingRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", REPORT_HEADER)?;
    for row in rows {
        writeln!(file, "{}", row.to_csv_row())?;
    }
    file.flush()?;
    Ok(())
}

/// Display the scaling table (for CLI)
pub fn display(rows: &[ScalingRow]) {
    use colored::Colorize;

    println!("\n{}", "Scaling Report".bold().cyan());
    println!("{}", "==============".cyan());

    if rows.is_empty() {
        println!("\n  {}", "No successful runs to report".yellow());
        println!();
        return;
    }

    println!(
        "\n  {:>9}  {:>11}  {:>8}  {:>10}  {:>13}  {:>11}  {:>10}",
        "Processes".bold(),
        "Total (s)".bold(),
        "Speedup".bold(),
        "Efficiency".bold(),
        "Comm (s)".bold(),
        "Compute (s)".bold(),
        "Memory MB".bold()
    );

    for row in rows {
        let efficiency = format!("{:.1}%", row.efficiency * 100.0);
        let efficiency = if row.efficiency >= 0.75 {
            efficiency.green()
        } else if row.efficiency >= 0.5 {
            efficiency.yellow()
        } else {
            efficiency.red()
        };

        println!(
            "  {:>9}  {:>11.4}  {:>8.2}  {:>10}  {:>13.4}  {:>11.4}  {:>10.2}",
            row.processes,
            row.total_time,
            row.speedup,
            efficiency,
            row.comm_overhead,
            row.compute_avg,
            row.max_memory_mb
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RunMetrics;
    use tempfile::TempDir;

    fn record(processes: usize, total_time: f64) -> RunRecord {
        RunRecord {
            processes,
            metrics: Some(RunMetrics {
                matrix_size: 600,
                total_time,
                compute_avg: total_time * 0.8,
                bcast_avg: 0.1,
                scatter_avg: 0.2,
                gather_avg: 0.3,
                max_memory_mb: 100.0,
            }),
        }
    }

    #[test]
    fn test_baseline_is_first_successful_row() {
        let records = vec![
            RunRecord::sentinel(1),
            record(2, 8.0),
            record(4, 4.0),
            RunRecord::sentinel(6),
            record(8, 2.5),
        ];
        let rows = derive(&records);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].processes, 2);
        assert_eq!(rows[0].speedup, 1.0);
        assert_eq!(rows[0].efficiency, 0.5);
        assert_eq!(rows[1].speedup, 2.0);
        assert_eq!(rows[1].efficiency, 0.5);
        assert_eq!(rows[2].speedup, 3.2);
        assert!((rows[2].comm_overhead - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_no_successful_runs() {
        assert!(derive(&[RunRecord::sentinel(2), RunRecord::sentinel(3)]).is_empty());
        assert!(derive(&[]).is_empty());
    }

    #[test]
    fn test_zero_time_rows_skipped() {
        let rows = derive(&[record(2, 0.0), record(3, 3.0)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].processes, 3);
        assert_eq!(rows[0].speedup, 1.0);
    }

    #[test]
    fn test_report_csv() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.csv");

        write_report_csv(&path, &derive(&[record(2, 8.0), record(4, 4.0)])).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], REPORT_HEADER);
        assert_eq!(lines[2], "4,600,4.0000,2.0000,0.5000,0.6000,3.2000,100.00");
    }
}
