//! Metrics CSV rows and the per-run text log.

use crate::errors::{BenchError, Result};
use crate::launcher::{RunOutcome, RunOutput};
use matmul_node::MetricsSummary;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Header line of the metrics CSV.
pub const CSV_HEADER: &str =
    "Processes,MatrixSize,TotalTime,ComputeAvg,BcastAvg,ScatterAvg,GatherAvg,MaxMemoryMB";

const COLUMNS: usize = 8;
const LOG_SEPARATOR_WIDTH: usize = 60;

/// Metric columns of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetrics {
    pub matrix_size: usize,
    pub total_time: f64,
    pub compute_avg: f64,
    pub bcast_avg: f64,
    pub scatter_avg: f64,
    pub gather_avg: f64,
    pub max_memory_mb: f64,
}

/// One row of the metrics CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// Requested process count
    pub processes: usize,
    /// `None` for a failed run (sentinel row)
    pub metrics: Option<RunMetrics>,
}

impl RunRecord {
    pub fn from_summary(processes: usize, summary: &MetricsSummary) -> Self {
        Self {
            processes,
            metrics: Some(RunMetrics {
                matrix_size: summary.matrix_size,
                total_time: summary.total_time_s,
                compute_avg: summary.compute_avg_s,
                bcast_avg: summary.bcast_avg_s,
                scatter_avg: summary.scatter_avg_s,
                gather_avg: summary.gather_avg_s,
                max_memory_mb: summary.mem_max_mb,
            }),
        }
    }

    /// Row for a run that produced no metrics
    pub fn sentinel(processes: usize) -> Self {
        Self {
            processes,
            metrics: None,
        }
    }

    pub fn from_output(output: &RunOutput) -> Self {
        match &output.outcome {
            RunOutcome::Completed(summary) => Self::from_summary(output.worker_count, summary),
            RunOutcome::Failed(_) => Self::sentinel(output.worker_count),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.metrics.is_none()
    }

    pub fn to_csv_row(&self) -> String {
        match &self.metrics {
            Some(m) => format!(
                "{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.2}",
                self.processes,
                m.matrix_size,
                m.total_time,
                m.compute_avg,
                m.bcast_avg,
                m.scatter_avg,
                m.gather_avg,
                m.max_memory_mb
            ),
            None => format!("{}{}", self.processes, ",".repeat(COLUMNS - 1)),
        }
    }

    /// Parse one data row. A row whose metric columns are all empty is a sentinel.
    pub fn parse_csv_row(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end().split(',').map(str::trim).collect();
        if fields.len() != COLUMNS {
            return Err(BenchError::Parse(format!(
                "Expected {} columns, found {} in '{}'",
                COLUMNS,
                fields.len(),
                line
            )));
        }

        let processes = parse_field::<usize>(fields[0], "Processes")?;

        if fields[1..].iter().all(|f| f.is_empty()) {
            return Ok(Self::sentinel(processes));
        }

        // MatrixSize may have been written as a float by older tooling
        let matrix_size = parse_field::<f64>(fields[1], "MatrixSize")? as usize;

        Ok(Self {
            processes,
            metrics: Some(RunMetrics {
                matrix_size,
                total_time: parse_field(fields[2], "TotalTime")?,
                compute_avg: parse_field(fields[3], "ComputeAvg")?,
                bcast_avg: parse_field(fields[4], "BcastAvg")?,
                scatter_avg: parse_field(fields[5], "ScatterAvg")?,
                gather_avg: parse_field(fields[6], "GatherAvg")?,
                max_memory_mb: parse_field(fields[7], "MaxMemoryMB")?,
            }),
        })
    }
}

fn parse_field<T: std::str::FromStr>(value: &str, column: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| BenchError::Parse(format!("Bad {} value '{}': {}", column, value, e)))
}

/// Read every record from a metrics CSV.
pub fn read_metrics_csv(path: &Path) -> Result<Vec<RunRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines.next().transpose()?.unwrap_or_default();
    if header.trim() != CSV_HEADER {
        return Err(BenchError::Parse(format!(
            "{} does not start with the metrics header",
            path.display()
        )));
    }

    let mut records = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(RunRecord::parse_csv_row(&line)?);
    }
    Ok(records)
}

/// Metrics CSV writer that flushes after every row.
pub struct MetricsWriter {
    file: File,
}

impl MetricsWriter {
    /// Create (or truncate) the file and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let mut file = File::create(path)?;
        writeln!(file, "{}", CSV_HEADER)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn append(&mut self, record: &RunRecord) -> Result<()> {
        writeln!(self.file, "{}", record.to_csv_row())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Plain-text log with one block per run.
pub struct RunLog {
    file: File,
}

impl RunLog {
    /// Create (or truncate) the log file.
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        Ok(Self {
            file: File::create(path)?,
        })
    }

    pub fn append(&mut self, output: &RunOutput) -> Result<()> {
        self.file.write_all(render_log_entry(output).as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Text block for one run.
///
/// A successful run logs its stdout and any stderr under the process-count
/// banner. A failed run logs an `[ERROR]` block with the reason and stderr.
pub fn render_log_entry(output: &RunOutput) -> String {
    let separator = "-".repeat(LOG_SEPARATOR_WIDTH);
    let mut entry = String::new();

    match &output.outcome {
        RunOutcome::Completed(_) => {
            entry.push_str(&format!("===== {} PROCESSES =====\n", output.worker_count));
            entry.push_str(&output.stdout);
            if !output.stderr.is_empty() {
                entry.push_str("\n[STDERR]\n");
                entry.push_str(&output.stderr);
            }
            entry.push('\n');
        }
        RunOutcome::Failed(reason) => {
            entry.push_str(&format!("[ERROR] {} processes\n", output.worker_count));
            entry.push_str(reason);
            entry.push('\n');
            entry.push_str(&output.stderr);
            entry.push('\n');
        }
    }

    entry.push_str(&separator);
    entry.push('\n');
    entry
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
