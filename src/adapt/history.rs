use crate::fem_problem::SolveStatus;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

/// What the adaptivity loop decided at the end of a step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The error estimate fell below the tolerance
    Converged,
    /// The working Domain reached the DoF ceiling
    DofCeiling,
    /// No Elem could be refined
    Stagnated,
    /// `elems` Elems were refined; the loop continues
    Refined { elems: usize },
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::DofCeiling => write!(f, "dof ceiling reached"),
            Self::Stagnated => write!(f, "stagnated"),
            Self::Refined { elems } => write!(f, "refined {} elems", elems),
        }
    }
}

/// Diagnostics of one adaptivity step
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub ndof_coarse: usize,
    pub ndof_reference: usize,
    /// Relative error estimate in percent
    pub error_estimate: f64,
    /// Relative exact error in percent (if an exact solution was supplied)
    pub exact_error: Option<f64>,
    /// Wall-clock seconds since the history was started
    pub elapsed: f64,
    pub status: SolveStatus,
    pub decision: Decision,
}

/// The sequence of [StepRecord]s produced by an adaptivity run, used to draw convergence graphs
#[derive(Clone, Debug)]
pub struct ConvergenceHistory {
    records: Vec<StepRecord>,
    start: Instant,
}

impl Default for ConvergenceHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergenceHistory {
    /// Start a new history; elapsed times are measured from now
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            start: Instant::now(),
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Seconds since the history was started
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// (coarse DoFs, error estimate) pairs
    pub fn dof_est(&self) -> Vec<(f64, f64)> {
        self.records
            .iter()
            .map(|r| (r.ndof_coarse as f64, r.error_estimate))
            .collect()
    }

    /// (elapsed seconds, error estimate) pairs
    pub fn cpu_est(&self) -> Vec<(f64, f64)> {
        self.records.iter().map(|r| (r.elapsed, r.error_estimate)).collect()
    }

    /// (coarse DoFs, exact error) pairs for the steps where an exact error is known
    pub fn dof_exact(&self) -> Vec<(f64, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.exact_error.map(|err| (r.ndof_coarse as f64, err)))
            .collect()
    }

    /// (elapsed seconds, exact error) pairs for the steps where an exact error is known
    pub fn cpu_exact(&self) -> Vec<(f64, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.exact_error.map(|err| (r.elapsed, err)))
            .collect()
    }

    /// Write the error estimate vs. DoFs to a two column `.dat` file
    pub fn save_dof_est(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        write_dat(path.as_ref(), &self.dof_est())
    }

    /// Write the error estimate vs. elapsed time to a two column `.dat` file
    pub fn save_cpu_est(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        write_dat(path.as_ref(), &self.cpu_est())
    }

    /// Write the exact error vs. DoFs to a two column `.dat` file
    pub fn save_dof_exact(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        write_dat(path.as_ref(), &self.dof_exact())
    }

    /// Write the exact error vs. elapsed time to a two column `.dat` file
    pub fn save_cpu_exact(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        write_dat(path.as_ref(), &self.cpu_exact())
    }

    /// Print the full history to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let steps: Vec<JsonValue> = self
            .records
            .iter()
            .map(|r| {
                object! {
                    "step": r.step,
                    "ndof_coarse": r.ndof_coarse,
                    "ndof_reference": r.ndof_reference,
                    "error_estimate": r.error_estimate,
                    "exact_error": r.exact_error,
                    "elapsed": r.elapsed,
                    "status": r.status.to_string(),
                    "decision": r.decision.to_string(),
                }
            })
            .collect();

        let history_object = object! {
            "steps": JsonValue::from(steps),
        };
        history_object.write_pretty(&mut w, 4)?;

        Ok(())
    }
}

fn write_dat(path: &str, points: &[(f64, f64)]) -> std::io::Result<()> {
    let f = File::create(path)?;
    let mut w = BufWriter::new(&f);
    for (x, y) in points {
        writeln!(w, "{} {}", x, y)?;
    }
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: usize, ndof: usize, err: f64, exact: Option<f64>) -> StepRecord {
        StepRecord {
            step,
            ndof_coarse: ndof,
            ndof_reference: ndof * 4,
            error_estimate: err,
            exact_error: exact,
            elapsed: step as f64 * 0.5,
            status: SolveStatus::Converged,
            decision: Decision::Refined { elems: 1 },
        }
    }

    #[test]
    fn graph_data() {
        let mut history = ConvergenceHistory::new();
        history.push(record(1, 36, 12.0, Some(10.0)));
        history.push(record(2, 64, 4.0, None));

        assert_eq!(history.dof_est(), vec![(36.0, 12.0), (64.0, 4.0)]);
        assert_eq!(history.cpu_est(), vec![(0.5, 12.0), (1.0, 4.0)]);
        assert_eq!(history.dof_exact(), vec![(36.0, 10.0)]);
        assert_eq!(history.cpu_exact(), vec![(0.5, 10.0)]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn dat_files() {
        let mut history = ConvergenceHistory::new();
        history.push(record(1, 36, 12.5, None));
        history.push(record(2, 64, 4.0, None));

        let path = std::env::temp_dir().join(format!("hp_adapt_conv_dof_est_{}.dat", std::process::id()));
        let path = path.to_string_lossy().to_string();
        history.save_dof_est(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "36 12.5\n64 4\n");
        std::fs::remove_file(&path).unwrap();
    }
}
