//! The external potential-energy-surface evaluator capability.
//!
//! The search itself never computes chemistry: energies, gradients and
//! Hessians come from an external program that is spawned per point, writes a
//! plain-text result file, and exits. This module abstracts that collaborator
//! behind the [`Evaluator`] trait and provides [`ExternalEvaluator`], which
//! handles the complete lifecycle of one evaluation:
//!
//! - Writing the input file
//! - Executing the program
//! - Parsing the output
//!
//! # Error Handling
//!
//! All operations return an [`EvalError`] that can be:
//! - `Io`: file system errors (missing files, permission issues)
//! - `Calculation`: program execution failures (non-zero exit, crash)
//! - `Parse`: output parsing errors (malformed or missing data)
//!
//! A failure is specific to one `(point, attempt)` pair: it says nothing
//! about other in-flight evaluations, and the workflow layer recovers by
//! abandoning only the path that hit it. The evaluator is expected to bound
//! its own runtime; a hung external process is not interrupted here.
//!
//! # Wire Format
//!
//! The input file written for the external program is
//!
//! ```text
//! task energy|gradient|hessian|optimize
//! atoms <n>
//! <charge> <x> <y> <z>      (n lines, Bohr)
//! ```
//!
//! and the expected output is a plain-text file containing an `ENERGY <e>`
//! line plus, depending on the task, a `GRADIENT` block of `3n` values, a
//! `HESSIAN` block of `(3n)^2` values (row-major), or a `STRUCTURE` block of
//! `3n` values. Blocks are whitespace-separated floating values; byte-level
//! layout beyond that is owned by the external program.

use crate::function::DifferentiableFunction;
use crate::geometry::symbol_for_charge;
use lazy_static::lazy_static;
use log::debug;
use nalgebra::{DMatrix, DVector};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Error type for evaluator operations.
#[derive(Error, Debug)]
pub enum EvalError {
    /// File system or I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// External program execution failed.
    #[error("evaluation failed: {0}")]
    Calculation(String),
    /// Failed to parse program output.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Type alias for evaluator operation results.
pub type Result<T> = std::result::Result<T, EvalError>;

/// A potential-energy surface backed by something that can also optimize
/// geometries on its own.
///
/// This is the one capability the core consumes from the outside world: a
/// [`DifferentiableFunction`] over Cartesian coordinates that additionally
/// knows its nuclear charges and can run the external program's native
/// geometry optimization (used by the two-way descent from a transition
/// state).
pub trait Evaluator: DifferentiableFunction + Sync {
    /// Nuclear charges of the atoms, in coordinate order.
    fn charges(&self) -> &[usize];

    /// Runs the external geometry optimization from `start` and returns the
    /// relaxed structure.
    fn optimize_structure(&self, start: &DVector<f64>) -> Result<DVector<f64>>;
}

/// What a single external run is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Energy,
    Gradient,
    Hessian,
    Optimize,
}

impl Task {
    fn keyword(self) -> &'static str {
        match self {
            Task::Energy => "energy",
            Task::Gradient => "gradient",
            Task::Hessian => "hessian",
            Task::Optimize => "optimize",
        }
    }
}

lazy_static! {
    // Robust floating-point pattern: 1.23, -0.032, 1.2e-4, .123, nan-free.
    static ref FLOAT_RE: String = r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?".to_string();

    // Energy line: "ENERGY -78.587425" (case-insensitive keyword).
    static ref ENERGY_RE: Regex =
        Regex::new(&format!(r"(?im)^\s*ENERGY\s+({0})\s*$", *FLOAT_RE)).unwrap();
}

/// Evaluator that spawns a configured external program for every query.
///
/// Input/output files are given unique names from an internal counter so
/// concurrent workers sharing one evaluator never collide on disk.
pub struct ExternalEvaluator {
    command: String,
    work_dir: PathBuf,
    charges: Vec<usize>,
    counter: AtomicUsize,
}

impl ExternalEvaluator {
    /// Create an evaluator running `command` inside `work_dir` for a molecule
    /// with the given nuclear charges.
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>, charges: Vec<usize>) -> Self {
        Self {
            command: command.into(),
            work_dir: work_dir.into(),
            charges,
            counter: AtomicUsize::new(0),
        }
    }

    fn write_input(&self, x: &DVector<f64>, task: Task, path: &Path) -> Result<()> {
        assert_eq!(x.len(), self.dim(), "point dimension must match the molecule");

        let mut content = String::new();
        content.push_str(&format!("task {}\n", task.keyword()));
        content.push_str(&format!("atoms {}\n", self.charges.len()));
        for (i, charge) in self.charges.iter().enumerate() {
            content.push_str(&format!(
                "{}  {:.12}  {:.12}  {:.12}\n",
                charge,
                x[i * 3],
                x[i * 3 + 1],
                x[i * 3 + 2]
            ));
        }

        fs::write(path, content)?;
        Ok(())
    }

    fn run_calculation(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.command).arg(input).arg(output).output()?;

        if !result.status.success() {
            return Err(EvalError::Calculation(
                String::from_utf8_lossy(&result.stderr).to_string(),
            ));
        }
        Ok(())
    }

    /// One full round trip: write input, run, read output text.
    fn evaluate_raw(&self, x: &DVector<f64>, task: Task) -> Result<String> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let input = self.work_dir.join(format!("eval_{:06}.in", id));
        let output = self.work_dir.join(format!("eval_{:06}.out", id));

        debug!(
            "external {} evaluation #{} ({})",
            task.keyword(),
            id,
            self.charges.iter().map(|&c| symbol_for_charge(c)).collect::<Vec<_>>().join("")
        );

        self.write_input(x, task, &input)?;
        self.run_calculation(&input, &output)?;
        let content = fs::read_to_string(&output)
            .map_err(|e| EvalError::Parse(format!("failed to read output file: {}", e)))?;
        Ok(content)
    }
}

/// Extracts the `ENERGY` value from output text.
fn parse_energy(content: &str) -> Result<f64> {
    let caps = ENERGY_RE
        .captures(content)
        .ok_or_else(|| EvalError::Parse("no ENERGY line in output".into()))?;
    caps[1]
        .parse()
        .map_err(|e| EvalError::Parse(format!("bad energy value: {}", e)))
}

/// Extracts `count` whitespace-separated floats following the `header` line.
fn parse_block(content: &str, header: &str, count: usize) -> Result<Vec<f64>> {
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        if !line.trim().eq_ignore_ascii_case(header) {
            continue;
        }

        let mut values = Vec::with_capacity(count);
        for line in lines.by_ref() {
            for token in line.split_whitespace() {
                let v: f64 = token.parse().map_err(|e| {
                    EvalError::Parse(format!("bad value in {} block: {}", header, e))
                })?;
                values.push(v);
                if values.len() == count {
                    return Ok(values);
                }
            }
        }
        return Err(EvalError::Parse(format!(
            "{} block ended after {} of {} values",
            header,
            values.len(),
            count
        )));
    }
    Err(EvalError::Parse(format!("no {} block in output", header)))
}

impl DifferentiableFunction for ExternalEvaluator {
    fn dim(&self) -> usize {
        self.charges.len() * 3
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64> {
        let content = self.evaluate_raw(x, Task::Energy)?;
        parse_energy(&content)
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(self.value_grad(x)?.1)
    }

    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        Ok(self.value_grad_hess(x)?.2)
    }

    fn value_grad(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let content = self.evaluate_raw(x, Task::Gradient)?;
        let energy = parse_energy(&content)?;
        let grad = parse_block(&content, "GRADIENT", self.dim())?;
        Ok((energy, DVector::from_vec(grad)))
    }

    fn value_grad_hess(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>, DMatrix<f64>)> {
        let n = self.dim();
        let content = self.evaluate_raw(x, Task::Hessian)?;
        let energy = parse_energy(&content)?;
        let grad = parse_block(&content, "GRADIENT", n)?;
        let hess = parse_block(&content, "HESSIAN", n * n)?;
        Ok((
            energy,
            DVector::from_vec(grad),
            DMatrix::from_row_slice(n, n, &hess),
        ))
    }
}

impl Evaluator for ExternalEvaluator {
    fn charges(&self) -> &[usize] {
        &self.charges
    }

    fn optimize_structure(&self, start: &DVector<f64>) -> Result<DVector<f64>> {
        let content = self.evaluate_raw(start, Task::Optimize)?;
        let coords = parse_block(&content, "STRUCTURE", self.dim())?;
        Ok(DVector::from_vec(coords))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# comment line the parser must skip
ENERGY -78.587425
GRADIENT
 0.001 -0.002 0.003
 0.004 0.005 -0.006
HESSIAN
 1.0 0.0 0.0 0.0 0.0 0.0
 0.0 1.0 0.0 0.0 0.0 0.0
 0.0 0.0 1.0 0.0 0.0 0.0
 0.0 0.0 0.0 1.0 0.0 0.0
 0.0 0.0 0.0 0.0 1.0 0.0
 0.0 0.0 0.0 0.0 0.0 1.0
";

    #[test]
    fn parses_energy_line() {
        assert!((parse_energy(SAMPLE).unwrap() + 78.587425).abs() < 1e-12);
        assert!((parse_energy("energy 1.5e-3").unwrap() - 1.5e-3).abs() < 1e-18);
        assert!(parse_energy("no energy here").is_err());
    }

    #[test]
    fn parses_gradient_block() {
        let grad = parse_block(SAMPLE, "GRADIENT", 6).unwrap();
        assert_eq!(grad.len(), 6);
        assert!((grad[0] - 0.001).abs() < 1e-15);
        assert!((grad[5] + 0.006).abs() < 1e-15);
    }

    #[test]
    fn parses_hessian_block() {
        let hess = parse_block(SAMPLE, "HESSIAN", 36).unwrap();
        assert_eq!(hess.len(), 36);
        assert!((hess[0] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn truncated_block_is_a_parse_error() {
        let err = parse_block(SAMPLE, "GRADIENT", 12).unwrap_err();
        match err {
            EvalError::Parse(msg) => assert!(msg.contains("6 of 12")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn missing_block_is_a_parse_error() {
        assert!(parse_block(SAMPLE, "STRUCTURE", 6).is_err());
    }

    #[test]
    fn input_file_lists_task_and_atoms() {
        let dir = std::env::temp_dir();
        let evaluator = ExternalEvaluator::new("true", &dir, vec![8, 1, 1]);
        let path = dir.join("openshs_test_input.in");
        let x = DVector::from_element(9, 0.5);

        evaluator.write_input(&x, Task::Gradient, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("task gradient\natoms 3\n"));
        assert_eq!(content.lines().count(), 5);

        fs::remove_file(&path).unwrap();
    }
}
