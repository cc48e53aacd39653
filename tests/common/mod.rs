#![allow(dead_code)]

//! A cheap analytic stand-in for the external evaluator.
//!
//! The surface is separable over a fixed set of orthonormal mode vectors:
//! every coordinate outside the mode span is an exact zero mode, which gives
//! the reduced-coordinate machinery the same six rigid-body directions a
//! real molecular Hessian has.

use nalgebra::{DMatrix, DVector};
use openshs::evaluator::{EvalError, Evaluator};
use openshs::function::DifferentiableFunction;

/// One-dimensional profile along a single mode.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// `lambda s^2 / 2 + cubic s^3`; curvature `lambda` at the origin.
    Quadratic { lambda: f64, cubic: f64 },
    /// `(s^2 - a^2)^2 / (4 a^2)`: minima at `s = +-a`, curvature -1 at 0
    /// and +2 at the wells.
    DoubleWell { a: f64 },
}

impl Mode {
    fn value(self, s: f64) -> f64 {
        match self {
            Mode::Quadratic { lambda, cubic } => 0.5 * lambda * s * s + cubic * s * s * s,
            Mode::DoubleWell { a } => {
                let q = s * s - a * a;
                q * q / (4.0 * a * a)
            }
        }
    }

    fn deriv(self, s: f64) -> f64 {
        match self {
            Mode::Quadratic { lambda, cubic } => lambda * s + 3.0 * cubic * s * s,
            Mode::DoubleWell { a } => s * (s * s - a * a) / (a * a),
        }
    }

    fn second(self, s: f64) -> f64 {
        match self {
            Mode::Quadratic { lambda, cubic } => lambda + 6.0 * cubic * s,
            Mode::DoubleWell { a } => (3.0 * s * s - a * a) / (a * a),
        }
    }
}

/// Separable analytic surface with exact zero modes, usable wherever the
/// workflow expects an external evaluator.
pub struct ToyEvaluator {
    charges: Vec<usize>,
    center: DVector<f64>,
    modes: Vec<(usize, Mode)>,
}

impl ToyEvaluator {
    /// Surface whose modes act along the listed coordinate axes; all other
    /// axes are exact zero modes.
    pub fn axis_aligned(charges: Vec<usize>, center: DVector<f64>, modes: Vec<(usize, Mode)>) -> Self {
        assert_eq!(center.len(), charges.len() * 3);
        for &(axis, _) in &modes {
            assert!(axis < center.len());
        }
        Self {
            charges,
            center,
            modes,
        }
    }

    /// The structure at mode coordinates `s`, one entry per mode.
    pub fn structure_at(&self, s: &[f64]) -> DVector<f64> {
        assert_eq!(s.len(), self.modes.len());
        let mut x = self.center.clone();
        for (&(axis, _), &value) in self.modes.iter().zip(s) {
            x[axis] += value;
        }
        x
    }
}

impl DifferentiableFunction for ToyEvaluator {
    fn dim(&self) -> usize {
        self.center.len()
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError> {
        let mut total = 0.0;
        for &(axis, mode) in &self.modes {
            total += mode.value(x[axis] - self.center[axis]);
        }
        Ok(total)
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        let mut grad = DVector::zeros(self.dim());
        for &(axis, mode) in &self.modes {
            grad[axis] = mode.deriv(x[axis] - self.center[axis]);
        }
        Ok(grad)
    }

    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        let mut hess = DMatrix::zeros(self.dim(), self.dim());
        for &(axis, mode) in &self.modes {
            hess[(axis, axis)] = mode.second(x[axis] - self.center[axis]);
        }
        Ok(hess)
    }
}

impl Evaluator for ToyEvaluator {
    fn charges(&self) -> &[usize] {
        &self.charges
    }

    fn optimize_structure(&self, start: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        let mut x = start.clone();
        for _ in 0..5000 {
            let grad = self.gradient(&x)?;
            if grad.norm() < 1e-9 {
                return Ok(x);
            }
            x -= grad * 0.3;
        }
        Err(EvalError::Calculation(
            "toy geometry optimization did not converge".into(),
        ))
    }
}

/// A generic non-degenerate 4-atom frame: no two pairwise distances equal.
pub fn four_atom_center() -> DVector<f64> {
    DVector::from_vec(vec![
        0.0, 0.0, 0.0, // atom 1
        1.5, 0.0, 0.0, // atom 2
        0.0, 1.7, 0.0, // atom 3
        0.0, 0.0, 1.9, // atom 4
    ])
}
