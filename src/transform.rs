//! Affine coordinate transforms and reduced-coordinate projectors.
//!
//! [`AffineTransform`] is the load-bearing combinator of the composition
//! layer: one linear pullback realizes re-centering at a reference structure,
//! change of basis into Hessian eigencoordinates, and dimensionality
//! reduction (dropping basis columns). The reduced-coordinate constructors
//! below use it to strip the six near-zero roto-translational modes of a
//! molecular Hessian before Newton refinement or sphere searching.

use crate::evaluator::EvalError;
use crate::function::DifferentiableFunction;
use crate::linalg;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Number of rigid-body (translation + rotation) modes of a 3-D structure.
pub const ZERO_MODES: usize = 6;

/// An affine change of coordinates `x -> basis * x + delta` around an inner
/// function.
///
/// Values are computed at the mapped point; the gradient is pulled back as
/// `basis' * grad` and the Hessian as `basis' * hess * basis` (chain rule for
/// a linear map). The basis need not be square: a tall `n x m` basis yields
/// an `m`-dimensional view of an `n`-dimensional function.
pub struct AffineTransform<F> {
    inner: F,
    delta: DVector<f64>,
    basis: DMatrix<f64>,
    basis_t: DMatrix<f64>,
}

impl<F: DifferentiableFunction> AffineTransform<F> {
    /// Wrap `inner` with the map `x -> basis * x + delta`.
    ///
    /// # Panics
    ///
    /// Panics if `basis` rows or `delta` length do not match `inner.dim()`.
    pub fn new(inner: F, delta: DVector<f64>, basis: DMatrix<f64>) -> Self {
        assert_eq!(basis.nrows(), inner.dim(), "basis rows must match inner dimension");
        assert_eq!(delta.len(), inner.dim(), "delta must live in the inner frame");
        let basis_t = basis.transpose();
        Self {
            inner,
            delta,
            basis,
            basis_t,
        }
    }

    /// Pure translation: `x -> x + delta`. Re-centers the inner function so
    /// the reference point becomes the origin of the outer frame.
    pub fn centered(inner: F, delta: DVector<f64>) -> Self {
        let n = inner.dim();
        Self::new(inner, delta, DMatrix::identity(n, n))
    }

    /// Pure change of basis: `x -> basis * x`.
    pub fn rotated(inner: F, basis: DMatrix<f64>) -> Self {
        let n = inner.dim();
        Self::new(inner, DVector::zeros(n), basis)
    }

    /// The inner function.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Maps an outer point into the inner function's frame.
    pub fn transform(&self, x: &DVector<f64>) -> DVector<f64> {
        debug_assert_eq!(x.len(), self.dim());
        &self.basis * x + &self.delta
    }

    /// Maps an inner point back to the outer frame.
    ///
    /// Only defined for a square, invertible basis; calling it on anything
    /// else is a programming error.
    ///
    /// # Panics
    ///
    /// Panics if the basis is non-square or singular.
    pub fn back_transform(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(
            self.basis.nrows(),
            self.basis.ncols(),
            "back_transform requires a square basis"
        );
        self.basis
            .clone()
            .lu()
            .solve(&(x - &self.delta))
            .expect("back_transform requires an invertible basis")
    }
}

impl<F: DifferentiableFunction> DifferentiableFunction for AffineTransform<F> {
    fn dim(&self) -> usize {
        self.basis.ncols()
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError> {
        self.inner.value(&self.transform(x))
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        Ok(&self.basis_t * self.inner.gradient(&self.transform(x))?)
    }

    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        Ok(&self.basis_t * self.inner.hessian(&self.transform(x))? * &self.basis)
    }

    fn value_grad(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>), EvalError> {
        let (v, g) = self.inner.value_grad(&self.transform(x))?;
        Ok((v, &self.basis_t * g))
    }

    fn value_grad_hess(
        &self,
        x: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>, DMatrix<f64>), EvalError> {
        let (v, g, h) = self.inner.value_grad_hess(&self.transform(x))?;
        Ok((v, &self.basis_t * g, &self.basis_t * h * &self.basis))
    }

    fn full_transform(&self, x: &DVector<f64>) -> DVector<f64> {
        self.inner.full_transform(&self.transform(x))
    }
}

/// Reduced-coordinate view of `func` around the reference point `at`: the six
/// Hessian eigenvectors of smallest magnitude are dropped and the remaining
/// `n - 6` form the basis of the new frame, with `at` as its origin.
///
/// The basis is valid only near the point it was derived from; callers that
/// move the structure significantly must re-derive. Near-degenerate
/// eigenvalues at the cutoff make the discarded subspace unstable, which is
/// an accepted approximation of the zero-mode selection.
pub fn reduced_coordinates<F: DifferentiableFunction>(
    func: F,
    at: &DVector<f64>,
) -> Result<AffineTransform<F>, EvalError> {
    let basis = reduced_basis(&func, at, false)?;
    Ok(AffineTransform::new(func, at.clone(), basis))
}

/// Like [`reduced_coordinates`], with each retained eigenvector additionally
/// scaled by `1 / sqrt(|eigenvalue|)` so the reduced Hessian at the reference
/// point has unit-magnitude curvature. This is the frame the sphere search
/// runs in: an isotropic shell in these coordinates samples every vibration
/// at comparable amplitude.
pub fn normalize_for_polar<F: DifferentiableFunction>(
    func: F,
    at: &DVector<f64>,
) -> Result<AffineTransform<F>, EvalError> {
    let basis = reduced_basis(&func, at, true)?;
    Ok(AffineTransform::new(func, at.clone(), basis))
}

fn reduced_basis<F: DifferentiableFunction>(
    func: &F,
    at: &DVector<f64>,
    normalize: bool,
) -> Result<DMatrix<f64>, EvalError> {
    let n = func.dim();
    assert!(n > ZERO_MODES, "cannot drop {} modes of a {}-dim function", ZERO_MODES, n);

    let hess = func.hessian(at)?;
    let (values, vectors) = linalg::eigen_by_magnitude(&hess);
    debug!("hessian eigenvalues at reference: {:?}", values.as_slice());

    let kept = n - ZERO_MODES;
    let mut basis = DMatrix::zeros(n, kept);
    for i in 0..kept {
        let col = vectors.column(ZERO_MODES + i);
        if normalize {
            let scale = 1.0 / values[ZERO_MODES + i].abs().sqrt();
            basis.set_column(i, &(col * scale));
        } else {
            basis.set_column(i, &col);
        }
    }

    Ok(basis)
}
