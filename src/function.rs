//! The differentiable-function abstraction the whole search is built on.
//!
//! Every energy surface the optimizers see (the raw evaluator, a re-centered
//! copy, a reduced-coordinate view, a polar reparametrization, a repulsion
//! supplement) implements [`DifferentiableFunction`]: value, gradient and
//! Hessian at a point, plus combined queries for backends where one
//! evaluation produces all three. Combinators own their inner function and
//! implement the same trait, so coordinate systems compose freely without an
//! inheritance hierarchy.
//!
//! Evaluation is fallible: the innermost function is usually an external
//! program (see [`crate::evaluator`]) and a single point may fail without
//! invalidating anything else. Pure functions simply always return `Ok`.

use crate::evaluator::EvalError;
use nalgebra::{DMatrix, DVector};

/// A scalar function of `dim()` real variables with exact first and second
/// derivatives.
///
/// Implementations must keep `gradient` and `hessian` analytically consistent
/// with `value`; that invariant is verified by tests, not enforced at
/// runtime. The combined queries default to composing the individual ones
/// and should be overridden when the backend can answer them in one shot.
pub trait DifferentiableFunction {
    /// Number of input dimensions.
    fn dim(&self) -> usize;

    /// Function value at `x`.
    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError>;

    /// Gradient at `x`.
    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError>;

    /// Hessian at `x`.
    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError>;

    /// Value and gradient in one query.
    fn value_grad(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>), EvalError> {
        Ok((self.value(x)?, self.gradient(x)?))
    }

    /// Value, gradient and Hessian in one query.
    fn value_grad_hess(
        &self,
        x: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>, DMatrix<f64>), EvalError> {
        Ok((self.value(x)?, self.gradient(x)?, self.hessian(x)?))
    }

    /// Maps a point in this function's coordinate frame down to the frame of
    /// the innermost function (Cartesian coordinates for a molecular
    /// surface). The identity for functions that are not wrappers.
    fn full_transform(&self, x: &DVector<f64>) -> DVector<f64> {
        x.clone()
    }
}

impl<T: DifferentiableFunction + ?Sized> DifferentiableFunction for &T {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError> {
        (**self).value(x)
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        (**self).gradient(x)
    }

    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        (**self).hessian(x)
    }

    fn value_grad(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>), EvalError> {
        (**self).value_grad(x)
    }

    fn value_grad_hess(
        &self,
        x: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>, DMatrix<f64>), EvalError> {
        (**self).value_grad_hess(x)
    }

    fn full_transform(&self, x: &DVector<f64>) -> DVector<f64> {
        (**self).full_transform(x)
    }
}

/// Scaled sum `alpha * a + beta * b` of two functions of equal dimension.
///
/// `full_transform` delegates to the first term: the second is expected to be
/// a supplement (such as a repulsion term) living in the first one's frame.
pub struct Sum<A, B> {
    a: A,
    b: B,
    alpha: f64,
    beta: f64,
}

impl<A: DifferentiableFunction, B: DifferentiableFunction> Sum<A, B> {
    /// Plain sum `a + b`.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    pub fn new(a: A, b: B) -> Self {
        Self::scaled(1.0, a, 1.0, b)
    }

    /// Scaled combination `alpha * a + beta * b`.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    pub fn scaled(alpha: f64, a: A, beta: f64, b: B) -> Self {
        assert_eq!(a.dim(), b.dim(), "summed functions must share a dimension");
        Self { a, b, alpha, beta }
    }
}

impl<A: DifferentiableFunction, B: DifferentiableFunction> DifferentiableFunction for Sum<A, B> {
    fn dim(&self) -> usize {
        self.a.dim()
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError> {
        Ok(self.alpha * self.a.value(x)? + self.beta * self.b.value(x)?)
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        Ok(self.a.gradient(x)? * self.alpha + self.b.gradient(x)? * self.beta)
    }

    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        Ok(self.a.hessian(x)? * self.alpha + self.b.hessian(x)? * self.beta)
    }

    fn value_grad(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>), EvalError> {
        let (va, ga) = self.a.value_grad(x)?;
        let (vb, gb) = self.b.value_grad(x)?;
        Ok((self.alpha * va + self.beta * vb, ga * self.alpha + gb * self.beta))
    }

    fn value_grad_hess(
        &self,
        x: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>, DMatrix<f64>), EvalError> {
        let (va, ga, ha) = self.a.value_grad_hess(x)?;
        let (vb, gb, hb) = self.b.value_grad_hess(x)?;
        Ok((
            self.alpha * va + self.beta * vb,
            ga * self.alpha + gb * self.beta,
            ha * self.alpha + hb * self.beta,
        ))
    }

    fn full_transform(&self, x: &DVector<f64>) -> DVector<f64> {
        self.a.full_transform(x)
    }
}

/// A constant function: zero gradient and Hessian everywhere.
pub struct Constant {
    dim: usize,
    value: f64,
}

impl Constant {
    /// A constant function of `dim` variables.
    pub fn new(dim: usize, value: f64) -> Self {
        Self { dim, value }
    }
}

impl DifferentiableFunction for Constant {
    fn dim(&self) -> usize {
        self.dim
    }

    fn value(&self, _x: &DVector<f64>) -> Result<f64, EvalError> {
        Ok(self.value)
    }

    fn gradient(&self, _x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        Ok(DVector::zeros(self.dim))
    }

    fn hessian(&self, _x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        Ok(DMatrix::zeros(self.dim, self.dim))
    }
}

/// The model function `x' A x / 2 + b . x + c`, used by tests and examples as
/// a surface with analytically known stationary structure.
///
/// # Examples
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use openshs::function::{DifferentiableFunction, QuadraticForm};
///
/// let bowl = QuadraticForm::new(
///     DMatrix::identity(2, 2),
///     DVector::zeros(2),
///     0.0,
/// );
/// let x = DVector::from_vec(vec![3.0, 4.0]);
/// assert!((bowl.value(&x).unwrap() - 12.5).abs() < 1e-12);
/// ```
pub struct QuadraticForm {
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: f64,
}

impl QuadraticForm {
    /// Build from a symmetric matrix `a`, linear term `b` and offset `c`.
    ///
    /// # Panics
    ///
    /// Panics if `a` is not square or `b` does not match its dimension.
    pub fn new(a: DMatrix<f64>, b: DVector<f64>, c: f64) -> Self {
        assert_eq!(a.nrows(), a.ncols(), "quadratic form matrix must be square");
        assert_eq!(a.nrows(), b.len());
        Self { a, b, c }
    }
}

impl DifferentiableFunction for QuadraticForm {
    fn dim(&self) -> usize {
        self.b.len()
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError> {
        Ok(0.5 * x.dot(&(&self.a * x)) + self.b.dot(x) + self.c)
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        Ok(&self.a * x + &self.b)
    }

    fn hessian(&self, _x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        Ok(self.a.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg;

    fn sample_quadratic() -> QuadraticForm {
        let a = DMatrix::from_row_slice(3, 3, &[2.0, 0.5, 0.0, 0.5, 1.0, -0.3, 0.0, -0.3, 4.0]);
        let b = DVector::from_vec(vec![0.1, -0.2, 0.3]);
        QuadraticForm::new(a, b, 1.5)
    }

    #[test]
    fn quadratic_derivatives_match_finite_differences() {
        let f = sample_quadratic();
        let x = DVector::from_vec(vec![0.3, -1.0, 0.7]);

        let g = f.gradient(&x).unwrap();
        let g_num = finite_diff::gradient(&f, &x, 1e-6);
        assert!((g - g_num).norm() < 1e-8);

        let h = f.hessian(&x).unwrap();
        let h_num = finite_diff::hessian(&f, &x, 1e-6);
        assert!((h - h_num).norm() < 1e-8);
    }

    #[test]
    fn sum_combines_values_and_derivatives() {
        let f = sample_quadratic();
        let g = Constant::new(3, 2.0);
        let sum = Sum::scaled(2.0, &f, 3.0, &g);

        let x = DVector::from_vec(vec![1.0, 0.0, -1.0]);
        let expected = 2.0 * f.value(&x).unwrap() + 6.0;
        assert!((sum.value(&x).unwrap() - expected).abs() < 1e-12);

        let grad = sum.gradient(&x).unwrap();
        let expected_grad = f.gradient(&x).unwrap() * 2.0;
        assert!((grad - expected_grad).norm() < 1e-12);

        let (v, gr, h) = sum.value_grad_hess(&x).unwrap();
        assert!((v - expected).abs() < 1e-12);
        assert!((gr - f.gradient(&x).unwrap() * 2.0).norm() < 1e-12);
        assert!((h - f.hessian(&x).unwrap() * 2.0).norm() < 1e-12);
    }

    #[test]
    fn full_transform_defaults_to_identity() {
        let f = sample_quadratic();
        let x = linalg::constant_vector(3, 0.25);
        assert_eq!(f.full_transform(&x), x);
    }
}
