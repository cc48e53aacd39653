//! Hyperspherical reparametrization of a differentiable function.
//!
//! [`Polar`] restricts an `n`-dimensional function to the sphere of a fixed
//! radius and exposes it as a function of the `n - 1` hyperspherical angles.
//! This turns the constrained problem "minimize f subject to |x| = r" into an
//! unconstrained one. First and second derivatives of the sphere map are
//! computed in closed form; nothing is finite-differenced, so the Hessian in
//! angle space is exact.

use crate::evaluator::EvalError;
use crate::function::DifferentiableFunction;
use crate::linalg;
use crate::transform::AffineTransform;
use nalgebra::{DMatrix, DVector};

/// A function of hyperspherical angles: `F(theta) = f(x(theta))` where
/// `x(theta)` is the standard recursive sphere map
///
/// ```text
/// x_0     = r cos t0
/// x_1     = r sin t0 cos t1
/// ...
/// x_(n-1) = r sin t0 sin t1 ... sin t(n-2)
/// ```
pub struct Polar<F> {
    inner: F,
    radius: f64,
    n: usize,
}

impl<F: DifferentiableFunction> Polar<F> {
    /// Wrap `inner` on the sphere of the given radius.
    ///
    /// # Panics
    ///
    /// Panics if `inner` has fewer than two dimensions.
    pub fn new(inner: F, radius: f64) -> Self {
        let n = inner.dim();
        assert!(n >= 2, "polar reparametrization needs at least two dimensions");
        Self { inner, radius, n }
    }

    /// The wrapped function.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// The sphere radius.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// The sphere point `x(theta)` in the inner function's frame.
    pub fn sphere_point(&self, theta: &DVector<f64>) -> DVector<f64> {
        debug_assert_eq!(theta.len(), self.n - 1);
        let mut x = DVector::zeros(self.n);
        let mut sin_prod = self.radius;
        for i in 0..self.n - 1 {
            x[i] = sin_prod * theta[i].cos();
            sin_prod *= theta[i].sin();
        }
        x[self.n - 1] = sin_prod;
        x
    }

    /// One entry of the sphere map with zero, one or two factor derivatives
    /// applied.
    ///
    /// Coordinate `i` is a product `r * sin t0 * ... * sin t(i-1) * cos ti`
    /// (all-sines for the last coordinate). Differentiating by an involved
    /// angle replaces that angle's factor by its derivative; both sin and cos
    /// return their own negative at second order.
    fn coord_term(&self, theta: &DVector<f64>, i: usize, d1: Option<usize>, d2: Option<usize>) -> f64 {
        let last = self.n - 1;
        let limit = if i < last { i } else { last - 1 };

        for d in [d1, d2].into_iter().flatten() {
            if d > limit {
                return 0.0;
            }
        }

        let mut prod = self.radius;
        for k in 0..=limit {
            let is_cos = i < last && k == i;
            let mut order = 0;
            if d1 == Some(k) {
                order += 1;
            }
            if d2 == Some(k) {
                order += 1;
            }
            let t = theta[k];
            prod *= match (is_cos, order) {
                (false, 0) => t.sin(),
                (false, 1) => t.cos(),
                (true, 0) => t.cos(),
                (true, 1) => -t.sin(),
                (false, _) => -t.sin(),
                (true, _) => -t.cos(),
            };
        }
        prod
    }

    /// Jacobian of the sphere map, `n` rows by `n - 1` columns.
    fn jacobian(&self, theta: &DVector<f64>) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.n, self.n - 1);
        for i in 0..self.n {
            for a in 0..self.n - 1 {
                jac[(i, a)] = self.coord_term(theta, i, Some(a), None);
            }
        }
        jac
    }

    /// Contraction of the sphere map's second derivatives with an inner
    /// gradient: `T[a, b] = sum_i g_i * d2 x_i / (d ta d tb)`.
    fn curvature_term(&self, theta: &DVector<f64>, grad: &DVector<f64>) -> DMatrix<f64> {
        let m = self.n - 1;
        let mut t = DMatrix::zeros(m, m);
        for a in 0..m {
            for b in 0..=a {
                let mut sum = 0.0;
                for i in 0..self.n {
                    sum += grad[i] * self.coord_term(theta, i, Some(a), Some(b));
                }
                t[(a, b)] = sum;
                t[(b, a)] = sum;
            }
        }
        t
    }
}

impl<F: DifferentiableFunction> DifferentiableFunction for Polar<F> {
    fn dim(&self) -> usize {
        self.n - 1
    }

    fn value(&self, theta: &DVector<f64>) -> Result<f64, EvalError> {
        self.inner.value(&self.sphere_point(theta))
    }

    fn gradient(&self, theta: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        let g = self.inner.gradient(&self.sphere_point(theta))?;
        Ok(self.jacobian(theta).transpose() * g)
    }

    fn hessian(&self, theta: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        let x = self.sphere_point(theta);
        let g = self.inner.gradient(&x)?;
        let h = self.inner.hessian(&x)?;
        let jac = self.jacobian(theta);
        Ok(jac.transpose() * h * &jac + self.curvature_term(theta, &g))
    }

    fn value_grad(&self, theta: &DVector<f64>) -> Result<(f64, DVector<f64>), EvalError> {
        let (v, g) = self.inner.value_grad(&self.sphere_point(theta))?;
        Ok((v, self.jacobian(theta).transpose() * g))
    }

    fn value_grad_hess(
        &self,
        theta: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>, DMatrix<f64>), EvalError> {
        let x = self.sphere_point(theta);
        let (v, g, h) = self.inner.value_grad_hess(&x)?;
        let jac = self.jacobian(theta);
        let hess = jac.transpose() * h * &jac + self.curvature_term(theta, &g);
        Ok((v, jac.transpose() * g, hess))
    }

    fn full_transform(&self, theta: &DVector<f64>) -> DVector<f64> {
        self.inner.full_transform(&self.sphere_point(theta))
    }
}

/// Polar reparametrization re-centered on a direction: rotates the frame so
/// that the angle vector `(pi/2, ..., pi/2)` maps exactly onto `direction`,
/// then wraps in [`Polar`].
///
/// Optimizing around the equator keeps the iterates away from the chart's
/// coordinate singularities at the poles.
pub fn polar_with_direction<F: DifferentiableFunction>(
    func: F,
    radius: f64,
    direction: &DVector<f64>,
) -> Polar<AffineTransform<F>> {
    let n = func.dim();
    let rot = linalg::rotation_between(&linalg::axis_vector(n, n - 1), &(direction / direction.norm()));
    Polar::new(AffineTransform::rotated(func, rot), radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{finite_diff, QuadraticForm};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::{FRAC_PI_2, PI};

    fn sample_function(n: usize, rng: &mut StdRng) -> QuadraticForm {
        let mut a = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..=i {
                let v = rng.gen_range(-1.0..1.0);
                a[(i, j)] = v;
                a[(j, i)] = v;
            }
        }
        let b = DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0));
        QuadraticForm::new(a, b, 0.0)
    }

    #[test]
    fn sphere_point_has_exact_radius() {
        let mut rng = StdRng::seed_from_u64(31);
        let f = sample_function(5, &mut rng);
        let polar = Polar::new(&f, 2.5);

        for _ in 0..50 {
            let theta = DVector::from_fn(4, |_, _| rng.gen_range(-PI..PI));
            assert!((polar.sphere_point(&theta).norm() - 2.5).abs() < 1e-12);
        }

        // Boundary angles.
        for boundary in [0.0, PI, FRAC_PI_2] {
            let theta = DVector::from_element(4, boundary);
            assert!((polar.sphere_point(&theta).norm() - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn polar_derivatives_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(32);
        let f = sample_function(4, &mut rng);
        let polar = Polar::new(&f, 1.3);

        for _ in 0..10 {
            // Keep away from chart singularities for stable finite differences.
            let theta = DVector::from_fn(3, |_, _| rng.gen_range(0.3..(PI - 0.3)));

            let g = polar.gradient(&theta).unwrap();
            let g_num = finite_diff::gradient(&polar, &theta, 1e-6);
            assert!((g - g_num).norm() < 1e-6);

            let h = polar.hessian(&theta).unwrap();
            let h_num = finite_diff::hessian(&polar, &theta, 1e-6);
            assert!((h - h_num).norm() < 1e-6);
        }
    }

    #[test]
    fn combined_query_is_consistent() {
        let mut rng = StdRng::seed_from_u64(33);
        let f = sample_function(5, &mut rng);
        let polar = Polar::new(&f, 0.7);
        let theta = DVector::from_fn(4, |_, _| rng.gen_range(0.5..2.5));

        let (v, g, h) = polar.value_grad_hess(&theta).unwrap();
        assert!((v - polar.value(&theta).unwrap()).abs() < 1e-12);
        assert!((g - polar.gradient(&theta).unwrap()).norm() < 1e-12);
        assert!((h - polar.hessian(&theta).unwrap()).norm() < 1e-12);
    }

    #[test]
    fn equator_maps_onto_direction() {
        let mut rng = StdRng::seed_from_u64(34);
        let f = sample_function(6, &mut rng);
        let r = 0.05;
        let direction = crate::linalg::random_on_sphere(&mut rng, 6, r);

        let polar = polar_with_direction(&f, r, &direction);
        let equator = DVector::from_element(5, FRAC_PI_2);
        let mapped = polar.inner().transform(&polar.sphere_point(&equator));
        assert!((mapped - &direction).norm() < 1e-10);
    }
}
