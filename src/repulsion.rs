//! Interpolated repulsion supplement over already-discovered directions.
//!
//! During minima elimination every accepted sphere direction is recorded with
//! a severity value; [`CosineCubeSupplement`] turns that record into a smooth
//! penalty surface that grows the more a query direction overlaps the known
//! ones. Added on top of the real energy it pushes the next sphere search
//! away from minima that were already found.
//!
//! The kernel for one recorded pair `(d, v)` is `v * max(0, c)^3` with
//! `c = cos(angle(x, d))`. The cubic keeps the penalty twice continuously
//! differentiable where it vanishes, so the supplemented function stays a
//! valid [`DifferentiableFunction`] everywhere off the origin.

use crate::evaluator::EvalError;
use crate::function::DifferentiableFunction;
use nalgebra::{DMatrix, DVector};

/// Smooth penalty built from recorded `(direction, severity)` pairs.
///
/// Mutated only by [`push`](CosineCubeSupplement::push); immutable otherwise
/// during a search pass.
pub struct CosineCubeSupplement {
    dim: usize,
    directions: Vec<DVector<f64>>,
    values: Vec<f64>,
}

impl CosineCubeSupplement {
    /// Build a supplement from parallel direction and severity lists.
    ///
    /// # Panics
    ///
    /// Panics if the lists differ in length or a direction has the wrong
    /// dimension.
    pub fn new(dim: usize, directions: Vec<DVector<f64>>, values: Vec<f64>) -> Self {
        assert_eq!(directions.len(), values.len());
        for d in &directions {
            assert_eq!(d.len(), dim);
        }
        Self {
            dim,
            directions,
            values,
        }
    }

    /// An empty supplement: identically zero.
    pub fn empty(dim: usize) -> Self {
        Self::new(dim, Vec::new(), Vec::new())
    }

    /// Record one more `(direction, severity)` pair.
    pub fn push(&mut self, direction: DVector<f64>, value: f64) {
        assert_eq!(direction.len(), self.dim);
        self.directions.push(direction);
        self.values.push(value);
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.directions.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }
}

impl DifferentiableFunction for CosineCubeSupplement {
    fn dim(&self) -> usize {
        self.dim
    }

    fn value(&self, x: &DVector<f64>) -> Result<f64, EvalError> {
        let norm = x.norm();
        assert!(norm > 0.0, "repulsion supplement is undefined at the origin");
        let u = x / norm;

        let mut total = 0.0;
        for (d, v) in self.directions.iter().zip(&self.values) {
            let c = u.dot(d) / d.norm();
            if c > 0.0 {
                total += v * c * c * c;
            }
        }
        Ok(total)
    }

    fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        let norm = x.norm();
        assert!(norm > 0.0, "repulsion supplement is undefined at the origin");
        let u = x / norm;

        let mut grad = DVector::zeros(self.dim);
        for (d, v) in self.directions.iter().zip(&self.values) {
            let e = d / d.norm();
            let c = u.dot(&e);
            if c > 0.0 {
                // d/dx of c = (e - c u) / |x|
                let dc = (&e - &u * c) / norm;
                grad += dc * (3.0 * v * c * c);
            }
        }
        Ok(grad)
    }

    fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        let norm = x.norm();
        assert!(norm > 0.0, "repulsion supplement is undefined at the origin");
        let u = x / norm;
        let norm_sq = norm * norm;

        let mut hess = DMatrix::zeros(self.dim, self.dim);
        for (d, v) in self.directions.iter().zip(&self.values) {
            let e = d / d.norm();
            let c = u.dot(&e);
            if c > 0.0 {
                let dc = (&e - &u * c) / norm;
                // d2c/dx2 = (-e u' - u e' - c I + 3 c u u') / |x|^2
                let d2c = (-(&e * u.transpose()) - &u * e.transpose()
                    + (&u * u.transpose() * 3.0 - DMatrix::identity(self.dim, self.dim)) * c)
                    / norm_sq;
                hess += (&dc * dc.transpose()) * (6.0 * v * c) + d2c * (3.0 * v * c * c);
            }
        }
        Ok(hess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::finite_diff;
    use crate::linalg::{angle_cosine, random_on_sphere};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_supplement(rng: &mut StdRng, n: usize, k: usize) -> CosineCubeSupplement {
        let mut s = CosineCubeSupplement::empty(n);
        for i in 0..k {
            s.push(random_on_sphere(rng, n, 0.05), 0.1 + 0.05 * i as f64);
        }
        s
    }

    #[test]
    fn empty_supplement_is_zero() {
        let s = CosineCubeSupplement::empty(4);
        let x = DVector::from_vec(vec![0.1, 0.2, -0.3, 0.4]);
        assert_eq!(s.value(&x).unwrap(), 0.0);
        assert_eq!(s.gradient(&x).unwrap().norm(), 0.0);
    }

    #[test]
    fn penalty_peaks_along_recorded_direction() {
        let mut s = CosineCubeSupplement::empty(3);
        let d = DVector::from_vec(vec![0.05, 0.0, 0.0]);
        s.push(d.clone(), 1.0);

        let aligned = s.value(&DVector::from_vec(vec![2.0, 0.0, 0.0])).unwrap();
        let oblique = s.value(&DVector::from_vec(vec![1.0, 1.0, 0.0])).unwrap();
        let opposite = s.value(&DVector::from_vec(vec![-1.0, 0.0, 0.0])).unwrap();

        assert!((aligned - 1.0).abs() < 1e-12);
        assert!(oblique > 0.0 && oblique < aligned);
        assert_eq!(opposite, 0.0);
    }

    #[test]
    fn value_is_scale_invariant() {
        let mut rng = StdRng::seed_from_u64(41);
        let s = sample_supplement(&mut rng, 5, 3);
        let x = random_on_sphere(&mut rng, 5, 1.0);
        let v1 = s.value(&x).unwrap();
        let v2 = s.value(&(&x * 7.0)).unwrap();
        assert!((v1 - v2).abs() < 1e-12);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(42);
        let s = sample_supplement(&mut rng, 4, 4);

        for _ in 0..10 {
            let x = random_on_sphere(&mut rng, 4, 0.8);
            // Skip points straddling a kernel cutoff: the third derivative
            // jumps there and finite differences lose accuracy.
            if s.directions.iter().any(|d| angle_cosine(&x, d).abs() < 1e-2) {
                continue;
            }

            let g = s.gradient(&x).unwrap();
            let g_num = finite_diff::gradient(&s, &x, 1e-6);
            assert!((g - g_num).norm() < 1e-6);

            let h = s.hessian(&x).unwrap();
            let h_num = finite_diff::hessian(&s, &x, 1e-6);
            assert!((h - h_num).norm() < 1e-6);
        }
    }
}
