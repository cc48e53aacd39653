//! Small linear-algebra helpers shared across the search.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

/// A zero vector with a single unit entry at `i`.
pub fn axis_vector(n: usize, i: usize) -> DVector<f64> {
    let mut v = DVector::zeros(n);
    v[i] = 1.0;
    v
}

/// A vector with every entry equal to `value`.
pub fn constant_vector(n: usize, value: f64) -> DVector<f64> {
    DVector::from_element(n, value)
}

/// Cosine of the angle between two nonzero vectors.
pub fn angle_cosine(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    a.dot(b) / (a.norm() * b.norm())
}

/// A uniformly distributed point on the sphere of radius `r`, drawn by
/// normalizing independent standard-normal components.
pub fn random_on_sphere<R: Rng>(rng: &mut R, n: usize, r: f64) -> DVector<f64> {
    let mut v = DVector::zeros(n);
    for i in 0..n {
        v[i] = rng.sample::<f64, _>(StandardNormal);
    }
    let norm = v.norm();
    v / norm * r
}

/// Rotation by angle `alpha` in the plane spanned by orthonormal `u`, `v`.
fn plane_rotation(u: &DVector<f64>, v: &DVector<f64>, alpha: f64) -> DMatrix<f64> {
    let n = u.len();
    DMatrix::identity(n, n)
        + (u * v.transpose() - v * u.transpose()) * alpha.sin()
        + (u * u.transpose() + v * v.transpose()) * (alpha.cos() - 1.0)
}

/// Rotation matrix taking the direction of `from` onto the direction of `to`.
///
/// Both arguments must be nonzero. Rotation happens in the plane spanned by
/// the two directions; every vector orthogonal to that plane is left fixed.
/// For (anti)parallel inputs a well-defined fallback is used: the identity,
/// or a half-turn in an arbitrary plane containing `from`.
pub fn rotation_between(from: &DVector<f64>, to: &DVector<f64>) -> DMatrix<f64> {
    let n = from.len();
    let cos = angle_cosine(from, to);

    if cos >= 1.0 - 1e-12 {
        return DMatrix::identity(n, n);
    }

    let v = to / to.norm();
    if cos <= -1.0 + 1e-12 {
        // Antiparallel: rotate by pi in a plane containing `from` and any
        // perpendicular axis.
        let mut u = axis_vector(n, 0);
        if (1.0 - v[0].abs()) < 1e-8 {
            u = axis_vector(n, 1);
        }
        u -= &v * u.dot(&v);
        u /= u.norm();
        return plane_rotation(&v, &u, std::f64::consts::PI);
    }

    let mut u = from - &v * from.dot(&v);
    u /= u.norm();
    let alpha = cos.clamp(-1.0, 1.0).acos();

    plane_rotation(&v, &u, alpha)
}

/// Symmetric eigendecomposition with eigenpairs ordered by eigenvalue
/// magnitude, ascending.
///
/// Returns `(eigenvalues, eigenvectors)` where column `i` of the matrix is
/// the eigenvector for `eigenvalues[i]`. Ordering by magnitude puts the
/// near-zero roto-translational modes of a molecular Hessian first.
pub fn eigen_by_magnitude(m: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let n = m.nrows();
    let eig = m.clone().symmetric_eigen();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[a]
            .abs()
            .partial_cmp(&eig.eigenvalues[b].abs())
            .expect("eigenvalues are finite")
    });

    let mut values = DVector::zeros(n);
    let mut vectors = DMatrix::zeros(n, n);
    for (dst, &src) in order.iter().enumerate() {
        values[dst] = eig.eigenvalues[src];
        vectors.set_column(dst, &eig.eigenvectors.column(src));
    }

    (values, vectors)
}

/// Eigenvalues of a symmetric matrix, sorted ascending (signed).
pub fn hessian_eigenvalues(m: &DMatrix<f64>) -> DVector<f64> {
    let mut values: Vec<f64> = m.clone().symmetric_eigen().eigenvalues.iter().copied().collect();
    values.sort_by(|a, b| a.partial_cmp(b).expect("eigenvalues are finite"));
    DVector::from_vec(values)
}
