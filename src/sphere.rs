//! Optimization constrained to a sphere, and the minima-elimination loop.
//!
//! `optimize_on_sphere` finds a direction with vanishing tangential gradient
//! by re-centering a polar chart on the current direction every iteration and
//! taking momentum steps in angle space. `minima_elimination` enumerates
//! *distinct* critical directions around a structure by adding a repulsion
//! supplement over everything already found before each new search.

use crate::config::SearchConfig;
use crate::evaluator::EvalError;
use crate::function::{DifferentiableFunction, Sum};
use crate::linalg::{angle_cosine, axis_vector, constant_vector, random_on_sphere};
use crate::optimizer::{newton_direction, StopCriterion, StopStrategy};
use crate::polar::polar_with_direction;
use crate::repulsion::CosineCubeSupplement;
use log::{debug, info, warn};
use nalgebra::DVector;
use rand::rngs::StdRng;
use std::f64::consts::FRAC_PI_2;

/// Finds a critical direction of `func` on the sphere of radius `r` starting
/// from `start`, by momentum descent in a polar chart re-centered on the
/// current direction each iteration.
///
/// The momentum is reset whenever it turns against the gradient, which keeps
/// the iterate from orbiting a minimum on the shell. Returns the path of
/// accepted directions, or `None` when the iteration cap is hit first.
pub fn optimize_on_sphere<F, S>(
    stop: &mut S,
    func: &F,
    start: DVector<f64>,
    r: f64,
    iter_limit: usize,
) -> Result<Option<Vec<DVector<f64>>>, EvalError>
where
    F: DifferentiableFunction,
    S: StopCriterion,
{
    let n = func.dim();
    let start_norm = start.norm();
    let mut point = start / start_norm * r;
    let mut momentum: Option<DVector<f64>> = None;
    let mut path = Vec::new();

    for iter in 0..iter_limit {
        let polar = polar_with_direction(func, r, &point);
        let equator = constant_vector(n - 1, FRAC_PI_2);
        let (value, grad) = polar.value_grad(&equator)?;

        let m = match momentum.take() {
            Some(m) => {
                let overlap = m.dot(&grad) / (grad.norm() * m.norm());
                &m * overlap.max(0.0) + &grad
            }
            None => grad.clone(),
        };

        let next = polar.inner().transform(&polar.sphere_point(&(&equator - &m)));
        let delta = &next - &point;
        point = next;
        path.push(point.clone());
        momentum = Some(m);

        if stop.should_stop(iter, &point, value, &grad, &delta) {
            return Ok(Some(path));
        }
    }

    debug!("sphere search hit the {}-iteration cap", iter_limit);
    Ok(None)
}

/// Newton refinement of a sphere direction: full second-order steps in a
/// polar chart re-centered on the current direction each iteration.
///
/// Converges quadratically near a critical direction but needs a
/// well-conditioned tangential Hessian; a singular one aborts with `None`.
pub fn newton_on_sphere<F, S>(
    stop: &mut S,
    func: &F,
    start: DVector<f64>,
    r: f64,
    iter_limit: usize,
) -> Result<Option<Vec<DVector<f64>>>, EvalError>
where
    F: DifferentiableFunction,
    S: StopCriterion,
{
    let n = func.dim();
    let start_norm = start.norm();
    let mut point = start / start_norm * r;
    let mut path = Vec::new();

    for iter in 0..iter_limit {
        let polar = polar_with_direction(func, r, &point);
        let equator = constant_vector(n - 1, FRAC_PI_2);
        let (value, grad, hess) = polar.value_grad_hess(&equator)?;

        let Some(step) = newton_direction(&hess, &grad) else {
            debug!("singular tangential Hessian, abandoning Newton convergence");
            return Ok(None);
        };

        let next = polar.inner().transform(&polar.sphere_point(&(&equator - &step)));
        let delta = &next - &point;
        point = next;
        path.push(point.clone());

        if stop.should_stop(iter, &point, value, &grad, &delta) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Enumerates distinct minima directions of `func` on the sphere of radius
/// `cfg.sphere_radius` around the origin of its frame.
///
/// Seeds sweep the `2N` signed axis directions cyclically until a full cycle
/// yields no new acceptance, then switch to random directions until
/// `cfg.max_random_failures` consecutive seeds produce nothing new. Each
/// accepted direction contributes a repulsion term for all later searches,
/// with severity `r^2 / 2 - (f(d) - f(0))`. A converged direction is accepted
/// only when its cosine to every previous acceptance stays below
/// `cfg.duplicate_cosine`.
///
/// Evaluator failures and non-convergence abandon only the current seed; the
/// error type covers only the initial zero-point evaluation. When
/// `on_accept` is given it is called with the full direction list after
/// every acceptance (used to persist them).
pub fn minima_elimination<F>(
    func: &F,
    cfg: &SearchConfig,
    rng: &mut StdRng,
    mut on_accept: Option<&mut dyn FnMut(&[DVector<f64>])>,
) -> Result<Vec<DVector<f64>>, EvalError>
where
    F: DifferentiableFunction,
{
    let n = func.dim();
    let r = cfg.sphere_radius;
    let zero_energy = func.value(&DVector::zeros(n))?;

    let mut values: Vec<f64> = Vec::new();
    let mut directions: Vec<DVector<f64>> = Vec::new();

    // First epoch: deterministic +/- axis seeds.
    let mut since_accept = 0;
    let mut iter = 0;
    while since_accept < 2 * n {
        let sign = if iter % 2 == 0 { -1.0 } else { 1.0 };
        let seed = axis_vector(n, (iter / 2) % n) * (sign * r);
        iter += 1;
        since_accept += 1;

        if try_seed(func, cfg, seed, zero_energy, &mut values, &mut directions, &mut on_accept) {
            since_accept = 0;
        }
    }
    info!(
        "axis sweep finished after {} seeds with {} directions",
        iter,
        directions.len()
    );

    // Second epoch: random seeds until they stop producing new directions.
    let mut failures = 0;
    while failures < cfg.max_random_failures {
        let seed = random_on_sphere(rng, n, r);
        if try_seed(func, cfg, seed, zero_energy, &mut values, &mut directions, &mut on_accept) {
            failures = 0;
        } else {
            failures += 1;
        }
    }
    info!("minima elimination found {} directions", directions.len());

    Ok(directions)
}

/// Converges one seed: momentum descent on the supplemented function, then
/// re-refinement on the bare one. `None` means the seed produced nothing.
fn converge_seed<F>(
    func: &F,
    cfg: &SearchConfig,
    seed: DVector<f64>,
    values: &[f64],
    directions: &[DVector<f64>],
) -> Result<Option<DVector<f64>>, EvalError>
where
    F: DifferentiableFunction,
{
    let r = cfg.sphere_radius;
    let mut stop = StopStrategy::new(
        cfg.thresholds.sphere_relative * r,
        cfg.thresholds.sphere_relative * r,
    );

    let supplement =
        CosineCubeSupplement::new(func.dim(), directions.to_vec(), values.to_vec());
    let supplemented = Sum::new(func, supplement);

    let Some(path) =
        optimize_on_sphere(&mut stop, &supplemented, seed, r, cfg.sphere_iter_limit)?
    else {
        return Ok(None);
    };
    let mut direction = path.last().expect("converged path is nonempty").clone();

    // Re-refine on the bare function: the supplement shifted the critical
    // direction slightly.
    if let Some(refined) =
        newton_on_sphere(&mut stop, func, direction.clone(), r, cfg.newton_iter_limit)?
    {
        debug!("bare refinement converged in {} Newton steps", refined.len());
        direction = refined.last().expect("converged path is nonempty").clone();
    } else if let Some(refined) =
        optimize_on_sphere(&mut stop, func, direction.clone(), r, cfg.sphere_iter_limit)?
    {
        debug!("bare refinement fell back to momentum descent");
        direction = refined.last().expect("converged path is nonempty").clone();
    } else {
        return Ok(None);
    }

    Ok(Some(direction))
}

/// One seeded search plus the duplicate check and bookkeeping. Returns true
/// when a new direction was accepted.
fn try_seed<F>(
    func: &F,
    cfg: &SearchConfig,
    seed: DVector<f64>,
    zero_energy: f64,
    values: &mut Vec<f64>,
    directions: &mut Vec<DVector<f64>>,
    on_accept: &mut Option<&mut dyn FnMut(&[DVector<f64>])>,
) -> bool
where
    F: DifferentiableFunction,
{
    let r = cfg.sphere_radius;

    let direction = match converge_seed(func, cfg, seed, values, directions) {
        Ok(Some(direction)) => direction,
        Ok(None) => return false,
        Err(e) => {
            warn!("sphere seed abandoned: {}", e);
            return false;
        }
    };

    let max_cosine = directions
        .iter()
        .map(|prev| angle_cosine(&direction, prev))
        .fold(0.0_f64, f64::max);
    if max_cosine >= cfg.duplicate_cosine {
        debug!("direction duplicates a previous one (cosine {:.4})", max_cosine);
        return false;
    }

    let value = match func.value(&direction) {
        Ok(v) => v,
        Err(e) => {
            warn!("sphere seed abandoned at severity evaluation: {}", e);
            return false;
        }
    };

    info!(
        "accepted sphere direction #{} (max cosine to previous {:.4})",
        directions.len() + 1,
        max_cosine
    );
    values.push(r * r / 2.0 - (value - zero_energy));
    directions.push(direction);
    if let Some(callback) = on_accept.as_mut() {
        callback(directions);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::QuadraticForm;
    use nalgebra::DMatrix;
    use rand::SeedableRng;

    /// The bowl `x^2 + y^2 + ...` in `n` dimensions.
    fn isotropic_bowl(n: usize) -> QuadraticForm {
        QuadraticForm::new(DMatrix::identity(n, n) * 2.0, DVector::zeros(n), 0.0)
    }

    /// A bowl with distinct curvatures `1, 2, 3, ...` along the axes.
    fn anisotropic_bowl(n: usize) -> QuadraticForm {
        let diag = DVector::from_fn(n, |i, _| 1.0 + i as f64);
        QuadraticForm::new(DMatrix::from_diagonal(&diag), DVector::zeros(n), 0.0)
    }

    fn tangential_gradient(f: &QuadraticForm, direction: &DVector<f64>) -> f64 {
        let grad = f.gradient(direction).unwrap();
        let unit = direction / direction.norm();
        (&grad - &unit * grad.dot(&unit)).norm()
    }

    #[test]
    fn quadratic_bowl_converges_from_seed_angle_zero() {
        let f = isotropic_bowl(2);
        let mut stop = StopStrategy::new(1e-8, 1e-8);
        let seed = axis_vector(2, 0);
        let path = optimize_on_sphere(&mut stop, &f, seed, 1.0, 200)
            .unwrap()
            .expect("sphere search must converge on the bowl");

        let direction = path.last().unwrap();
        assert!((direction.norm() - 1.0).abs() < 1e-9);
        assert!(tangential_gradient(&f, direction) < 1e-6);
    }

    #[test]
    fn newton_on_sphere_converges_near_the_critical_direction() {
        let f = anisotropic_bowl(3);
        let mut stop = StopStrategy::new(1e-10, 1e-10);
        // The x-axis is a critical direction (eigenvector); start close by.
        let mut seed = axis_vector(3, 0);
        seed[1] = 0.05;
        let path = newton_on_sphere(&mut stop, &f, seed, 0.5, 30)
            .unwrap()
            .expect("newton must converge from a near-critical seed");

        let direction = path.last().unwrap();
        assert!(angle_cosine(direction, &axis_vector(3, 0)).abs() > 1.0 - 1e-8);
        assert!(tangential_gradient(&f, direction) < 1e-8);
    }

    #[test]
    fn elimination_accepts_distinct_and_rejects_duplicate_directions() {
        let f = anisotropic_bowl(3);
        let mut cfg = SearchConfig::default();
        cfg.sphere_radius = 0.5;
        cfg.max_random_failures = 3;
        let mut rng = StdRng::seed_from_u64(5);

        let directions = minima_elimination(&f, &cfg, &mut rng, None).unwrap();

        // The signed axis seeds are themselves the critical directions here,
        // so both signs of at least the softest mode must be accepted, and
        // re-seeding the same axes must not duplicate them.
        assert!(directions.len() >= 2);
        for (i, a) in directions.iter().enumerate() {
            assert!((a.norm() - 0.5).abs() < 1e-6);
            for b in directions.iter().skip(i + 1) {
                assert!(
                    angle_cosine(a, b) < cfg.duplicate_cosine,
                    "accepted directions must be pairwise distinct"
                );
            }
        }
    }

    #[test]
    fn acceptance_callback_sees_every_acceptance() {
        let f = anisotropic_bowl(3);
        let mut cfg = SearchConfig::default();
        cfg.sphere_radius = 0.5;
        cfg.max_random_failures = 2;
        let mut rng = StdRng::seed_from_u64(6);

        let mut sizes = Vec::new();
        let mut callback = |dirs: &[DVector<f64>]| sizes.push(dirs.len());
        let directions =
            minima_elimination(&f, &cfg, &mut rng, Some(&mut callback)).unwrap();

        assert_eq!(sizes.len(), directions.len());
        assert_eq!(*sizes.last().unwrap(), directions.len());
    }
}
