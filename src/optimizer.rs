//! First-order step rules, stop criteria and the optimization driver.

use crate::evaluator::EvalError;
use crate::function::DifferentiableFunction;
use nalgebra::{DMatrix, DVector};

/// A pluggable rule producing the next downhill step from the gradient.
///
/// The driver applies `x_next = x - step`. Rules carry their own accumulator
/// state (momentum, squared-gradient averages) and are reset between runs.
pub trait StepRule {
    /// Clear accumulated state before a fresh run.
    fn reset(&mut self);

    /// The update to subtract from the current point.
    fn step(&mut self, iter: usize, grad: &DVector<f64>) -> DVector<f64>;
}

/// Plain gradient descent with a fixed learning rate.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    /// Learning rate.
    pub rate: f64,
}

impl StepRule for GradientDescent {
    fn reset(&mut self) {}

    fn step(&mut self, _iter: usize, grad: &DVector<f64>) -> DVector<f64> {
        grad * self.rate
    }
}

/// Heavy-ball momentum.
#[derive(Debug, Clone)]
pub struct Momentum {
    /// Learning rate.
    pub rate: f64,
    /// Velocity decay factor.
    pub decay: f64,
    velocity: Option<DVector<f64>>,
}

impl Momentum {
    /// New momentum rule with the given rate and decay.
    pub fn new(rate: f64, decay: f64) -> Self {
        Self {
            rate,
            decay,
            velocity: None,
        }
    }
}

impl StepRule for Momentum {
    fn reset(&mut self) {
        self.velocity = None;
    }

    fn step(&mut self, _iter: usize, grad: &DVector<f64>) -> DVector<f64> {
        let v = match self.velocity.take() {
            Some(v) => v * self.decay + grad * self.rate,
            None => grad * self.rate,
        };
        self.velocity = Some(v.clone());
        v
    }
}

/// Nesterov-style momentum (the gradient-history formulation).
#[derive(Debug, Clone)]
pub struct Nesterov {
    /// Learning rate.
    pub rate: f64,
    /// Velocity decay factor.
    pub decay: f64,
    velocity: Option<DVector<f64>>,
}

impl Nesterov {
    /// New Nesterov rule with the given rate and decay.
    pub fn new(rate: f64, decay: f64) -> Self {
        Self {
            rate,
            decay,
            velocity: None,
        }
    }
}

impl StepRule for Nesterov {
    fn reset(&mut self) {
        self.velocity = None;
    }

    fn step(&mut self, _iter: usize, grad: &DVector<f64>) -> DVector<f64> {
        let v = match self.velocity.take() {
            Some(v) => v * self.decay + grad * self.rate,
            None => grad * self.rate,
        };
        self.velocity = Some(v.clone());
        // Look-ahead correction on top of the updated velocity.
        v * self.decay + grad * self.rate
    }
}

/// Adagrad: per-coordinate rates shrinking with accumulated squared gradient.
#[derive(Debug, Clone)]
pub struct Adagrad {
    /// Base learning rate.
    pub rate: f64,
    /// Divisor regularization.
    pub eps: f64,
    accum: Option<DVector<f64>>,
}

impl Adagrad {
    /// New Adagrad rule with the given base rate.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            eps: 1e-8,
            accum: None,
        }
    }
}

impl StepRule for Adagrad {
    fn reset(&mut self) {
        self.accum = None;
    }

    fn step(&mut self, _iter: usize, grad: &DVector<f64>) -> DVector<f64> {
        let mut accum = self
            .accum
            .take()
            .unwrap_or_else(|| DVector::zeros(grad.len()));
        accum += grad.component_mul(grad);
        let step = DVector::from_fn(grad.len(), |i, _| {
            self.rate * grad[i] / (accum[i] + self.eps).sqrt()
        });
        self.accum = Some(accum);
        step
    }
}

/// Adadelta: rate-free rule balancing running averages of squared gradients
/// and squared updates.
#[derive(Debug, Clone)]
pub struct Adadelta {
    /// Averaging decay factor.
    pub decay: f64,
    /// Divisor regularization.
    pub eps: f64,
    avg_sq_grad: Option<DVector<f64>>,
    avg_sq_step: Option<DVector<f64>>,
}

impl Adadelta {
    /// New Adadelta rule with the given decay.
    pub fn new(decay: f64) -> Self {
        Self {
            decay,
            eps: 1e-6,
            avg_sq_grad: None,
            avg_sq_step: None,
        }
    }
}

impl StepRule for Adadelta {
    fn reset(&mut self) {
        self.avg_sq_grad = None;
        self.avg_sq_step = None;
    }

    fn step(&mut self, _iter: usize, grad: &DVector<f64>) -> DVector<f64> {
        let n = grad.len();
        let mut eg = self.avg_sq_grad.take().unwrap_or_else(|| DVector::zeros(n));
        let mut ex = self.avg_sq_step.take().unwrap_or_else(|| DVector::zeros(n));

        eg = eg * self.decay + grad.component_mul(grad) * (1.0 - self.decay);
        let step = DVector::from_fn(n, |i, _| {
            grad[i] * ((ex[i] + self.eps) / (eg[i] + self.eps)).sqrt()
        });
        ex = ex * self.decay + step.component_mul(&step) * (1.0 - self.decay);

        self.avg_sq_grad = Some(eg);
        self.avg_sq_step = Some(ex);
        step
    }
}

/// Adam: bias-corrected first and second moment accumulators.
#[derive(Debug, Clone)]
pub struct Adam {
    /// Learning rate.
    pub rate: f64,
    /// First-moment decay.
    pub beta1: f64,
    /// Second-moment decay.
    pub beta2: f64,
    /// Divisor regularization.
    pub eps: f64,
    moments: Option<(DVector<f64>, DVector<f64>)>,
    t: usize,
}

impl Adam {
    /// New Adam rule with the given learning rate and standard betas.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            moments: None,
            t: 0,
        }
    }
}

impl StepRule for Adam {
    fn reset(&mut self) {
        self.moments = None;
        self.t = 0;
    }

    fn step(&mut self, _iter: usize, grad: &DVector<f64>) -> DVector<f64> {
        let n = grad.len();
        let (mut m, mut v) = self
            .moments
            .take()
            .unwrap_or_else(|| (DVector::zeros(n), DVector::zeros(n)));
        self.t += 1;

        m = m * self.beta1 + grad * (1.0 - self.beta1);
        v = v * self.beta2 + grad.component_mul(grad) * (1.0 - self.beta2);

        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let step = DVector::from_fn(n, |i, _| {
            self.rate * (m[i] / bc1) / ((v[i] / bc2).sqrt() + self.eps)
        });

        self.moments = Some((m, v));
        step
    }
}

/// A convergence predicate queried after every accepted step.
pub trait StopCriterion {
    /// True when the run should stop at this point.
    fn should_stop(
        &mut self,
        iter: usize,
        point: &DVector<f64>,
        value: f64,
        grad: &DVector<f64>,
        delta: &DVector<f64>,
    ) -> bool;
}

/// Converges when the gradient norm and the step-delta norm both fall below
/// independently configured thresholds.
#[derive(Debug, Clone, Copy)]
pub struct StopStrategy {
    /// Gradient norm threshold.
    pub grad_eps: f64,
    /// Step-delta norm threshold.
    pub delta_eps: f64,
}

impl StopStrategy {
    /// New stop strategy with the given thresholds.
    pub fn new(grad_eps: f64, delta_eps: f64) -> Self {
        Self { grad_eps, delta_eps }
    }
}

impl StopCriterion for StopStrategy {
    fn should_stop(
        &mut self,
        _iter: usize,
        _point: &DVector<f64>,
        _value: f64,
        grad: &DVector<f64>,
        delta: &DVector<f64>,
    ) -> bool {
        grad.norm() < self.grad_eps && delta.norm() < self.delta_eps
    }
}

/// Wraps a stop criterion and records every point it is queried with, without
/// altering the stop decision.
pub struct History<S> {
    inner: S,
    /// Points seen so far, in acceptance order.
    pub path: Vec<DVector<f64>>,
}

impl<S: StopCriterion> History<S> {
    /// Wrap `inner` with an empty history.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            path: Vec::new(),
        }
    }
}

impl<S: StopCriterion> StopCriterion for History<S> {
    fn should_stop(
        &mut self,
        iter: usize,
        point: &DVector<f64>,
        value: f64,
        grad: &DVector<f64>,
        delta: &DVector<f64>,
    ) -> bool {
        self.path.push(point.clone());
        self.inner.should_stop(iter, point, value, grad, delta)
    }
}

/// Runs a first-order optimization of `func` from `start`.
///
/// Returns the accepted-point path on convergence, or `None` when the
/// iteration cap is reached first. Non-convergence is a normal outcome here,
/// not an error; callers must check before using the result.
pub fn optimize<F, R, S>(
    rule: &mut R,
    stop: &mut S,
    func: &F,
    start: DVector<f64>,
    max_iters: usize,
) -> Result<Option<Vec<DVector<f64>>>, EvalError>
where
    F: DifferentiableFunction,
    R: StepRule,
    S: StopCriterion,
{
    rule.reset();
    let mut x = start;
    let mut path = Vec::new();

    for iter in 0..max_iters {
        let (value, grad) = func.value_grad(&x)?;
        let delta = rule.step(iter, &grad);
        x -= &delta;
        path.push(x.clone());

        if stop.should_stop(iter, &x, value, &grad, &delta) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Solves `hess * d = grad` for the Newton direction, or `None` when the
/// Hessian is singular to working precision.
pub fn newton_direction(hess: &DMatrix<f64>, grad: &DVector<f64>) -> Option<DVector<f64>> {
    hess.clone().lu().solve(grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::QuadraticForm;

    fn bowl() -> QuadraticForm {
        let a = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 3.0]));
        QuadraticForm::new(a, DVector::zeros(2), 0.0)
    }

    fn run_rule<R: StepRule>(mut rule: R, max_iters: usize) -> Option<DVector<f64>> {
        let f = bowl();
        let mut stop = StopStrategy::new(1e-7, 1e-7);
        let start = DVector::from_vec(vec![1.0, -1.0]);
        optimize(&mut rule, &mut stop, &f, start, max_iters)
            .unwrap()
            .map(|path| path.last().unwrap().clone())
    }

    #[test]
    fn gradient_descent_reaches_the_minimum() {
        let last = run_rule(GradientDescent { rate: 0.2 }, 200).expect("converged");
        assert!(last.norm() < 1e-6);
    }

    #[test]
    fn momentum_reaches_the_minimum() {
        let last = run_rule(Momentum::new(0.1, 0.5), 400).expect("converged");
        assert!(last.norm() < 1e-6);
    }

    #[test]
    fn nesterov_reaches_the_minimum() {
        let last = run_rule(Nesterov::new(0.05, 0.5), 600).expect("converged");
        assert!(last.norm() < 1e-6);
    }

    #[test]
    fn adam_moves_close_to_the_minimum() {
        let f = bowl();
        let mut rule = Adam::new(0.05);
        let mut x = DVector::from_vec(vec![1.0, -1.0]);
        for iter in 0..500 {
            let grad = f.gradient(&x).unwrap();
            x -= rule.step(iter, &grad);
        }
        assert!(f.value(&x).unwrap() < 1e-2);
    }

    #[test]
    fn adagrad_makes_progress_downhill() {
        let f = bowl();
        let mut rule = Adagrad::new(0.5);
        let start = DVector::from_vec(vec![1.0, -1.0]);
        // Adagrad's decaying rate rarely meets tight thresholds, but every
        // step must still move downhill.
        let v0 = f.value(&start).unwrap();
        let mut x = start;
        for iter in 0..50 {
            let grad = f.gradient(&x).unwrap();
            x -= rule.step(iter, &grad);
        }
        assert!(f.value(&x).unwrap() < v0);
    }

    #[test]
    fn adadelta_makes_progress_downhill() {
        let f = bowl();
        let mut rule = Adadelta::new(0.9);
        let start = DVector::from_vec(vec![1.0, -1.0]);
        let v0 = f.value(&start).unwrap();

        let mut x = start;
        for iter in 0..100 {
            let grad = f.gradient(&x).unwrap();
            x -= rule.step(iter, &grad);
        }
        assert!(f.value(&x).unwrap() < v0);
    }

    #[test]
    fn cap_without_convergence_returns_none() {
        let f = bowl();
        let mut rule = GradientDescent { rate: 0.01 };
        let mut stop = StopStrategy::new(1e-12, 1e-12);
        let outcome = optimize(
            &mut rule,
            &mut stop,
            &f,
            DVector::from_vec(vec![1.0, 1.0]),
            3,
        )
        .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn history_records_every_accepted_step() {
        let f = bowl();
        let mut rule = GradientDescent { rate: 0.2 };
        let mut stop = History::new(StopStrategy::new(1e-7, 1e-7));
        let path = optimize(
            &mut rule,
            &mut stop,
            &f,
            DVector::from_vec(vec![1.0, -1.0]),
            200,
        )
        .unwrap()
        .expect("converged");

        assert_eq!(stop.path.len(), path.len());
        assert_eq!(stop.path.last(), path.last());
    }

    #[test]
    fn newton_direction_solves_the_quadratic_in_one_step() {
        let f = bowl();
        let x = DVector::from_vec(vec![2.0, -1.5]);
        let d = newton_direction(&f.hessian(&x).unwrap(), &f.gradient(&x).unwrap()).unwrap();
        assert!((x - d).norm() < 1e-12);
    }

    #[test]
    fn newton_direction_is_none_for_singular_hessian() {
        let h = DMatrix::zeros(2, 2);
        let g = DVector::from_vec(vec![1.0, 0.0]);
        assert!(newton_direction(&h, &g).is_none());
    }
}
