//! The SHS graph-search workflow over equilibrium structures and transition
//! states.
//!
//! Starting from one equilibrium structure, the workflow enumerates minima
//! directions on a small sphere around it, walks a path outward along each
//! direction, probes for a nearby transition state with Newton refinement,
//! and descends both ways off every confirmed transition state to find the
//! equilibrium structures it connects. New unique structures are queued and
//! the cycle repeats, breadth-first, until the queue empties.
//!
//! Directions of one structure are walked in parallel; the structure sets,
//! the queue and the shared output files are the only shared mutable state
//! and every check-then-insert against them runs inside one critical
//! section, so concurrent workers cannot double-insert a structure.
//!
//! Evaluator failures and non-convergence abandon only the path or candidate
//! that hit them; the breadth-first traversal always continues. The only
//! externally visible failure mode of a run is discovering fewer structures
//! than an exhaustive search would.

use crate::config::SearchConfig;
use crate::evaluator::{EvalError, Evaluator};
use crate::function::DifferentiableFunction;
use crate::io::{self, StructureWriter, DIRECTIONS_DIR, PATH_DIR, TRAJECTORY_DIR};
use crate::linalg::{angle_cosine, eigen_by_magnitude, hessian_eigenvalues};
use crate::optimizer::{newton_direction, History, StopCriterion, StopStrategy};
use crate::sphere::{minima_elimination, newton_on_sphere};
use crate::structures::StructureSet;
use crate::transform::{normalize_for_polar, reduced_coordinates};
use log::{debug, info, warn};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Newton refinement of a structure toward the nearest stationary point.
///
/// Each iteration re-derives the reduced-coordinate projector at the current
/// structure (its basis is only valid near the point it was built from) and
/// takes a full Newton step with the reduced Hessian. Returns the refined
/// structure on convergence, `None` when the iteration budget runs out or
/// the reduced Hessian goes singular.
pub fn second_order_optimization<E, S>(
    molecule: &E,
    mut structure: DVector<f64>,
    stop: &mut S,
    iter_limit: usize,
) -> Result<Option<DVector<f64>>, EvalError>
where
    E: Evaluator + ?Sized,
    S: StopCriterion,
{
    for iter in 0..iter_limit {
        let reduced = reduced_coordinates(molecule, &structure)?;
        let origin = DVector::zeros(reduced.dim());
        let (value, grad, hess) = reduced.value_grad_hess(&origin)?;

        let Some(step) = newton_direction(&hess, &grad) else {
            debug!("singular reduced Hessian during Newton refinement");
            return Ok(None);
        };

        let previous = structure.clone();
        structure = reduced.full_transform(&(-&step));
        let delta = &structure - &previous;

        if stop.should_stop(iter, &structure, value, &grad, &delta) {
            return Ok(Some(structure));
        }
    }

    Ok(None)
}

/// Attempts to refine `structure` into a confirmed transition state.
///
/// Refinement must converge within the configured budget *and* the reduced
/// Hessian at the result must carry at least one negative eigenvalue, since
/// a converged gradient alone may just be a minimum. Both evaluator failures
/// and non-convergence yield `None`; they abandon only this candidate.
pub fn try_to_optimize_ts<E>(
    molecule: &E,
    structure: &DVector<f64>,
    cfg: &SearchConfig,
) -> Option<DVector<f64>>
where
    E: Evaluator + ?Sized,
{
    let attempt = || -> Result<Option<DVector<f64>>, EvalError> {
        let mut stop = History::new(StopStrategy::new(
            cfg.thresholds.ts_grad,
            cfg.thresholds.ts_step,
        ));
        let Some(ts) =
            second_order_optimization(molecule, structure.clone(), &mut stop, cfg.ts_newton_iters)?
        else {
            return Ok(None);
        };
        debug!("TS refinement converged in {} Newton steps", stop.path.len());

        let reduced = reduced_coordinates(molecule, &ts)?;
        let hess = reduced.hessian(&DVector::zeros(reduced.dim()))?;
        let eigenvalues = hessian_eigenvalues(&hess);
        if eigenvalues[0] >= 0.0 {
            info!("no negative eigenvalue after TS refinement, rejecting candidate");
            return Ok(None);
        }

        Ok(Some(ts))
    };

    match attempt() {
        Ok(result) => result,
        Err(e) => {
            warn!("TS refinement abandoned: {}", e);
            None
        }
    }
}

/// Descends both ways off a confirmed transition state.
///
/// Re-derives the reduced projector at the transition state, finds the
/// negative-curvature eigenvector (the reaction coordinate), displaces the
/// structure by the configured fraction of it in both signs and hands each
/// displaced point to the evaluator's own geometry optimization.
///
/// Returns the connecting path (side structures around the transition state)
/// plus the two sides; a side that fails to relax is `None`.
pub fn two_way_descent<E>(
    molecule: &E,
    ts: &DVector<f64>,
    cfg: &SearchConfig,
) -> Result<(Vec<DVector<f64>>, Option<DVector<f64>>, Option<DVector<f64>>), EvalError>
where
    E: Evaluator + ?Sized,
{
    let reduced = reduced_coordinates(molecule, ts)?;
    let origin = DVector::zeros(reduced.dim());
    let hess = reduced.hessian(&origin)?;

    let (values, vectors) = eigen_by_magnitude(&hess);
    let mut reaction_mode = None;
    let mut most_negative = 0.0;
    for i in 0..values.len() {
        if values[i] < most_negative {
            most_negative = values[i];
            reaction_mode = Some(i);
        }
    }
    let Some(mode_index) = reaction_mode else {
        warn!("no negative-curvature mode at a confirmed transition state");
        return Ok((vec![ts.clone()], None, None));
    };

    let mode = vectors.column(mode_index).clone_owned();
    let first = reduced.full_transform(&(&mode * -cfg.displacement_factor));
    let second = reduced.full_transform(&(&mode * cfg.displacement_factor));

    let first_es = relax(molecule, &first);
    let second_es = relax(molecule, &second);

    let mut path = Vec::new();
    if let Some(es) = &first_es {
        path.push(es.clone());
    }
    path.push(ts.clone());
    if let Some(es) = &second_es {
        path.push(es.clone());
    }

    Ok((path, first_es, second_es))
}

fn relax<E: Evaluator + ?Sized>(molecule: &E, start: &DVector<f64>) -> Option<DVector<f64>> {
    match molecule.optimize_structure(start) {
        Ok(es) => Some(es),
        Err(e) => {
            warn!("descent-side optimization failed: {}", e);
            None
        }
    }
}

/// Result of walking one path outward along a direction.
pub struct PathOutcome {
    /// Accepted Cartesian points, innermost first.
    pub trajectory: Vec<DVector<f64>>,
    /// The confirmed transition state, when the walk found one.
    pub transition_state: Option<DVector<f64>>,
}

/// Walks outward along `direction` in the frame of `func`, growing the
/// radius by `cfg.delta_r` per step and re-converging the direction on every
/// new shell with the previous one as warm start.
///
/// A re-converged direction is accepted only when its cosine to the
/// prediction exceeds `cfg.path_accept_cosine`; otherwise the growth is
/// halved and retried up to `cfg.conv_iter_limit` times before the path is
/// abandoned. Every `cfg.ts_probe_interval`-th accepted step, and once
/// whenever a retry sequence first fails, the current point is probed for a
/// nearby transition state.
///
/// `func` must be a zero-mode-free view of `molecule` centered on the
/// equilibrium structure the direction belongs to.
pub fn shs_path<E, F>(
    molecule: &E,
    func: &F,
    direction: DVector<f64>,
    path_id: usize,
    cfg: &SearchConfig,
    trajectory_dir: &Path,
) -> PathOutcome
where
    E: Evaluator + ?Sized,
    F: DifferentiableFunction,
{
    info!(
        "path #{}: starting at radius {:.4}",
        path_id,
        direction.norm()
    );

    let mut writer = match StructureWriter::create(
        trajectory_dir.join(format!("{}.xyz", path_id)),
        molecule.charges().to_vec(),
    ) {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!("path #{}: no trajectory file: {}", path_id, e);
            None
        }
    };

    let mut trajectory = Vec::new();
    let transition_state =
        match walk(molecule, func, direction, path_id, cfg, &mut trajectory, &mut writer) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("path #{} abandoned: {}", path_id, e);
                None
            }
        };

    PathOutcome {
        trajectory,
        transition_state,
    }
}

fn walk<E, F>(
    molecule: &E,
    func: &F,
    mut direction: DVector<f64>,
    path_id: usize,
    cfg: &SearchConfig,
    trajectory: &mut Vec<DVector<f64>>,
    writer: &mut Option<StructureWriter>,
) -> Result<Option<DVector<f64>>, EvalError>
where
    E: Evaluator + ?Sized,
    F: DifferentiableFunction,
{
    let mut last_point = func.full_transform(&DVector::zeros(func.dim()));
    trajectory.push(last_point.clone());

    let mut value = func.value(&direction)?;
    let mut r = direction.norm();

    for step in 0..cfg.max_path_steps {
        if step > 0 && step % cfg.ts_probe_interval == 0 {
            if let Some(ts) = probe_ts(molecule, &last_point, writer, cfg) {
                info!("path #{}: TS found at step {}", path_id, step);
                return Ok(Some(ts));
            }
        }

        direction = &direction / direction.norm() * (r + cfg.delta_r);

        let mut converged = false;
        let mut current_dr = cfg.delta_r.min(direction.norm());
        for conv_iter in 0..cfg.conv_iter_limit {
            let next_r = r + current_dr;
            let seed = &direction / direction.norm() * next_r;
            let mut stop = StopStrategy::new(cfg.thresholds.path_grad, cfg.thresholds.path_step);

            match newton_on_sphere(&mut stop, func, seed, next_r, cfg.path_newton_iters)? {
                Some(path) => {
                    let candidate = path.last().expect("converged path is nonempty").clone();
                    let cosine = angle_cosine(&direction, &candidate);
                    if cosine < cfg.path_accept_cosine {
                        debug!(
                            "path #{}: step {} drifted (cosine {:.4}), halving growth",
                            path_id, step, cosine
                        );
                    } else {
                        r = next_r;
                        direction = candidate;
                        converged = true;
                        break;
                    }
                }
                None => {
                    debug!(
                        "path #{}: no convergence with growth {:.5}",
                        path_id, current_dr
                    );
                    if conv_iter == 0 {
                        if let Some(ts) = probe_ts(molecule, &last_point, writer, cfg) {
                            info!("path #{}: TS found at step {}", path_id, step);
                            return Ok(Some(ts));
                        }
                    }
                }
            }
            current_dr *= 0.5;
        }

        if !converged {
            warn!(
                "path #{}: exhausted {} convergence retries, abandoning",
                path_id, cfg.conv_iter_limit
            );
            break;
        }

        let new_value = func.value(&direction)?;
        last_point = func.full_transform(&direction);
        trajectory.push(last_point.clone());
        if let Some(w) = writer.as_mut() {
            if let Err(e) = w.append(&last_point, &step.to_string()) {
                warn!("path #{}: trajectory write failed: {}", path_id, e);
            }
        }

        if new_value < value {
            // Walking outward from a minimum should climb; a drop means the
            // path slid into another basin.
            warn!(
                "path #{}: energy decreased along the walk ({:.10} < {:.10})",
                path_id, new_value, value
            );
        }
        value = new_value;
    }

    Ok(None)
}

/// Probes for a transition state near `point`; logs and records a find.
fn probe_ts<E>(
    molecule: &E,
    point: &DVector<f64>,
    writer: &mut Option<StructureWriter>,
    cfg: &SearchConfig,
) -> Option<DVector<f64>>
where
    E: Evaluator + ?Sized,
{
    let ts = try_to_optimize_ts(molecule, point, cfg)?;

    match molecule.value_grad_hess(&ts) {
        Ok((value, grad, hess)) => info!(
            "TS candidate: value {:.10}, gradient norm {:.3e}, eigenvalues {:?}",
            value,
            grad.norm(),
            hessian_eigenvalues(&hess).as_slice()
        ),
        Err(e) => warn!("TS candidate info evaluation failed: {}", e),
    }

    if let Some(w) = writer.as_mut() {
        if let Err(e) = w.append(&ts, "final TS") {
            warn!("trajectory write of TS failed: {}", e);
        }
    }

    Some(ts)
}

/// Everything discovered about one kind of structure, guarded as a unit so
/// the duplicate check, the insert, the output append and the enqueue happen
/// atomically with respect to other workers.
struct Discoveries {
    set: StructureSet,
    writer: StructureWriter,
    queue: VecDeque<DVector<f64>>,
}

impl Discoveries {
    /// Deduplicated insert plus persistent append; returns the acceptance
    /// index for a new structure.
    fn record(&mut self, structure: &DVector<f64>, enqueue: bool) -> Option<usize> {
        let index = self.set.add(structure)?;
        if let Err(e) = self.writer.append(structure, &index.to_string()) {
            warn!("structure output append failed: {}", e);
        }
        if enqueue {
            self.queue.push_back(structure.clone());
        }
        Some(index)
    }
}

/// Aggregate result of one workflow run.
pub struct RunSummary {
    /// Unique equilibrium structures, in acceptance order.
    pub equilibrium_structures: Vec<DVector<f64>>,
    /// Unique transition states, in acceptance order.
    pub transition_states: Vec<DVector<f64>>,
}

/// Runs the complete search from `initial` until the queue of unprocessed
/// equilibrium structures empties.
///
/// Side effects: the output directory tree under `out_dir` is provisioned
/// and filled with the shared structure files, per-structure direction
/// dumps, per-path trajectories and two-way descent paths. Whatever was
/// flushed before an interruption is the durable result.
pub fn run<E: Evaluator>(
    molecule: &E,
    initial: &DVector<f64>,
    cfg: &SearchConfig,
    out_dir: &Path,
) -> Result<RunSummary, EvalError> {
    io::provision_directories(out_dir)?;
    let charges = molecule.charges().to_vec();

    let es = Mutex::new(Discoveries {
        set: StructureSet::new(cfg.fingerprint_eps),
        writer: StructureWriter::create(out_dir.join("equilibrium_structures.xyz"), charges.clone())?,
        queue: VecDeque::new(),
    });
    let ts = Mutex::new(Discoveries {
        set: StructureSet::new(cfg.fingerprint_eps),
        writer: StructureWriter::create(
            out_dir.join("transition_state_structures.xyz"),
            charges,
        )?,
        queue: VecDeque::new(),
    });

    {
        let mut es_state = es.lock().expect("mutex poisoned");
        let index = es_state
            .record(initial, true)
            .expect("initial structure cannot collide in an empty set");
        info!("queued initial structure as ES #{}", index);
    }

    let mut rng = match cfg.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let path_counter = AtomicUsize::new(0);
    let descent_counter = AtomicUsize::new(0);

    let mut es_id = 0;
    loop {
        let next = { es.lock().expect("mutex poisoned").queue.pop_front() };
        let Some(equil) = next else { break };

        if let Err(e) = process_structure(
            molecule,
            &equil,
            es_id,
            cfg,
            out_dir,
            &es,
            &ts,
            &mut rng,
            &path_counter,
            &descent_counter,
        ) {
            warn!("ES #{} abandoned: {}", es_id, e);
        }
        es_id += 1;
    }

    let summary = RunSummary {
        equilibrium_structures: es.into_inner().expect("mutex poisoned").set.into_structures(),
        transition_states: ts.into_inner().expect("mutex poisoned").set.into_structures(),
    };
    info!(
        "workflow finished: {} equilibrium structures, {} transition states",
        summary.equilibrium_structures.len(),
        summary.transition_states.len()
    );
    Ok(summary)
}

/// Handles one dequeued equilibrium structure: minima directions, parallel
/// path walks, transition-state dedup and the descents off new ones.
#[allow(clippy::too_many_arguments)]
fn process_structure<E: Evaluator>(
    molecule: &E,
    equil: &DVector<f64>,
    es_id: usize,
    cfg: &SearchConfig,
    out_dir: &Path,
    es: &Mutex<Discoveries>,
    ts: &Mutex<Discoveries>,
    rng: &mut StdRng,
    path_counter: &AtomicUsize,
    descent_counter: &AtomicUsize,
) -> Result<(), EvalError> {
    let (value, grad, hess) = molecule.value_grad_hess(equil)?;
    info!(
        "processing ES #{}: value {:.10}, gradient norm {:.3e}, eigenvalues {:?}",
        es_id,
        value,
        grad.norm(),
        hessian_eigenvalues(&hess).as_slice()
    );

    let normalized = normalize_for_polar(molecule, equil)?;

    let mins_path = out_dir.join("mins_on_sphere");
    let mut persist = |directions: &[DVector<f64>]| {
        if let Err(e) = io::write_vector_list(&mins_path, directions) {
            warn!("failed to persist sphere directions: {}", e);
        }
    };
    let directions = minima_elimination(&normalized, cfg, rng, Some(&mut persist))?;
    info!("ES #{}: {} minima directions", es_id, directions.len());

    if let Err(e) = io::write_direction_dump(
        &out_dir.join(DIRECTIONS_DIR).join(es_id.to_string()),
        molecule.charges(),
        equil,
        &directions,
    ) {
        warn!("direction dump for ES #{} failed: {}", es_id, e);
    }

    let base = path_counter.fetch_add(directions.len(), Ordering::SeqCst);
    let trajectory_dir = out_dir.join(TRAJECTORY_DIR);

    directions.par_iter().enumerate().for_each(|(i, direction)| {
        let outcome = shs_path(
            molecule,
            &normalized,
            direction.clone(),
            base + i,
            cfg,
            &trajectory_dir,
        );
        let Some(candidate) = outcome.transition_state else {
            return;
        };

        let index = {
            let mut ts_state = ts.lock().expect("mutex poisoned");
            ts_state.record(&candidate, false)
        };
        let Some(index) = index else { return };
        info!("found new TS #{}", index);

        match two_way_descent(molecule, &candidate, cfg) {
            Ok((path, first, second)) => {
                let descent_id = descent_counter.fetch_add(1, Ordering::SeqCst);
                write_descent_path(
                    &out_dir.join(PATH_DIR).join(format!("{}.xyz", descent_id)),
                    molecule.charges(),
                    &path,
                    first.is_some(),
                    second.is_some(),
                );

                for side in [first, second].into_iter().flatten() {
                    let accepted = {
                        let mut es_state = es.lock().expect("mutex poisoned");
                        es_state.record(&side, true)
                    };
                    if let Some(index) = accepted {
                        info!("found new ES #{}", index);
                    }
                }
            }
            Err(e) => warn!("two-way descent from TS #{} abandoned: {}", index, e),
        }
    });

    Ok(())
}

/// Writes one two-way descent path file: side structures labeled as start
/// and end equilibrium structures around the transition state.
fn write_descent_path(
    path: &Path,
    charges: &[usize],
    structures: &[DVector<f64>],
    has_start: bool,
    has_end: bool,
) {
    let result = (|| -> std::io::Result<()> {
        let mut writer = StructureWriter::create(path, charges.to_vec())?;
        let count = structures.len();
        for (i, structure) in structures.iter().enumerate() {
            let label = if has_start && i == 0 {
                "start ES".to_string()
            } else if has_end && i + 1 == count {
                "end ES".to_string()
            } else {
                "TS".to_string()
            };
            writer.append(structure, &label)?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        warn!("descent path write failed: {}", e);
    }
}
