//! OpenSHS - Scaled Hypersphere Search for Potential-Energy Surfaces
//!
//! OpenSHS explores the potential-energy surface of a molecule to locate
//! equilibrium structures (local minima) and the transition states
//! (first-order saddle points) connecting them, driving an external
//! quantum-chemistry evaluator for every energy query.
//!
//! # Method
//!
//! Around a known equilibrium structure, the uphill valleys of the surface
//! show up as *minima of the energy restricted to a small sphere* centered on
//! the structure. The search therefore proceeds in three stages:
//!
//! 1. **Minima elimination**: enumerate distinct sphere minima by repeated
//!    constrained optimization, adding a repulsion supplement over every
//!    direction already found so new searches are pushed elsewhere.
//! 2. **Path walking**: follow each direction outward shell by shell,
//!    re-converging the sphere minimum at every radius and probing
//!    periodically for a transition state with Newton refinement (accepted
//!    only with at least one negative Hessian eigenvalue).
//! 3. **Two-way descent**: from each new transition state, displace along
//!    the reaction coordinate in both signs and relax, yielding the
//!    equilibrium structures it connects; these are queued and explored in
//!    turn, breadth-first, until nothing new appears.
//!
//! Discovered structures are deduplicated by a permutation-invariant
//! fingerprint (the sorted pairwise inter-atom distances), so the same
//! physical structure reached along different routes is stored once.
//!
//! # Architecture
//!
//! The building block is the [`function::DifferentiableFunction`] trait:
//! value, gradient and Hessian at a point. Wrappers compose freely around
//! it (re-centering and dimensionality reduction with
//! [`transform::AffineTransform`], spherical constraint with [`polar::Polar`],
//! repulsion supplements with [`repulsion::CosineCubeSupplement`]), with
//! exact analytic derivative pass-through at every layer. Optimizers
//! ([`optimizer`], [`sphere`]) consume any such function; the
//! [`workflow`] ties them into the breadth-first search.
//!
//! # Modules
//!
//! - [`geometry`] - structures, unit conversion, distance fingerprints
//! - [`linalg`] - rotations, eigendecomposition helpers
//! - [`function`] - the differentiable-function trait and basic combinators
//! - [`transform`] - affine pullback, reduced (zero-mode-free) coordinates
//! - [`polar`] - hyperspherical reparametrization
//! - [`repulsion`] - cubic-cosine repulsion supplement
//! - [`optimizer`] - step rules, stop criteria, the first-order driver
//! - [`sphere`] - sphere-constrained search, minima elimination
//! - [`evaluator`] - the external evaluator capability
//! - [`structures`] - deduplicated structure sets
//! - [`workflow`] - path walking, TS refinement, the BFS driver
//! - [`io`] - XYZ blocks, vector lists, output provisioning
//! - [`config`] - search parameters and INI loading

pub mod config;
pub mod evaluator;
pub mod function;
pub mod geometry;
pub mod io;
pub mod linalg;
pub mod optimizer;
pub mod polar;
pub mod repulsion;
pub mod sphere;
pub mod structures;
pub mod transform;
pub mod workflow;

pub use config::SearchConfig;
pub use evaluator::{EvalError, Evaluator};
pub use function::DifferentiableFunction;
