//! Configuration structures for a hypersphere search.
//!
//! This module defines the parameters controlling every stage of the search:
//!
//! - [`Thresholds`]: convergence criteria for the different optimizers
//! - [`SearchConfig`]: radii, iteration caps and acceptance constants
//!
//! Defaults carry the empirically chosen constants of the method (the 0.9
//! path-acceptance cosine, the 0.975 duplicate-direction cosine, the
//! fingerprint tolerance) as configuration rather than derivation.
//! A configuration can be created programmatically or loaded from an INI
//! file, with the local file `./openshs.cfg` taking precedence over built-in
//! defaults.
//!
//! # Configuration File Format
//!
//! ```ini
//! [search]
//! sphere_radius = 0.05
//! delta_r = 0.04
//! max_path_steps = 600
//! evaluator_command = pes_eval
//!
//! [thresholds]
//! ts_grad = 1e-4
//! ts_step = 1e-4
//! ```

use configparser::ini::Ini;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error.
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// A value was present but not parseable.
    #[error("invalid configuration value for {0}")]
    InvalidValue(String),
}

/// Convergence thresholds for the optimizers used across the search.
///
/// Sphere-search thresholds are specified relative to the sphere radius and
/// resolved at use; the rest are absolute norms in the reduced frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Gradient norm threshold for transition-state Newton refinement.
    pub ts_grad: f64,
    /// Step norm threshold for transition-state Newton refinement.
    pub ts_step: f64,
    /// Gradient norm threshold for re-convergence along a walked path.
    pub path_grad: f64,
    /// Step norm threshold for re-convergence along a walked path.
    pub path_step: f64,
    /// Sphere-search thresholds as a fraction of the sphere radius.
    pub sphere_relative: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ts_grad: 1e-4,
            ts_step: 1e-4,
            path_grad: 1e-8,
            path_step: 1e-5,
            sphere_relative: 1e-4,
        }
    }
}

/// Complete configuration for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Convergence thresholds.
    pub thresholds: Thresholds,
    /// Radius of the sphere used for minima elimination around a structure.
    pub sphere_radius: f64,
    /// Radial growth per accepted path step.
    pub delta_r: f64,
    /// Retry budget for one path step; each retry halves the radial growth.
    pub conv_iter_limit: usize,
    /// Hard cap on accepted steps along one path.
    pub max_path_steps: usize,
    /// A transition-state probe runs every this many accepted path steps.
    pub ts_probe_interval: usize,
    /// Minimum cosine between the predicted and re-converged direction for a
    /// path step to count as converged.
    pub path_accept_cosine: f64,
    /// Cosine above which two sphere directions are considered duplicates.
    pub duplicate_cosine: f64,
    /// Distance-space tolerance for structure deduplication.
    pub fingerprint_eps: f64,
    /// Fraction of the reaction-coordinate eigenvector used to displace off
    /// a transition state before the two-way descent.
    pub displacement_factor: f64,
    /// Iteration cap for one momentum sphere search.
    pub sphere_iter_limit: usize,
    /// Iteration cap for Newton-on-sphere convergence during minima
    /// elimination.
    pub newton_iter_limit: usize,
    /// Iteration cap for Newton-on-sphere re-convergence along a path.
    pub path_newton_iters: usize,
    /// Iteration cap for transition-state Newton refinement.
    pub ts_newton_iters: usize,
    /// Consecutive unproductive random seeds before minima elimination gives
    /// up on a structure.
    pub max_random_failures: usize,
    /// Seed for the random direction generator; `None` draws from entropy.
    pub random_seed: Option<u64>,
    /// Command for the external evaluator program.
    pub evaluator_command: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            sphere_radius: 0.05,
            delta_r: 0.04,
            conv_iter_limit: 10,
            max_path_steps: 600,
            ts_probe_interval: 7,
            path_accept_cosine: 0.9,
            duplicate_cosine: 0.975,
            fingerprint_eps: 1e-3,
            displacement_factor: 0.5,
            sphere_iter_limit: 50,
            newton_iter_limit: 10,
            path_newton_iters: 30,
            ts_newton_iters: 10,
            max_random_failures: 10,
            random_seed: None,
            evaluator_command: "pes_eval".to_string(),
        }
    }
}

impl SearchConfig {
    /// Loads configuration with precedence: `./openshs.cfg` if present,
    /// otherwise built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let local = Path::new("./openshs.cfg");
        if local.exists() {
            info!("configuration loaded from {}", local.display());
            Self::load_from_ini(local)
        } else {
            debug!("no local configuration, using defaults");
            Ok(Self::default())
        }
    }

    /// Loads configuration from an INI file, filling unspecified keys from
    /// the defaults.
    pub fn load_from_ini(path: &Path) -> Result<Self, ConfigError> {
        let mut ini = Ini::new();
        ini.load(path).map_err(ConfigError::IniParse)?;

        let mut config = Self::default();

        macro_rules! float_key {
            ($field:expr, $section:expr, $key:expr) => {
                match ini.getfloat($section, $key) {
                    Ok(Some(v)) => $field = v,
                    Ok(None) => {}
                    Err(_) => return Err(ConfigError::InvalidValue(format!("{}.{}", $section, $key))),
                }
            };
        }
        macro_rules! uint_key {
            ($field:expr, $section:expr, $key:expr) => {
                match ini.getuint($section, $key) {
                    Ok(Some(v)) => $field = v as usize,
                    Ok(None) => {}
                    Err(_) => return Err(ConfigError::InvalidValue(format!("{}.{}", $section, $key))),
                }
            };
        }

        float_key!(config.sphere_radius, "search", "sphere_radius");
        float_key!(config.delta_r, "search", "delta_r");
        uint_key!(config.conv_iter_limit, "search", "conv_iter_limit");
        uint_key!(config.max_path_steps, "search", "max_path_steps");
        uint_key!(config.ts_probe_interval, "search", "ts_probe_interval");
        float_key!(config.path_accept_cosine, "search", "path_accept_cosine");
        float_key!(config.duplicate_cosine, "search", "duplicate_cosine");
        float_key!(config.fingerprint_eps, "search", "fingerprint_eps");
        float_key!(config.displacement_factor, "search", "displacement_factor");
        uint_key!(config.sphere_iter_limit, "search", "sphere_iter_limit");
        uint_key!(config.newton_iter_limit, "search", "newton_iter_limit");
        uint_key!(config.path_newton_iters, "search", "path_newton_iters");
        uint_key!(config.ts_newton_iters, "search", "ts_newton_iters");
        uint_key!(config.max_random_failures, "search", "max_random_failures");

        if let Ok(Some(seed)) = ini.getuint("search", "random_seed") {
            config.random_seed = Some(seed);
        }
        if let Some(command) = ini.get("search", "evaluator_command") {
            config.evaluator_command = command;
        }

        float_key!(config.thresholds.ts_grad, "thresholds", "ts_grad");
        float_key!(config.thresholds.ts_step, "thresholds", "ts_step");
        float_key!(config.thresholds.path_grad, "thresholds", "path_grad");
        float_key!(config.thresholds.path_step, "thresholds", "path_step");
        float_key!(config.thresholds.sphere_relative, "thresholds", "sphere_relative");

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_carry_the_empirical_constants() {
        let config = SearchConfig::default();
        assert!((config.path_accept_cosine - 0.9).abs() < 1e-12);
        assert!((config.duplicate_cosine - 0.975).abs() < 1e-12);
        assert!((config.fingerprint_eps - 1e-3).abs() < 1e-15);
        assert_eq!(config.ts_probe_interval, 7);
    }

    #[test]
    fn ini_overrides_selected_keys() {
        let path = std::env::temp_dir().join("openshs_test_config.cfg");
        fs::write(
            &path,
            "[search]\nsphere_radius = 0.1\nmax_path_steps = 42\nevaluator_command = mock_eval\n\n[thresholds]\nts_grad = 5e-5\n",
        )
        .unwrap();

        let config = SearchConfig::load_from_ini(&path).unwrap();
        assert!((config.sphere_radius - 0.1).abs() < 1e-12);
        assert_eq!(config.max_path_steps, 42);
        assert_eq!(config.evaluator_command, "mock_eval");
        assert!((config.thresholds.ts_grad - 5e-5).abs() < 1e-18);
        // Untouched keys keep their defaults.
        assert!((config.delta_r - 0.04).abs() < 1e-12);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn malformed_value_is_rejected() {
        let path = std::env::temp_dir().join("openshs_test_bad_config.cfg");
        fs::write(&path, "[search]\nsphere_radius = not_a_number\n").unwrap();

        assert!(SearchConfig::load_from_ini(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}
