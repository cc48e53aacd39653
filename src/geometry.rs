//! Core molecular structure data types.
//!
//! This module provides the fundamental data types for representing molecular
//! structures during a hypersphere search:
//!
//! - [`Structure`]: nuclear charges plus flat Cartesian coordinates
//! - [`to_distance_space`]: the permutation-invariant fingerprint used to
//!   compare structures independent of atom labeling and orientation
//!
//! All coordinates are in Bohrs, energies in Hartree and gradients in
//! Hartree/Bohr.

use nalgebra::DVector;

/// Unit conversion constant: Bohr to Angstrom.
pub const BOHR_TO_ANGSTROM: f64 = 0.529177210903;
/// Unit conversion constant: Angstrom to Bohr.
pub const ANGSTROM_TO_BOHR: f64 = 1.0 / BOHR_TO_ANGSTROM;

/// Convert coordinates from Angstroms to Bohrs.
pub fn angstrom_to_bohr(coords: &DVector<f64>) -> DVector<f64> {
    coords * ANGSTROM_TO_BOHR
}

/// Convert coordinates from Bohrs to Angstroms.
pub fn bohr_to_angstrom(coords: &DVector<f64>) -> DVector<f64> {
    coords * BOHR_TO_ANGSTROM
}

/// Element symbols indexed by atomic number − 1.
const SYMBOLS: [&str; 36] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr",
];

/// Returns the element symbol for a nuclear charge, or `"X"` for charges
/// outside the supported range.
pub fn symbol_for_charge(charge: usize) -> &'static str {
    if charge >= 1 && charge <= SYMBOLS.len() {
        SYMBOLS[charge - 1]
    } else {
        "X"
    }
}

/// Returns the nuclear charge for an element symbol, if known.
pub fn charge_for_symbol(symbol: &str) -> Option<usize> {
    SYMBOLS
        .iter()
        .position(|s| s.eq_ignore_ascii_case(symbol))
        .map(|i| i + 1)
}

/// A molecular structure: nuclear charges and flattened Cartesian coordinates.
///
/// Coordinates are stored as a single `DVector<f64>` in the order
/// `[x1, y1, z1, x2, y2, z2, ...]`, which enables direct use with nalgebra for
/// the matrix operations required throughout the search.
///
/// # Examples
///
/// ```
/// use openshs::geometry::Structure;
///
/// // A water molecule: O, H, H
/// let water = Structure::new(
///     vec![8, 1, 1],
///     vec![0.0, 0.0, 0.0, 1.43, 1.11, 0.0, -1.43, 1.11, 0.0],
/// );
/// assert_eq!(water.num_atoms(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Structure {
    /// Nuclear charge of each atom, in order.
    pub charges: Vec<usize>,
    /// Flattened Cartesian coordinates, `3 * charges.len()` entries.
    pub coords: DVector<f64>,
}

impl Structure {
    /// Create a new `Structure` from a charge list and a coordinate vector.
    ///
    /// # Panics
    ///
    /// Panics if `coords.len() != charges.len() * 3`.
    pub fn new(charges: Vec<usize>, coords: Vec<f64>) -> Self {
        assert_eq!(coords.len(), charges.len() * 3);
        Self {
            charges,
            coords: DVector::from_vec(coords),
        }
    }

    /// Number of atoms in the structure.
    pub fn num_atoms(&self) -> usize {
        self.charges.len()
    }

    /// Cartesian coordinates of one atom as `[x, y, z]`.
    pub fn atom_coords(&self, atom_idx: usize) -> [f64; 3] {
        let i = atom_idx * 3;
        [self.coords[i], self.coords[i + 1], self.coords[i + 2]]
    }
}

/// Maps a flat coordinate vector into "distance space": the sorted list of all
/// pairwise inter-atom distances.
///
/// Sorting makes the fingerprint invariant under atom permutation, and
/// distances themselves are invariant under rigid rotation and translation,
/// so two renderings of the same physical structure map to (nearly) the same
/// vector. The result has `n * (n - 1) / 2` entries for `n` atoms.
///
/// # Panics
///
/// Panics if the coordinate count is not a multiple of 3.
pub fn to_distance_space(coords: &DVector<f64>) -> DVector<f64> {
    assert_eq!(coords.len() % 3, 0, "coordinate count must be 3 * n_atoms");
    let n = coords.len() / 3;

    let mut dists = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = coords[i * 3] - coords[j * 3];
            let dy = coords[i * 3 + 1] - coords[j * 3 + 1];
            let dz = coords[i * 3 + 2] - coords[j * 3 + 2];
            dists.push((dx * dx + dy * dy + dz * dz).sqrt());
        }
    }
    dists.sort_by(|a, b| a.partial_cmp(b).expect("distances are finite"));

    DVector::from_vec(dists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_round_trip() {
        assert_eq!(symbol_for_charge(1), "H");
        assert_eq!(symbol_for_charge(6), "C");
        assert_eq!(charge_for_symbol("O"), Some(8));
        assert_eq!(charge_for_symbol("zz"), None);
        assert_eq!(symbol_for_charge(120), "X");
    }

    #[test]
    fn fingerprint_is_permutation_invariant() {
        let a = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
        // Same three atoms listed in a different order.
        let b = DVector::from_vec(vec![0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

        let fa = to_distance_space(&a);
        let fb = to_distance_space(&b);
        assert!((fa - fb).norm() < 1e-12);
    }

    #[test]
    fn fingerprint_is_rotation_invariant() {
        let a = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0]);
        // Rotate 90 degrees about z: (x, y) -> (-y, x).
        let b = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -2.0, 0.0, 0.0]);

        let fa = to_distance_space(&a);
        let fb = to_distance_space(&b);
        assert!((fa - fb).norm() < 1e-12);
    }

    #[test]
    fn distinct_structures_have_distinct_fingerprints() {
        let a = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let b = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.5, 0.0, 0.0]);

        let d = (to_distance_space(&a) - to_distance_space(&b)).norm();
        assert!(d > 0.4);
    }
}
