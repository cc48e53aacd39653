//! Deduplicated collections of discovered structures.

use crate::geometry::to_distance_space;
use log::debug;
use nalgebra::DVector;

/// A growing set of structures keyed by their distance-space fingerprint.
///
/// `add` rejects a candidate whose fingerprint lies within `eps` of an
/// existing member, so each physically distinct structure is stored exactly
/// once regardless of atom ordering or orientation. The set grows
/// monotonically and never shrinks; one instance lives per structure kind
/// (equilibrium, transition state) for a whole run.
///
/// # Examples
///
/// ```
/// use nalgebra::DVector;
/// use openshs::structures::StructureSet;
///
/// let mut set = StructureSet::new(1e-3);
/// let linear = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
///
/// assert_eq!(set.add(&linear), Some(1));
/// // The same structure again is rejected.
/// assert_eq!(set.add(&linear), None);
/// ```
pub struct StructureSet {
    eps: f64,
    structures: Vec<DVector<f64>>,
    fingerprints: Vec<DVector<f64>>,
}

impl StructureSet {
    /// New empty set with the given fingerprint tolerance.
    pub fn new(eps: f64) -> Self {
        Self {
            eps,
            structures: Vec::new(),
            fingerprints: Vec::new(),
        }
    }

    /// Inserts a structure unless a member with a matching fingerprint
    /// already exists.
    ///
    /// Returns the 1-based acceptance index of the new member, or `None` for
    /// a duplicate. Indices are stable: members are never removed.
    pub fn add(&mut self, structure: &DVector<f64>) -> Option<usize> {
        let fingerprint = to_distance_space(structure);

        for (i, known) in self.fingerprints.iter().enumerate() {
            let dist = (known - &fingerprint).norm();
            if dist < self.eps {
                debug!(
                    "structure duplicates member #{} (fingerprint distance {:.3e})",
                    i + 1,
                    dist
                );
                return None;
            }
        }

        self.structures.push(structure.clone());
        self.fingerprints.push(fingerprint);
        Some(self.structures.len())
    }

    /// Number of accepted structures.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// True when nothing has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Accepted structures in acceptance order.
    pub fn structures(&self) -> &[DVector<f64>] {
        &self.structures
    }

    /// Consumes the set, returning the accepted structures.
    pub fn into_structures(self) -> Vec<DVector<f64>> {
        self.structures
    }
}
