use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use thiserror::Error;

/// Atomic species identified by atomic number (Z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Species(pub u32);

impl Species {
    pub const HYDROGEN: Species = Species(1);
    pub const CARBON: Species = Species(6);
    pub const NITROGEN: Species = Species(7);
    pub const OXYGEN: Species = Species(8);
    pub const SULFUR: Species = Species(16);

    #[inline]
    pub fn atomic_number(&self) -> u32 {
        self.0
    }
}

/// Unit of the Cartesian coordinates supplied by the caller.
///
/// All internal computation is carried out in angstroms (matching the
/// inverse-angstrom momentum-transfer grid); conversion happens exactly once,
/// when a [`MolecularTemplate`] is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Angstrom,
    Nanometer,
}

impl LengthUnit {
    #[inline]
    pub(crate) fn to_angstrom_factor(self) -> f64 {
        match self {
            LengthUnit::Angstrom => 1.0,
            LengthUnit::Nanometer => 10.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Position count ({positions}) does not match species count ({species})")]
    MismatchedLengths { positions: usize, species: usize },

    #[error("Ensemble contains no atoms")]
    Empty,

    #[error("Template has no conformations")]
    NoConformations,

    #[error("Conformation {index} has {found} atoms, expected {expected} as in the first conformation")]
    InconsistentConformations {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Conformation {index} disagrees with the first conformation's species list")]
    InconsistentSpecies { index: usize },

    #[error("Weight count ({weights}) does not match conformation count ({conformations})")]
    MismatchedWeights {
        weights: usize,
        conformations: usize,
    },

    #[error("Conformation weights must contain at least one positive entry")]
    DegenerateWeights,

    #[error("q = {q} 1/A lies outside the Ewald sphere for k = {k} 1/A (q must be <= 2k)")]
    QOutsideEwaldSphere { q: f64, k: f64 },

    #[error("Beam energy must be strictly positive, got {0} keV")]
    NonPositiveEnergy(f64),
}

/// An ordered set of atomic positions paired one-to-one with species.
///
/// Positions are stored in angstroms. The pairing invariant (one species per
/// position) is enforced at construction and preserved by every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicEnsemble {
    positions: Vec<Point3<f64>>,
    species: Vec<Species>,
}

impl AtomicEnsemble {
    pub fn new(positions: Vec<Point3<f64>>, species: Vec<Species>) -> Result<Self, ModelError> {
        if positions.len() != species.len() {
            return Err(ModelError::MismatchedLengths {
                positions: positions.len(),
                species: species.len(),
            });
        }
        if positions.is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(Self { positions, species })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    #[inline]
    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn centroid(&self) -> Point3<f64> {
        let sum: Vector3<f64> = self.positions.iter().map(|p| p.coords).sum();
        Point3::from(sum / self.positions.len() as f64)
    }

    /// Distance from the centroid to the farthest atom.
    pub fn max_radius(&self) -> f64 {
        let centroid = self.centroid();
        self.positions
            .iter()
            .map(|p| (p - centroid).norm())
            .fold(0.0, f64::max)
    }

    pub fn translate(&mut self, offset: &Vector3<f64>) {
        for p in &mut self.positions {
            *p += offset;
        }
    }

    /// Moves the centroid to the origin.
    pub fn center(&mut self) {
        let offset = -self.centroid().coords;
        self.translate(&offset);
    }

    /// Returns a copy with every position rigidly rotated about the origin.
    pub fn rotated(&self, rotation: &UnitQuaternion<f64>) -> Self {
        Self {
            positions: self.positions.iter().map(|p| rotation * p).collect(),
            species: self.species.clone(),
        }
    }

    /// Keeps only the atoms at `indices`, in their original order.
    ///
    /// `indices` must be sorted and in range; this is an internal helper used
    /// by vacancy subsampling.
    pub(crate) fn subset(&self, indices: &[usize]) -> Self {
        Self {
            positions: indices.iter().map(|&i| self.positions[i]).collect(),
            species: indices.iter().map(|&i| self.species[i]).collect(),
        }
    }

    /// Appends all atoms of `other` to this ensemble.
    pub fn merge(&mut self, other: &AtomicEnsemble) {
        self.positions.extend_from_slice(&other.positions);
        self.species.extend_from_slice(&other.species);
    }

    fn scaled(mut self, factor: f64) -> Self {
        if factor != 1.0 {
            for p in &mut self.positions {
                p.coords *= factor;
            }
        }
        self
    }
}

/// A molecular template: one or more conformations of the same molecule,
/// optionally weighted, from which replicas are stamped out during ensemble
/// assembly.
///
/// Conformations are centered at their centroid on construction, and all
/// coordinates are converted to angstroms. The template is immutable after
/// construction; assembly only ever reads from it.
#[derive(Debug, Clone)]
pub struct MolecularTemplate {
    conformations: Vec<AtomicEnsemble>,
    weights: Vec<f64>,
    max_radius: f64,
}

impl MolecularTemplate {
    /// Builds a template from equally weighted conformations.
    pub fn new(conformations: Vec<AtomicEnsemble>, unit: LengthUnit) -> Result<Self, ModelError> {
        let n = conformations.len();
        Self::with_weights(conformations, vec![1.0; n], unit)
    }

    /// Builds a single-conformation template.
    pub fn single(conformation: AtomicEnsemble, unit: LengthUnit) -> Result<Self, ModelError> {
        Self::new(vec![conformation], unit)
    }

    /// Builds a template whose conformations are drawn with the given
    /// statistical weights (e.g. Boltzmann weights). Weights need not be
    /// normalized but must contain at least one positive entry.
    pub fn with_weights(
        conformations: Vec<AtomicEnsemble>,
        weights: Vec<f64>,
        unit: LengthUnit,
    ) -> Result<Self, ModelError> {
        if conformations.is_empty() {
            return Err(ModelError::NoConformations);
        }
        if weights.len() != conformations.len() {
            return Err(ModelError::MismatchedWeights {
                weights: weights.len(),
                conformations: conformations.len(),
            });
        }
        if !weights.iter().any(|&w| w > 0.0) {
            return Err(ModelError::DegenerateWeights);
        }

        let expected = conformations[0].len();
        for (index, conf) in conformations.iter().enumerate().skip(1) {
            if conf.len() != expected {
                return Err(ModelError::InconsistentConformations {
                    index,
                    expected,
                    found: conf.len(),
                });
            }
            if conf.species() != conformations[0].species() {
                return Err(ModelError::InconsistentSpecies { index });
            }
        }

        let factor = unit.to_angstrom_factor();
        let conformations: Vec<AtomicEnsemble> = conformations
            .into_iter()
            .map(|c| {
                let mut c = c.scaled(factor);
                c.center();
                c
            })
            .collect();

        let max_radius = conformations
            .iter()
            .map(|c| c.max_radius())
            .fold(0.0, f64::max);

        Ok(Self {
            conformations,
            weights,
            max_radius,
        })
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.conformations[0].len()
    }

    #[inline]
    pub fn num_conformations(&self) -> usize {
        self.conformations.len()
    }

    /// Radius of the bounding sphere around the centroid, over all
    /// conformations, in angstroms.
    #[inline]
    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    #[inline]
    pub fn conformation(&self, index: usize) -> &AtomicEnsemble {
        &self.conformations[index]
    }

    /// Draws a conformation according to the template weights.
    pub fn draw_conformation(&self, rng: &mut impl Rng) -> &AtomicEnsemble {
        if self.conformations.len() == 1 {
            return &self.conformations[0];
        }
        // Weights were checked at construction, so the distribution is valid.
        let dist = WeightedIndex::new(&self.weights)
            .expect("template weights validated at construction");
        &self.conformations[dist.sample(rng)]
    }
}
