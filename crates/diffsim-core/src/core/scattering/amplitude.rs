use super::form_factor::{FormFactorError, FormFactorTable};
use crate::core::models::ensemble::Species;
use nalgebra::{Point3, Vector3};
use num_complex::Complex64;

/// Form factors pre-evaluated for one (scattering grid, species set) pair.
///
/// The form factor depends only on |q| and the species, so it is evaluated
/// once per (vector, distinct species) instead of per (vector, atom). Atoms
/// are mapped to a compact type index 0..num_types; the factor matrix is laid
/// out `[vector][type]`.
#[derive(Debug, Clone)]
pub struct SpeciesFactors {
    factors: Vec<f64>,
    atom_type: Vec<usize>,
    num_types: usize,
}

impl SpeciesFactors {
    pub fn build(
        q_vectors: &[Vector3<f64>],
        species: &[Species],
        table: &FormFactorTable,
    ) -> Result<Self, FormFactorError> {
        let mut distinct: Vec<Species> = species.to_vec();
        distinct.sort_unstable();
        distinct.dedup();

        let atom_type = species
            .iter()
            .map(|s| distinct.binary_search(s).expect("species taken from input"))
            .collect();

        let num_types = distinct.len();
        let mut factors = Vec::with_capacity(q_vectors.len() * num_types);
        for q_vec in q_vectors {
            let q = q_vec.norm();
            for &s in &distinct {
                factors.push(table.evaluate(s, q)?);
            }
        }

        Ok(Self {
            factors,
            atom_type,
            num_types,
        })
    }

    #[inline]
    pub fn num_types(&self) -> usize {
        self.num_types
    }

    /// Compact type index per atom, aligned with the species slice this was
    /// built from.
    #[inline]
    pub fn atom_types(&self) -> &[usize] {
        &self.atom_type
    }

    /// Form factor of atom `atom` at scattering vector `vector`.
    #[inline]
    pub fn factor(&self, vector: usize, atom: usize) -> f64 {
        self.factors[vector * self.num_types + self.atom_type[atom]]
    }

    /// Flat `[vector][type]` factor matrix.
    #[inline]
    pub fn factor_matrix(&self) -> &[f64] {
        &self.factors
    }
}

/// Complex scattering amplitudes of one placed structure, one per vector:
///
/// ```text
/// A(q) = sum_atoms f_atom(|q|) * exp(i q . r_atom)
/// ```
///
/// The phase uses the exact Euclidean dot product of the atomic position with
/// the scattering vector.
pub fn structure_amplitudes(
    q_vectors: &[Vector3<f64>],
    positions: &[Point3<f64>],
    factors: &SpeciesFactors,
) -> Vec<Complex64> {
    let mut amplitudes = Vec::with_capacity(q_vectors.len());
    for (iq, q_vec) in q_vectors.iter().enumerate() {
        let mut amp = Complex64::new(0.0, 0.0);
        for (ia, position) in positions.iter().enumerate() {
            let phase = q_vec.dot(&position.coords);
            amp += Complex64::from_polar(factors.factor(iq, ia), phase);
        }
        amplitudes.push(amp);
    }
    amplitudes
}
