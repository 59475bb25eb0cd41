//! The intensity engine: one algorithm, two backends.
//!
//! [`IntensityEngine`] specifies the rotation-averaged scattering intensity
//! computation once; [`cpu::CpuEngine`] is the straight-line reference
//! implementation and [`cuda::CudaEngine`] (feature `cuda`) the massively
//! parallel one. Both must produce equivalent results within floating-point
//! tolerance, and both run the same validation and post-condition checks.

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;

use crate::core::models::ensemble::Species;
use crate::core::scattering::form_factor::FormFactorTable;
use crate::engine::error::EngineError;
use nalgebra::{Point3, Vector3};
use rand::Rng;

/// A batch of rotation draws, each a triplet of independent uniforms in
/// [0, 1) feeding the quaternion construction in
/// [`crate::core::utils::rotation`].
///
/// Engines report a preferred work-group granularity; batches are padded to a
/// multiple of it with repeated draws before dispatch (averaging over the
/// padded batch keeps the estimator consistent, it only reweights the
/// repeated draws).
#[derive(Debug, Clone, PartialEq)]
pub struct RotationBatch {
    draws: Vec<[f64; 3]>,
}

impl RotationBatch {
    /// Samples `len` independent rotation draws from `rng`.
    pub fn sample(len: usize, rng: &mut impl Rng) -> Self {
        let draws = (0..len)
            .map(|_| [rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>()])
            .collect();
        Self { draws }
    }

    /// Wraps explicit uniform triplets (deterministic tests, replay).
    pub fn from_uniforms(draws: Vec<[f64; 3]>) -> Self {
        Self { draws }
    }

    /// A batch of `len` identity rotations (the zero triplet maps to the
    /// identity quaternion).
    pub fn identity(len: usize) -> Self {
        Self {
            draws: vec![[0.0; 3]; len.max(1)],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    #[inline]
    pub fn draws(&self) -> &[[f64; 3]] {
        &self.draws
    }

    /// Pads the batch up to the next multiple of `granularity` by cycling
    /// through the existing draws.
    pub fn padded_to(mut self, granularity: usize) -> Self {
        if granularity > 1 && !self.draws.is_empty() {
            let remainder = self.draws.len() % granularity;
            if remainder != 0 {
                for i in 0..(granularity - remainder) {
                    self.draws.push(self.draws[i % (self.draws.len())]);
                }
            }
        }
        self
    }
}

/// One scattering computation, borrowing its inputs.
///
/// Validation is shared by all backends and runs before any expensive work or
/// device allocation: paired arrays must agree in length, the grid and
/// ensemble must be non-empty, and every species must resolve in the
/// form-factor table.
#[derive(Debug, Clone, Copy)]
pub struct ScatterProblem<'a> {
    pub q_vectors: &'a [Vector3<f64>],
    pub positions: &'a [Point3<f64>],
    pub species: &'a [Species],
    pub form_factors: &'a FormFactorTable,
}

impl<'a> ScatterProblem<'a> {
    pub fn new(
        q_vectors: &'a [Vector3<f64>],
        positions: &'a [Point3<f64>],
        species: &'a [Species],
        form_factors: &'a FormFactorTable,
    ) -> Self {
        Self {
            q_vectors,
            positions,
            species,
            form_factors,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.q_vectors.is_empty() {
            return Err(EngineError::EmptyGrid);
        }
        if self.positions.len() != self.species.len() {
            return Err(EngineError::MismatchedLengths {
                left_name: "positions",
                left: self.positions.len(),
                right_name: "species",
                right: self.species.len(),
            });
        }
        if self.positions.is_empty() {
            return Err(crate::core::models::ensemble::ModelError::Empty.into());
        }
        for &s in self.species {
            self.form_factors.lookup(s)?;
        }
        Ok(())
    }
}

/// Computes rotation-averaged scattering intensities:
///
/// ```text
/// I(q) = (1/|batch|) * sum_r | sum_atoms f(|q|) exp(i q . (r . pos)) |^2
/// ```
///
/// i.e. the incoherent average over the rotation batch, approximating a
/// randomly oriented ensemble. Output is flat over the scattering vectors,
/// one intensity per vector, and is checked to be finite and non-negative
/// before it is returned (violations surface as
/// [`EngineError::NumericalFault`]).
pub trait IntensityEngine {
    /// The work-group granularity this engine prefers; batch lengths must be
    /// a multiple of it.
    fn preferred_granularity(&self) -> usize;

    fn compute_intensities(
        &self,
        problem: &ScatterProblem<'_>,
        batch: &RotationBatch,
    ) -> Result<Vec<f64>, EngineError>;
}

/// Batch precondition shared by every backend: non-empty, and an exact
/// multiple of the granularity.
pub(crate) fn check_batch(batch: &RotationBatch, granularity: usize) -> Result<(), EngineError> {
    if batch.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    if batch.len() % granularity != 0 {
        return Err(EngineError::BatchGranularity {
            len: batch.len(),
            granularity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sampled_batch_has_requested_length_and_unit_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let batch = RotationBatch::sample(64, &mut rng);
        assert_eq!(batch.len(), 64);
        for draw in batch.draws() {
            for &u in draw {
                assert!((0.0..1.0).contains(&u));
            }
        }
    }

    #[test]
    fn padding_rounds_up_to_granularity_multiple() {
        let mut rng = StdRng::seed_from_u64(2);
        let batch = RotationBatch::sample(100, &mut rng).padded_to(512);
        assert_eq!(batch.len(), 512);

        let batch = RotationBatch::sample(512, &mut rng).padded_to(512);
        assert_eq!(batch.len(), 512);

        let batch = RotationBatch::sample(513, &mut rng).padded_to(512);
        assert_eq!(batch.len(), 1024);
    }

    #[test]
    fn padding_repeats_existing_draws() {
        let batch = RotationBatch::from_uniforms(vec![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]);
        let padded = batch.clone().padded_to(4);
        assert_eq!(padded.draws()[2], batch.draws()[0]);
        assert_eq!(padded.draws()[3], batch.draws()[1]);
    }

    #[test]
    fn granularity_one_passes_any_length() {
        let batch = RotationBatch::identity(7);
        assert!(check_batch(&batch, 1).is_ok());
    }

    #[test]
    fn non_multiple_batch_is_rejected() {
        let batch = RotationBatch::identity(100);
        let err = check_batch(&batch, 512).unwrap_err();
        assert!(matches!(
            err,
            EngineError::BatchGranularity {
                len: 100,
                granularity: 512
            }
        ));
    }
}
