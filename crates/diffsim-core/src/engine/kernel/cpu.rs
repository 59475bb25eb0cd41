use super::{IntensityEngine, RotationBatch, ScatterProblem, check_batch};
use crate::core::scattering::amplitude::{SpeciesFactors, structure_amplitudes};
use crate::core::utils::rotation::{rotate_points, rotation_from_uniforms};
use crate::engine::error::{EngineError, check_intensities};
use tracing::instrument;

/// Straight-line reference implementation of [`IntensityEngine`].
///
/// Double-precision throughout; no concurrency of its own (shots parallelize
/// above it). Serves as the conformance reference for accelerated backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuEngine;

impl CpuEngine {
    pub fn new() -> Self {
        Self
    }
}

impl IntensityEngine for CpuEngine {
    #[inline]
    fn preferred_granularity(&self) -> usize {
        1
    }

    #[instrument(level = "debug", skip_all, fields(num_vectors = problem.q_vectors.len(), num_atoms = problem.positions.len(), batch = batch.len()))]
    fn compute_intensities(
        &self,
        problem: &ScatterProblem<'_>,
        batch: &RotationBatch,
    ) -> Result<Vec<f64>, EngineError> {
        problem.validate()?;
        check_batch(batch, self.preferred_granularity())?;

        let factors = SpeciesFactors::build(problem.q_vectors, problem.species, problem.form_factors)?;

        let mut intensities = vec![0.0; problem.q_vectors.len()];
        for draw in batch.draws() {
            let rotation = rotation_from_uniforms(draw[0], draw[1], draw[2]);
            let rotated = rotate_points(&rotation, problem.positions);
            let amplitudes = structure_amplitudes(problem.q_vectors, &rotated, &factors);
            for (acc, amp) in intensities.iter_mut().zip(&amplitudes) {
                *acc += amp.norm_sqr();
            }
        }

        let norm = batch.len() as f64;
        for v in &mut intensities {
            *v /= norm;
        }

        check_intensities(&intensities)?;
        Ok(intensities)
    }
}
