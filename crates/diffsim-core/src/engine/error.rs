use crate::core::models::ensemble::ModelError;
use crate::core::scattering::form_factor::FormFactorError;
use crate::engine::config::ConfigError;
use thiserror::Error;

/// Errors surfaced by the intensity kernels, the ensemble assembler, and the
/// simulation workflow.
///
/// None of these are recoverable by retry-with-backoff: precondition
/// violations are reported before any expensive work or device allocation
/// begins, and numerical faults signal a bug or degenerate input rather than
/// a transient condition. Callers may retry an entire shot with different
/// random draws if they wish; the engine performs no internal retries beyond
/// the fixed placement attempt cap.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    FormFactor(#[from] FormFactorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Paired arrays differ in length: {left_name} has {left}, {right_name} has {right}")]
    MismatchedLengths {
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    },

    #[error("Scattering grid expanded to zero vectors")]
    EmptyGrid,

    #[error("Rotation batch is empty")]
    EmptyBatch,

    #[error(
        "Rotation batch length {len} is not a multiple of the engine work-group granularity {granularity}"
    )]
    BatchGranularity { len: usize, granularity: usize },

    #[error("Number density must be strictly positive, got {0} uM")]
    NonPositiveDensity(f64),

    #[error(
        "Density {density_um} uM yields a box side of {box_side:.3} A, below the minimum \
         {min_side:.3} A needed to hold two non-overlapping copies"
    )]
    DensityTooHigh {
        density_um: f64,
        box_side: f64,
        min_side: f64,
    },

    #[error(
        "Failed to place replica {replica} after {attempts} attempts (box side {box_side:.3} A, \
         density {density_um} uM); density too high for random packing"
    )]
    PackingFailure {
        replica: usize,
        attempts: usize,
        box_side: f64,
        density_um: f64,
    },

    #[error("Vacancy count {count} is outside [0, {num_atoms}]")]
    InvalidVacancyCount { count: i64, num_atoms: usize },

    #[error("Structure has {found} distinct species, more than the kernel limit of {max}")]
    TooManySpecies { found: usize, max: usize },

    #[error("Numerical fault in intensity reduction: {detail}")]
    NumericalFault { detail: String },

    #[cfg(feature = "cuda")]
    #[error("CUDA driver error: {0}")]
    Driver(#[from] cudarc::driver::DriverError),

    #[cfg(feature = "cuda")]
    #[error("CUDA kernel compilation failed: {0}")]
    KernelCompile(#[from] cudarc::nvrtc::CompileError),
}

/// Rejects non-finite or negative intensities after a reduction.
///
/// A violation is a fatal fault: it indicates a kernel bug or degenerate
/// physical input and is never silently clamped.
pub(crate) fn check_intensities(intensities: &[f64]) -> Result<(), EngineError> {
    for (i, &v) in intensities.iter().enumerate() {
        if !v.is_finite() {
            return Err(EngineError::NumericalFault {
                detail: format!("intensity[{}] is not finite ({})", i, v),
            });
        }
        if v < 0.0 {
            return Err(EngineError::NumericalFault {
                detail: format!("intensity[{}] is negative ({})", i, v),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_non_negative_intensities_pass() {
        assert!(check_intensities(&[0.0, 1.5, 1e12]).is_ok());
    }

    #[test]
    fn nan_intensity_is_a_numerical_fault() {
        let err = check_intensities(&[1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, EngineError::NumericalFault { .. }));
    }

    #[test]
    fn negative_intensity_is_a_numerical_fault() {
        let err = check_intensities(&[-1e-9]).unwrap_err();
        assert!(matches!(err, EngineError::NumericalFault { .. }));
    }
}
