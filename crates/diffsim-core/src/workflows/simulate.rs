use crate::core::models::ensemble::{AtomicEnsemble, MolecularTemplate};
use crate::core::models::grid::{Beam, ScatteringGrid};
use crate::core::scattering::form_factor::FormFactorTable;
use crate::engine::assembler::EnsembleAssembler;
use crate::engine::config::SimulationConfig;
use crate::engine::error::EngineError;
use crate::engine::kernel::{IntensityEngine, RotationBatch, ScatterProblem};
use crate::engine::progress::{Progress, ProgressReporter};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Accumulated intensity pattern of one simulated exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotIntensities {
    pub index: usize,
    pub num_q: usize,
    pub num_phi: usize,
    /// Flat intensities, row-major over (ring, azimuth).
    pub intensities: Vec<f64>,
}

impl ShotIntensities {
    /// Intensity at ring `ring`, azimuthal sample `phi`.
    #[inline]
    pub fn at(&self, ring: usize, phi: usize) -> f64 {
        self.intensities[ring * self.num_phi + phi]
    }
}

/// All shots of one run, ordered by shot index regardless of the order in
/// which workers completed them.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub shots: Vec<ShotIntensities>,
}

/// Simulates a series of scattering exposures.
///
/// Each shot assembles a fresh multi-molecule system from the template and
/// accumulates its intensity pattern: per-replica incoherently in dilute
/// mode, coherently over the merged system in concentrated mode. Shots are
/// independent and fan out over worker threads (feature `parallel`); every
/// shot derives its own RNG from the master seed and its index, so results
/// are reproducible under any scheduling. The engine produces only the
/// numeric arrays; persisting them is the caller's concern.
#[instrument(skip_all, name = "simulation_workflow", fields(num_shots = config.sampling.num_shots))]
pub fn run<E>(
    template: MolecularTemplate,
    config: &SimulationConfig,
    form_factors: &FormFactorTable,
    engine: &E,
    reporter: &ProgressReporter,
) -> Result<SimulationResult, EngineError>
where
    E: IntensityEngine + Sync,
{
    config.validate()?;

    reporter.report(Progress::PhaseStart { name: "Setup" });
    info!("Expanding detector grid and validating assembly parameters.");

    let q_vectors = config.grid.to_vectors(&config.beam)?;
    let assembler = EnsembleAssembler::new(
        template,
        config.sample.num_mol,
        config.sample.density_um,
        config.sample.mode,
        config.sample.vacancies,
    )?;

    // Resolve every species once, before any shot starts.
    for &s in assembler.template().conformation(0).species() {
        form_factors.lookup(s)?;
    }
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart { name: "Shots" });

    let simulate_one = |index: usize| -> Result<ShotIntensities, EngineError> {
        let mut rng = StdRng::seed_from_u64(config.sampling.seed.wrapping_add(index as u64));
        let shot = simulate_shot(
            index,
            &assembler,
            &q_vectors,
            config.grid.num_q(),
            config.grid.num_phi,
            form_factors,
            engine,
            &mut rng,
        )?;
        reporter.report(Progress::ShotFinished { index });
        Ok(shot)
    };

    #[cfg(feature = "parallel")]
    let shots: Result<Vec<ShotIntensities>, EngineError> = (0..config.sampling.num_shots)
        .into_par_iter()
        .map(simulate_one)
        .collect();

    #[cfg(not(feature = "parallel"))]
    let shots: Result<Vec<ShotIntensities>, EngineError> =
        (0..config.sampling.num_shots).map(simulate_one).collect();

    let shots = shots?;
    reporter.report(Progress::PhaseFinish);
    info!("Simulated {} shot(s).", shots.len());

    Ok(SimulationResult { shots })
}

#[allow(clippy::too_many_arguments)]
fn simulate_shot<E>(
    index: usize,
    assembler: &EnsembleAssembler,
    q_vectors: &[Vector3<f64>],
    num_q: usize,
    num_phi: usize,
    form_factors: &FormFactorTable,
    engine: &E,
    rng: &mut StdRng,
) -> Result<ShotIntensities, EngineError>
where
    E: IntensityEngine,
{
    let assembly = assembler.assemble_shot(rng)?;

    // Each system's own orientation is already baked into its coordinates, so
    // the kernel is dispatched with identity rotations only.
    let identity = RotationBatch::identity(engine.preferred_granularity());

    let mut intensities = vec![0.0; q_vectors.len()];
    for system in assembly.systems() {
        let problem =
            ScatterProblem::new(q_vectors, system.positions(), system.species(), form_factors);
        let contribution = engine.compute_intensities(&problem, &identity)?;
        for (acc, v) in intensities.iter_mut().zip(&contribution) {
            *acc += v;
        }
    }

    Ok(ShotIntensities {
        index,
        num_q,
        num_phi,
        intensities,
    })
}

/// Rotation-averaged (powder) pattern of a single structure.
///
/// Directly exposes the kernel's incoherent rotation averaging: the batch is
/// sampled from `seed`, padded to the engine's preferred granularity, and
/// averaged over. Useful for isotropic/randomly-oriented targets without
/// assembling an ensemble.
#[instrument(skip_all, name = "powder_workflow", fields(num_rotations))]
pub fn powder<E>(
    structure: &AtomicEnsemble,
    grid: &ScatteringGrid,
    beam: &Beam,
    form_factors: &FormFactorTable,
    engine: &E,
    num_rotations: usize,
    seed: u64,
) -> Result<Vec<f64>, EngineError>
where
    E: IntensityEngine,
{
    if num_rotations == 0 {
        return Err(EngineError::EmptyBatch);
    }
    let q_vectors = grid.to_vectors(beam)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let batch =
        RotationBatch::sample(num_rotations, &mut rng).padded_to(engine.preferred_granularity());

    let problem = ScatterProblem::new(
        &q_vectors,
        structure.positions(),
        structure.species(),
        form_factors,
    );
    engine.compute_intensities(&problem, &batch)
}
