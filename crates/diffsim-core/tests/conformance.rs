//! Backend conformance suite.
//!
//! The intensity computation is specified once; every backend must pass the
//! same checks. The CPU reference runs unconditionally, the CUDA backend when
//! the `cuda` feature is enabled (it needs a device).

use diffsim::core::models::ensemble::{AtomicEnsemble, Species};
use diffsim::core::models::grid::{Beam, ScatteringGrid};
use diffsim::core::scattering::amplitude::{SpeciesFactors, structure_amplitudes};
use diffsim::core::scattering::form_factor::FormFactorTable;
use diffsim::core::utils::rotation::{rotate_points, rotation_from_uniforms};
use diffsim::engine::kernel::cpu::CpuEngine;
use diffsim::engine::kernel::{IntensityEngine, RotationBatch, ScatterProblem};
use nalgebra::{Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn q_vectors() -> Vec<Vector3<f64>> {
    let grid = ScatteringGrid::new(vec![0.4, 1.0, 2.2], 6);
    let beam = Beam::new(9.4).unwrap();
    grid.to_vectors(&beam).unwrap()
}

fn small_molecule() -> (Vec<Point3<f64>>, Vec<Species>) {
    (
        vec![
            Point3::new(-0.66, 0.0, 0.0),
            Point3::new(0.66, 0.0, 0.0),
            Point3::new(0.0, 1.09, 0.4),
            Point3::new(0.3, -0.8, -0.9),
        ],
        vec![
            Species::CARBON,
            Species::CARBON,
            Species::OXYGEN,
            Species::HYDROGEN,
        ],
    )
}

/// Every backend must satisfy these; `granularity`-sized batches keep the
/// suite valid for work-group-constrained engines.
fn conformance_suite<E: IntensityEngine>(engine: &E) {
    let table = FormFactorTable::new();
    let q_vectors = q_vectors();
    let (positions, species) = small_molecule();
    let granularity = engine.preferred_granularity();

    // Finite, non-negative output of the right shape.
    let problem = ScatterProblem::new(&q_vectors, &positions, &species, &table);
    let mut rng = StdRng::seed_from_u64(17);
    let batch = RotationBatch::sample(granularity, &mut rng);
    let intensities = engine.compute_intensities(&problem, &batch).unwrap();
    assert_eq!(intensities.len(), q_vectors.len());
    for &v in &intensities {
        assert!(v.is_finite());
        assert!(v >= 0.0);
    }

    // A lone atom at the origin scatters exactly |f(q)|^2.
    let origin = vec![Point3::origin()];
    let lone = vec![Species::OXYGEN];
    let problem = ScatterProblem::new(&q_vectors, &origin, &lone, &table);
    let batch = RotationBatch::sample(granularity, &mut rng);
    let intensities = engine.compute_intensities(&problem, &batch).unwrap();
    for (i, q_vec) in q_vectors.iter().enumerate() {
        let f = table.evaluate(Species::OXYGEN, q_vec.norm()).unwrap();
        let relative = (intensities[i] - f * f).abs() / (f * f);
        assert!(relative < 1e-4, "lone atom off by {}", relative);
    }

    // Identity batch reproduces the directly accumulated amplitude.
    let problem = ScatterProblem::new(&q_vectors, &positions, &species, &table);
    let identity = RotationBatch::identity(granularity);
    let intensities = engine.compute_intensities(&problem, &identity).unwrap();
    let factors = SpeciesFactors::build(&q_vectors, &species, &table).unwrap();
    let amplitudes = structure_amplitudes(&q_vectors, &positions, &factors);
    for (i, amp) in amplitudes.iter().enumerate() {
        let expected = amp.norm_sqr();
        let relative = (intensities[i] - expected).abs() / expected.max(1e-12);
        assert!(relative < 1e-3, "identity intensity off by {}", relative);
    }

    // Batch lengths that break the work-group granularity are rejected
    // before any computation.
    if granularity > 1 {
        let bad = RotationBatch::identity(granularity + 1);
        assert!(engine.compute_intensities(&problem, &bad).is_err());
    }
}

#[test]
fn cpu_engine_passes_the_conformance_suite() {
    conformance_suite(&CpuEngine::new());
}

#[test]
fn cpu_rotation_average_is_orientation_invariant() {
    let table = FormFactorTable::new();
    let engine = CpuEngine::new();
    let grid = ScatteringGrid::new(vec![1.2], 1);
    let beam = Beam::new(9.4).unwrap();
    let q_vectors = grid.to_vectors(&beam).unwrap();
    let (positions, species) = small_molecule();

    let mut rng = StdRng::seed_from_u64(29);
    let batch = RotationBatch::sample(8000, &mut rng);

    let problem = ScatterProblem::new(&q_vectors, &positions, &species, &table);
    let base = engine.compute_intensities(&problem, &batch).unwrap();

    let reoriented = rotate_points(&rotation_from_uniforms(0.4, 0.1, 0.77), &positions);
    let problem = ScatterProblem::new(&q_vectors, &reoriented, &species, &table);
    let turned = engine.compute_intensities(&problem, &batch).unwrap();

    let relative = (base[0] - turned[0]).abs() / base[0];
    assert!(relative < 0.05, "powder average drifted by {}", relative);
}

#[test]
fn dilute_shot_total_is_the_sum_of_replica_intensities() {
    use diffsim::core::models::ensemble::{LengthUnit, MolecularTemplate};
    use diffsim::engine::assembler::{EnsembleAssembler, PackingMode};
    use diffsim::engine::config::SimulationConfig;
    use diffsim::engine::progress::ProgressReporter;
    use diffsim::workflows::simulate;

    let table = FormFactorTable::new();
    let engine = CpuEngine::new();
    let (positions, species) = small_molecule();
    let ensemble = AtomicEnsemble::new(positions, species).unwrap();
    let template = MolecularTemplate::single(ensemble, LengthUnit::Angstrom).unwrap();

    let seed = 4u64;
    let grid = ScatteringGrid::new(vec![0.4, 1.0, 2.2], 6);
    let beam = Beam::new(9.4).unwrap();
    let config = SimulationConfig::builder()
        .beam(beam)
        .grid(grid)
        .num_mol(2)
        .density_um(100.0)
        .mode(PackingMode::Dilute)
        .num_shots(1)
        .seed(seed)
        .build()
        .unwrap();

    let result = simulate::run(
        template.clone(),
        &config,
        &table,
        &engine,
        &ProgressReporter::new(),
    )
    .unwrap();
    let shot = &result.shots[0];

    // Replay the shot's assembly from the same per-shot seed and compute
    // each replica's single-molecule intensity independently.
    let assembler =
        EnsembleAssembler::new(template, 2, 100.0, PackingMode::Dilute, None).unwrap();
    let assembly = assembler
        .assemble_shot(&mut StdRng::seed_from_u64(seed))
        .unwrap();
    assert_eq!(assembly.systems().len(), 2);

    let q_vectors = q_vectors();
    let identity = RotationBatch::identity(1);
    let mut expected = vec![0.0; q_vectors.len()];
    for system in assembly.systems() {
        let problem =
            ScatterProblem::new(&q_vectors, system.positions(), system.species(), &table);
        let single = engine.compute_intensities(&problem, &identity).unwrap();
        for (acc, v) in expected.iter_mut().zip(&single) {
            *acc += v;
        }
    }

    // Incoherent accumulation: replica intensities add with no interference.
    for (observed, expected) in shot.intensities.iter().zip(&expected) {
        assert!((observed - expected).abs() <= 1e-12 * expected.abs().max(1.0));
    }
}

#[test]
fn concentrated_total_carries_the_interference_term() {
    let table = FormFactorTable::new();
    let engine = CpuEngine::new();
    let q_vectors = q_vectors();
    let (positions, species) = small_molecule();

    let replica_a = positions.clone();
    let replica_b: Vec<Point3<f64>> = positions
        .iter()
        .map(|p| p + Vector3::new(6.5, 0.0, 0.0))
        .collect();

    let mut merged_positions = replica_a.clone();
    merged_positions.extend_from_slice(&replica_b);
    let mut merged_species = species.clone();
    merged_species.extend_from_slice(&species);

    let identity = RotationBatch::identity(1);
    let problem = ScatterProblem::new(&q_vectors, &merged_positions, &merged_species, &table);
    let coherent = engine.compute_intensities(&problem, &identity).unwrap();

    let factors = SpeciesFactors::build(&q_vectors, &species, &table).unwrap();
    let amp_a = structure_amplitudes(&q_vectors, &replica_a, &factors);
    let amp_b = structure_amplitudes(&q_vectors, &replica_b, &factors);

    let mut max_interference: f64 = 0.0;
    for i in 0..q_vectors.len() {
        let incoherent = amp_a[i].norm_sqr() + amp_b[i].norm_sqr();
        let interference = 2.0 * (amp_a[i] * amp_b[i].conj()).re;
        let expected = incoherent + interference;
        let scale = expected.abs().max(1.0);
        assert!(
            (coherent[i] - expected).abs() / scale < 1e-9,
            "vector {}: coherent {} vs expected {}",
            i,
            coherent[i],
            expected
        );
        max_interference = max_interference.max(interference.abs() / scale);
    }
    // At a fixed small separation the interference term must actually show
    // up somewhere on the grid.
    assert!(max_interference > 1e-3);
}

#[cfg(feature = "cuda")]
mod cuda {
    use super::*;
    use diffsim::engine::kernel::cuda::{CudaEngine, THREADS_PER_GROUP};

    #[test]
    fn cuda_engine_passes_the_conformance_suite() {
        let engine = CudaEngine::new(0).expect("CUDA device available");
        conformance_suite(&engine);
    }

    #[test]
    fn cpu_and_cuda_agree_on_a_seeded_problem() {
        let table = FormFactorTable::new();
        let q_vectors = q_vectors();
        let (positions, species) = small_molecule();
        let problem = ScatterProblem::new(&q_vectors, &positions, &species, &table);

        let mut rng = StdRng::seed_from_u64(101);
        let batch = RotationBatch::sample(THREADS_PER_GROUP, &mut rng);

        let cpu = CpuEngine::new().compute_intensities(&problem, &batch).unwrap();
        let gpu = CudaEngine::new(0)
            .expect("CUDA device available")
            .compute_intensities(&problem, &batch)
            .unwrap();

        for (i, (c, g)) in cpu.iter().zip(&gpu).enumerate() {
            let relative = (c - g).abs() / c.abs().max(1e-12);
            assert!(
                relative < 1e-3,
                "vector {}: cpu {} vs gpu {} (relative {})",
                i,
                c,
                g,
                relative
            );
        }
    }

    #[test]
    fn invocation_buffers_can_be_reused_across_batches() {
        let table = FormFactorTable::new();
        let q_vectors = q_vectors();
        let (positions, species) = small_molecule();
        let problem = ScatterProblem::new(&q_vectors, &positions, &species, &table);

        let engine = CudaEngine::new(0).expect("CUDA device available");
        let mut rng = StdRng::seed_from_u64(5);
        let first = RotationBatch::sample(THREADS_PER_GROUP, &mut rng);
        let second = RotationBatch::sample(THREADS_PER_GROUP, &mut rng);

        let mut invocation = engine.invocation(&problem, &first).unwrap();
        invocation.run().unwrap();
        let a = invocation.retrieve().unwrap();

        invocation.load_batch(&second).unwrap();
        invocation.run().unwrap();
        let b = invocation.retrieve().unwrap();

        assert_ne!(a, b);

        // Re-running the first batch reproduces its result (up to atomicAdd
        // reordering in the reduction).
        let mut again = engine.invocation(&problem, &first).unwrap();
        again.run().unwrap();
        let a2 = again.retrieve().unwrap();
        for (x, y) in a.iter().zip(&a2) {
            assert!((x - y).abs() / x.abs().max(1e-12) < 1e-5);
        }
    }
}
