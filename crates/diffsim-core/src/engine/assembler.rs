use crate::core::models::ensemble::{AtomicEnsemble, MolecularTemplate};
use crate::core::utils::rotation::rotation_from_uniforms;
use crate::engine::error::EngineError;
use nalgebra::Point3;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use tracing::{debug, instrument};

const AVOGADRO: f64 = 6.02214076e23;
// 1 L = 1e27 cubic angstroms.
const LITERS_PER_CUBIC_ANGSTROM: f64 = 1.0e-27;

/// Per-replica placement retry cap; exceeding it means the requested density
/// is too high for random (non-lattice) packing.
const MAX_PLACEMENT_ATTEMPTS: usize = 10_000;

/// How replica contributions combine into one shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingMode {
    /// Independent, well-separated copies; intensities add without
    /// interference (`I += |A_replica|^2`).
    Dilute,
    /// Amplitudes sum coherently before squaring (`I = |sum A_replica|^2`),
    /// capturing inter-molecular interference.
    Concentrated,
}

/// Vacancy sampling parameters: a mean vacancy fraction and an optional
/// spread (defaults to half the mean).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct VacancyParams {
    pub mean_fraction: f64,
    #[serde(default)]
    pub variance: Option<f64>,
}

impl VacancyParams {
    pub fn new(mean_fraction: f64) -> Self {
        Self {
            mean_fraction,
            variance: None,
        }
    }

    #[inline]
    fn spread(&self) -> f64 {
        self.variance.unwrap_or(self.mean_fraction / 2.0)
    }
}

/// The atomic-coordinate sets of one simulated exposure.
///
/// Dilute assemblies carry one coordinate set per replica; concentrated
/// assemblies merge all replicas into a single set so that downstream
/// amplitude accumulation is coherent across molecules.
#[derive(Debug, Clone)]
pub struct ShotAssembly {
    mode: PackingMode,
    systems: Vec<AtomicEnsemble>,
}

impl ShotAssembly {
    #[inline]
    pub fn mode(&self) -> PackingMode {
        self.mode
    }

    #[inline]
    pub fn systems(&self) -> &[AtomicEnsemble] {
        &self.systems
    }
}

/// Builds multi-molecule systems from a molecular template by randomized
/// placement, rotation, and optional atom vacancies.
///
/// Placement derives a cubic box from the target number density, then
/// rejection-samples centers of mass so that no two replicas come closer
/// than twice the template's bounding radius (a conservative non-overlap
/// bound, not contact-distance precise). The per-replica loop is inherently
/// sequential: each acceptance test depends on all previously placed
/// centers.
#[derive(Debug, Clone)]
pub struct EnsembleAssembler {
    template: MolecularTemplate,
    num_mol: usize,
    density_um: f64,
    mode: PackingMode,
    vacancies: Option<VacancyParams>,
    box_side: f64,
}

impl EnsembleAssembler {
    /// Validates density and geometry up front: a non-positive density and a
    /// box that cannot hold two non-overlapping copies are both rejected
    /// here, before any rotation or scattering work.
    pub fn new(
        template: MolecularTemplate,
        num_mol: usize,
        density_um: f64,
        mode: PackingMode,
        vacancies: Option<VacancyParams>,
    ) -> Result<Self, EngineError> {
        let box_side = derive_box_side(num_mol, density_um)?;

        if num_mol > 1 {
            let min_side = 2.0 * template.max_radius();
            if box_side < min_side {
                return Err(EngineError::DensityTooHigh {
                    density_um,
                    box_side,
                    min_side,
                });
            }
        }

        Ok(Self {
            template,
            num_mol,
            density_um,
            mode,
            vacancies,
            box_side,
        })
    }

    /// Edge length of the derived cubic box, in angstroms.
    #[inline]
    pub fn box_side(&self) -> f64 {
        self.box_side
    }

    #[inline]
    pub fn template(&self) -> &MolecularTemplate {
        &self.template
    }

    /// Assembles the coordinate sets for one shot from the caller's RNG.
    ///
    /// All randomness (conformation choice, placement, rotation, vacancies)
    /// flows from `rng`, so shots seeded independently stay reproducible
    /// under parallel scheduling.
    #[instrument(level = "debug", skip_all, fields(num_mol = self.num_mol))]
    pub fn assemble_shot(&self, rng: &mut impl Rng) -> Result<ShotAssembly, EngineError> {
        let centers = self.place_centers(rng)?;

        let mut systems = Vec::with_capacity(centers.len());
        for center in &centers {
            let conformation = self.template.draw_conformation(rng);
            let rotation =
                rotation_from_uniforms(rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>());
            let mut replica = conformation.rotated(&rotation);
            replica.translate(&center.coords);

            let replica = match &self.vacancies {
                Some(params) => apply_vacancies(&replica, params, rng)?,
                None => replica,
            };
            systems.push(replica);
        }

        let systems = match self.mode {
            PackingMode::Dilute => systems,
            PackingMode::Concentrated => {
                let mut merged = systems[0].clone();
                for replica in &systems[1..] {
                    merged.merge(replica);
                }
                vec![merged]
            }
        };

        Ok(ShotAssembly {
            mode: self.mode,
            systems,
        })
    }

    fn place_centers(&self, rng: &mut impl Rng) -> Result<Vec<Point3<f64>>, EngineError> {
        // A single molecule sits at the origin with no overlap test.
        if self.num_mol == 1 {
            return Ok(vec![Point3::origin()]);
        }

        let min_dist = 2.0 * self.template.max_radius();
        let mut centers: Vec<Point3<f64>> = Vec::with_capacity(self.num_mol);

        for replica in 0..self.num_mol {
            let mut attempts = 0;
            loop {
                attempts += 1;
                if attempts > MAX_PLACEMENT_ATTEMPTS {
                    return Err(EngineError::PackingFailure {
                        replica,
                        attempts: MAX_PLACEMENT_ATTEMPTS,
                        box_side: self.box_side,
                        density_um: self.density_um,
                    });
                }

                let candidate = Point3::new(
                    rng.gen_range(0.0..self.box_side),
                    rng.gen_range(0.0..self.box_side),
                    rng.gen_range(0.0..self.box_side),
                );

                if centers.iter().all(|c| (candidate - c).norm() > min_dist) {
                    centers.push(candidate);
                    break;
                }
            }
            debug!(replica, attempts, "placed replica");
        }

        Ok(centers)
    }
}

fn derive_box_side(num_mol: usize, density_um: f64) -> Result<f64, EngineError> {
    if density_um <= 0.0 {
        return Err(EngineError::NonPositiveDensity(density_um));
    }
    let molecules_per_cubic_angstrom =
        density_um * 1.0e-6 * AVOGADRO * LITERS_PER_CUBIC_ANGSTROM;
    Ok((num_mol as f64 / molecules_per_cubic_angstrom).cbrt())
}

/// Removes a normally distributed number of atoms from the ensemble.
///
/// The vacancy count is drawn from N(mean_fraction * n, spread * n), rounded
/// and clamped to [0, n]. A zero count returns the ensemble unchanged; any
/// other count uniformly subsamples the surviving atoms without replacement,
/// preserving their original order. A count that still falls outside the
/// valid range is a fatal error, never silently corrected.
fn apply_vacancies(
    ensemble: &AtomicEnsemble,
    params: &VacancyParams,
    rng: &mut impl Rng,
) -> Result<AtomicEnsemble, EngineError> {
    let num_atoms = ensemble.len();
    let mean = params.mean_fraction * num_atoms as f64;
    let spread = params.spread() * num_atoms as f64;

    let drawn = if spread > 0.0 {
        let normal = Normal::new(mean, spread).map_err(|_| EngineError::InvalidVacancyCount {
            count: mean.round() as i64,
            num_atoms,
        })?;
        normal.sample(rng)
    } else {
        mean
    };

    let count = (drawn.round() as i64).clamp(0, num_atoms as i64);
    if count < 0 || count > num_atoms as i64 {
        return Err(EngineError::InvalidVacancyCount { count, num_atoms });
    }
    if count == 0 {
        return Ok(ensemble.clone());
    }

    let keep = num_atoms - count as usize;
    let mut indices = rand::seq::index::sample(rng, num_atoms, keep).into_vec();
    indices.sort_unstable();
    Ok(ensemble.subset(&indices))
}
