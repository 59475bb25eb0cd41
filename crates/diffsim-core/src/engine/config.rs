use crate::core::models::grid::{Beam, ScatteringGrid};
use crate::engine::assembler::{PackingMode, VacancyParams};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("TOML parsing error: {0}")]
    Toml(String),
}

/// Complete description of one simulation run: detector geometry, beam,
/// ensemble composition, and sampling controls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    pub beam: Beam,
    pub grid: ScatteringGrid,
    pub sample: SampleConfig,
    pub sampling: SamplingConfig,
}

/// What is in the beam: how many molecules, how densely, and how they
/// accumulate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SampleConfig {
    pub num_mol: usize,
    pub density_um: f64,
    pub mode: PackingMode,
    #[serde(default)]
    pub vacancies: Option<VacancyParams>,
}

/// Monte-Carlo controls: shot count and the master seed all per-shot
/// randomness derives from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplingConfig {
    pub num_shots: usize,
    #[serde(default)]
    pub seed: u64,
}

impl SimulationConfig {
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::default()
    }

    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig =
            toml::from_str(text).map_err(|e| ConfigError::Toml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.q_values.is_empty() {
            return Err(ConfigError::MissingParameter("grid.q_values"));
        }
        if self.grid.num_phi == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "grid.num_phi",
                reason: "must be at least 1".into(),
            });
        }
        if self.beam.energy_kev <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "beam.energy_kev",
                reason: format!("must be positive, got {}", self.beam.energy_kev),
            });
        }
        if self.sample.num_mol == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "sample.num_mol",
                reason: "must be at least 1".into(),
            });
        }
        if self.sample.density_um <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "sample.density_um",
                reason: format!("must be positive, got {}", self.sample.density_um),
            });
        }
        if let Some(v) = &self.sample.vacancies {
            if !(0.0..=1.0).contains(&v.mean_fraction) {
                return Err(ConfigError::InvalidParameter {
                    name: "sample.vacancies.mean_fraction",
                    reason: format!("must lie in [0, 1], got {}", v.mean_fraction),
                });
            }
            if v.variance.is_some_and(|s| s < 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name: "sample.vacancies.variance",
                    reason: "must be non-negative".into(),
                });
            }
        }
        if self.sampling.num_shots == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "sampling.num_shots",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    beam: Option<Beam>,
    grid: Option<ScatteringGrid>,
    num_mol: Option<usize>,
    density_um: Option<f64>,
    mode: Option<PackingMode>,
    vacancies: Option<VacancyParams>,
    num_shots: Option<usize>,
    seed: Option<u64>,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beam(mut self, beam: Beam) -> Self {
        self.beam = Some(beam);
        self
    }

    pub fn grid(mut self, grid: ScatteringGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn num_mol(mut self, num_mol: usize) -> Self {
        self.num_mol = Some(num_mol);
        self
    }

    pub fn density_um(mut self, density_um: f64) -> Self {
        self.density_um = Some(density_um);
        self
    }

    pub fn mode(mut self, mode: PackingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn vacancies(mut self, vacancies: VacancyParams) -> Self {
        self.vacancies = Some(vacancies);
        self
    }

    pub fn num_shots(mut self, num_shots: usize) -> Self {
        self.num_shots = Some(num_shots);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        let config = SimulationConfig {
            beam: self.beam.ok_or(ConfigError::MissingParameter("beam"))?,
            grid: self.grid.ok_or(ConfigError::MissingParameter("grid"))?,
            sample: SampleConfig {
                num_mol: self.num_mol.ok_or(ConfigError::MissingParameter("num_mol"))?,
                density_um: self
                    .density_um
                    .ok_or(ConfigError::MissingParameter("density_um"))?,
                mode: self.mode.ok_or(ConfigError::MissingParameter("mode"))?,
                vacancies: self.vacancies,
            },
            sampling: SamplingConfig {
                num_shots: self
                    .num_shots
                    .ok_or(ConfigError::MissingParameter("num_shots"))?,
                seed: self.seed.unwrap_or(0),
            },
        };
        config.validate()?;
        Ok(config)
    }
}
