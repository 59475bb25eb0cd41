use crate::core::models::ensemble::Species;
use phf::{Map, phf_map};
use serde::Deserialize;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::Path;
use thiserror::Error;

/// Cromer-Mann analytic fit of an element's elastic X-ray form factor:
///
/// ```text
/// f(q) = sum_{i=1..4} a_i * exp(-b_i * (q / 4 pi)^2) + c
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CromerMannParams {
    pub a: [f64; 4],
    pub b: [f64; 4],
    pub c: f64,
}

impl CromerMannParams {
    /// Evaluates the form factor at momentum transfer `q` (inverse
    /// angstroms). Stable over the physically meaningful range q in [0, 20).
    #[inline]
    pub fn evaluate(&self, q: f64) -> f64 {
        let qo = (q * q) / (16.0 * PI * PI);
        self.a[0] * (-self.b[0] * qo).exp()
            + self.a[1] * (-self.b[1] * qo).exp()
            + self.a[2] * (-self.b[2] * qo).exp()
            + self.a[3] * (-self.b[3] * qo).exp()
            + self.c
    }
}

#[derive(Debug, Error)]
pub enum FormFactorError {
    #[error("No Cromer-Mann coefficients for species Z = {0}")]
    UnknownSpecies(u32),

    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
}

// International Tables coefficients for the elements that occur in
// biomolecular samples and their common counter-ions / heavy-atom labels.
static BUILTIN_PARAMS: Map<u32, CromerMannParams> = phf_map! {
    1u32 => CromerMannParams {
        a: [0.493002, 0.322912, 0.140191, 0.040810],
        b: [10.5109, 26.1257, 3.14236, 57.7997],
        c: 0.003038,
    },
    6u32 => CromerMannParams {
        a: [2.31000, 1.02000, 1.58860, 0.865000],
        b: [20.8439, 10.2075, 0.568700, 51.6512],
        c: 0.215600,
    },
    7u32 => CromerMannParams {
        a: [12.2126, 3.13220, 2.01250, 1.16630],
        b: [0.005700, 9.89330, 28.9975, 0.582600],
        c: -11.529,
    },
    8u32 => CromerMannParams {
        a: [3.04850, 2.28680, 1.54630, 0.867000],
        b: [13.2771, 5.70110, 0.323900, 32.9089],
        c: 0.250800,
    },
    11u32 => CromerMannParams {
        a: [4.76260, 3.17360, 1.26740, 1.11280],
        b: [3.28500, 8.84220, 0.313600, 129.424],
        c: 0.676000,
    },
    12u32 => CromerMannParams {
        a: [5.42040, 2.17350, 1.22690, 2.30730],
        b: [2.82750, 79.2611, 0.380800, 7.19370],
        c: 0.858400,
    },
    15u32 => CromerMannParams {
        a: [6.43450, 4.17910, 1.78000, 1.49080],
        b: [1.90670, 27.1570, 0.526000, 68.1645],
        c: 1.11490,
    },
    16u32 => CromerMannParams {
        a: [6.90530, 5.20340, 1.43790, 1.58630],
        b: [1.46790, 22.2151, 0.253600, 56.1720],
        c: 0.866900,
    },
    17u32 => CromerMannParams {
        a: [11.4604, 7.19640, 6.25560, 1.64550],
        b: [0.010400, 1.16620, 18.5194, 47.7784],
        c: -9.55740,
    },
    19u32 => CromerMannParams {
        a: [8.21860, 7.43980, 1.05190, 0.865900],
        b: [12.7949, 0.774800, 213.187, 41.6841],
        c: 1.42280,
    },
    20u32 => CromerMannParams {
        a: [8.62660, 7.38730, 1.58990, 1.02110],
        b: [10.4421, 0.659900, 85.7484, 178.437],
        c: 1.37510,
    },
    25u32 => CromerMannParams {
        a: [11.2819, 7.35730, 3.01930, 2.24410],
        b: [5.34090, 0.343200, 17.8674, 83.7543],
        c: 1.08960,
    },
    26u32 => CromerMannParams {
        a: [11.7695, 7.35730, 3.52220, 2.30450],
        b: [4.76110, 0.307200, 15.3535, 76.8805],
        c: 1.03690,
    },
    30u32 => CromerMannParams {
        a: [14.0743, 7.03180, 5.16520, 2.41000],
        b: [3.26550, 0.233300, 10.3163, 41.2312],
        c: 1.30410,
    },
    34u32 => CromerMannParams {
        a: [17.0006, 5.81960, 3.97310, 4.35430],
        b: [2.40980, 0.272600, 15.2372, 43.8163],
        c: 2.84090,
    },
    79u32 => CromerMannParams {
        a: [16.8819, 18.5913, 25.5582, 5.86000],
        b: [0.461100, 8.62160, 1.48260, 36.3956],
        c: 12.0658,
    },
};

#[derive(Debug, Deserialize)]
struct CromerMannRecord {
    atomic_number: u32,
    a1: f64,
    a2: f64,
    a3: f64,
    a4: f64,
    b1: f64,
    b2: f64,
    b3: f64,
    b4: f64,
    c: f64,
}

/// Read-only lookup table from species to Cromer-Mann coefficients.
///
/// The built-in table covers the biologically relevant elements; additional
/// or replacement rows can be layered on top from a CSV file. The table is
/// immutable after construction and safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct FormFactorTable {
    overrides: HashMap<u32, CromerMannParams>,
}

impl FormFactorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers user-supplied coefficients over the built-ins from a CSV file
    /// with header `atomic_number,a1,a2,a3,a4,b1,b2,b3,b4,c`.
    pub fn with_overrides_from_csv(path: &Path) -> Result<Self, FormFactorError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| FormFactorError::Csv {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        let mut overrides = HashMap::new();
        for result in reader.deserialize::<CromerMannRecord>() {
            let r = result.map_err(|e| FormFactorError::Csv {
                path: path.to_string_lossy().to_string(),
                source: e,
            })?;
            overrides.insert(
                r.atomic_number,
                CromerMannParams {
                    a: [r.a1, r.a2, r.a3, r.a4],
                    b: [r.b1, r.b2, r.b3, r.b4],
                    c: r.c,
                },
            );
        }
        Ok(Self { overrides })
    }

    pub fn lookup(&self, species: Species) -> Result<&CromerMannParams, FormFactorError> {
        self.overrides
            .get(&species.0)
            .or_else(|| BUILTIN_PARAMS.get(&species.0))
            .ok_or(FormFactorError::UnknownSpecies(species.0))
    }

    /// Evaluates the form factor of `species` at momentum transfer `q`.
    pub fn evaluate(&self, species: Species, q: f64) -> Result<f64, FormFactorError> {
        Ok(self.lookup(species)?.evaluate(q))
    }
}
