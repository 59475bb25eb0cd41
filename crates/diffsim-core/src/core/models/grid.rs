use super::ensemble::ModelError;
use nalgebra::Vector3;
use serde::Deserialize;
use std::f64::consts::PI;

// E [keV] * lambda [A] for X-ray photons.
const KEV_ANGSTROM: f64 = 12.398419;

/// Incident X-ray beam, characterized by its photon energy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Beam {
    pub energy_kev: f64,
}

impl Beam {
    pub fn new(energy_kev: f64) -> Result<Self, ModelError> {
        if energy_kev <= 0.0 {
            return Err(ModelError::NonPositiveEnergy(energy_kev));
        }
        Ok(Self { energy_kev })
    }

    /// Photon wavelength in angstroms.
    #[inline]
    pub fn wavelength(&self) -> f64 {
        KEV_ANGSTROM / self.energy_kev
    }

    /// Wavevector magnitude k = 2 pi / lambda, in inverse angstroms.
    #[inline]
    pub fn wavenumber(&self) -> f64 {
        2.0 * PI / self.wavelength()
    }
}

/// Polar detector grid: a set of momentum-transfer magnitudes, each sampled
/// at `num_phi` equally spaced azimuthal angles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScatteringGrid {
    /// Momentum-transfer magnitudes, in inverse angstroms.
    pub q_values: Vec<f64>,
    /// Azimuthal samples per ring.
    pub num_phi: usize,
}

impl ScatteringGrid {
    pub fn new(q_values: Vec<f64>, num_phi: usize) -> Self {
        Self { q_values, num_phi }
    }

    #[inline]
    pub fn num_q(&self) -> usize {
        self.q_values.len()
    }

    /// Total number of scattering vectors the grid expands into.
    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.q_values.len() * self.num_phi
    }

    /// Expands the grid into the dense set of 3D scattering vectors lying on
    /// the Ewald sphere of the given beam.
    ///
    /// For elastic scattering with |q| = 2k sin(theta), the vector for ring
    /// `q` at azimuth `phi` is
    ///
    /// ```text
    /// ( q cos(theta) cos(phi), q cos(theta) sin(phi), -q sin(theta) )
    /// ```
    ///
    /// with sin(theta) = q / 2k and the beam along +z. The expansion is a
    /// pure function of (grid, beam): fully deterministic, row-major in
    /// (ring, azimuth) order, one vector per (q, phi) pair.
    pub fn to_vectors(&self, beam: &Beam) -> Result<Vec<Vector3<f64>>, ModelError> {
        let k = beam.wavenumber();
        let mut vectors = Vec::with_capacity(self.num_vectors());

        for &q in &self.q_values {
            let sin_theta = q / (2.0 * k);
            if !(0.0..=1.0).contains(&sin_theta) {
                return Err(ModelError::QOutsideEwaldSphere { q, k });
            }
            let cos_theta = (1.0 - sin_theta * sin_theta).sqrt();

            for i in 0..self.num_phi {
                let phi = 2.0 * PI * (i as f64) / (self.num_phi as f64);
                vectors.push(Vector3::new(
                    q * cos_theta * phi.cos(),
                    q * cos_theta * phi.sin(),
                    -q * sin_theta,
                ));
            }
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_rejects_non_positive_energy() {
        assert!(matches!(
            Beam::new(0.0).unwrap_err(),
            ModelError::NonPositiveEnergy(_)
        ));
    }

    #[test]
    fn beam_wavenumber_matches_wavelength() {
        let beam = Beam::new(12.398419).unwrap();
        assert!((beam.wavelength() - 1.0).abs() < 1e-9);
        assert!((beam.wavenumber() - 2.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn expansion_yields_num_q_times_num_phi_vectors() {
        let grid = ScatteringGrid::new(vec![0.5, 1.0, 2.0], 16);
        let beam = Beam::new(9.4).unwrap();
        let vectors = grid.to_vectors(&beam).unwrap();
        assert_eq!(vectors.len(), 3 * 16);
    }

    #[test]
    fn expanded_vectors_preserve_ring_magnitude() {
        let grid = ScatteringGrid::new(vec![0.1, 1.0, 3.5], 8);
        let beam = Beam::new(9.4).unwrap();
        let vectors = grid.to_vectors(&beam).unwrap();
        for (i, v) in vectors.iter().enumerate() {
            let q = grid.q_values[i / grid.num_phi];
            assert!(
                (v.norm() - q).abs() < 1e-9,
                "vector {} has |q| = {}, expected {}",
                i,
                v.norm(),
                q
            );
        }
    }

    #[test]
    fn expansion_is_deterministic() {
        let grid = ScatteringGrid::new(vec![0.4, 1.7], 32);
        let beam = Beam::new(8.0).unwrap();
        assert_eq!(
            grid.to_vectors(&beam).unwrap(),
            grid.to_vectors(&beam).unwrap()
        );
    }

    #[test]
    fn q_beyond_ewald_sphere_is_rejected() {
        let beam = Beam::new(1.0).unwrap();
        let too_large = 2.0 * beam.wavenumber() + 0.1;
        let grid = ScatteringGrid::new(vec![too_large], 4);
        assert!(matches!(
            grid.to_vectors(&beam).unwrap_err(),
            ModelError::QOutsideEwaldSphere { .. }
        ));
    }
}
