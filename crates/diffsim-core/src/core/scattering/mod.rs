//! Elastic scattering math: form factors and amplitude accumulation.

pub mod amplitude;
pub mod form_factor;
