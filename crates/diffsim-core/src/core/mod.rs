//! # Core Module
//!
//! Stateless building blocks for X-ray scattering simulation: molecular data
//! models, the detector-grid expansion, form-factor evaluation, and rotation
//! utilities.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atomic ensembles, templates,
//!   beams, and scattering grids
//! - **Scattering Math** ([`scattering`]) - Cromer-Mann form factors and
//!   complex amplitude accumulation
//! - **Utilities** ([`utils`]) - Uniform SO(3) rotation sampling
//!
//! Everything in this module is pure: no mutation after construction, no
//! randomness beyond explicitly passed draws, no I/O besides the optional
//! form-factor override loader.

pub mod models;
pub mod scattering;
pub mod utils;
