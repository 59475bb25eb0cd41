//! # Diffsim Core Library
//!
//! A high-performance library for predicting X-ray scattering patterns from
//! atomic ensembles: Cromer-Mann form factors, uniform SO(3) rotation
//! averaging, randomized multi-molecule assembly, and a dual CPU/CUDA
//! intensity kernel behind a single interface.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Stateless data models (ensembles,
//!   templates, beams, scattering grids), pure scattering math (form factors,
//!   complex amplitudes), and rotation utilities.
//!
//! - **[`engine`]: The Logic Core.** The intensity-engine abstraction with
//!   its CPU reference and CUDA backends, the ensemble assembler with its
//!   rejection-sampling placement, configuration, progress reporting, and the
//!   engine-wide error taxonomy.
//!
//! - **[`workflows`]: The Public API.** The highest-level, user-facing layer:
//!   complete shot simulations and powder patterns. It ties the `engine` and
//!   `core` together and is the intended entry point for end-users of the
//!   library.
//!
//! The engine is a pure in-process numerical library: it performs no I/O of
//! its own (beyond optional parameter-file loading) and leaves persistence
//! and rendering to its callers.

pub mod core;
pub mod engine;
pub mod workflows;
