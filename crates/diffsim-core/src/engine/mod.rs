//! # Engine Module
//!
//! The stateful computational layer: intensity kernels, ensemble assembly,
//! configuration, and error handling.
//!
//! ## Architecture
//!
//! - **Intensity Kernels** ([`kernel`]) - The rotation-averaged scattering
//!   computation, specified once and implemented by a CPU reference backend
//!   and an optional CUDA backend behind the same trait
//! - **Ensemble Assembly** ([`assembler`]) - Randomized placement, rotation,
//!   and vacancy sampling for multi-molecule systems
//! - **Configuration** ([`config`]) - Simulation parameters with builder and
//!   TOML loading
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - The engine-wide error taxonomy
//!
//! Shots hold no shared mutable state: the only resource read concurrently
//! is the immutable form-factor table, so per-shot parallelism above this
//! layer requires no locking.

pub mod assembler;
pub mod config;
pub mod error;
pub mod kernel;
pub mod progress;
