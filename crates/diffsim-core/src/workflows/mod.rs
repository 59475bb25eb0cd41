//! # Workflows Module
//!
//! High-level entry points tying the engine and core together.
//!
//! - **Shot Simulation** ([`simulate`]) - Assembles a multi-molecule system
//!   per exposure and accumulates its intensity pattern, fanning shots out
//!   over worker threads; also exposes the direct rotation-averaged powder
//!   pattern of a single structure.

pub mod simulate;
