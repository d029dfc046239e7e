//! # Workflows Module
//!
//! Top-level entry points that tie the engine together into complete procedures.
//!
//! ## Architecture
//!
//! - **Simulation Workflow** ([`simulate`]) - Sample parameters, persist metadata,
//!   allocate the result store, dispatch one task per image and poll until done.
//!   Also hosts the worker entry point used by cluster jobs.
//! - **Export Workflow** ([`export`]) - Convert finished results into the MRC stack
//!   and RELION STAR file that downstream processing expects.

pub mod export;
pub mod simulate;
