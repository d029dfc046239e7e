//! # spsim Core Library
//!
//! Reproducible batch simulation of cryo-EM single-particle images. For each requested
//! particle the library rotates a molecular structure, hands it to the external
//! [parakeet](https://github.com/rosalindfranklininstitute/parakeet) image-formation
//! simulator and writes the resulting 2D image into a chunked, on-disk result store.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless structure models, file formats (PDB, mmCIF,
//!   MRC, STAR) and geometry utilities.
//!
//! - **[`engine`]: The Logic Core.** Configuration validation, deterministic parameter
//!   sampling, the `Simulation` aggregate, the progressive result store, the per-image
//!   task unit and task dispatch.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures: preparing and executing a
//!   simulation, waiting on its progress, and exporting results for downstream tools.

pub mod core;
pub mod engine;
pub mod workflows;
