//! # Core Module
//!
//! Stateless building blocks shared by the engine and workflows.
//!
//! - **Structure Representation** ([`models`]) - Atoms, models and structures as read from disk
//! - **File I/O** ([`io`]) - PDB/mmCIF structures, MRC images and RELION STAR tables
//! - **Geometry** ([`utils`]) - Rigid-body rotation, centroids and Euler-angle conventions

pub mod io;
pub mod models;
pub mod utils;
