//! # Engine Module
//!
//! The stateful part of a simulation run: everything between a validated configuration
//! and a directory full of simulated images.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Validated global settings
//! - **Sampling** ([`sampling`]) - Deterministic per-image parameter draws from a seed
//! - **Parameters & Simulation** ([`parameters`], [`simulation`]) - The per-image records and their aggregate root
//! - **Simulator** ([`simulator`]) - Configuration fragments and the external image-formation pipeline
//! - **Result Store** ([`store`]) - Chunked on-disk array, one chunk per image
//! - **Task Unit** ([`task`]) - One image, start to finish, in a private working directory
//! - **Dispatch** ([`dispatch`]) - Fire-and-forget submission to local or cluster workers
//! - **Progress Monitoring** ([`progress`]) - Progress reporting callbacks
//! - **Error Handling** ([`error`]) - Engine-wide error aggregation

pub mod config;
pub mod dispatch;
pub mod error;
pub mod parameters;
pub mod progress;
pub mod sampling;
pub mod simulation;
pub mod simulator;
pub mod store;
pub mod task;
