//! Data structures describing molecular structures as loaded from coordinate files.

pub mod atom;
pub mod structure;
