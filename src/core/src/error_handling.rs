//! Error types for every subsystem.

pub mod types;
