//! Storage subsystem
//!
//! Persists the results of a grading session once it stops.
//!
//! Components:
//! - `storage_trait`: the Storage trait the session controller writes through.
//! - `file_storage`: filesystem-backed implementation (JSON + CSV per session).

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use storage_trait::Storage;
