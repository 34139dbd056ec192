//! Storage Trait
//!
//! This module defines the `Storage` trait, the persistence collaborator the
//! session controller hands its results to once a session stops.
//!
//! Implementors of this trait are responsible for:
//! - Persisting the correlated traffic records of a session
//! - Persisting the stages captured during that session
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::data_capture::types::{StageEvent, TrafficRecord};
use crate::error_handling::types::StorageError;
use std::path::PathBuf;
use uuid::Uuid;

/// The `Storage` trait defines the interface for session log backends.
pub trait Storage: Send + Sync {
    /// Saves the traffic records of a finished session, stages already assigned.
    fn persist_records(&self, session_id: Uuid, records: &[TrafficRecord])
        -> Result<(), StorageError>;

    /// Saves the stages captured during a session.
    fn persist_stages(&self, session_id: Uuid, stages: &[StageEvent]) -> Result<(), StorageError>;

    /// Location of the persisted session, when the backend has one.
    fn location(&self, _session_id: Uuid) -> Option<PathBuf> {
        None
    }
}
