use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::configuration::types::ProxyMode;

/// What a finished session leaves behind, returned by `stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub mode: ProxyMode,
    pub record_count: usize,
    pub stage_count: usize,
    /// Where the logs were written, when the storage backend has a location.
    pub storage_dir: Option<PathBuf>,
}
