use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::data_capture::types::{StageEvent, TrafficRecord};
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;

/// Filesystem-backed session logs.
///
/// Layout: `<base>/sessions/<session_id>/` holding `records.json`,
/// `records.csv` and `stages.json`. The CSV mirrors the reviewer's log sheet
/// (timestamp, method/direction, url/preview, status/bytes, request body,
/// response body, stage).
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let sessions_dir = base_path.join("sessions");
        fs::create_dir_all(&sessions_dir).map_err(|e| {
            error!("Failed to create sessions dir {}: {}", sessions_dir.display(), e);
            StorageError::WriteFailed
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join("sessions")
    }

    fn session_dir(&self, id: Uuid) -> PathBuf {
        self.sessions_dir().join(id.to_string())
    }

    fn ensure_session_dir(&self, id: Uuid) -> Result<PathBuf, StorageError> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create session dir {}: {}", dir.display(), e);
            StorageError::WriteFailed
        })?;
        Ok(dir)
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
        let write_err = |e: std::io::Error| {
            error!("Write failed {}: {}", path.display(), e);
            StorageError::WriteFailed
        };
        let mut w = BufWriter::new(File::create(path).map_err(write_err)?);
        serde_json::to_writer_pretty(&mut w, value).map_err(|e| {
            error!("Serialize failed {}: {}", path.display(), e);
            StorageError::SerializationFailed(e.to_string())
        })?;
        w.flush().map_err(write_err)
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let content = fs::read_to_string(path).map_err(|e| {
            error!("Read failed {}: {}", path.display(), e);
            StorageError::ReadFailed
        })?;
        serde_json::from_str(&content).map_err(|e| {
            error!("Invalid JSON in {}: {}", path.display(), e);
            StorageError::SerializationFailed(e.to_string())
        })
    }

    fn write_records_csv(path: &Path, records: &[TrafficRecord]) -> Result<(), StorageError> {
        let write_err = |e: std::io::Error| {
            error!("Write failed {}: {}", path.display(), e);
            StorageError::WriteFailed
        };
        let mut f = BufWriter::new(File::create(path).map_err(write_err)?);
        writeln!(
            f,
            "timestamp,method,url,status,request_body,response_body,stage"
        )
        .map_err(write_err)?;
        for r in records {
            writeln!(
                f,
                "{},{},{},{},{},{},{}",
                r.timestamp.format("%H:%M:%S%.3f"),
                csv_field(&r.method),
                csv_field(&r.summary),
                r.status,
                csv_field(&r.request_payload),
                csv_field(&r.response_payload),
                r.stage.map(|s| s.to_string()).unwrap_or_default()
            )
            .map_err(write_err)?;
        }
        f.flush().map_err(write_err)
    }

    /// Reads back the records of a persisted session.
    pub fn load_records(&self, session_id: Uuid) -> Result<Vec<TrafficRecord>, StorageError> {
        Self::read_json(&self.session_dir(session_id).join("records.json"))
    }

    /// Reads back the stages of a persisted session.
    pub fn load_stages(&self, session_id: Uuid) -> Result<Vec<StageEvent>, StorageError> {
        Self::read_json(&self.session_dir(session_id).join("stages.json"))
    }

    /// Identifiers of every session that has a directory on disk.
    pub fn list_sessions(&self) -> Result<Vec<Uuid>, StorageError> {
        let dir = self.sessions_dir();
        let entries = fs::read_dir(&dir).map_err(|e| {
            error!("Failed to read sessions dir {}: {}", dir.display(), e);
            StorageError::ReadFailed
        })?;
        let mut ids: Vec<Uuid> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()))
            .collect();
        ids.sort();
        debug!("Found {} persisted session(s)", ids.len());
        Ok(ids)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl Storage for FileStorage {
    fn persist_records(
        &self,
        session_id: Uuid,
        records: &[TrafficRecord],
    ) -> Result<(), StorageError> {
        let dir = self.ensure_session_dir(session_id)?;
        Self::write_json(&dir.join("records.json"), records)?;
        Self::write_records_csv(&dir.join("records.csv"), records)?;
        info!(
            "Saved {} record(s) for session {} in {}",
            records.len(),
            session_id,
            dir.display()
        );
        Ok(())
    }

    fn persist_stages(&self, session_id: Uuid, stages: &[StageEvent]) -> Result<(), StorageError> {
        let dir = self.ensure_session_dir(session_id)?;
        Self::write_json(&dir.join("stages.json"), stages)?;
        info!(
            "Saved {} stage(s) for session {} in {}",
            stages.len(),
            session_id,
            dir.display()
        );
        Ok(())
    }

    fn location(&self, session_id: Uuid) -> Option<PathBuf> {
        Some(self.session_dir(session_id))
    }
}
