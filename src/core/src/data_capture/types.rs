//! Common data types used across the data_capture subsystem.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of characters kept in the summary column of a TCP chunk record.
pub const PREVIEW_CHARS: usize = 100;

/// Direction of TCP flow for a relayed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes flowing from the frontend under test to the backend.
    ClientToServer,
    /// Bytes flowing from the backend back to the frontend.
    ServerToClient,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "Client -> Server",
            Direction::ServerToClient => "Server -> Client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One observed unit of traffic: an HTTP exchange or a relayed TCP chunk.
///
/// The field names follow the reviewer log columns: `method` holds the HTTP
/// method or the TCP direction label, `summary` the URL or a short preview,
/// and `status` the HTTP status code or the chunk length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Append sequence number inside the session's log.
    pub id: u64,
    /// Wall-clock time the exchange or chunk was observed.
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub summary: String,
    pub status: u32,
    pub request_payload: String,
    pub response_payload: String,
    /// TCP connection the chunk was relayed on, `None` for HTTP records.
    pub connection_id: Option<u64>,
    /// Stage assigned by correlation once the session stops.
    pub stage: Option<u32>,
}

impl TrafficRecord {
    /// Builds the record of a completed (or failed) HTTP exchange.
    pub fn http(
        method: &str,
        url: String,
        status: u32,
        request_payload: String,
        response_payload: String,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            method: method.to_string(),
            summary: url,
            status,
            request_payload,
            response_payload,
            connection_id: None,
            stage: None,
        }
    }

    /// Builds the record of one relayed TCP chunk.
    ///
    /// The chunk is decoded lossily; `summary` keeps the first
    /// [`PREVIEW_CHARS`] characters followed by `...` when it was cut.
    pub fn tcp_chunk(direction: Direction, connection_id: u64, chunk: &[u8]) -> Self {
        let text = String::from_utf8_lossy(chunk).into_owned();
        Self {
            id: 0,
            timestamp: Utc::now(),
            method: direction.label().to_string(),
            summary: preview(&text, PREVIEW_CHARS),
            status: chunk.len() as u32,
            request_payload: text,
            response_payload: String::new(),
            connection_id: Some(connection_id),
            stage: None,
        }
    }
}

/// Truncates `text` to `max` characters, appending `...` when shortened.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// A numbered checkpoint captured from the frontend console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    /// 1-based, strictly increasing within a session.
    pub stage: u32,
    pub timestamp: DateTime<Utc>,
    /// Frontend console snapshot (or externally supplied line) that produced the stage.
    pub raw_line: String,
    /// Backend console snapshot taken at the same moment, empty when unavailable.
    pub server_output: String,
}
