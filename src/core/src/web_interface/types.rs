use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::configuration::config::Config;
use crate::configuration::types::{ProxyMode, SessionRequest};
use crate::session_management::SessionState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: SessionState,
    pub record_count: usize,
    pub stage_count: usize,
}

/// Body of `POST /session/stages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLine {
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: uuid::Uuid,
}

/// API error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

/// Body of `POST /session/start`. Ports and mode fall back to the
/// configured defaults when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionBody {
    pub server_path: PathBuf,
    pub client_path: PathBuf,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub backend_port: Option<u16>,
    #[serde(default)]
    pub mode: Option<ProxyMode>,
    #[serde(default)]
    pub server_template: Option<PathBuf>,
    #[serde(default)]
    pub client_template: Option<PathBuf>,
}

impl StartSessionBody {
    pub fn into_request(self, defaults: &Config) -> SessionRequest {
        SessionRequest {
            server_path: self.server_path,
            client_path: self.client_path,
            listen_port: self.listen_port.unwrap_or(defaults.listen_port),
            backend_port: self.backend_port.unwrap_or(defaults.backend_port),
            mode: self.mode.unwrap_or(defaults.mode),
            server_template: self.server_template,
            client_template: self.client_template,
        }
    }
}
