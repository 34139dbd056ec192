use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

/// Transport the proxy speaks between frontend and backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProxyMode {
    #[default]
    #[serde(rename = "HTTP", alias = "http", alias = "Http")]
    Http,
    #[serde(rename = "TCP", alias = "tcp", alias = "Tcp")]
    Tcp,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Http => f.write_str("HTTP"),
            ProxyMode::Tcp => f.write_str("TCP"),
        }
    }
}

impl FromStr for ProxyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(ProxyMode::Http),
            "TCP" => Ok(ProxyMode::Tcp),
            _ => Err(ConfigError::BadMode(s.to_string())),
        }
    }
}

/// The `StartSession` command: everything needed to run one grading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Backend executable, launched with `backend_port` as its only argument.
    pub server_path: PathBuf,
    /// Frontend executable, launched once the proxy is up.
    pub client_path: PathBuf,
    pub listen_port: u16,
    pub backend_port: u16,
    pub mode: ProxyMode,
    /// `appsettings.json` template copied next to the backend before launch.
    #[serde(default)]
    pub server_template: Option<PathBuf>,
    /// `appsettings.json` template copied next to the frontend before launch.
    #[serde(default)]
    pub client_template: Option<PathBuf>,
}
