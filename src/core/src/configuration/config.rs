use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration structure that defines all runtime parameters.
///
/// Values come from an optional TOML file and can be overridden on the
/// command line through [`CliArgs`]. Every field has a default so an empty
/// file (or no file at all) yields a usable configuration.
///
/// # Examples
///
/// ```
/// use gradeproxy::configuration::config::Config;
///
/// let config = Config::from_toml_str("listen_port = 6000\nmode = \"TCP\"").unwrap();
/// assert_eq!(config.listen_port, 6000);
/// assert_eq!(config.backend_port, 5001);
/// ```
///
/// # Fields Overview
///
/// - `listen_port`: port the proxy listens on, the frontend connects here
/// - `backend_port`: port passed to the backend executable, the proxy forwards here
/// - `mode`: `HTTP` or `TCP`
/// - `frontend_delay_ms`: settle delay between proxy start and frontend launch
/// - `shutdown_grace_ms`: how long a child gets to exit before it is force-killed
/// - `final_capture_on_stop`: take one last console capture when the session stops
/// - `api_bind` / `api_port`: where the control API listens
/// - `storage_dir`: root directory for persisted session logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_port: u16,
    pub backend_port: u16,
    pub mode: ProxyMode,
    pub frontend_delay_ms: u64,
    pub shutdown_grace_ms: u64,
    pub final_capture_on_stop: bool,
    pub api_bind: String,
    pub api_port: u16,
    pub storage_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 5000,
            backend_port: 5001,
            mode: ProxyMode::Http,
            frontend_delay_ms: 1500,
            shutdown_grace_ms: 2000,
            final_capture_on_stop: true,
            api_bind: "127.0.0.1".to_string(),
            api_port: 8088,
            storage_dir: PathBuf::from("grading-logs"),
        }
    }
}

/// Command-line arguments. Anything given here wins over the file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gradeproxy")]
#[command(version)]
#[command(about = "Intercepting proxy harness for grading client/server submissions")]
pub struct CliArgs {
    /// Optional TOML configuration file
    pub config_file: Option<PathBuf>,

    /// Port the proxy listens on
    #[arg(long, env = "GRADEPROXY_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Port the backend executable is told to listen on
    #[arg(long, env = "GRADEPROXY_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// Proxy mode, `HTTP` or `TCP`
    #[arg(long)]
    pub mode: Option<String>,

    /// Port of the control API
    #[arg(long, env = "GRADEPROXY_API_PORT")]
    pub api_port: Option<u16>,

    /// Root directory for session logs
    #[arg(long, env = "GRADEPROXY_LOG_DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Builds the effective configuration: file (or defaults), then CLI overrides.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };

        if let Some(port) = args.listen_port {
            config.listen_port = port;
        }
        if let Some(port) = args.backend_port {
            config.backend_port = port;
        }
        if let Some(mode) = &args.mode {
            config.mode = mode.parse()?;
        }
        if let Some(port) = args.api_port {
            config.api_port = port;
        }
        if let Some(dir) = &args.storage_dir {
            config.storage_dir = dir.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_port == self.backend_port {
            return Err(ConfigError::BadPortsRange(format!(
                "listen_port and backend_port are both {}",
                self.listen_port
            )));
        }
        if self.api_port == self.listen_port || self.api_port == self.backend_port {
            return Err(ConfigError::BadPortsRange(format!(
                "api_port {} collides with a proxy port",
                self.api_port
            )));
        }
        if self.shutdown_grace_ms == 0 || self.shutdown_grace_ms > 60_000 {
            return Err(ConfigError::NotInRange(format!(
                "shutdown_grace_ms must be within 1..=60000, got {}",
                self.shutdown_grace_ms
            )));
        }
        Ok(())
    }

    pub fn frontend_delay(&self) -> Duration {
        Duration::from_millis(self.frontend_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
