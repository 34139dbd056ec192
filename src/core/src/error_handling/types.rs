use std::fmt;

use crate::session_management::SessionState;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadPortsRange(String),
    BadMode(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::BadMode(e) => write!(f, "Unknown proxy mode: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    ConnectionFailed(std::io::Error),
    AcceptFailed(std::io::Error),
    TaskFailed(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            NetworkError::AcceptFailed(e) => write!(f, "Accept failed: {}", e),
            NetworkError::TaskFailed(e) => write!(f, "Proxy task failed: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Failure while forwarding one HTTP exchange to the backend.
///
/// Returned from the hyper service so the connection is closed without a
/// response to the caller.
#[derive(Debug)]
pub enum ProxyError {
    BodyRead(String),
    Forward(String),
    ResponseRead(String),
    ResponseBuild(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::BodyRead(e) => write!(f, "Failed to read request body: {}", e),
            ProxyError::Forward(e) => write!(f, "HTTP forward error: {}", e),
            ProxyError::ResponseRead(e) => write!(f, "Failed to read backend response: {}", e),
            ProxyError::ResponseBuild(e) => write!(f, "Failed to build response: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {}

#[derive(Debug)]
pub enum ProcessError {
    NotFound(String),
    SpawnFailed(String, std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::NotFound(p) => write!(f, "Executable not found: {}", p),
            ProcessError::SpawnFailed(p, e) => write!(f, "Failed to spawn {}: {}", p, e),
        }
    }
}

impl std::error::Error for ProcessError {}

#[derive(Debug)]
pub enum SessionError {
    InvalidState(SessionState),
    ProcessError(ProcessError),
    NetworkError(NetworkError),
    StorageError(StorageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidState(s) => {
                write!(f, "Operation not allowed while session is {:?}", s)
            }
            SessionError::ProcessError(e) => write!(f, "Process error: {}", e),
            SessionError::NetworkError(e) => write!(f, "Network error: {}", e),
            SessionError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ProcessError> for SessionError {
    fn from(err: ProcessError) -> Self {
        SessionError::ProcessError(err)
    }
}

impl From<NetworkError> for SessionError {
    fn from(err: NetworkError) -> Self {
        SessionError::NetworkError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    WriteFailed,
    ReadFailed,
    SerializationFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::SerializationFailed(e) => write!(f, "Serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum TemplateError {
    ExecutableNotFound(String),
    TemplateNotFound(String),
    DirectoryNotFound(String),
    IoError(std::io::Error),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::ExecutableNotFound(p) => write!(f, "Executable not found: {}", p),
            TemplateError::TemplateNotFound(p) => write!(f, "Template not found: {}", p),
            TemplateError::DirectoryNotFound(p) => write!(f, "Target directory not found: {}", p),
            TemplateError::IoError(e) => write!(f, "Template IO error: {}", e),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<std::io::Error> for TemplateError {
    fn from(err: std::io::Error) -> Self {
        TemplateError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    SessionError(SessionError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::SessionError(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}
