use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::configuration::config::Config;
use crate::data_capture::types::StageEvent;
use crate::error_handling::types::*;
use crate::session_management::{ControllerSettings, SessionController};
use crate::storage::FileStorage;
use crate::web_interface::WebServer;

/// Wires configuration, storage, the session controller and the control API.
pub struct Controller {
    pub config: Config,
    session: Arc<SessionController>,
    stage_rx: Option<mpsc::UnboundedReceiver<StageEvent>>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let storage = FileStorage::new(&config.storage_dir).map_err(|e| {
            error!("[!] Unable to prepare {}: {}", config.storage_dir.display(), e);
            ControllerError::StorageError(e)
        })?;

        let session = Arc::new(SessionController::new(
            Arc::new(storage),
            ControllerSettings::from(&config),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        session.recorder().subscribe(tx);

        Ok(Self {
            config,
            session,
            stage_rx: Some(rx),
        })
    }

    pub fn session(&self) -> Arc<SessionController> {
        Arc::clone(&self.session)
    }

    /// Address of the control API.
    pub fn api_addr(&self) -> Result<SocketAddr, ControllerError> {
        let ip: IpAddr = self.config.api_bind.parse().map_err(|_| {
            ControllerError::ConfigurationError(ConfigError::NotInRange(format!(
                "api_bind is not an IP address: {}",
                self.config.api_bind
            )))
        })?;
        Ok(SocketAddr::new(ip, self.config.api_port))
    }

    /// Serves the control API until Ctrl-C, then stops any running session.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        let addr = self.api_addr()?;

        if let Some(mut rx) = self.stage_rx.take() {
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    info!("Stage {} reached: {}", event.stage, first_line(&event.raw_line));
                }
                debug!("Stage channel closed");
            });
        }

        let server = WebServer::new(self.session(), self.config.clone());
        tokio::select! {
            _ = server.start(addr) => warn!("Control API exited"),
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("[!] Unable to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
            }
        }

        self.shutdown().await
    }

    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        match self.session.stop().await {
            Ok(Some(summary)) => {
                info!(
                    "Session {} closed on shutdown ({} record(s))",
                    summary.session_id, summary.record_count
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!("[!] Failed to stop the session: {}", e);
                Err(ControllerError::SessionError(e))
            }
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}
