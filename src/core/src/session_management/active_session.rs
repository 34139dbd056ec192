use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::configuration::types::ProxyMode;
use crate::network::ProxyEngine;
use crate::session_management::managed_process::ManagedProcess;

/// Everything owned by the session currently running.
pub struct ActiveSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: ProxyMode,
    /// Parent of the proxy's token; cancelled first on stop.
    pub token: CancellationToken,
    pub engine: Option<ProxyEngine>,
    pub backend: ManagedProcess,
    pub frontend: ManagedProcess,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        // Stops the proxy's accept loop even when the session is dropped
        // without going through `stop`.
        self.token.cancel();
    }
}
