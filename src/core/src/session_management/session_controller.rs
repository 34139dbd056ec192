use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::configuration::config::Config;
use crate::configuration::types::SessionRequest;
use crate::data_capture::types::{StageEvent, TrafficRecord};
use crate::data_capture::{LogSink, StageRecorder};
use crate::error_handling::types::SessionError;
use crate::network::ProxyEngine;
use crate::session_management::active_session::ActiveSession;
use crate::session_management::app_settings::{AppSettingsReplacer, ConfigTemplater};
use crate::session_management::managed_process::ManagedProcess;
use crate::session_management::session::SessionSummary;
use crate::session_management::snapshot::{NullSnapshotProvider, SnapshotProvider};
use crate::session_management::SessionState;
use crate::storage::Storage;

/// Timing knobs of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Pause between proxy start and frontend launch so the backend can bind.
    pub frontend_delay: Duration,
    pub shutdown_grace: Duration,
    pub final_capture_on_stop: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            frontend_delay: Duration::from_millis(1500),
            shutdown_grace: Duration::from_millis(2000),
            final_capture_on_stop: true,
        }
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            frontend_delay: config.frontend_delay(),
            shutdown_grace: config.shutdown_grace(),
            final_capture_on_stop: config.final_capture_on_stop,
        }
    }
}

/// Drives one grading session at a time.
///
/// The state lives behind a `std::sync::Mutex` so check-and-set is atomic and
/// never held across an await; the running session's resources live behind a
/// `tokio::sync::Mutex` because start and stop await while holding them.
///
/// # Fields Overview
///
/// - `sink`: shared traffic log, handed to every proxy task
/// - `recorder`: stage recorder fed by console captures
/// - `storage`: where logs go when a session stops
/// - `snapshots`: console scraper used by `trigger_capture`
/// - `templater`: configuration rewriter run before each launch
pub struct SessionController {
    state: Mutex<SessionState>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    sink: Arc<LogSink>,
    recorder: Arc<StageRecorder>,
    storage: Arc<dyn Storage>,
    snapshots: Arc<dyn SnapshotProvider>,
    templater: Arc<dyn ConfigTemplater>,
    settings: ControllerSettings,
}

impl SessionController {
    pub fn new(storage: Arc<dyn Storage>, settings: ControllerSettings) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            active: tokio::sync::Mutex::new(None),
            sink: Arc::new(LogSink::new()),
            recorder: Arc::new(StageRecorder::new()),
            storage,
            snapshots: Arc::new(NullSnapshotProvider),
            templater: Arc::new(AppSettingsReplacer),
            settings,
        }
    }

    pub fn with_snapshot_provider(mut self, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_templater(mut self, templater: Arc<dyn ConfigTemplater>) -> Self {
        self.templater = templater;
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!("Session state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(SessionError::InvalidState(*state));
        }
        debug!("Session state {:?} -> {:?}", from, to);
        *state = to;
        Ok(())
    }

    pub fn sink(&self) -> Arc<LogSink> {
        Arc::clone(&self.sink)
    }

    pub fn recorder(&self) -> Arc<StageRecorder> {
        Arc::clone(&self.recorder)
    }

    pub fn records(&self) -> Vec<TrafficRecord> {
        self.sink.snapshot()
    }

    pub fn stages(&self) -> Vec<StageEvent> {
        self.recorder.get_all()
    }

    /// Launches backend, proxy and frontend for `request`.
    ///
    /// Rejected unless idle. Any failure undoes what was already started and
    /// leaves the controller idle, as does dropping the returned future.
    pub async fn start(&self, request: SessionRequest) -> Result<Uuid, SessionError> {
        self.transition(SessionState::Idle, SessionState::Starting)?;
        let guard = IdleOnDrop::new(self);

        match self.launch(&request).await {
            Ok(active) => {
                let id = active.id;
                *self.active.lock().await = Some(active);
                self.set_state(SessionState::Running);
                guard.disarm();
                info!(
                    "Session {} running: {} proxy 127.0.0.1:{} -> 127.0.0.1:{}",
                    id, request.mode, request.listen_port, request.backend_port
                );
                Ok(id)
            }
            Err(e) => {
                error!("Failed to start session: {}", e);
                self.set_state(SessionState::Idle);
                guard.disarm();
                Err(e)
            }
        }
    }

    fn apply_template(&self, role: &str, exe: &Path, template: Option<&Path>) {
        let Some(template) = template else {
            return;
        };
        match self.templater.replace_config(exe, template) {
            Ok(count) => debug!("{} configuration: {} file(s) replaced", role, count),
            Err(e) => warn!("{} configuration not replaced: {}", role, e),
        }
    }

    async fn launch(&self, request: &SessionRequest) -> Result<ActiveSession, SessionError> {
        let grace = self.settings.shutdown_grace;

        self.apply_template("Server", &request.server_path, request.server_template.as_deref());
        self.apply_template("Client", &request.client_path, request.client_template.as_deref());

        let mut backend = ManagedProcess::spawn(
            "server",
            &request.server_path,
            &[request.backend_port.to_string()],
            Stdio::null(),
        )?;

        // Fresh logs before the proxy can append anything.
        self.sink.clear();
        self.recorder.reset();

        let token = CancellationToken::new();
        // Cancels the proxy if this future is dropped before the session exists.
        let cancel_on_drop = token.clone().drop_guard();
        let engine = match ProxyEngine::start(
            request.mode,
            request.listen_port,
            request.backend_port,
            Arc::clone(&self.sink),
            token.clone(),
        )
        .await
        {
            Ok(engine) => engine,
            Err(e) => {
                backend.terminate(grace).await;
                return Err(e.into());
            }
        };

        tokio::time::sleep(self.settings.frontend_delay).await;

        let frontend =
            match ManagedProcess::spawn("client", &request.client_path, &[], Stdio::inherit()) {
                Ok(process) => process,
                Err(e) => {
                    token.cancel();
                    engine.stop().await;
                    backend.terminate(grace).await;
                    return Err(e.into());
                }
            };

        self.recorder.arm();

        Ok(ActiveSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode: request.mode,
            token: cancel_on_drop.disarm(),
            engine: Some(engine),
            backend,
            frontend,
        })
    }

    fn capture_stage(&self, active: &ActiveSession, client_line: Option<&str>) -> Option<StageEvent> {
        let snapshot = |pid: Option<u32>| pid.map(|p| self.snapshots.capture(p)).unwrap_or_default();
        let server_output = snapshot(active.backend.pid());
        let event = match client_line {
            Some(line) => self.recorder.on_trigger(line, &server_output, Utc::now()),
            None => {
                let client_output = snapshot(active.frontend.pid());
                self.recorder.on_trigger(&client_output, &server_output, Utc::now())
            }
        };
        if event.is_none() {
            debug!("Capture ignored (blank or unchanged console)");
        }
        event
    }

    /// Snapshots both consoles and records a stage when the frontend's changed.
    pub async fn trigger_capture(&self) -> Option<StageEvent> {
        if self.state() != SessionState::Running {
            return None;
        }
        let active = self.active.lock().await;
        self.capture_stage(active.as_ref()?, None)
    }

    /// Records an externally captured frontend console line as a stage.
    pub async fn record_stage(&self, line: &str) -> Option<StageEvent> {
        if self.state() != SessionState::Running {
            return None;
        }
        let active = self.active.lock().await;
        self.capture_stage(active.as_ref()?, Some(line))
    }

    /// Ends the running session and persists its logs.
    ///
    /// Idle is a no-op returning `None`; a session that is still starting or
    /// already stopping is rejected. Dropping the returned future midway
    /// tears the session down without persisting and leaves the controller
    /// idle.
    pub async fn stop(&self) -> Result<Option<SessionSummary>, SessionError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                SessionState::Idle => return Ok(None),
                SessionState::Running => *state = SessionState::Stopping,
                other => return Err(SessionError::InvalidState(other)),
            }
        }
        let guard = IdleOnDrop::new(self);

        let Some(mut active) = self.active.lock().await.take() else {
            self.set_state(SessionState::Idle);
            guard.disarm();
            return Ok(None);
        };

        if self.settings.final_capture_on_stop {
            self.capture_stage(&active, None);
        }

        active.token.cancel();
        if let Some(engine) = active.engine.take() {
            engine.stop().await;
        }
        self.recorder.disarm();

        let stages = self.recorder.get_all();
        let assigned = self.sink.assign_stages(&stages);
        let records = self.sink.snapshot();
        debug!("{} of {} record(s) assigned a stage", assigned, records.len());

        if let Err(e) = self.storage.persist_records(active.id, &records) {
            error!("Failed to save records of session {}: {}", active.id, e);
        }
        if let Err(e) = self.storage.persist_stages(active.id, &stages) {
            error!("Failed to save stages of session {}: {}", active.id, e);
        }

        let grace = self.settings.shutdown_grace;
        for process in [&mut active.frontend, &mut active.backend] {
            if !process.terminate(grace).await {
                warn!("{} may still be running", process.name());
            }
        }

        let summary = SessionSummary {
            session_id: active.id,
            started_at: active.started_at,
            stopped_at: Utc::now(),
            mode: active.mode,
            record_count: records.len(),
            stage_count: stages.len(),
            storage_dir: self.storage.location(active.id),
        };

        self.set_state(SessionState::Idle);
        guard.disarm();
        info!(
            "Session {} stopped: {} record(s), {} stage(s)",
            summary.session_id, summary.record_count, summary.stage_count
        );
        Ok(Some(summary))
    }
}

/// Returns the controller to `Idle` when a start or stop future is dropped
/// before it finishes. Owned session resources clean up through their own
/// `Drop`.
struct IdleOnDrop<'a> {
    controller: &'a SessionController,
    armed: bool,
}

impl<'a> IdleOnDrop<'a> {
    fn new(controller: &'a SessionController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Session interrupted while {:?}, back to Idle",
                self.controller.state()
            );
            self.controller.set_state(SessionState::Idle);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::configuration::types::ProxyMode;
    use crate::error_handling::types::ProcessError;
    use crate::storage::FileStorage;
    use serial_test::serial;
    use std::fs;
    use std::net::Ipv4Addr;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct PidSnapshots;

    impl SnapshotProvider for PidSnapshots {
        fn capture(&self, pid: u32) -> String {
            format!("console of {}", pid)
        }
    }

    struct Fixture {
        dir: TempDir,
        storage: Arc<FileStorage>,
        server: PathBuf,
        client: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let server = Self::script(&dir, "server.sh");
            let client = Self::script(&dir, "client.sh");
            let storage = Arc::new(FileStorage::new(dir.path().join("logs")).unwrap());
            Self {
                dir,
                storage,
                server,
                client,
            }
        }

        fn script(dir: &TempDir, name: &str) -> PathBuf {
            let path = dir.path().join(name);
            fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn controller(&self) -> SessionController {
            let settings = ControllerSettings {
                frontend_delay: Duration::ZERO,
                shutdown_grace: Duration::from_secs(1),
                final_capture_on_stop: false,
            };
            SessionController::new(self.storage.clone(), settings)
        }

        fn request(&self, backend_port: u16) -> SessionRequest {
            SessionRequest {
                server_path: self.server.clone(),
                client_path: self.client.clone(),
                listen_port: free_port(),
                backend_port,
                mode: ProxyMode::Tcp,
                server_template: None,
                client_template: None,
            }
        }
    }

    fn free_port() -> u16 {
        let socket = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket.local_addr().unwrap().port()
    }

    #[tokio::test]
    #[serial]
    async fn test_start_and_stop_lifecycle() {
        let fixture = Fixture::new();
        let controller = fixture.controller();

        let id = controller.start(fixture.request(free_port())).await.unwrap();
        assert_eq!(controller.state(), SessionState::Running);

        let summary = controller.stop().await.unwrap().unwrap();
        assert_eq!(summary.session_id, id);
        assert_eq!(summary.mode, ProxyMode::Tcp);
        assert_eq!(summary.record_count, 0);
        assert_eq!(controller.state(), SessionState::Idle);

        let dir = summary.storage_dir.unwrap();
        assert!(dir.join("records.json").is_file());
        assert!(dir.join("stages.json").is_file());
        assert!(dir.starts_with(fixture.dir.path()));
    }

    #[tokio::test]
    #[serial]
    async fn test_start_while_running_is_rejected() {
        let fixture = Fixture::new();
        let controller = fixture.controller();
        controller.start(fixture.request(free_port())).await.unwrap();

        let err = controller
            .start(fixture.request(free_port()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState(SessionState::Running)
        ));
        assert_eq!(controller.state(), SessionState::Running);

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let fixture = Fixture::new();
        let controller = fixture.controller();
        assert!(controller.stop().await.unwrap().is_none());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_server_returns_to_idle() {
        let fixture = Fixture::new();
        let controller = fixture.controller();
        let mut request = fixture.request(free_port());
        request.server_path = fixture.dir.path().join("missing.sh");

        let err = controller.start(request).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::ProcessError(ProcessError::NotFound(_))
        ));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_client_releases_proxy_port() {
        let fixture = Fixture::new();
        let controller = fixture.controller();
        let mut request = fixture.request(free_port());
        request.client_path = fixture.dir.path().join("missing.sh");
        let listen_port = request.listen_port;

        assert!(controller.start(request).await.is_err());

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, listen_port))
            .await
            .is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_aborted_start_returns_to_idle() {
        let fixture = Fixture::new();
        let settings = ControllerSettings {
            frontend_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
            final_capture_on_stop: false,
        };
        let controller = Arc::new(SessionController::new(fixture.storage.clone(), settings));
        let request = fixture.request(free_port());
        let listen_port = request.listen_port;

        let pending = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.start(request).await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(controller.state(), SessionState::Starting);
        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.stop().await.unwrap().is_none());

        let mut released = false;
        for _ in 0..50 {
            if TcpListener::bind((Ipv4Addr::LOCALHOST, listen_port)).await.is_ok() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);

        let mut retry = fixture.request(free_port());
        retry.listen_port = listen_port;
        controller.start(retry).await.unwrap();
        assert_eq!(controller.state(), SessionState::Running);
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_captures_are_deduplicated_and_ignored_when_idle() {
        let fixture = Fixture::new();
        let controller = fixture
            .controller()
            .with_snapshot_provider(Arc::new(PidSnapshots));

        assert!(controller.trigger_capture().await.is_none());

        controller.start(fixture.request(free_port())).await.unwrap();
        let first = controller.trigger_capture().await.unwrap();
        assert_eq!(first.stage, 1);
        assert!(first.raw_line.starts_with("console of "));
        assert!(first.server_output.starts_with("console of "));
        assert!(controller.trigger_capture().await.is_none());

        let second = controller.record_stage("Enter a title:").await.unwrap();
        assert_eq!(second.stage, 2);
        assert_eq!(second.raw_line, "Enter a title:");

        let summary = controller.stop().await.unwrap().unwrap();
        assert_eq!(summary.stage_count, 2);
        assert!(controller.record_stage("late").await.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_traffic_is_correlated_and_persisted() {
        let fixture = Fixture::new();
        let controller = fixture.controller();
        let backend = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let request = fixture.request(backend.local_addr().unwrap().port());
        let listen_port = request.listen_port;

        controller.start(request).await.unwrap();

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, listen_port))
            .await
            .unwrap();
        let (mut upstream, _) = backend.accept().await.unwrap();
        client.write_all(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        for _ in 0..50 {
            if !controller.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        controller.record_stage("Saved.").await.unwrap();
        let summary = controller.stop().await.unwrap().unwrap();

        assert_eq!(summary.record_count, 1);
        let records = fixture.storage.load_records(summary.session_id).unwrap();
        assert_eq!(records[0].request_payload, "PING");
        assert_eq!(records[0].stage, Some(1));
        let stages = fixture.storage.load_stages(summary.session_id).unwrap();
        assert_eq!(stages[0].raw_line, "Saved.");
    }
}
