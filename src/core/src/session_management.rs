//! Session management core module.
//!
//! One grading session at a time: launch the backend, put the proxy in front
//! of it, launch the frontend, collect traffic and stages, then tear it all
//! down and persist the logs.

use serde::{Deserialize, Serialize};

/// Submodule for the state owned by a running session.
pub mod active_session;
/// `appsettings.json` templating applied before launch.
pub mod app_settings;
/// Child process ownership and termination.
pub mod managed_process;
/// Session summary data structures.
pub mod session;
/// The session state machine.
pub mod session_controller;
/// Console snapshot sources.
pub mod snapshot;

pub use session::SessionSummary;
pub use session_controller::{ControllerSettings, SessionController};

/// Lifecycle of the controller: `Idle -> Starting -> Running -> Stopping -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}
