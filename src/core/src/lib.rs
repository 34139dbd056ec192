pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod error_handling;
pub mod network;
pub mod session_management;
pub mod storage;
pub mod web_interface;

pub use controller::Controller;
pub use session_management::{SessionController, SessionState};
