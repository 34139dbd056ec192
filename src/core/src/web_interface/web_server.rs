use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use warp::Filter;

use super::routes::*;
use crate::configuration::config::Config;
use crate::session_management::SessionController;

/// Control API standing in for the desktop front panel.
pub struct WebServer {
    controller: Arc<SessionController>,
    defaults: Arc<Config>,
}

impl WebServer {
    pub fn new(controller: Arc<SessionController>, defaults: Config) -> Self {
        Self {
            controller,
            defaults: Arc::new(defaults),
        }
    }

    /// Serves the control API on `addr` until the future is dropped.
    pub async fn start(&self, addr: SocketAddr) {
        let c = &self.controller;
        let routes = status_route(c.clone())
            .or(records_route(c.clone()))
            .or(stages_route(c.clone()))
            .or(start_route(c.clone(), self.defaults.clone()))
            .or(stop_route(c.clone()))
            .or(capture_route(c.clone()))
            .or(record_stage_route(c.clone()));

        info!("Control API listening on http://{}", addr);
        warp::serve(routes).run(addr).await;
    }
}
