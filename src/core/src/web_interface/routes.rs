use std::sync::Arc;

use log::{debug, error};
use serde::Serialize;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, StageLine, StartResponse, StartSessionBody, StatusResponse};
use crate::configuration::config::Config;
use crate::configuration::types::SessionRequest;
use crate::error_handling::types::SessionError;
use crate::session_management::SessionController;

/// A JSON body with its status code.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl ApiReply {
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    fn ok<T: Serialize>(value: &T) -> Self {
        Self::json(StatusCode::OK, value)
    }

    fn error(status: StatusCode, message: String) -> Self {
        Self {
            status,
            body: serde_json::to_value(ApiError { message }).unwrap_or_default(),
        }
    }

    fn from_session_error(e: SessionError) -> Self {
        let status = match e {
            SessionError::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::error(status, e.to_string())
    }
}

impl Reply for ApiReply {
    fn into_response(self) -> reply::Response {
        reply::with_status(reply::json(&self.body), self.status).into_response()
    }
}

pub fn status(controller: &SessionController) -> ApiReply {
    ApiReply::ok(&StatusResponse {
        state: controller.state(),
        record_count: controller.sink().len(),
        stage_count: controller.recorder().len(),
    })
}

pub async fn start_session(controller: Arc<SessionController>, request: SessionRequest) -> ApiReply {
    debug!("API start request: {:?}", request);
    match controller.start(request).await {
        Ok(session_id) => ApiReply::ok(&StartResponse { session_id }),
        Err(e) => ApiReply::from_session_error(e),
    }
}

pub async fn stop_session(controller: Arc<SessionController>) -> ApiReply {
    match controller.stop().await {
        Ok(summary) => ApiReply::ok(&summary),
        Err(e) => {
            error!("API stop failed: {}", e);
            ApiReply::from_session_error(e)
        }
    }
}

pub async fn capture(controller: Arc<SessionController>) -> ApiReply {
    ApiReply::ok(&controller.trigger_capture().await)
}

pub async fn record_stage(controller: Arc<SessionController>, body: StageLine) -> ApiReply {
    ApiReply::ok(&controller.record_stage(&body.line).await)
}

fn with_controller(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = (Arc<SessionController>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

/// GET /status
pub fn status_route(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<SessionController>| status(&controller))
}

/// GET /records
pub fn records_route(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("records")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<SessionController>| reply::json(&controller.records()))
}

/// GET /stages
pub fn stages_route(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("stages")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<SessionController>| reply::json(&controller.stages()))
}

/// POST /session/start
pub fn start_route(
    controller: Arc<SessionController>,
    defaults: Arc<Config>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("session" / "start")
        .and(warp::post())
        .and(with_controller(controller))
        .and(warp::body::json::<StartSessionBody>())
        .and_then(move |controller, body: StartSessionBody| {
            let request = body.into_request(&defaults);
            async move { Ok::<_, Rejection>(start_session(controller, request).await) }
        })
}

/// POST /session/stop
pub fn stop_route(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("session" / "stop")
        .and(warp::post())
        .and(with_controller(controller))
        .and_then(|controller| async move { Ok::<_, Rejection>(stop_session(controller).await) })
}

/// POST /session/capture
pub fn capture_route(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("session" / "capture")
        .and(warp::post())
        .and(with_controller(controller))
        .and_then(|controller| async move { Ok::<_, Rejection>(capture(controller).await) })
}

/// POST /session/stages
pub fn record_stage_route(
    controller: Arc<SessionController>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("session" / "stages")
        .and(warp::post())
        .and(with_controller(controller))
        .and(warp::body::json::<StageLine>())
        .and_then(|controller, body| async move {
            Ok::<_, Rejection>(record_stage(controller, body).await)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ProxyMode;
    use crate::session_management::{ControllerSettings, SessionState};
    use crate::storage::FileStorage;
    use tempfile::TempDir;

    fn controller(dir: &TempDir) -> Arc<SessionController> {
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        Arc::new(SessionController::new(storage, ControllerSettings::default()))
    }

    #[test]
    fn test_status_when_idle() {
        let dir = TempDir::new().unwrap();
        let reply = status(&controller(&dir));

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            reply.body,
            serde_json::json!({ "state": "Idle", "record_count": 0, "stage_count": 0 })
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle_returns_null() {
        let dir = TempDir::new().unwrap();
        let reply = stop_session(controller(&dir)).await;

        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.body.is_null());
    }

    #[tokio::test]
    async fn test_capture_when_idle_returns_null() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        assert!(capture(controller.clone()).await.body.is_null());
        let reply = record_stage(
            controller,
            StageLine {
                line: "Enter title:".into(),
            },
        )
        .await;
        assert!(reply.body.is_null());
    }

    #[tokio::test]
    async fn test_start_failure_is_server_error() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let request = SessionRequest {
            server_path: dir.path().join("missing-server"),
            client_path: dir.path().join("missing-client"),
            listen_port: 0,
            backend_port: 1,
            mode: ProxyMode::Http,
            server_template: None,
            client_template: None,
        };

        let reply = start_session(controller.clone(), request).await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body["message"]
            .as_str()
            .unwrap()
            .contains("missing-server"));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_start_body_falls_back_to_config() {
        let body: StartSessionBody = serde_json::from_value(serde_json::json!({
            "server_path": "/opt/submission/Server",
            "client_path": "/opt/submission/Client",
            "backend_port": 6001,
            "mode": "TCP"
        }))
        .unwrap();

        let request = body.into_request(&Config::default());

        assert_eq!(request.listen_port, 5000);
        assert_eq!(request.backend_port, 6001);
        assert_eq!(request.mode, ProxyMode::Tcp);
        assert_eq!(request.server_template, None);
    }

    #[test]
    fn test_invalid_state_maps_to_conflict() {
        let reply = ApiReply::from_session_error(SessionError::InvalidState(SessionState::Running));
        assert_eq!(reply.status, StatusCode::CONFLICT);
    }
}
