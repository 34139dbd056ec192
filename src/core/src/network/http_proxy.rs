//! HTTP mode: one hyper connection per accepted socket, each request
//! forwarded to the backend with reqwest and logged once the exchange ends.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, trace};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::data_capture::log_sink::LogSink;
use crate::data_capture::types::TrafficRecord;
use crate::error_handling::types::{NetworkError, ProxyError};

/// Forwards requests to `127.0.0.1:{backend_port}` and records every exchange.
pub struct HttpForwarder {
    client: reqwest::Client,
    listen_port: u16,
    backend_port: u16,
    sink: Arc<LogSink>,
}

struct BackendReply {
    status: StatusCode,
    content_type: Option<hyper::header::HeaderValue>,
    body: Bytes,
}

impl HttpForwarder {
    pub fn new(
        listen_port: u16,
        backend_port: u16,
        sink: Arc<LogSink>,
    ) -> Result<Self, NetworkError> {
        // Responses pass through untouched: no redirect following, no env proxies.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| NetworkError::TaskFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            listen_port,
            backend_port,
            sink,
        })
    }

    fn record_url(&self, headers: &HeaderMap, path_and_query: &str) -> String {
        let host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("localhost:{}", self.listen_port));
        format!("http://{}{}", host, path_and_query)
    }

    async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        content_type: Option<hyper::header::HeaderValue>,
        body: Bytes,
    ) -> Result<BackendReply, ProxyError> {
        let target = format!("http://127.0.0.1:{}{}", self.backend_port, path_and_query);
        trace!("forwarding {} {}", method, target);

        let mut builder = self.client.request(method, &target).body(body);
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::Forward(format!("{}: {}", target, e)))?;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::ResponseRead(e.to_string()))?;

        Ok(BackendReply {
            status,
            content_type,
            body,
        })
    }

    /// Handles one inbound request. An `Err` makes hyper drop the connection
    /// without writing a response.
    pub async fn handle(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, ProxyError> {
        let method = req.method().clone();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let url = self.record_url(req.headers(), &path_and_query);
        let content_type = req.headers().get(CONTENT_TYPE).cloned();

        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                error!("Failed to read request body for {} {}: {}", method, url, e);
                ProxyError::BodyRead(e.to_string())
            })?
            .to_bytes();
        let request_payload = String::from_utf8_lossy(&body).into_owned();

        let reply = match self
            .forward(method.clone(), &path_and_query, content_type, body)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!("Proxy error on {} {}: {}", method, url, e);
                self.sink.append(TrafficRecord::http(
                    method.as_str(),
                    url,
                    0,
                    request_payload,
                    String::new(),
                ));
                return Err(e);
            }
        };

        let status = reply.status.as_u16() as u32;
        let response_payload = String::from_utf8_lossy(&reply.body).into_owned();
        let mut response = Response::builder().status(reply.status);
        if let Some(ct) = reply.content_type {
            response = response.header(CONTENT_TYPE, ct);
        }
        let response = response
            .body(Full::new(reply.body))
            .map_err(|e| ProxyError::ResponseBuild(e.to_string()))?;

        // Stamped once the reply is ready to go back to the caller.
        self.sink.append(TrafficRecord::http(
            method.as_str(),
            url,
            status,
            request_payload,
            response_payload,
        ));
        Ok(response)
    }
}

/// Serves HTTP/1.1 on `stream` until the peer closes or `token` is cancelled.
pub async fn serve_connection(
    stream: TcpStream,
    forwarder: Arc<HttpForwarder>,
    token: CancellationToken,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let forwarder = Arc::clone(&forwarder);
        async move { forwarder.handle(req).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                debug!("HTTP connection closed: {}", e);
            }
        }
        _ = token.cancelled() => {
            trace!("HTTP connection dropped on cancellation");
        }
    }
}
