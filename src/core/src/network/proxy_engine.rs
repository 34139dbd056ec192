//! # Proxy Engine
//!
//! Sits between the frontend under test and its backend. The frontend talks
//! to `127.0.0.1:listen_port`; every connection accepted there is served on
//! its own task and forwarded to `127.0.0.1:backend_port`, with each exchange
//! appended to the session's [`LogSink`].
//!
//! ```text
//! ┌──────────┐    ┌────────────────────┐    ┌─────────┐
//! │ Frontend │───▶│ ProxyEngine        │───▶│ Backend │
//! │          │◀───│  - HTTP: hyper +   │◀───│         │
//! └──────────┘    │    reqwest forward │    └─────────┘
//!                 │  - TCP: byte relay │
//!                 └─────────┬──────────┘
//!                           ▼
//!                       LogSink
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use gradeproxy::configuration::types::ProxyMode;
//! use gradeproxy::data_capture::LogSink;
//! use gradeproxy::network::proxy_engine::ProxyEngine;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = Arc::new(LogSink::new());
//!     let token = CancellationToken::new();
//!     let engine = ProxyEngine::start(ProxyMode::Http, 5000, 5001, sink, token)
//!         .await
//!         .unwrap();
//!
//!     // ... the frontend runs against port 5000 ...
//!
//!     engine.stop().await;
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::http_proxy::{serve_connection, HttpForwarder};
use super::tcp_relay::relay_connection;
use crate::configuration::types::ProxyMode;
use crate::data_capture::log_sink::LogSink;
use crate::error_handling::types::NetworkError;

/// A running proxy listener.
///
/// Dropping the engine does not stop it; call [`ProxyEngine::stop`] or cancel
/// the parent token.
pub struct ProxyEngine {
    mode: ProxyMode,
    local_addr: SocketAddr,
    token: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl ProxyEngine {
    /// Binds `127.0.0.1:listen_port` and spawns the accept loop.
    ///
    /// The engine works on a child of `token`, so cancelling the session
    /// token stops it as well.
    ///
    /// # Errors
    ///
    /// * `NetworkError::BindError` when the port is unavailable
    /// * `NetworkError::TaskFailed` when the HTTP client cannot be built
    pub async fn start(
        mode: ProxyMode,
        listen_port: u16,
        backend_port: u16,
        sink: Arc<LogSink>,
        token: CancellationToken,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, listen_port))
            .await
            .map_err(|e| {
                error!("[!] Failed to bind proxy port {}: {}", listen_port, e);
                NetworkError::BindError(e)
            })?;
        let local_addr = listener.local_addr().map_err(NetworkError::BindError)?;
        let token = token.child_token();

        let accept_task = match mode {
            ProxyMode::Http => {
                let forwarder = Arc::new(HttpForwarder::new(
                    local_addr.port(),
                    backend_port,
                    sink,
                )?);
                tokio::spawn(accept_http(listener, forwarder, token.clone()))
            }
            ProxyMode::Tcp => tokio::spawn(accept_tcp(listener, backend_port, sink, token.clone())),
        };

        info!(
            "{} proxy listening on {} -> 127.0.0.1:{}",
            mode, local_addr, backend_port
        );

        Ok(Self {
            mode,
            local_addr,
            token,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Cancels every connection task and waits for the listener to close.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.accept_task.await {
            warn!("Proxy accept loop ended abnormally: {}", e);
        }
        info!("{} proxy on {} stopped", self.mode, self.local_addr);
    }
}

async fn accept_http(
    listener: TcpListener,
    forwarder: Arc<HttpForwarder>,
    token: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    debug!("HTTP connection from {}", peer);
                    stream
                }
                Err(e) => {
                    error!("Accept failed: {}", NetworkError::AcceptFailed(e));
                    continue;
                }
            },
        };

        tokio::spawn(serve_connection(
            stream,
            Arc::clone(&forwarder),
            token.clone(),
        ));
    }
    debug!("HTTP accept loop exited");
}

async fn accept_tcp(
    listener: TcpListener,
    backend_port: u16,
    sink: Arc<LogSink>,
    token: CancellationToken,
) {
    let next_id = AtomicU64::new(1);

    loop {
        let inbound = tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    debug!("TCP connection from {}", peer);
                    stream
                }
                Err(e) => {
                    error!("Accept failed: {}", NetworkError::AcceptFailed(e));
                    continue;
                }
            },
        };

        let connection_id = next_id.fetch_add(1, Ordering::Relaxed);
        let sink = Arc::clone(&sink);
        let token = token.clone();
        tokio::spawn(async move {
            let outbound = tokio::select! {
                _ = token.cancelled() => return,
                res = TcpStream::connect((Ipv4Addr::LOCALHOST, backend_port)) => match res {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(
                            "[conn {}] {}",
                            connection_id,
                            NetworkError::ConnectionFailed(e)
                        );
                        return;
                    }
                },
            };
            relay_connection(inbound, outbound, connection_id, sink, token).await;
        });
    }
    debug!("TCP accept loop exited");
}
