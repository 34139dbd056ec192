//! Network subsystem
//!
//! The intercepting proxy placed between the frontend and the backend.
//!
//! Components:
//! - `proxy_engine`: listener lifecycle and the per-mode accept loops.
//! - `http_proxy`: HTTP/1.1 serving and forwarding.
//! - `tcp_relay`: chunked full-duplex byte relay.

pub mod http_proxy;
pub mod proxy_engine;
pub mod tcp_relay;

pub use proxy_engine::ProxyEngine;
