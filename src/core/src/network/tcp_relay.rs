//! Full-duplex byte relay between the frontend and the backend in TCP mode.
//!
//! Each direction runs its own loop that reads up to [`CHUNK_SIZE`] bytes,
//! forwards them unchanged and then appends one [`TrafficRecord`] per chunk.
//! The relay is generic over `AsyncRead`/`AsyncWrite` so it runs the same way
//! over sockets, in-memory duplex pipes or `tokio_test` mocks.

use std::io;
use std::sync::Arc;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::data_capture::log_sink::LogSink;
use crate::data_capture::types::{Direction, TrafficRecord};

pub const CHUNK_SIZE: usize = 8 * 1024;

/// Copies `reader` into `writer` until EOF, error or cancellation.
///
/// Returns the number of bytes relayed. On EOF the writer is shut down so the
/// peer sees the half-close.
pub async fn relay_direction<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    connection_id: u64,
    sink: &LogSink,
    token: &CancellationToken,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = token.cancelled() => {
                trace!("[conn {}] {} cancelled", connection_id, direction);
                return Ok(total);
            }
            res = reader.read(&mut buf) => res?,
        };

        if n == 0 {
            trace!("[conn {}] {} EOF", connection_id, direction);
            let _ = writer.shutdown().await;
            return Ok(total);
        }

        writer.write_all(&buf[..n]).await?;
        sink.append(TrafficRecord::tcp_chunk(direction, connection_id, &buf[..n]));
        total += n as u64;
    }
}

/// Relays `client` <-> `backend` until either direction finishes.
///
/// When one side reaches EOF or fails the other relay is dropped and both
/// streams are closed.
pub async fn relay_connection<C, B>(
    client: C,
    backend: B,
    connection_id: u64,
    sink: Arc<LogSink>,
    token: CancellationToken,
) where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let upstream = relay_direction(
        client_read,
        backend_write,
        Direction::ClientToServer,
        connection_id,
        &sink,
        &token,
    );
    let downstream = relay_direction(
        backend_read,
        client_write,
        Direction::ServerToClient,
        connection_id,
        &sink,
        &token,
    );

    tokio::select! {
        res = upstream => match res {
            Ok(bytes) => debug!("[conn {}] client side closed after {} byte(s)", connection_id, bytes),
            Err(e) => debug!("[conn {}] client -> server relay failed: {}", connection_id, e),
        },
        res = downstream => match res {
            Ok(bytes) => debug!("[conn {}] server side closed after {} byte(s)", connection_id, bytes),
            Err(e) => debug!("[conn {}] server -> client relay failed: {}", connection_id, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_single_chunk_is_forwarded_and_recorded() {
        let sink = LogSink::new();
        let token = CancellationToken::new();
        let reader = Builder::new().read(b"PING").build();
        let writer = Builder::new().write(b"PING").build();

        let n = relay_direction(reader, writer, Direction::ClientToServer, 1, &sink, &token)
            .await
            .unwrap();

        assert_eq!(n, 4);
        let records = sink.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].method, "Client -> Server");
        assert_eq!(records[0].status, 4);
        assert_eq!(records[0].request_payload, "PING");
        assert_eq!(records[0].connection_id, Some(1));
    }

    #[tokio::test]
    async fn test_each_read_becomes_one_record() {
        let sink = LogSink::new();
        let token = CancellationToken::new();
        let reader = Builder::new().read(b"hello").read(b"world").build();
        let writer = Builder::new().write(b"hello").write(b"world").build();

        relay_direction(reader, writer, Direction::ServerToClient, 3, &sink, &token)
            .await
            .unwrap();

        let summaries: Vec<_> = sink.snapshot().into_iter().map(|r| r.summary).collect();
        assert_eq!(summaries, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_full_duplex_over_pipes() {
        let sink = Arc::new(LogSink::new());
        let token = CancellationToken::new();
        let (mut client, proxy_client_side) = duplex(64 * 1024);
        let (proxy_backend_side, mut backend) = duplex(64 * 1024);

        let relay = tokio::spawn(relay_connection(
            proxy_client_side,
            proxy_backend_side,
            9,
            Arc::clone(&sink),
            token.clone(),
        ));

        client.write_all(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        backend.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING");

        backend.write_all(b"PONG").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG");

        drop(client);
        relay.await.unwrap();

        let records = sink.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].method, "Client -> Server");
        assert_eq!(records[1].method, "Server -> Client");
        assert_eq!(records[1].request_payload, "PONG");
    }

    #[tokio::test]
    async fn test_large_payload_is_byte_transparent() {
        let sink = Arc::new(LogSink::new());
        let token = CancellationToken::new();
        let (mut client, proxy_client_side) = duplex(64 * 1024);
        let (proxy_backend_side, mut backend) = duplex(64 * 1024);

        let relay = tokio::spawn(relay_connection(
            proxy_client_side,
            proxy_backend_side,
            1,
            Arc::clone(&sink),
            token.clone(),
        ));

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        client.write_all(&payload).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        backend.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);

        drop(client);
        relay.await.unwrap();

        let records = sink.snapshot();
        assert!(records.len() >= 3);
        assert!(records.iter().all(|r| r.status as usize <= CHUNK_SIZE));
        let total: u32 = records.iter().map(|r| r.status).sum();
        assert_eq!(total, 20_000);
    }

    #[tokio::test]
    async fn test_cancellation_ends_relay() {
        let sink = Arc::new(LogSink::new());
        let token = CancellationToken::new();
        let (_client, proxy_client_side) = duplex(1024);
        let (proxy_backend_side, _backend) = duplex(1024);

        let relay = tokio::spawn(relay_connection(
            proxy_client_side,
            proxy_backend_side,
            1,
            Arc::clone(&sink),
            token.clone(),
        ));

        token.cancel();
        relay.await.unwrap();
        assert!(sink.is_empty());
    }
}
