//! Shared harness for relay integration tests.
//!
//! Provides a tokio echo server to stand in for the relay target and a
//! helper that starts a relay in front of it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tcprelay::config::RelayConfig;
use tcprelay::RelayHandle;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Upper bound for any single network wait in tests
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Echo server: writes back everything it reads and closes on EOF.
pub struct EchoServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(echo(stream));
            }
        });

        Self { addr, task }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn echo(mut stream: TcpStream) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Relay configuration for tests: ephemeral listen port, short poll timeout
pub fn relay_config(target: impl ToString) -> RelayConfig {
    RelayConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        target_addr: target.to_string(),
        poll_timeout: Duration::from_millis(20),
        ..RelayConfig::default()
    }
}

/// An echo server with a relay in front of it
pub struct RelayHarness {
    pub relay: RelayHandle,
    pub echo: EchoServer,
}

impl RelayHarness {
    pub async fn spawn() -> Self {
        Self::spawn_with_chunk_size(RelayConfig::default().chunk_size).await
    }

    pub async fn spawn_with_chunk_size(chunk_size: usize) -> Self {
        let echo = EchoServer::spawn().await;
        let mut config = relay_config(echo.addr);
        config.chunk_size = chunk_size;
        let relay = RelayHandle::spawn(&config).unwrap();
        Self { relay, echo }
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay.local_addr()
    }

    pub async fn connect(&self) -> TcpStream {
        tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(self.relay_addr()))
            .await
            .expect("connect timed out")
            .expect("connect failed")
    }

    /// Wait until the relay reports `expected` live pairs
    pub async fn wait_for_active_pairs(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
        while self.relay.stats().active_pairs != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} active pairs, relay reports {}",
                expected,
                self.relay.stats().active_pairs
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Send `message`, read back exactly as many bytes
pub async fn echo_roundtrip(stream: &mut TcpStream, message: &[u8]) -> Vec<u8> {
    stream.write_all(message).await.unwrap();
    let mut reply = vec![0u8; message.len()];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .expect("echo timed out")
        .expect("echo read failed");
    reply
}
