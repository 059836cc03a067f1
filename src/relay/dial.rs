//! Outbound connections to the fixed upstream target.

use anyhow::{anyhow, Context};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// Dials the configured target with a blocking connect.
///
/// The target is resolved on every call so DNS changes are picked up
/// without restarting the relay.
#[derive(Debug, Clone)]
pub struct Dialer {
    target: String,
    connect_timeout: Option<Duration>,
}

impl Dialer {
    pub fn new(target: impl Into<String>, connect_timeout: Option<Duration>) -> Self {
        Self {
            target: target.into(),
            connect_timeout,
        }
    }

    /// The target as configured (`host:port`)
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Connect to the first resolved address that accepts. The returned
    /// stream is still in blocking mode.
    pub fn connect(&self) -> Result<(TcpStream, SocketAddr)> {
        let addrs: Vec<SocketAddr> = self
            .target
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve target {}", self.target))?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match self.try_connect_to_address(addr) {
                Ok(stream) => {
                    debug!("Connected to target {}", addr);
                    return Ok((stream, addr));
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(anyhow!("Failed to connect to target {}: {}", self.target, e)),
            None => Err(anyhow!(
                "Failed to connect to target {}: no addresses resolved",
                self.target
            )),
        }
    }

    fn try_connect_to_address(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connects_to_listening_target() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = Dialer::new(addr.to_string(), None);
        let (_stream, connected) = dialer.connect().unwrap();
        assert_eq!(connected, addr);
    }

    #[test]
    fn test_refused_target_reports_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let dialer = Dialer::new(addr.to_string(), Some(Duration::from_secs(2)));
        let err = dialer.connect().unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }

    #[test]
    fn test_unresolvable_target_reports_error() {
        let dialer = Dialer::new("not a host", None);
        assert!(dialer.connect().is_err());
        assert_eq!(dialer.target(), "not a host");
    }
}
