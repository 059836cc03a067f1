//! Listening socket setup.

use anyhow::Context;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

use crate::Result;

/// Bind a non-blocking, address-reusing listener with the given backlog.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("Failed to create listening socket")?;

    socket
        .set_reuse_address(true)
        .context("Failed to set SO_REUSEADDR")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind relay listener to {}", addr))?;
    socket
        .listen(backlog as i32)
        .with_context(|| format!("Failed to listen on {}", addr))?;
    socket
        .set_nonblocking(true)
        .context("Failed to make listener non-blocking")?;

    Ok(TcpListener::from_std(socket.into()))
}
