//! Relay Engine
//!
//! One thread, one readiness poller, any number of client/target pairs.
//! Every table the engine keeps is touched only from inside [`RelayEngine::poll_once`],
//! so nothing here is locked. The only blocking calls are the bounded poll
//! and the outbound dial.

use anyhow::Context;
use bytes::Buf;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dial::Dialer;
use super::event::{RelayEvent, LISTENER};
use super::listener::bind_listener;
use super::stats::RelayStats;
use super::table::{ClosedPair, Connection, ConnectionTable, Side};
use super::RelaySession;
use crate::config::RelayConfig;
use crate::Result;

const EVENTS_CAPACITY: usize = 1024;

/// Sent to the source of a write that failed mid-stream
const UNREACHABLE_NOTICE: &[u8] = b"Can't reach server\n";

/// Whether the listener may still have clients queued.
///
/// The listener is edge-triggered, so once an accept succeeds (or fails on
/// one bad entry) the backlog has to be retried without waiting for a new
/// readiness edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptState {
    /// Backlog drained; wait for readiness
    Idle,
    /// More clients may be queued; poll without blocking
    Pending,
    /// Accept failed for lack of resources; retry after a full poll timeout
    Backoff,
}

impl AcceptState {
    fn after_error(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::WouldBlock => AcceptState::Idle,
            io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => AcceptState::Pending,
            _ => AcceptState::Backoff,
        }
    }

    fn poll_timeout(self, configured: Duration) -> Duration {
        match self {
            AcceptState::Pending => Duration::ZERO,
            AcceptState::Idle | AcceptState::Backoff => configured,
        }
    }

    fn should_retry(self) -> bool {
        self != AcceptState::Idle
    }
}

/// Relays bytes between accepted clients and a fixed target
pub struct RelayEngine {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    dialer: Dialer,
    chunk_size: usize,
    poll_timeout: Duration,
    connections: ConnectionTable,
    /// Reused read buffer, `chunk_size` bytes long
    scratch: Vec<u8>,
    next_token: usize,
    accept: AcceptState,
    stats: Arc<RelayStats>,
}

impl RelayEngine {
    /// Bind the listening socket and register it with a new poller.
    ///
    /// This is the only fallible step that is not recovered locally.
    pub fn bind(config: &RelayConfig) -> Result<Self> {
        let mut listener = bind_listener(config.listen_addr, config.listen_backlog)?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        let poll = Poll::new().context("Failed to create readiness poller")?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("Failed to register listener")?;

        info!(
            "Relay listening on {} and forwarding to {}",
            local_addr, config.target_addr
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            dialer: Dialer::new(config.target_addr.clone(), config.connect_timeout),
            chunk_size: config.chunk_size,
            poll_timeout: config.poll_timeout,
            connections: ConnectionTable::new(),
            scratch: vec![0; config.chunk_size],
            next_token: LISTENER.0 + 1,
            accept: AcceptState::Idle,
            stats: Arc::new(RelayStats::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Number of live client/target pairs
    pub fn pair_count(&self) -> usize {
        self.connections.pair_count()
    }

    /// Number of connection sockets held, two per pair
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until `shutdown` is cancelled. The token is checked once per
    /// iteration, so a stop request is noticed within one poll timeout.
    ///
    /// Consumes the engine: when this returns, the listener and the poller
    /// have been closed and the listen address can be bound again.
    pub fn run(mut self, shutdown: &CancellationToken) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!("Starting relay event loop on {}", self.local_addr);

        let result = loop {
            if shutdown.is_cancelled() {
                info!("Stop requested, leaving relay event loop");
                break Ok(());
            }
            if let Err(e) = self.poll_once(&mut events) {
                break Err(e);
            }
        };

        self.close();
        result
    }

    /// One loop iteration: wait for readiness, then dispatch every event.
    pub fn poll_once(&mut self, events: &mut Events) -> Result<()> {
        let timeout = self.accept.poll_timeout(self.poll_timeout);

        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e).context("Readiness poll failed"),
        }

        let mut accepted = false;
        for event in events.iter() {
            match RelayEvent::classify(event) {
                Some(RelayEvent::Accept) => {
                    if !accepted {
                        accepted = true;
                        self.accept_and_dial();
                    }
                }
                Some(RelayEvent::Readable(token)) => self.relay_in(token),
                Some(RelayEvent::Writable(token)) => self.flush_buffer(token),
                Some(RelayEvent::Hangup(token)) => self.abort_pair(token, "hangup"),
                None => {}
            }
        }

        if self.accept.should_retry() && !accepted {
            self.accept_and_dial();
        }

        Ok(())
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Serve exactly one queued client: accept it, dial the target, and
    /// either pair the two or tell the client why it is being dropped.
    fn accept_and_dial(&mut self) {
        let (mut client, client_addr) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                self.accept = AcceptState::after_error(e.kind());
                match self.accept {
                    AcceptState::Idle => {}
                    AcceptState::Pending => debug!("Transient accept failure: {}", e),
                    AcceptState::Backoff => warn!("Failed to accept client connection: {}", e),
                }
                return;
            }
        };
        self.accept = AcceptState::Pending;
        debug!("Accepted client {}", client_addr);

        match self.dialer.connect() {
            Ok((target, target_addr)) => {
                if let Err(e) = self.establish(client, client_addr, target, target_addr) {
                    warn!(client_addr = %client_addr, "Failed to set up relay pair: {}", e);
                }
            }
            Err(e) => {
                warn!(client_addr = %client_addr, "Rejecting client: {:#}", e);
                self.stats.record_dial_failure();
                let notice = format!("Can't connect to {}\n", self.dialer.target());
                send_notice(&mut client, notice.as_bytes());
                let _ = client.shutdown(Shutdown::Write);
            }
        }
    }

    fn establish(
        &mut self,
        client: TcpStream,
        client_addr: SocketAddr,
        target: std::net::TcpStream,
        target_addr: SocketAddr,
    ) -> io::Result<()> {
        target.set_nonblocking(true)?;
        let target = TcpStream::from_std(target);

        let client_token = self.next_token();
        let target_token = self.next_token();
        let mut client = Connection::new(client, Side::Client, client_token);
        let mut target = Connection::new(target, Side::Target, client_token);

        let registry = self.poll.registry();
        client.sync_interest(registry, client_token)?;
        if let Err(e) = target.sync_interest(registry, target_token) {
            client.deregister(registry);
            return Err(e);
        }

        let session = RelaySession::new(
            format!("relay-{}", client_token.0),
            client_addr,
            target_addr,
        );
        info!(
            session_id = %session.session_id,
            client_addr = %client_addr,
            target_addr = %target_addr,
            "Relay session established"
        );

        self.connections
            .insert_pair(client_token, client, target_token, target, session);
        self.stats.record_pair_opened();
        Ok(())
    }

    /// Read everything currently available on `token` and forward it to
    /// the peer, one chunk at a time.
    fn relay_in(&mut self, token: Token) {
        let mut chunk = std::mem::take(&mut self.scratch);
        chunk.resize(self.chunk_size, 0);
        self.drain_readable(token, &mut chunk);
        self.scratch = chunk;
    }

    fn drain_readable(&mut self, token: Token, chunk: &mut [u8]) {
        loop {
            let Some(conn) = self.connections.get_mut(token) else {
                return;
            };
            if conn.read_closed {
                return;
            }

            match conn.stream.read(chunk) {
                Ok(0) => {
                    self.half_close(token);
                    return;
                }
                Ok(n) => {
                    if !self.forward(token, &chunk[..n]) {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Read on {:?} failed: {}", token, e);
                    self.abort_pair(token, "read error");
                    return;
                }
            }
        }
    }

    /// Hand `data` read from `source` to its peer. Anything the peer cannot
    /// take right now is queued behind earlier data, never ahead of it.
    ///
    /// Returns `false` once the pair has been torn down.
    fn forward(&mut self, source: Token, data: &[u8]) -> bool {
        let Some(peer) = self.connections.peer_of(source) else {
            return false;
        };
        self.account(source, data.len());

        let Some(dest) = self.connections.get_mut(peer) else {
            return false;
        };

        if !dest.pending.is_empty() {
            dest.pending.extend_from_slice(data);
            return true;
        }

        match write_until_blocked(&mut dest.stream, data) {
            Ok(written) if written == data.len() => true,
            Ok(written) => {
                dest.pending.extend_from_slice(&data[written..]);
                debug!(
                    "Peer {:?} backpressured, buffered {} bytes",
                    peer,
                    data.len() - written
                );
                match dest.sync_interest(self.poll.registry(), peer) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to watch {:?} for writability: {}", peer, e);
                        self.teardown(source, "register failed");
                        false
                    }
                }
            }
            Err(e) => {
                warn!("Write to {:?} failed: {}", peer, e);
                self.notify(source, UNREACHABLE_NOTICE);
                self.teardown(source, "peer unreachable");
                false
            }
        }
    }

    fn account(&mut self, source: Token, bytes: usize) {
        let Some(conn) = self.connections.get(source) else {
            return;
        };
        let (pair, side) = (conn.pair, conn.side);

        if let Some(session) = self.connections.session_mut(pair) {
            match side {
                Side::Client => session.add_bytes_up(bytes as u64),
                Side::Target => session.add_bytes_down(bytes as u64),
            }
        }
    }

    /// Write as much of `token`'s pending output as the kernel accepts.
    fn flush_buffer(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };
        if conn.pending.is_empty() {
            return;
        }

        let result = write_until_blocked(&mut conn.stream, &conn.pending);
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                warn!("Flush to {:?} failed: {}", token, e);
                if let Some(source) = self.connections.peer_of(token) {
                    self.notify(source, UNREACHABLE_NOTICE);
                }
                self.teardown(token, "peer unreachable");
                return;
            }
        };

        conn.pending.advance(written);
        if let Err(e) = conn.sync_interest(self.poll.registry(), token) {
            warn!("Failed to update interest for {:?}: {}", token, e);
            self.teardown(token, "register failed");
            return;
        }

        if conn.pending.is_empty() {
            debug!("Pending output for {:?} drained", token);
            self.after_drain(token);
        }
    }

    /// The write side deferred by a half-close can go now that nothing is
    /// queued ahead of it.
    fn after_drain(&mut self, token: Token) {
        let source_closed = self
            .connections
            .peer_of(token)
            .and_then(|peer| self.connections.get(peer))
            .is_some_and(|peer| peer.read_closed);

        if source_closed {
            if let Some(conn) = self.connections.get_mut(token) {
                conn.shutdown_write();
            }
            self.maybe_finish(token);
        }
    }

    /// The remote behind `token` finished sending. Stop reading from it and
    /// pass the close on to the peer once the peer's queue is empty.
    fn half_close(&mut self, token: Token) {
        let registry = self.poll.registry();
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };
        conn.read_closed = true;
        if let Err(e) = conn.sync_interest(registry, token) {
            warn!("Failed to update interest for {:?}: {}", token, e);
            self.teardown(token, "register failed");
            return;
        }
        debug!("Remote behind {:?} closed its write side", token);

        if let Some(peer) = self.connections.peer_of(token) {
            if let Some(peer_conn) = self.connections.get_mut(peer) {
                if peer_conn.pending.is_empty() {
                    peer_conn.shutdown_write();
                }
            }
        }

        self.maybe_finish(token);
    }

    /// Tear the pair down once both remotes stopped sending and everything
    /// read has been delivered.
    fn maybe_finish(&mut self, token: Token) {
        let Some(peer) = self.connections.peer_of(token) else {
            return;
        };

        let finished = match (self.connections.get(token), self.connections.get(peer)) {
            (Some(conn), Some(peer_conn)) => conn.is_drained() && peer_conn.is_drained(),
            _ => false,
        };

        if finished {
            self.teardown(token, "closed");
        }
    }

    /// `token` failed mid-stream. Tell its peer, then drop the pair.
    fn abort_pair(&mut self, token: Token, reason: &str) {
        if let Some(peer) = self.connections.peer_of(token) {
            self.notify(peer, UNREACHABLE_NOTICE);
        }
        self.teardown(token, reason);
    }

    /// Best-effort diagnostic to a still-open socket
    fn notify(&mut self, token: Token, message: &[u8]) {
        if let Some(conn) = self.connections.get_mut(token) {
            send_notice(&mut conn.stream, message);
        }
    }

    /// Close both sockets of the pair containing `token` and forget them.
    fn teardown(&mut self, token: Token, reason: &str) {
        let Some(ClosedPair {
            mut connections,
            session,
        }) = self.connections.remove_pair(token)
        else {
            return;
        };

        let registry = self.poll.registry();
        for conn in connections.iter_mut() {
            conn.deregister(registry);
        }
        drop(connections);

        if let Some(session) = session {
            session.log_stats(reason);
            self.stats.record_pair_closed(&session);
        }
    }

    /// Release every pair and the listener registration.
    fn close(&mut self) {
        let pairs = self.connections.pair_tokens();
        if !pairs.is_empty() {
            info!("Closing {} active relay pairs", pairs.len());
        }
        for token in pairs {
            self.teardown(token, "relay stopping");
        }

        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            warn!("Failed to deregister listener: {}", e);
        }
        info!("Relay engine on {} stopped", self.local_addr);
    }
}

/// Write until `buf` is exhausted or the socket would block. Returns how
/// much was written.
fn write_until_blocked(stream: &mut TcpStream, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

fn send_notice(stream: &mut TcpStream, message: &[u8]) {
    if let Err(e) = stream.write(message) {
        debug!("Could not deliver notice: {}", e);
    }
}
