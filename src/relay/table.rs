//! Connection bookkeeping for the relay engine.
//!
//! The registry owns every connection socket and its pending-output buffer.
//! The pairing table only maps a token to its peer's token, so closing a
//! socket always happens in exactly one place: when its registry entry is
//! dropped.

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::collections::HashMap;
use std::io;
use std::net::Shutdown;

use super::RelaySession;

/// Which end of a pair a connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Target,
}

/// One registered connection socket
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub side: Side,
    /// Token of the client socket of this pair; keys the session
    pub pair: Token,
    /// Data waiting to be written to this socket
    pub pending: BytesMut,
    /// The remote stopped sending (zero-length read observed)
    pub read_closed: bool,
    /// We shut down our write side toward the remote
    pub write_shut: bool,
    /// Interest currently registered with the multiplexer
    interest: Option<Interest>,
}

impl Connection {
    pub fn new(stream: TcpStream, side: Side, pair: Token) -> Self {
        Self {
            stream,
            side,
            pair,
            pending: BytesMut::new(),
            read_closed: false,
            write_shut: false,
            interest: None,
        }
    }

    /// Interest this connection should have given its current state
    fn desired_interest(&self) -> Option<Interest> {
        match (!self.read_closed, !self.pending.is_empty()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Bring the multiplexer registration in line with the connection's
    /// state: read interest while the remote may still send, write interest
    /// while output is buffered, nothing at all when neither applies.
    pub fn sync_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let desired = self.desired_interest();
        if desired == self.interest {
            return Ok(());
        }

        match (self.interest, desired) {
            (None, Some(interest)) => registry.register(&mut self.stream, token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(&mut self.stream, token, interest)?,
            (Some(_), None) => registry.deregister(&mut self.stream)?,
            (None, None) => {}
        }

        self.interest = desired;
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.interest.is_some()
    }

    /// Stop watching this socket entirely. Errors are irrelevant here since
    /// the socket is about to be closed.
    pub fn deregister(&mut self, registry: &Registry) {
        if self.interest.take().is_some() {
            let _ = registry.deregister(&mut self.stream);
        }
    }

    /// Half-close toward the remote once nothing more will be written
    pub fn shutdown_write(&mut self) {
        if !self.write_shut {
            self.write_shut = true;
            if let Err(e) = self.stream.shutdown(Shutdown::Write) {
                tracing::debug!("Write shutdown failed: {}", e);
            }
        }
    }

    /// Both directions finished on this socket's side of the pair
    pub fn is_drained(&self) -> bool {
        self.read_closed && self.pending.is_empty()
    }
}

/// Both connections of a pair plus their session, as removed on teardown
#[derive(Debug)]
pub struct ClosedPair {
    pub connections: [Connection; 2],
    pub session: Option<RelaySession>,
}

/// Registry, pairing table and sessions, mutated only by the engine thread
#[derive(Debug, Default)]
pub struct ConnectionTable {
    registry: HashMap<Token, Connection>,
    peers: HashMap<Token, Token>,
    sessions: HashMap<Token, RelaySession>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly established pair. Both directions of the pairing
    /// are added together.
    pub fn insert_pair(
        &mut self,
        client_token: Token,
        client: Connection,
        target_token: Token,
        target: Connection,
        session: RelaySession,
    ) {
        self.registry.insert(client_token, client);
        self.registry.insert(target_token, target);
        self.peers.insert(client_token, target_token);
        self.peers.insert(target_token, client_token);
        self.sessions.insert(client_token, session);
    }

    pub fn contains(&self, token: Token) -> bool {
        self.registry.contains_key(&token)
    }

    pub fn peer_of(&self, token: Token) -> Option<Token> {
        self.peers.get(&token).copied()
    }

    pub fn get(&self, token: Token) -> Option<&Connection> {
        self.registry.get(&token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.registry.get_mut(&token)
    }

    pub fn session_mut(&mut self, pair: Token) -> Option<&mut RelaySession> {
        self.sessions.get_mut(&pair)
    }

    /// Remove both halves of the pair containing `token`
    pub fn remove_pair(&mut self, token: Token) -> Option<ClosedPair> {
        let peer = self.peers.remove(&token)?;
        self.peers.remove(&peer);

        let conn = self.registry.remove(&token)?;
        let peer_conn = self.registry.remove(&peer)?;
        let session = self.sessions.remove(&conn.pair);

        Some(ClosedPair {
            connections: [conn, peer_conn],
            session,
        })
    }

    /// Tokens of the client side of every live pair
    pub fn pair_tokens(&self) -> Vec<Token> {
        self.sessions.keys().copied().collect()
    }

    /// Number of registered connection sockets (two per pair)
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn pair_count(&self) -> usize {
        self.sessions.len()
    }
}
