//! Connection tracking for the session server
//!
//! This module handles the transport-level view of connected clients:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Address lookup for routing incoming packets to a player ID
//! - Liveness tracking fed by any packet, including heartbeats
//! - Client capacity management
//!
//! Which lobby a client plays in is not tracked here; that belongs to the
//! session registry.

use log::info;
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Clients silent for longer than this are dropped
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents a connected client
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server, doubles as player ID
    pub id: PlayerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Enforces the capacity limit and hands out monotonically increasing IDs,
/// starting from 1, that are never reused within a server run.
pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    next_client_id: PlayerId,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a client. Returns true if the client was found and removed.
    pub fn remove_client(&mut self, client_id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks the client at `addr` as alive and returns its ID
    pub fn touch_by_addr(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.touch();
        Some(client.id)
    }

    pub fn get_addr(&self, client_id: PlayerId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Addresses of the given clients, skipping any that are gone
    pub fn get_addrs(&self, client_ids: &[PlayerId]) -> Vec<(PlayerId, SocketAddr)> {
        client_ids
            .iter()
            .filter_map(|id| self.get_addr(*id).map(|addr| (*id, addr)))
            .collect()
    }

    /// Checks for and removes timed-out clients, returning their IDs
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
