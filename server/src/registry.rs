//! Lobby directory
//!
//! Maps lobby IDs to live [`GameSession`]s and players to the lobby they are
//! in. A session is created by the first join to an unknown lobby and torn
//! down, timers included, as soon as its last player leaves. Every session
//! operation's [`Dispatch`] list is resolved here into concrete recipients.

use crate::session::{Audience, Dispatch, GameSession, SessionConfig, SessionError};
use crate::timers::{TimerEvent, TimerSender};
use crate::utils::generate_color;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Packet, PlayerId};
use std::collections::HashMap;

/// A packet and the players it must reach
#[derive(Debug, Clone)]
pub struct Delivery {
    pub packet: Packet,
    /// Player IDs in ascending order; the network layer maps them to addresses
    pub recipients: Vec<PlayerId>,
}

/// Every live lobby on the server, keyed by lobby ID
///
/// The registry is the only way into a [`GameSession`] from the network
/// loop. It keeps:
/// - the sessions themselves, created lazily and dropped when empty
/// - which lobby each player is in, so a player is in at most one
/// - the shared [`SessionConfig`] and timer sender handed to new sessions
///
/// With a fixed seed in the config, the n-th lobby created (counting from
/// zero) gets `seed + n`, which makes whole server runs reproducible.
pub struct SessionRegistry {
    sessions: HashMap<String, GameSession>,
    player_lobbies: HashMap<PlayerId, String>,
    config: SessionConfig,
    timer_tx: Option<TimerSender>,
    sessions_created: u64,
}

impl SessionRegistry {
    /// Without a timer sender sessions never tick on their own; callers
    /// drive the clock and wall shifts through [`SessionRegistry::on_timer`].
    pub fn new(config: SessionConfig, timer_tx: Option<TimerSender>) -> Self {
        Self {
            sessions: HashMap::new(),
            player_lobbies: HashMap::new(),
            config,
            timer_tx,
            sessions_created: 0,
        }
    }

    /// Settings every new lobby is created with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only view of a lobby, `None` once it has closed
    pub fn session(&self, lobby_id: &str) -> Option<&GameSession> {
        self.sessions.get(lobby_id)
    }

    /// The lobby a player is currently in
    pub fn lobby_of(&self, player_id: PlayerId) -> Option<&str> {
        self.player_lobbies.get(&player_id).map(String::as_str)
    }

    /// Number of open lobbies
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Puts a player into a lobby, creating it if needed. A player already in
    /// a different lobby leaves that one first.
    ///
    /// Joining the lobby one is already in only updates the display name.
    /// The returned deliveries include the old lobby's notice, if any,
    /// followed by the `UpdateLobby` for the new one.
    pub fn join(
        &mut self,
        player_id: PlayerId,
        lobby_id: &str,
        player_name: String,
        now_ms: u64,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        if self
            .player_lobbies
            .get(&player_id)
            .map_or(false, |current| current != lobby_id)
        {
            deliveries.extend(self.leave(player_id, now_ms));
        }

        if !self.sessions.contains_key(lobby_id) {
            let session = self.create_session(lobby_id);
            self.sessions.insert(lobby_id.to_string(), session);
        }
        self.player_lobbies.insert(player_id, lobby_id.to_string());

        let dispatches = match self.sessions.get_mut(lobby_id) {
            Some(session) => session.join(player_id, player_name, generate_color(player_id)),
            None => return deliveries,
        };
        deliveries.extend(self.resolve(lobby_id, dispatches));
        deliveries
    }

    /// Removes a player from whatever lobby they are in
    ///
    /// Called for explicit disconnects, heartbeat timeouts and reconnects
    /// from the same address. When the player was the last one the lobby is
    /// shut down and removed, and nothing is sent. Unknown players are a no-op.
    pub fn leave(&mut self, player_id: PlayerId, now_ms: u64) -> Vec<Delivery> {
        let Some(lobby_id) = self.player_lobbies.remove(&player_id) else {
            return Vec::new();
        };
        let Some(session) = self.sessions.get_mut(&lobby_id) else {
            return Vec::new();
        };

        let dispatches = session.leave(player_id, now_ms);
        if session.is_empty() {
            if let Some(mut session) = self.sessions.remove(&lobby_id) {
                session.shutdown();
            }
            info!("Lobby {} closed, {} lobbies remain", lobby_id, self.sessions.len());
            return Vec::new();
        }

        self.resolve(&lobby_id, dispatches)
    }

    /// Applies one lobby intent sent by `player_id`
    ///
    /// `JoinGame` always succeeds. Every other intent must name an existing
    /// lobby the sender belongs to, otherwise it is rejected with
    /// [`SessionError::UnknownLobby`] or [`SessionError::UnknownPlayer`].
    /// Rejections leave all state untouched and are meant to be dropped
    /// silently by the caller.
    ///
    /// A maze generation failure on start or restart is not an error here:
    /// it becomes a `StartFailed` broadcast so clients are not left waiting.
    pub fn handle_intent(
        &mut self,
        player_id: PlayerId,
        packet: Packet,
        now_ms: u64,
    ) -> Result<Vec<Delivery>, SessionError> {
        if let Packet::JoinGame {
            lobby_id,
            player_name,
        } = packet
        {
            return Ok(self.join(player_id, &lobby_id, player_name, now_ms));
        }

        let lobby_id = packet
            .lobby_id()
            .map(str::to_string)
            .ok_or(SessionError::UnsupportedIntent)?;
        let session = self
            .sessions
            .get_mut(&lobby_id)
            .ok_or_else(|| SessionError::UnknownLobby(lobby_id.clone()))?;
        if !session.contains(player_id) {
            return Err(SessionError::UnknownPlayer(player_id));
        }

        let result = match packet {
            Packet::StartGame { .. } => session.start(now_ms),
            Packet::RestartGame { .. } => session.restart(now_ms),
            Packet::Move { x, y, .. } => session.move_player(player_id, x, y, now_ms),
            Packet::PlayerOnExit { x, y, .. } => session.report_exit(player_id, x, y, now_ms),
            Packet::HitTrap { .. } => session.hit_trap(player_id),
            Packet::ActivateSwitch { .. } => session.activate_switch(player_id),
            _ => Err(SessionError::UnsupportedIntent),
        };

        let dispatches = match result {
            Err(SessionError::Generation(e)) => vec![Dispatch::lobby(Packet::StartFailed {
                reason: e.to_string(),
            })],
            other => other?,
        };
        Ok(self.resolve(&lobby_id, dispatches))
    }

    /// Routes a timer tick to its session. Ticks for closed lobbies are dropped.
    ///
    /// `now_ms` is wall-clock time in milliseconds since the Unix epoch; the
    /// clock check compares it with the round's start.
    pub fn on_timer(&mut self, event: &TimerEvent, now_ms: u64) -> Vec<Delivery> {
        let Some(session) = self.sessions.get_mut(&event.lobby_id) else {
            debug!("Dropping {:?} tick for closed lobby {}", event.kind, event.lobby_id);
            return Vec::new();
        };

        let dispatches = session.on_timer(event, now_ms);
        self.resolve(&event.lobby_id, dispatches)
    }

    fn create_session(&mut self, lobby_id: &str) -> GameSession {
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.sessions_created)),
            None => StdRng::from_entropy(),
        };
        self.sessions_created += 1;
        info!("Created lobby {}", lobby_id);

        GameSession::new(
            lobby_id.to_string(),
            self.config.clone(),
            rng,
            self.timer_tx.clone(),
        )
    }

    /// Turns audiences into the lobby's current member IDs
    fn resolve(&self, lobby_id: &str, dispatches: Vec<Dispatch>) -> Vec<Delivery> {
        let members = self
            .sessions
            .get(lobby_id)
            .map(GameSession::player_ids)
            .unwrap_or_default();

        dispatches
            .into_iter()
            .map(|dispatch| {
                let recipients = match dispatch.audience {
                    Audience::Lobby => members.clone(),
                    Audience::AllExcept(excluded) => members
                        .iter()
                        .copied()
                        .filter(|id| *id != excluded)
                        .collect(),
                    Audience::Only(id) => vec![id],
                };
                Delivery {
                    packet: dispatch.packet,
                    recipients,
                }
            })
            .filter(|delivery| !delivery.recipients.is_empty())
            .collect()
    }
}
